//! Day sequencing over a list of bookings
//!
//! Bookings are overnight stays. Sorted by arrival date, each consecutive
//! pair with known coordinates becomes one day's ride, chained by
//! [`RouteChainer`] with the previous day's [`ContinuationState`] threaded
//! through. The chains are then materialized: merged into one track, extended
//! to the hotel by a connector route where needed, profiled and written out.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::chain::{Chain, ChainOptions, ChainOutcome, ContinuationState, RouteChainer, RouteSummary};
use crate::elevation::{ElevationOptions, ElevationProfile};
use crate::geographic::distance;
use crate::index::{TrackIndex, error_chain};
use crate::measure::{Degrees, Meters};
use crate::merge::{ConnectorRouter, extend_with_connector, fetch_connector, merge, track_file_name, write_track_file};
use crate::passes::{PassOptions, PassTrack};
use crate::types::GeoPoint;

#[derive(Error, Debug)]
pub enum ItineraryError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("invalid itinerary JSON")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, ItineraryError>;

/// One overnight stay.
///
/// Fields this crate does not know about are carried through untouched.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Booking {
    pub hotel_name: String,
    pub arrival_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// The ride arriving at this stay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<DayPlan>,
    /// Side trips from this stay to nearby passes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pass_tracks: Vec<PassTrack>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Booking {
    pub fn new(hotel_name: impl Into<String>, arrival_date: NaiveDate) -> Self {
        Self {
            hotel_name: hotel_name.into(),
            arrival_date,
            latitude: None,
            longitude: None,
            route: None,
            pass_tracks: vec![],
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_coordinates(self, latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..self
        }
    }

    /// The stay's location, if both coordinates are present and valid.
    pub fn coordinates(&self) -> Option<GeoPoint> {
        let (lat, lon) = (self.latitude?, self.longitude?);
        match GeoPoint::new(Degrees(lat), Degrees(lon), None) {
            Ok(p) => Some(p),
            Err(err) => {
                warn!("Ignoring coordinates of {}: {}", self.hotel_name, err);
                None
            }
        }
    }
}

/// A problem with one day that leaves it flagged but still exported.
#[derive(Error, Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DayIssue {
    #[error("no track found near the start or the destination")]
    NoRoute,
    #[error("gave up after the maximum number of segments")]
    IterationLimit,
    #[error("ran out of connecting tracks before the destination track")]
    DestinationNotReached,
    #[error("untracked jump of {distance:.0} from {after_track} to {before_track}")]
    Gap {
        after_track: String,
        before_track: String,
        distance: Meters<f64>,
    },
    #[error("connector route failed: {reason}")]
    ConnectorFailed { reason: String },
    #[error("could not write the merged track: {reason}")]
    OutputFailed { reason: String },
}

/// The planned ride for one day.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct DayPlan {
    pub chain: Chain,
    pub outcome: Option<ChainOutcome>,
    /// In-chain running totals.
    pub statistics: Option<RouteSummary>,
    pub continuation: Option<ContinuationState>,
    /// Reported figures over the materialized track.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ElevationProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_file: Option<String>,
    #[serde(default)]
    pub connector_appended: bool,
    #[serde(default)]
    pub issues: Vec<DayIssue>,
}

impl DayPlan {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PlanOptions {
    pub chain: ChainOptions,
    pub elevation: ElevationOptions,
    /// A connector route is requested only when the merged track ends
    /// farther than this from the hotel.
    pub connector_min_gap: Meters<f64>,
    pub passes: PassOptions,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            chain: ChainOptions::default(),
            elevation: ElevationOptions::default(),
            connector_min_gap: Meters(50.0),
            passes: PassOptions::default(),
        }
    }
}

impl PlanOptions {
    pub fn with_chain(self, chain: ChainOptions) -> Self {
        Self { chain, ..self }
    }

    pub fn with_elevation(self, elevation: ElevationOptions) -> Self {
        Self { elevation, ..self }
    }

    pub fn with_connector_min_gap(self, connector_min_gap: Meters<f64>) -> Self {
        Self {
            connector_min_gap,
            ..self
        }
    }

    pub fn with_passes(self, passes: PassOptions) -> Self {
        Self { passes, ..self }
    }
}

pub fn read_bookings(path: &Path) -> Result<Vec<Booking>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_bookings(path: &Path, bookings: &[Booking]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, bookings)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn outcome_issues(outcome: ChainOutcome) -> Vec<DayIssue> {
    match outcome {
        ChainOutcome::ReachedTarget
        | ChainOutcome::Exhausted {
            destination_appended: true,
        } => vec![],
        ChainOutcome::Exhausted {
            destination_appended: false,
        } => vec![DayIssue::DestinationNotReached],
        ChainOutcome::IterationLimit => vec![DayIssue::IterationLimit],
        ChainOutcome::NoRoute => vec![DayIssue::NoRoute],
    }
}

/// Junctions where one segment ends farther than `max_gap` from where the
/// next begins.
fn junction_gaps(chain: &Chain, index: &TrackIndex, max_gap: Meters<f64>) -> Vec<DayIssue> {
    chain
        .segments()
        .windows(2)
        .filter_map(|pair| {
            let (before, after) = (&pair[0], &pair[1]);
            let from = index.get(&before.track_id)?.points().get(before.end_index)?.point;
            let to = index.get(&after.track_id)?.points().get(after.start_index)?.point;
            let gap = distance(&from, &to);
            (gap > max_gap).then(|| DayIssue::Gap {
                after_track: before.track_id.clone(),
                before_track: after.track_id.clone(),
                distance: gap,
            })
        })
        .collect()
}

/// Sort `bookings` by arrival date and chain a route into every stay whose
/// predecessor has coordinates.
///
/// Stays without coordinates, and the stay right after one, are left as they
/// are. A day that yields no route resets the continuation.
#[instrument(level = "trace", skip_all)]
pub fn sequence_days(bookings: &mut [Booking], chainer: &RouteChainer<'_>) {
    bookings.sort_by_key(|b| b.arrival_date);

    let mut prev: Option<GeoPoint> = None;
    let mut continuation: Option<ContinuationState> = None;
    for booking in bookings.iter_mut() {
        let current = booking.coordinates();
        if let (Some(from), Some(to)) = (prev, current) {
            debug!("Chaining {} ({})", booking.hotel_name, booking.arrival_date);
            let route = chainer.collect_route_between_locations(&from, &to, continuation.as_ref());
            let mut issues = outcome_issues(route.outcome);
            issues.extend(junction_gaps(
                &route.chain,
                chainer.index(),
                chainer.options().max_connection_distance,
            ));
            for issue in &issues {
                warn!("{} ({}): {}", booking.hotel_name, booking.arrival_date, issue);
            }
            continuation = route.continuation.clone();
            booking.route = Some(DayPlan {
                chain: route.chain,
                outcome: Some(route.outcome),
                statistics: route.statistics.map(|s| s.summary()),
                continuation: route.continuation,
                issues,
                ..DayPlan::default()
            });
        } else {
            debug!("Not chaining into {}: coordinates unknown", booking.hotel_name);
        }
        prev = current;
    }
}

fn materialize_day(
    booking: &mut Booking,
    index: &TrackIndex,
    options: &PlanOptions,
    router: Option<&dyn ConnectorRouter>,
    output_dir: &Path,
) {
    let destination = booking.coordinates();
    let Booking {
        hotel_name,
        arrival_date,
        route,
        ..
    } = booking;
    let (hotel_name, arrival_date) = (hotel_name.as_str(), *arrival_date);
    let Some(plan) = route.as_mut().filter(|plan| !plan.chain.is_empty()) else {
        return;
    };

    let mut points = match merge(&plan.chain, index) {
        Ok(points) => points,
        Err(err) => {
            warn!("Cannot merge the route to {}: {}", hotel_name, err);
            plan.issues.push(DayIssue::OutputFailed {
                reason: error_chain(&err),
            });
            return;
        }
    };

    if let (Some(router), Some(destination), Some(last)) = (router, destination, points.last().copied()) {
        let gap = distance(&last, &destination);
        if gap > options.connector_min_gap {
            debug!("Merged track ends {:.0} from {}, requesting connector", gap, hotel_name);
            match fetch_connector(router, &last, &destination) {
                Ok(connector) => {
                    extend_with_connector(&mut points, connector);
                    plan.connector_appended = true;
                }
                Err(err) => {
                    warn!("Connector to {} failed: {}", hotel_name, err);
                    plan.issues.push(DayIssue::ConnectorFailed {
                        reason: error_chain(&err),
                    });
                }
            }
        }
    }

    plan.profile = Some(ElevationProfile::compute(&points, &options.elevation));

    let file_name = track_file_name(arrival_date, hotel_name);
    match write_track_file(output_dir, &file_name, hotel_name, &points) {
        Ok(_) => plan.track_file = Some(file_name),
        Err(err) => {
            warn!("Cannot write {}: {}", file_name, err);
            plan.issues.push(DayIssue::OutputFailed {
                reason: error_chain(&err),
            });
        }
    }
}

/// Merge, extend, profile and write every chained day.
///
/// Days are independent at this point and are processed in parallel when
/// the `rayon` feature is enabled. Failures are recorded on the day.
#[instrument(level = "trace", skip_all)]
pub fn materialize_days(
    bookings: &mut [Booking],
    index: &TrackIndex,
    options: &PlanOptions,
    router: Option<&dyn ConnectorRouter>,
    output_dir: &Path,
) {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        bookings
            .par_iter_mut()
            .for_each(|b| materialize_day(b, index, options, router, output_dir));
    }
    #[cfg(not(feature = "rayon"))]
    {
        bookings
            .iter_mut()
            .for_each(|b| materialize_day(b, index, options, router, output_dir));
    }

    let written = bookings
        .iter()
        .filter(|b| b.route.as_ref().is_some_and(|r| r.track_file.is_some()))
        .count();
    info!("Wrote {} day tracks to {:?}", written, output_dir);
}

/// Sequence and materialize `bookings` in one go.
pub fn plan_days(
    bookings: &mut [Booking],
    index: &TrackIndex,
    options: &PlanOptions,
    router: Option<&dyn ConnectorRouter>,
    output_dir: &Path,
) {
    let chainer = RouteChainer::new(index, options.chain);
    sequence_days(bookings, &chainer);
    materialize_days(bookings, index, options, router, output_dir);
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, anyhow};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    use super::{Booking, DayIssue, PlanOptions, plan_days, read_bookings, sequence_days, write_bookings};
    use crate::chain::{ChainOptions, ChainOutcome, ChainSegment, ContinuationState, RouteChainer};
    use crate::gpx::read_track;
    use crate::index::TrackIndex;
    use crate::measure::Meters;
    use crate::merge::ConnectorError;
    use crate::testonly::{line_track, track_index};

    fn date(day: u32) -> Result<NaiveDate> {
        NaiveDate::from_ymd_opt(2025, 6, day).ok_or(anyhow!("bad date"))
    }

    fn abc_index() -> Result<TrackIndex> {
        Ok(track_index(vec![
            line_track("A", 0.0, 0.0, 1.0, 101)?,
            line_track("B", 0.0, 1.0, 2.0, 101)?,
            line_track("C", 0.0, 2.0, 3.0, 101)?,
        ]))
    }

    #[test]
    fn test_sequence_sorts_and_skips_first_day() -> Result<()> {
        let index = abc_index()?;
        let chainer = RouteChainer::new(
            &index,
            ChainOptions::default().with_max_connection_distance(Meters(500_000.0)),
        );
        let mut bookings = vec![
            Booking::new("End", date(2)?).with_coordinates(0.0, 3.001),
            Booking::new("Start", date(1)?).with_coordinates(0.0, -0.001),
        ];
        sequence_days(&mut bookings, &chainer);

        assert_eq!(bookings[0].hotel_name, "Start");
        assert!(bookings[0].route.is_none());
        let plan = bookings[1].route.as_ref().ok_or(anyhow!("no route"))?;
        let ids: Vec<&str> = plan.chain.iter().map(|s| s.track_id.as_str()).collect();
        assert_eq!(ids, ["A", "B", "C"]);
        assert_eq!(plan.outcome, Some(ChainOutcome::ReachedTarget));
        assert!(plan.is_complete());
        let stats = plan.statistics.ok_or(anyhow!("no statistics"))?;
        assert_relative_eq!(stats.distance_km, 333.0, max_relative = 0.01);
        Ok(())
    }

    #[test]
    fn test_sequence_threads_continuation() -> Result<()> {
        let index = track_index(vec![line_track("A", 0.0, 0.0, 1.0, 11)?]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let mut bookings = vec![
            Booking::new("One", date(1)?).with_coordinates(0.0, 0.0),
            Booking::new("Two", date(2)?).with_coordinates(0.0, 0.5),
            Booking::new("Three", date(3)?).with_coordinates(0.0, 1.0),
        ];
        sequence_days(&mut bookings, &chainer);

        let two = bookings[1].route.as_ref().ok_or(anyhow!("no route"))?;
        assert_eq!(two.chain.segments(), [ChainSegment::new("A", 0, 5)]);
        assert_eq!(
            two.continuation,
            Some(ContinuationState {
                track_id: "A".to_owned(),
                end_index: 5,
                reversed: false,
            })
        );
        let three = bookings[2].route.as_ref().ok_or(anyhow!("no route"))?;
        assert_eq!(three.chain.segments(), [ChainSegment::new("A", 5, 10)]);
        Ok(())
    }

    #[test]
    fn test_sequence_missing_coordinates() -> Result<()> {
        let index = abc_index()?;
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let mut bookings = vec![
            Booking::new("One", date(1)?).with_coordinates(0.0, 0.0),
            Booking::new("Unknown", date(2)?),
            Booking::new("Three", date(3)?).with_coordinates(0.0, 0.5),
            Booking::new("Four", date(4)?).with_coordinates(0.0, 0.9),
        ];
        sequence_days(&mut bookings, &chainer);

        assert!(bookings[1].route.is_none());
        // The stay after an unknown location has no known predecessor.
        assert!(bookings[2].route.is_none());
        assert!(bookings[3].route.is_some());
        Ok(())
    }

    #[test]
    fn test_sequence_flags_no_route() -> Result<()> {
        let index = TrackIndex::new();
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let mut bookings = vec![
            Booking::new("One", date(1)?).with_coordinates(0.0, 0.0),
            Booking::new("Two", date(2)?).with_coordinates(0.0, 0.5),
        ];
        sequence_days(&mut bookings, &chainer);

        let plan = bookings[1].route.as_ref().ok_or(anyhow!("no route"))?;
        assert!(plan.chain.is_empty());
        assert!(plan.statistics.is_none());
        assert_eq!(plan.issues, [DayIssue::NoRoute]);
        Ok(())
    }

    #[test]
    fn test_sequence_flags_gap() -> Result<()> {
        let index = track_index(vec![
            line_track("A", 0.0, 0.0, 0.1, 11)?,
            line_track("B", 0.0, 0.5, 0.6, 11)?,
        ]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let mut bookings = vec![
            Booking::new("One", date(1)?).with_coordinates(0.0, 0.0),
            Booking::new("Two", date(2)?).with_coordinates(0.0, 0.6),
        ];
        sequence_days(&mut bookings, &chainer);

        let plan = bookings[1].route.as_ref().ok_or(anyhow!("no route"))?;
        assert_eq!(
            plan.outcome,
            Some(ChainOutcome::Exhausted {
                destination_appended: true
            })
        );
        match plan.issues.as_slice() {
            [
                DayIssue::Gap {
                    after_track,
                    before_track,
                    distance,
                },
            ] => {
                assert_eq!((after_track.as_str(), before_track.as_str()), ("A", "B"));
                assert_relative_eq!(distance.0, 44_478.0, max_relative = 0.01);
            }
            other => panic!("unexpected issues {other:?}"),
        }
        Ok(())
    }

    fn connector_gpx(lat_from: f64, lon_from: f64, lat_to: f64, lon_to: f64) -> Result<String, ConnectorError> {
        Ok(format!(
            r#"<gpx><trk><trkseg>
            <trkpt lat="{lat_from}" lon="{lon_from}"><ele>10</ele></trkpt>
            <trkpt lat="{lat_to}" lon="{lon_to}"><ele>25</ele></trkpt>
            </trkseg></trk></gpx>"#
        ))
    }

    fn two_stays() -> Result<Vec<Booking>> {
        Ok(vec![
            Booking::new("Hotel One", date(1)?).with_coordinates(0.0, 0.0),
            Booking::new("Hotel Two", date(2)?).with_coordinates(0.01, 0.1),
        ])
    }

    #[test]
    fn test_plan_days_writes_extended_track() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = track_index(vec![line_track("A", 0.0, 0.0, 0.1, 11)?]);
        let mut bookings = two_stays()?;
        plan_days(
            &mut bookings,
            &index,
            &PlanOptions::default(),
            Some(&connector_gpx),
            dir.path(),
        );

        let plan = bookings[1].route.as_ref().ok_or(anyhow!("no route"))?;
        assert!(plan.connector_appended);
        assert!(plan.is_complete());
        assert_eq!(plan.track_file.as_deref(), Some("2025-06-02_Hotel_Two_merged.gpx"));
        let profile = plan.profile.ok_or(anyhow!("no profile"))?;
        assert_eq!(profile.max_elevation, Some(Meters(25.0)));

        let written = read_track(&dir.path().join("2025-06-02_Hotel_Two_merged.gpx"))?;
        assert_eq!(written.points.len(), 11 + 2);
        assert_eq!(written.name.as_deref(), Some("Hotel Two"));
        Ok(())
    }

    #[test]
    fn test_plan_days_connector_failure_keeps_track() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = track_index(vec![line_track("A", 0.0, 0.0, 0.1, 11)?]);
        let mut bookings = two_stays()?;
        let failing = |_: f64, _: f64, _: f64, _: f64| -> Result<String, ConnectorError> {
            Err(ConnectorError::Status(502))
        };
        plan_days(&mut bookings, &index, &PlanOptions::default(), Some(&failing), dir.path());

        let plan = bookings[1].route.as_ref().ok_or(anyhow!("no route"))?;
        assert!(!plan.connector_appended);
        assert!(matches!(plan.issues.as_slice(), [DayIssue::ConnectorFailed { .. }]));
        let written = read_track(&dir.path().join("2025-06-02_Hotel_Two_merged.gpx"))?;
        assert_eq!(written.points.len(), 11);
        Ok(())
    }

    #[test]
    fn test_plan_days_skips_connector_when_close() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = track_index(vec![line_track("A", 0.0, 0.0, 0.1, 11)?]);
        let mut bookings = two_stays()?;
        let options = PlanOptions::default().with_connector_min_gap(Meters(5000.0));
        plan_days(&mut bookings, &index, &options, Some(&connector_gpx), dir.path());

        let plan = bookings[1].route.as_ref().ok_or(anyhow!("no route"))?;
        assert!(!plan.connector_appended);
        assert!(plan.track_file.is_some());
        Ok(())
    }

    #[test]
    fn test_bookings_json_keeps_unknown_fields() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("bookings.json");
        std::fs::write(
            &input,
            r#"[{"hotel_name": "Vila Rab", "arrival_date": "2025-06-03",
                 "latitude": 44.75, "longitude": 14.76,
                 "total_price": 120.5, "has_kitchen": true}]"#,
        )?;
        let bookings = read_bookings(&input)?;
        assert_eq!(bookings[0].latitude, Some(44.75));
        assert_eq!(bookings[0].extra.get("has_kitchen"), Some(&serde_json::Value::Bool(true)));

        let output = dir.path().join("itinerary.json");
        write_bookings(&output, &bookings)?;
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output)?)?;
        assert_eq!(value[0]["total_price"], serde_json::json!(120.5));
        assert!(value[0].get("route").is_none());
        Ok(())
    }
}
