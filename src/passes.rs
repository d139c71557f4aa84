//! Side trips to mountain passes
//!
//! A pass is not a leg of the tour but an excursion from one of its stays.
//! Each pass is assigned to the stay nearest to it, together with the indexed
//! track that best links the two: one endpoint within
//! [`PassOptions::stay_radius`] of the stay and the other within
//! [`PassOptions::pass_radius`] of the pass, in either direction. Among the
//! tracks that qualify, the smallest sum of those two endpoint distances wins.
//!
//! Passes come with coordinates. Looking up a pass by name is left to
//! whatever produced the passes file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::chain::{ChainSegment, RouteStatistics, RouteSummary};
use crate::geographic::distance;
use crate::index::{TrackIndex, TrackRecord};
use crate::itinerary::Booking;
use crate::measure::{Degrees, Meters};
use crate::types::GeoPoint;

#[derive(Error, Debug)]
pub enum PassError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("invalid passes JSON")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, PassError>;

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct MountainPass {
    #[serde(alias = "passname")]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl MountainPass {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }

    pub fn coordinates(&self) -> Option<GeoPoint> {
        match GeoPoint::new(Degrees(self.latitude), Degrees(self.longitude), None) {
            Ok(p) => Some(p),
            Err(err) => {
                warn!("Ignoring pass {}: {}", self.name, err);
                None
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PassOptions {
    /// How far the stay-side endpoint of a pass track may be from the stay.
    pub stay_radius: Meters<f64>,
    /// How far the other endpoint may be from the pass.
    pub pass_radius: Meters<f64>,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            stay_radius: Meters(5000.0),
            pass_radius: Meters(5000.0),
        }
    }
}

impl PassOptions {
    pub fn with_stay_radius(self, stay_radius: Meters<f64>) -> Self {
        Self { stay_radius, ..self }
    }

    pub fn with_pass_radius(self, pass_radius: Meters<f64>) -> Self {
        Self { pass_radius, ..self }
    }
}

/// A track assigned to a pass, with statistics ridden from the stay up to
/// the pass.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PassTrack {
    pub pass_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub track_id: String,
    /// Set when the track file runs from the pass down to the stay.
    pub reversed: bool,
    #[serde(flatten)]
    pub statistics: RouteSummary,
}

/// A track linking a stay and a pass.
#[derive(Clone, Copy, Debug)]
pub struct PassMatch<'a> {
    pub track: &'a TrackRecord,
    pub reversed: bool,
    pub score: Meters<f64>,
}

impl PassMatch<'_> {
    /// Whole-track statistics in the direction stay to pass.
    pub fn statistics(&self) -> RouteSummary {
        let last = self.track.len() - 1;
        let segment = if self.reversed {
            ChainSegment::new(self.track.id(), last, 0)
        } else {
            ChainSegment::new(self.track.id(), 0, last)
        };
        let mut stats = RouteStatistics::default();
        stats.accumulate(self.track, &segment);
        stats.summary()
    }
}

pub fn read_passes(path: &Path) -> Result<Vec<MountainPass>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// The booking nearest to `pass` among those with known coordinates, with
/// its location. The earlier booking wins a tie.
pub fn find_nearest_stay(pass: &GeoPoint, bookings: &[Booking]) -> Option<(usize, GeoPoint)> {
    let mut best: Option<(usize, GeoPoint, Meters<f64>)> = None;
    for (i, booking) in bookings.iter().enumerate() {
        let Some(stay) = booking.coordinates() else {
            continue;
        };
        let d = distance(pass, &stay);
        if best.is_none_or(|(_, _, best_d)| d < best_d) {
            best = Some((i, stay, d));
        }
    }
    best.map(|(i, stay, _)| (i, stay))
}

/// The track best linking `stay` and `pass`, if any lies within the radii.
pub fn find_pass_track<'a>(
    index: &'a TrackIndex,
    stay: &GeoPoint,
    pass: &GeoPoint,
    options: &PassOptions,
) -> Option<PassMatch<'a>> {
    let mut best: Option<PassMatch<'a>> = None;
    for track in index.iter() {
        for reversed in [false, true] {
            let (stay_end, pass_end) = if reversed {
                (track.end(), track.start())
            } else {
                (track.start(), track.end())
            };
            let to_stay = distance(stay_end, stay);
            let to_pass = distance(pass_end, pass);
            if to_stay > options.stay_radius || to_pass > options.pass_radius {
                continue;
            }
            let score = to_stay + to_pass;
            if best.is_none_or(|b| score < b.score) {
                debug!(
                    "Candidate {}{}: {:.0} from the stay, {:.0} from the pass",
                    track.id(),
                    if reversed { " reversed" } else { "" },
                    to_stay,
                    to_pass
                );
                best = Some(PassMatch {
                    track,
                    reversed,
                    score,
                });
            }
        }
    }
    best
}

/// Attach a pass track to the stay nearest each pass.
///
/// Pass tracks already on the bookings are replaced. Returns how many passes
/// got a track.
#[instrument(level = "trace", skip_all)]
pub fn assign_pass_tracks(
    bookings: &mut [Booking],
    passes: &[MountainPass],
    index: &TrackIndex,
    options: &PassOptions,
) -> usize {
    for booking in bookings.iter_mut() {
        booking.pass_tracks.clear();
    }

    let mut assigned = 0;
    for pass in passes {
        let Some(pass_point) = pass.coordinates() else {
            continue;
        };
        let Some((nearest, stay)) = find_nearest_stay(&pass_point, bookings) else {
            warn!("No stay with known coordinates for pass {}", pass.name);
            continue;
        };
        let booking = &mut bookings[nearest];
        match find_pass_track(index, &stay, &pass_point, options) {
            Some(m) => {
                info!("Pass {}: {} from {}", pass.name, m.track.id(), booking.hotel_name);
                booking.pass_tracks.push(PassTrack {
                    pass_name: pass.name.clone(),
                    latitude: pass.latitude,
                    longitude: pass.longitude,
                    track_id: m.track.id().to_owned(),
                    reversed: m.reversed,
                    statistics: m.statistics(),
                });
                assigned += 1;
            }
            None => warn!(
                "No track links {} with pass {} (within {:.0} and {:.0})",
                booking.hotel_name, pass.name, options.stay_radius, options.pass_radius
            ),
        }
    }
    info!("Assigned tracks to {} of {} passes", assigned, passes.len());
    assigned
}
