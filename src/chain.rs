//! Greedy route chaining
//!
//! Given a start and a target coordinate, [`RouteChainer`] assembles one
//! day's route out of the indexed tracks:
//!
//! 1. Locate the start: resume on the previous day's last track if there is
//!    one, otherwise take the track passing closest to the start coordinate.
//! 2. Locate the target: the track passing closest to the target coordinate
//!    is the destination track, and whichever of its endpoints is nearer the
//!    start coordinate becomes the *target side* that every intermediate
//!    decision aims for.
//! 3. Ride the current track to its point nearest the target side, then hop
//!    to the nearest unused track within `max_connection_distance`, until the
//!    destination track is reached, no track is close enough, or
//!    `max_chain_length` segments have been laid down.
//!
//! If the chain runs dry before reaching the destination, the destination
//! track is appended directly from its nearer endpoint, leaving an untracked
//! jump for a connector route to fill.
//!
//! The search is greedy and never backtracks.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::geographic::{NearestPoint, distance, nearest_point, nearest_point_where};
use crate::index::{TrackIndex, TrackRecord};
use crate::measure::Meters;
use crate::types::GeoPoint;

/// Traverse `track_id` from `start_index` to `end_index`, both inclusive.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChainSegment {
    pub track_id: String,
    pub start_index: usize,
    pub end_index: usize,
    /// Set when points are ridden in descending sequence order.
    pub reversed: bool,
}

impl ChainSegment {
    pub fn new(track_id: impl Into<String>, start_index: usize, end_index: usize) -> Self {
        Self {
            track_id: track_id.into(),
            start_index,
            end_index,
            reversed: start_index > end_index,
        }
    }

    /// Sequence indices covered, in ascending order regardless of direction.
    pub fn range(&self) -> RangeInclusive<usize> {
        self.start_index.min(self.end_index)..=self.start_index.max(self.end_index)
    }

    pub fn point_count(&self) -> usize {
        self.start_index.abs_diff(self.end_index) + 1
    }
}

/// One day's ordered track slices.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain(Vec<ChainSegment>);

impl Chain {
    pub fn segments(&self) -> &[ChainSegment] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChainSegment> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&ChainSegment> {
        self.0.last()
    }

    fn push(&mut self, segment: ChainSegment) {
        self.0.push(segment);
    }
}

impl From<Vec<ChainSegment>> for Chain {
    fn from(segments: Vec<ChainSegment>) -> Self {
        Chain(segments)
    }
}

impl<'a> IntoIterator for &'a Chain {
    type Item = &'a ChainSegment;
    type IntoIter = std::slice::Iter<'a, ChainSegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Direction of travel along a track's sequence indices.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// Where the previous day stopped.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ContinuationState {
    pub track_id: String,
    pub end_index: usize,
    pub reversed: bool,
}

impl ContinuationState {
    /// The direction the next day must leave in: the opposite sense of the
    /// last segment ridden.
    pub fn forced_direction(&self) -> Direction {
        if self.reversed {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

impl From<&ChainSegment> for ContinuationState {
    fn from(segment: &ChainSegment) -> Self {
        Self {
            track_id: segment.track_id.clone(),
            end_index: segment.end_index,
            reversed: segment.reversed,
        }
    }
}

/// Running totals over the slices of a chain.
///
/// Elevation change is summed per consecutive pair of known elevations, with
/// no noise filtering. These are chaining totals only; reported day figures
/// come from [`crate::elevation::ElevationProfile`].
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize)]
pub struct RouteStatistics {
    pub max_elevation: Option<Meters<f64>>,
    pub total_distance: Meters<f64>,
    pub total_ascent: Meters<f64>,
    pub total_descent: Meters<f64>,
}

impl RouteStatistics {
    /// Add the slice `segment` of `track`, walked in its direction of travel.
    pub fn accumulate(&mut self, track: &TrackRecord, segment: &ChainSegment) {
        let slice = &track.points()[segment.range()];
        let mut ordered: Vec<&GeoPoint> = slice.iter().map(|p| &p.point).collect();
        if segment.reversed {
            ordered.reverse();
        }

        let mut prev_ele: Option<Meters<f64>> = None;
        for (i, p) in ordered.iter().enumerate() {
            if i > 0 {
                self.total_distance += distance(ordered[i - 1], p);
            }
            if let Some(ele) = p.ele() {
                if let Some(prev) = prev_ele {
                    let delta = ele - prev;
                    if delta.0 > 0.0 {
                        self.total_ascent += delta;
                    } else {
                        self.total_descent += Meters(-delta.0);
                    }
                }
                self.max_elevation = Some(match self.max_elevation {
                    Some(max) => max.max(ele),
                    None => ele,
                });
                prev_ele = Some(ele);
            }
        }
    }

    pub fn summary(&self) -> RouteSummary {
        RouteSummary {
            distance_km: (self.total_distance.0 / 10.0).round() / 100.0,
            ascent_m: self.total_ascent.0.round() as i64,
            descent_m: self.total_descent.0.round() as i64,
            max_elevation_m: self.max_elevation.map(|m| m.0.round() as i64),
        }
    }
}

/// [`RouteStatistics`] rounded for export.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct RouteSummary {
    pub distance_km: f64,
    pub ascent_m: i64,
    pub descent_m: i64,
    pub max_elevation_m: Option<i64>,
}

/// Tunable limits of the chaining search.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ChainOptions {
    /// Largest gap bridged between the end of one track and the next.
    pub max_connection_distance: Meters<f64>,
    pub max_chain_length: usize,
    /// A candidate this much farther than the best is still preferred if its
    /// track is shorter.
    pub tie_break_margin: Meters<f64>,
    pub start_search_radius: Option<Meters<f64>>,
    pub target_search_radius: Option<Meters<f64>>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            max_connection_distance: Meters(1000.0),
            max_chain_length: 20,
            tie_break_margin: Meters(300.0),
            start_search_radius: None,
            target_search_radius: None,
        }
    }
}

impl ChainOptions {
    pub fn with_max_connection_distance(self, max_connection_distance: Meters<f64>) -> Self {
        Self {
            max_connection_distance,
            ..self
        }
    }

    pub fn with_max_chain_length(self, max_chain_length: usize) -> Self {
        Self {
            max_chain_length,
            ..self
        }
    }

    pub fn with_tie_break_margin(self, tie_break_margin: Meters<f64>) -> Self {
        Self {
            tie_break_margin,
            ..self
        }
    }

    pub fn with_start_search_radius(self, start_search_radius: Option<Meters<f64>>) -> Self {
        Self {
            start_search_radius,
            ..self
        }
    }

    pub fn with_target_search_radius(self, target_search_radius: Option<Meters<f64>>) -> Self {
        Self {
            target_search_radius,
            ..self
        }
    }
}

/// How a chaining run ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainOutcome {
    /// The destination track was reached by hopping between tracks.
    ReachedTarget,
    /// No unused track was within reach. The destination track is appended
    /// across the gap unless it shares a base id with a track already used.
    Exhausted { destination_appended: bool },
    /// `max_chain_length` segments were laid without reaching the destination.
    IterationLimit,
    /// No start or no destination track could be found.
    NoRoute,
}

/// Everything one chaining run produces.
#[derive(Clone, PartialEq, Debug)]
pub struct DayRoute {
    pub chain: Chain,
    /// `None` exactly when `outcome` is [`ChainOutcome::NoRoute`].
    pub statistics: Option<RouteStatistics>,
    pub continuation: Option<ContinuationState>,
    pub outcome: ChainOutcome,
}

impl DayRoute {
    fn no_route() -> Self {
        Self {
            chain: Chain::default(),
            statistics: None,
            continuation: None,
            outcome: ChainOutcome::NoRoute,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StartPosition<'a> {
    pub track: &'a TrackRecord,
    pub index: usize,
    /// Set only when resuming from a previous day.
    pub forced_direction: Option<Direction>,
}

#[derive(Clone, Copy, Debug)]
pub struct TargetPosition<'a> {
    pub track: &'a TrackRecord,
    pub index: usize,
    pub distance: Meters<f64>,
    pub target_side: GeoPoint,
}

#[derive(Clone, Copy, Debug)]
pub struct NextTrack<'a> {
    pub track: &'a TrackRecord,
    pub index: usize,
    pub distance: Meters<f64>,
}

/// The chaining engine over one read-only track index.
#[derive(Clone, Copy, Debug)]
pub struct RouteChainer<'a> {
    index: &'a TrackIndex,
    options: ChainOptions,
}

impl<'a> RouteChainer<'a> {
    pub fn new(index: &'a TrackIndex, options: ChainOptions) -> Self {
        Self { index, options }
    }

    pub fn index(&self) -> &'a TrackIndex {
        self.index
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    /// The track and point nearest to `position` over the whole index, or
    /// `None` if nothing lies within `radius`.
    fn nearest_track(&self, position: &GeoPoint, radius: Option<Meters<f64>>) -> Option<(&'a TrackRecord, NearestPoint)> {
        let mut best: Option<(&'a TrackRecord, NearestPoint)> = None;
        for track in self.index.iter() {
            let nearest = nearest_point(track.points(), position);
            if best.is_none_or(|(_, b)| nearest.distance < b.distance) {
                best = Some((track, nearest));
            }
        }
        best.filter(|(_, nearest)| {
            nearest.sequence_index.is_some()
                && radius.is_none_or(|r| nearest.distance <= r)
        })
    }

    /// Where today's ride begins.
    pub fn find_start_position(
        &self,
        start: &GeoPoint,
        continuation: Option<&ContinuationState>,
    ) -> Option<StartPosition<'a>> {
        if let Some(cont) = continuation {
            match self.index.get(&cont.track_id) {
                Some(track) if cont.end_index < track.len() => {
                    let direction = cont.forced_direction();
                    debug!(
                        "Continuing on {} from index {} heading {:?}",
                        cont.track_id, cont.end_index, direction
                    );
                    return Some(StartPosition {
                        track,
                        index: cont.end_index,
                        forced_direction: Some(direction),
                    });
                }
                _ => warn!(
                    "Continuation track {} index {} not in index, searching from scratch",
                    cont.track_id, cont.end_index
                ),
            }
        }

        let (track, nearest) = self.nearest_track(start, self.options.start_search_radius)?;
        let index = nearest.sequence_index?;
        debug!(
            "Start track {} at index {} ({:.1} away)",
            track.id(),
            index,
            nearest.distance
        );
        Some(StartPosition {
            track,
            index,
            forced_direction: None,
        })
    }

    /// The destination track, the stopping index on it, and its target side.
    pub fn find_target_position(&self, start: &GeoPoint, target: &GeoPoint) -> Option<TargetPosition<'a>> {
        let (track, nearest) = self.nearest_track(target, self.options.target_search_radius)?;
        let index = nearest.sequence_index?;
        let target_side = if distance(start, track.start()) < distance(start, track.end()) {
            *track.start()
        } else {
            *track.end()
        };
        debug!(
            "Destination track {} at index {} ({:.1} away)",
            track.id(),
            index,
            nearest.distance
        );
        Some(TargetPosition {
            track,
            index,
            distance: nearest.distance,
            target_side,
        })
    }

    /// The unused track to hop onto from `position`.
    ///
    /// Candidates beyond `max_connection_distance` are ignored. A candidate
    /// within `tie_break_margin` of the best so far wins if its track is
    /// shorter.
    pub fn find_next_track(&self, position: &GeoPoint, used_bases: &HashSet<&str>) -> Option<NextTrack<'a>> {
        let mut best: Option<NextTrack<'a>> = None;
        for track in self.index.iter() {
            if used_bases.contains(track.base_id()) {
                continue;
            }
            let nearest = nearest_point(track.points(), position);
            let Some(index) = nearest.sequence_index else {
                continue;
            };
            if nearest.distance > self.options.max_connection_distance {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => {
                    nearest.distance < b.distance
                        || (nearest.distance <= b.distance + self.options.tie_break_margin
                            && track.total_distance() < b.track.total_distance())
                }
            };
            if better {
                best = Some(NextTrack {
                    track,
                    index,
                    distance: nearest.distance,
                });
            }
        }
        best
    }

    /// The point of `track` nearest `aim`, looking only ahead of `from` in the
    /// given direction. Stays at `from` if nothing lies that way.
    fn directed_end_index(track: &TrackRecord, from: usize, direction: Direction, aim: &GeoPoint) -> usize {
        let nearest = nearest_point_where(track.points(), aim, |p| match direction {
            Direction::Forward => p.sequence_index > from,
            Direction::Backward => p.sequence_index < from,
        });
        nearest.sequence_index.unwrap_or(from)
    }

    /// Chain tracks from `start` to `target`.
    ///
    /// Never fails: a day without a usable start or destination comes back
    /// as [`ChainOutcome::NoRoute`] with an empty chain and no statistics.
    #[instrument(level = "trace", skip_all)]
    pub fn collect_route_between_locations(
        &self,
        start: &GeoPoint,
        target: &GeoPoint,
        continuation: Option<&ContinuationState>,
    ) -> DayRoute {
        let Some(start_pos) = self.find_start_position(start, continuation) else {
            warn!("No start track found near {:?}", start);
            return DayRoute::no_route();
        };
        let Some(target_pos) = self.find_target_position(start, target) else {
            warn!("No destination track found near {:?}", target);
            return DayRoute::no_route();
        };

        let mut chain = Chain::default();
        let mut stats = RouteStatistics::default();
        let mut used_bases: HashSet<&'a str> = HashSet::new();
        let mut track = start_pos.track;
        let mut current = start_pos.index;
        let mut outcome = ChainOutcome::IterationLimit;

        for iteration in 0..self.options.max_chain_length {
            let at_destination = track.id() == target_pos.track.id();
            let end_index = if at_destination {
                target_pos.index
            } else {
                match start_pos.forced_direction.filter(|_| iteration == 0) {
                    Some(direction) => {
                        Self::directed_end_index(track, current, direction, &target_pos.target_side)
                    }
                    None => nearest_point(track.points(), &target_pos.target_side)
                        .sequence_index
                        .unwrap_or(current),
                }
            };

            let segment = ChainSegment::new(track.id(), current, end_index);
            debug!(
                "Iteration {}: {} {} -> {}{}",
                iteration,
                segment.track_id,
                segment.start_index,
                segment.end_index,
                if segment.reversed { " (reversed)" } else { "" }
            );
            stats.accumulate(track, &segment);
            used_bases.insert(track.base_id());
            chain.push(segment);

            if at_destination {
                outcome = ChainOutcome::ReachedTarget;
                break;
            }

            let position = track.points()[end_index].point;
            match self.find_next_track(&position, &used_bases) {
                Some(next) => {
                    debug!("Next: {} at index {} ({:.1} away)", next.track.id(), next.index, next.distance);
                    track = next.track;
                    current = next.index;
                }
                None => {
                    let destination_appended = if used_bases.contains(target_pos.track.base_id()) {
                        warn!(
                            "Destination track {} shares a base with a track already ridden, not appending",
                            target_pos.track.id()
                        );
                        false
                    } else {
                        let segment = destination_entry(target_pos.track, target_pos.index, &position);
                        debug!(
                            "No connecting track within {:.0}, appending destination {} {} -> {}",
                            self.options.max_connection_distance,
                            segment.track_id,
                            segment.start_index,
                            segment.end_index
                        );
                        stats.accumulate(target_pos.track, &segment);
                        chain.push(segment);
                        true
                    };
                    outcome = ChainOutcome::Exhausted {
                        destination_appended,
                    };
                    break;
                }
            }
        }

        if outcome == ChainOutcome::IterationLimit {
            warn!(
                "Gave up after {} segments without reaching {}",
                self.options.max_chain_length,
                target_pos.track.id()
            );
        }
        let summary = stats.summary();
        info!(
            "Chained {} segments: {:.2} km, +{} m / -{} m",
            chain.len(),
            summary.distance_km,
            summary.ascent_m,
            summary.descent_m
        );

        DayRoute {
            continuation: chain.last().map(ContinuationState::from),
            chain,
            statistics: Some(stats),
            outcome,
        }
    }
}

/// Enter the destination track from whichever endpoint is nearer `position`
/// and ride to `target_index`.
fn destination_entry(track: &TrackRecord, target_index: usize, position: &GeoPoint) -> ChainSegment {
    let last = track.len() - 1;
    let start_index = if distance(position, track.end()) < distance(position, track.start()) {
        last
    } else {
        0
    };
    ChainSegment::new(track.id(), start_index, target_index)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use anyhow::Result;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::{
        ChainOptions, ChainOutcome, ChainSegment, ContinuationState, Direction, RouteChainer,
        RouteStatistics,
    };
    use crate::index::{TrackIndex, TrackRecord};
    use crate::measure::{Degrees, Meters};
    use crate::testonly::{line, line_track, track_index};
    use crate::types::GeoPoint;
    use crate::{geo_point, geo_points};

    fn segment(id: &str, start: usize, end: usize) -> ChainSegment {
        ChainSegment::new(id, start, end)
    }

    #[test]
    fn test_three_tracks_in_a_row() -> Result<()> {
        let index = track_index(vec![
            line_track("A", 0.0, 0.0, 1.0, 11)?,
            line_track("B", 0.0, 1.0, 2.0, 11)?,
            line_track("C", 0.0, 2.0, 3.0, 11)?,
        ]);
        let options = ChainOptions::default().with_max_connection_distance(Meters(500_000.0));
        let chainer = RouteChainer::new(&index, options);

        let day = chainer.collect_route_between_locations(
            &geo_point!(0.0, -0.001),
            &geo_point!(0.0, 3.001),
            None,
        );

        assert_eq!(day.outcome, ChainOutcome::ReachedTarget);
        assert_eq!(
            day.chain.segments(),
            &[segment("A", 0, 10), segment("B", 0, 10), segment("C", 0, 10)]
        );
        assert!(day.chain.iter().all(|s| !s.reversed));
        let stats = day.statistics.ok_or(anyhow::anyhow!("missing statistics"))?;
        assert_relative_eq!(stats.summary().distance_km, 333.0, max_relative = 0.01);
        assert_eq!(
            day.continuation,
            Some(ContinuationState {
                track_id: "C".to_owned(),
                end_index: 10,
                reversed: false,
            })
        );
        Ok(())
    }

    #[test]
    fn test_riding_tracks_against_their_direction() -> Result<()> {
        let index = track_index(vec![
            line_track("A", 0.0, 1.0, 0.0, 11)?,
            line_track("B", 0.0, 2.0, 1.0, 11)?,
        ]);
        let options = ChainOptions::default().with_max_connection_distance(Meters(500_000.0));
        let chainer = RouteChainer::new(&index, options);

        let day = chainer.collect_route_between_locations(
            &geo_point!(0.0, 0.0),
            &geo_point!(0.0, 2.0),
            None,
        );
        assert_eq!(day.outcome, ChainOutcome::ReachedTarget);
        assert_eq!(day.chain.segments(), &[segment("A", 10, 0), segment("B", 10, 0)]);
        assert!(day.chain.iter().all(|s| s.reversed));
        assert_eq!(day.continuation.map(|c| c.forced_direction()), Some(Direction::Forward));
        Ok(())
    }

    #[test]
    fn test_forced_direction_is_opposite_of_last_segment() {
        let reversed = ContinuationState {
            track_id: "A".to_owned(),
            end_index: 0,
            reversed: true,
        };
        assert_eq!(reversed.forced_direction(), Direction::Forward);
        let forward = ContinuationState {
            reversed: false,
            ..reversed
        };
        assert_eq!(forward.forced_direction(), Direction::Backward);
    }

    #[test]
    fn test_continuation_forces_first_segment_direction() -> Result<()> {
        let index = track_index(vec![
            line_track("A", 0.0, 0.0, 1.0, 11)?,
            line_track("D", 0.0, 1.0, 2.0, 11)?,
        ]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let start = geo_point!(0.0, 0.5);
        let target = geo_point!(0.0, 1.9);

        // Free to choose, the chainer rides A forward to its end.
        let free = chainer.collect_route_between_locations(&start, &target, None);
        assert_eq!(free.chain.segments()[0], segment("A", 5, 10));

        // Yesterday ended riding A forward, so today must head backward.
        let continuation = ContinuationState {
            track_id: "A".to_owned(),
            end_index: 5,
            reversed: false,
        };
        let start_pos = chainer
            .find_start_position(&start, Some(&continuation))
            .ok_or(anyhow::anyhow!("no start"))?;
        assert_eq!(start_pos.track.id(), "A");
        assert_eq!(start_pos.index, 5);
        assert_eq!(start_pos.forced_direction, Some(Direction::Backward));

        let day = chainer.collect_route_between_locations(&start, &target, Some(&continuation));
        assert_eq!(day.chain.segments()[0], segment("A", 5, 4));
        assert!(day.chain.segments()[0].reversed);
        // D is 66 km away from A's index 4, so it is appended across the gap.
        assert_eq!(
            day.outcome,
            ChainOutcome::Exhausted {
                destination_appended: true
            }
        );
        assert_eq!(day.chain.segments()[1], segment("D", 0, 9));
        Ok(())
    }

    #[test]
    fn test_forced_direction_without_room_stays_put() -> Result<()> {
        let index = track_index(vec![
            line_track("A", 0.0, 0.0, 1.0, 11)?,
            line_track("D", 0.0, 1.0, 2.0, 11)?,
        ]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let continuation = ContinuationState {
            track_id: "A".to_owned(),
            end_index: 0,
            reversed: false,
        };
        let day = chainer.collect_route_between_locations(
            &geo_point!(0.0, 0.0),
            &geo_point!(0.0, 2.0),
            Some(&continuation),
        );
        assert_eq!(day.chain.segments()[0], segment("A", 0, 0));
        Ok(())
    }

    #[test]
    fn test_stale_continuation_falls_back_to_search() -> Result<()> {
        let index = track_index(vec![line_track("A", 0.0, 0.0, 1.0, 11)?]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let gone = ContinuationState {
            track_id: "vanished".to_owned(),
            end_index: 3,
            reversed: true,
        };
        let out_of_range = ContinuationState {
            track_id: "A".to_owned(),
            end_index: 11,
            reversed: true,
        };
        for cont in [gone, out_of_range] {
            let pos = chainer
                .find_start_position(&geo_point!(0.0, 0.2), Some(&cont))
                .ok_or(anyhow::anyhow!("no start"))?;
            assert_eq!(pos.index, 2);
            assert_eq!(pos.forced_direction, None);
        }
        Ok(())
    }

    #[test]
    fn test_empty_index_yields_no_route() -> Result<()> {
        let index = TrackIndex::new();
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let day = chainer.collect_route_between_locations(
            &geo_point!(45.0, 14.0),
            &geo_point!(45.5, 14.5),
            None,
        );
        assert_eq!(day.outcome, ChainOutcome::NoRoute);
        assert!(day.chain.is_empty());
        assert_eq!(day.statistics, None);
        assert_eq!(day.continuation, None);
        Ok(())
    }

    #[test]
    fn test_search_radius_limits_start_and_target() -> Result<()> {
        let index = track_index(vec![line_track("A", 0.0, 0.0, 1.0, 11)?]);
        let near = ChainOptions::default().with_start_search_radius(Some(Meters(3000.0)));
        let chainer = RouteChainer::new(&index, near);
        let day = chainer.collect_route_between_locations(
            &geo_point!(0.1, 0.5),
            &geo_point!(0.0, 1.0),
            None,
        );
        assert_eq!(day.outcome, ChainOutcome::NoRoute);

        let near = ChainOptions::default().with_target_search_radius(Some(Meters(3000.0)));
        let chainer = RouteChainer::new(&index, near);
        assert!(
            chainer
                .find_target_position(&geo_point!(0.0, 0.0), &geo_point!(0.0, 1.01))
                .is_some()
        );
        assert!(
            chainer
                .find_target_position(&geo_point!(0.0, 0.0), &geo_point!(0.0, 1.1))
                .is_none()
        );
        Ok(())
    }

    #[test]
    fn test_target_side_is_endpoint_nearer_start() -> Result<()> {
        let index = track_index(vec![line_track("D", 0.0, 1.0, 2.0, 11)?]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());

        let from_west = chainer
            .find_target_position(&geo_point!(0.0, 0.0), &geo_point!(0.0, 1.8))
            .ok_or(anyhow::anyhow!("no target"))?;
        assert_eq!(from_west.index, 8);
        assert_eq!(from_west.target_side, geo_point!(0.0, 1.0));

        let from_east = chainer
            .find_target_position(&geo_point!(0.0, 3.0), &geo_point!(0.0, 1.2))
            .ok_or(anyhow::anyhow!("no target"))?;
        assert_eq!(from_east.target_side, geo_point!(0.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_reversed_variant_is_never_reused() -> Result<()> {
        let index = track_index(vec![
            line_track("coast", 0.0, 0.0, 1.0, 11)?,
            line_track("coast_reversed", 0.0, 1.0, 0.0, 11)?,
            line_track("hill", 0.0, 1.0, 2.0, 11)?,
        ]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let day = chainer.collect_route_between_locations(
            &geo_point!(0.0, 0.0),
            &geo_point!(0.0, 1.5),
            None,
        );
        assert_eq!(day.outcome, ChainOutcome::ReachedTarget);
        assert_eq!(day.chain.segments(), &[segment("coast", 0, 10), segment("hill", 0, 5)]);
        Ok(())
    }

    #[test]
    fn test_next_track_prefers_shorter_within_margin() -> Result<()> {
        // ~200 m and ~350 m north of the origin.
        let index = track_index(vec![
            line_track("a_long", 0.0018, 0.0, 0.5, 51)?,
            line_track("b_short", 0.00315, 0.0, 0.05, 6)?,
        ]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        let used = HashSet::new();
        let next = chainer
            .find_next_track(&geo_point!(0.0, 0.0), &used)
            .ok_or(anyhow::anyhow!("no next track"))?;
        assert_eq!(next.track.id(), "b_short");

        let tight = ChainOptions::default().with_tie_break_margin(Meters(100.0));
        let chainer = RouteChainer::new(&index, tight);
        let next = chainer
            .find_next_track(&geo_point!(0.0, 0.0), &used)
            .ok_or(anyhow::anyhow!("no next track"))?;
        assert_eq!(next.track.id(), "a_long");
        Ok(())
    }

    #[test]
    fn test_next_track_respects_connection_distance() -> Result<()> {
        let index = track_index(vec![line_track("far", 0.02, 0.0, 0.1, 11)?]);
        let chainer = RouteChainer::new(&index, ChainOptions::default());
        assert!(
            chainer
                .find_next_track(&geo_point!(0.0, 0.0), &HashSet::new())
                .is_none()
        );
        let used: HashSet<&str> = ["far"].into_iter().collect();
        let wide = ChainOptions::default().with_max_connection_distance(Meters(5000.0));
        let chainer = RouteChainer::new(&index, wide);
        assert!(chainer.find_next_track(&geo_point!(0.0, 0.0), &used).is_none());
        assert!(
            chainer
                .find_next_track(&geo_point!(0.0, 0.0), &HashSet::new())
                .is_some()
        );
        Ok(())
    }

    #[test]
    fn test_iteration_limit() -> Result<()> {
        let tracks = (0..10)
            .map(|i| line_track(&format!("t{i}"), 0.0, i as f64 * 0.1, (i + 1) as f64 * 0.1, 6))
            .collect::<Result<Vec<_>>>()?;
        let index = track_index(tracks);
        let chainer = RouteChainer::new(&index, ChainOptions::default().with_max_chain_length(4));
        let day = chainer.collect_route_between_locations(
            &geo_point!(0.0, 0.0),
            &geo_point!(0.0, 1.0),
            None,
        );
        assert_eq!(day.outcome, ChainOutcome::IterationLimit);
        assert_eq!(day.chain.len(), 4);
        assert!(day.chain.iter().all(|s| s.track_id != "t9"));
        Ok(())
    }

    #[test]
    fn test_cyclic_layout_terminates() -> Result<()> {
        // Eight short tracks around a ring of ~1.1 km radius, each ending where
        // the next begins, with the destination far away.
        let ring: Vec<(f64, f64)> = (0..8)
            .map(|k| {
                let a = k as f64 * std::f64::consts::FRAC_PI_4;
                (0.01 * a.sin(), 0.01 * a.cos())
            })
            .collect();
        let mut records = Vec::new();
        for k in 0..8 {
            let (lat0, lon0) = ring[k];
            let (lat1, lon1) = ring[(k + 1) % 8];
            records.push(TrackRecord::new(
                format!("ring{k}"),
                geo_points![(lat0, lon0), (lat1, lon1)],
            )?);
            records.push(TrackRecord::new(
                format!("ring{k}_rev"),
                geo_points![(lat1, lon1), (lat0, lon0)],
            )?);
        }
        records.push(TrackRecord::new("destination", line(1.0, 1.0, 1.1, 5)?)?);
        let index = track_index(records);

        for max_chain_length in [1, 3, 20, 100] {
            let options = ChainOptions::default()
                .with_max_chain_length(max_chain_length)
                .with_max_connection_distance(Meters(2000.0));
            let chainer = RouteChainer::new(&index, options);
            let day = chainer.collect_route_between_locations(
                &geo_point!(0.0, 0.01),
                &geo_point!(1.0, 1.05),
                None,
            );
            assert!(day.chain.len() <= max_chain_length + 1);
            let bases: HashSet<&str> = day
                .chain
                .iter()
                .map(|s| crate::index::base_track_id(&s.track_id))
                .collect();
            assert_eq!(bases.len(), day.chain.len());
        }
        Ok(())
    }

    #[test]
    fn test_statistics_follow_direction_of_travel() -> Result<()> {
        let track = TrackRecord::new(
            "hill",
            geo_points![
                (0.0, 0.0, 100.0),
                (0.0, 0.001, 110.0),
                (0.0, 0.002),
                (0.0, 0.003, 105.0),
            ],
        )?;

        let mut forward = RouteStatistics::default();
        forward.accumulate(&track, &segment("hill", 0, 3));
        assert_relative_eq!(forward.total_ascent, Meters(10.0));
        assert_relative_eq!(forward.total_descent, Meters(5.0));
        assert_eq!(forward.max_elevation, Some(Meters(110.0)));

        let mut backward = RouteStatistics::default();
        backward.accumulate(&track, &segment("hill", 3, 0));
        assert_relative_eq!(backward.total_ascent, Meters(5.0));
        assert_relative_eq!(backward.total_descent, Meters(10.0));
        assert_relative_eq!(
            forward.total_distance,
            backward.total_distance,
            max_relative = 1e-12
        );

        let mut partial = RouteStatistics::default();
        partial.accumulate(&track, &segment("hill", 1, 2));
        assert_eq!(partial.total_ascent, Meters(0.0));
        assert_relative_eq!(partial.total_distance.0, 111.19, max_relative = 0.001);
        Ok(())
    }

    #[test]
    fn test_summary_rounding() {
        let stats = RouteStatistics {
            max_elevation: Some(Meters(812.6)),
            total_distance: Meters(48_234.9),
            total_ascent: Meters(611.5),
            total_descent: Meters(598.4),
        };
        let summary = stats.summary();
        assert_relative_eq!(summary.distance_km, 48.23);
        assert_eq!(summary.ascent_m, 612);
        assert_eq!(summary.descent_m, 598);
        assert_eq!(summary.max_elevation_m, Some(813));
        assert_eq!(RouteStatistics::default().summary().max_elevation_m, None);
    }

    #[test]
    fn test_segment_geometry() {
        let s = segment("x", 7, 3);
        assert!(s.reversed);
        assert_eq!(s.range(), 3..=7);
        assert_eq!(s.point_count(), 5);
        assert_eq!(segment("x", 2, 2).point_count(), 1);
    }

    fn random_point(rng: &mut StdRng) -> Result<GeoPoint> {
        Ok(GeoPoint::new(
            Degrees(45.0 + rng.random_range(-0.05..0.05)),
            Degrees(14.0 + rng.random_range(-0.05..0.05)),
            Some(Meters(rng.random_range(0.0..400.0))),
        )?)
    }

    #[test]
    fn test_random_layouts_keep_invariants() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0x7e57);
        for _ in 0..25 {
            let mut records = Vec::new();
            for i in 0..30 {
                let len = rng.random_range(1..8);
                let points = (0..len)
                    .map(|_| random_point(&mut rng))
                    .collect::<Result<Vec<_>>>()?;
                let id = if rng.random_bool(0.3) {
                    format!("t{}_reversed", i / 2)
                } else {
                    format!("t{}", i / 2)
                };
                records.push(TrackRecord::new(id, points)?);
            }
            let index = track_index(records);
            let options = ChainOptions::default()
                .with_max_chain_length(rng.random_range(1..12))
                .with_max_connection_distance(Meters(rng.random_range(100.0..3000.0)));
            let chainer = RouteChainer::new(&index, options);

            let start = random_point(&mut rng)?;
            let target = random_point(&mut rng)?;
            let route = chainer.collect_route_between_locations(&start, &target, None);

            assert!(route.chain.len() <= options.max_chain_length + 1);
            let mut bases = HashSet::new();
            for s in &route.chain {
                let track = index.get(&s.track_id).ok_or(anyhow::anyhow!("unknown track"))?;
                assert!(*s.range().end() < track.len());
                assert!(bases.insert(track.base_id()), "{} used twice", track.base_id());
            }
            assert_eq!(
                route.continuation,
                route.chain.last().map(ContinuationState::from)
            );
        }
        Ok(())
    }
}
