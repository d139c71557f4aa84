//! Materializing chains into tracks
//!
//! [`merge`] turns a [`Chain`] into one continuous point sequence. Segment
//! boundaries are kept as they are, so where one track ends on the point the
//! next begins, that junction point appears twice.
//!
//! Destinations off the indexed tracks are reached through a
//! [`ConnectorRouter`], typically a routing service, whose GPX answer is
//! spliced on with [`extend_with_connector`].

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info};

use crate::chain::{Chain, ChainSegment};
use crate::gpx::{GpxError, parse_track, write_track};
use crate::index::TrackIndex;
use crate::types::GeoPoint;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("track {0} is not in the index")]
    UnknownTrack(String),
    #[error("segment {start}..={end} is out of range for track {track_id} of {len} points")]
    IndexOutOfRange {
        track_id: String,
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("writing GPX output")]
    Gpx(#[from] GpxError),
}

type Result<T> = std::result::Result<T, MergeError>;

/// Failure of a connector route request.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[cfg(feature = "brouter")]
    #[error("routing service request failed")]
    Http(#[from] reqwest::Error),
    #[error("routing service responded with status {0}")]
    Status(u16),
    #[error("routing service returned an unparseable route")]
    InvalidRoute(#[from] GpxError),
    #[error("routing service returned a route without points")]
    EmptyRoute,
}

/// Computes a point-to-point route and returns it as GPX text.
pub trait ConnectorRouter: Sync {
    fn route(&self, from: &GeoPoint, to: &GeoPoint) -> std::result::Result<String, ConnectorError>;
}

/// Any `(lat_from, lon_from, lat_to, lon_to) -> GPX` function is a router.
impl<F> ConnectorRouter for F
where
    F: Fn(f64, f64, f64, f64) -> std::result::Result<String, ConnectorError> + Sync,
{
    fn route(&self, from: &GeoPoint, to: &GeoPoint) -> std::result::Result<String, ConnectorError> {
        self(from.lat().0, from.lon().0, to.lat().0, to.lon().0)
    }
}

/// Ask `router` for a route and parse its points.
pub fn fetch_connector(
    router: &dyn ConnectorRouter,
    from: &GeoPoint,
    to: &GeoPoint,
) -> std::result::Result<Vec<GeoPoint>, ConnectorError> {
    let text = router.route(from, to)?;
    let parsed = parse_track(text.as_bytes())?;
    if parsed.points.is_empty() {
        return Err(ConnectorError::EmptyRoute);
    }
    debug!("Connector route has {} points", parsed.points.len());
    Ok(parsed.points)
}

fn segment_points(segment: &ChainSegment, index: &TrackIndex) -> Result<Vec<GeoPoint>> {
    let track = index
        .get(&segment.track_id)
        .ok_or_else(|| MergeError::UnknownTrack(segment.track_id.clone()))?;
    let range = segment.range();
    let slice = track
        .points()
        .get(range.clone())
        .ok_or_else(|| MergeError::IndexOutOfRange {
            track_id: segment.track_id.clone(),
            start: *range.start(),
            end: *range.end(),
            len: track.len(),
        })?;
    let mut points: Vec<GeoPoint> = slice.iter().map(|p| p.point).collect();
    if segment.reversed {
        points.reverse();
    }
    Ok(points)
}

/// Concatenate the point ranges of every segment, in travel order.
pub fn merge(chain: &Chain, index: &TrackIndex) -> Result<Vec<GeoPoint>> {
    let mut merged = Vec::with_capacity(chain.iter().map(|s| s.point_count()).sum());
    for segment in chain {
        merged.extend(segment_points(segment, index)?);
    }
    Ok(merged)
}

/// Splice `connector` on after the last merged point.
pub fn extend_with_connector(merged: &mut Vec<GeoPoint>, connector: Vec<GeoPoint>) {
    merged.extend(connector);
}

const MAX_LABEL_CHARS: usize = 30;

/// File name for a day's merged track: `{date}_{label}_merged.gpx`.
///
/// The label keeps only alphanumerics, spaces, `-` and `_`, has spaces turned
/// into underscores, and is cut to 30 characters.
pub fn track_file_name(date: NaiveDate, label: &str) -> String {
    let clean: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let clean: String = clean
        .trim()
        .replace(' ', "_")
        .chars()
        .take(MAX_LABEL_CHARS)
        .collect();
    format!("{}_{}_merged.gpx", date.format("%Y-%m-%d"), clean)
}

/// Write `points` as a GPX file named `file_name` inside `dir`, creating the
/// directory if needed.
pub fn write_track_file(dir: &Path, file_name: &str, track_name: &str, points: &[GeoPoint]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let mut out = BufWriter::new(File::create(&path)?);
    write_track(&mut out, track_name, points)?;
    out.flush()?;
    info!("Wrote {} points to {:?}", points.len(), path);
    Ok(path)
}
