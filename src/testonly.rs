//! Fixture builders shared by unit tests.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::gpx::write_track;
use crate::index::{TrackIndex, TrackRecord};
use crate::measure::Degrees;
use crate::types::{GeoPoint, IndexedPoint};

pub fn indexed(points: Vec<GeoPoint>) -> Vec<IndexedPoint> {
    points
        .into_iter()
        .enumerate()
        .map(|(sequence_index, point)| IndexedPoint {
            point,
            sequence_index,
        })
        .collect()
}

/// `n` evenly spaced points along a parallel, both ends included.
pub fn line(lat: f64, lon_from: f64, lon_to: f64, n: usize) -> Result<Vec<GeoPoint>> {
    let step = (lon_to - lon_from) / (n - 1) as f64;
    (0..n)
        .map(|i| Ok(GeoPoint::new(Degrees(lat), Degrees(lon_from + step * i as f64), None)?))
        .collect()
}

pub fn line_track(id: &str, lat: f64, lon_from: f64, lon_to: f64, n: usize) -> Result<TrackRecord> {
    Ok(TrackRecord::new(id, line(lat, lon_from, lon_to, n)?)?)
}

pub fn track_index(records: Vec<TrackRecord>) -> TrackIndex {
    records.into_iter().collect()
}

pub fn write_gpx_file(dir: &Path, file_name: &str, points: &[GeoPoint]) -> Result<PathBuf> {
    let path = dir.join(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    write_track(BufWriter::new(File::create(&path)?), &stem, points)?;
    Ok(path)
}
