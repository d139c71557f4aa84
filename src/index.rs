//! Track library index
//!
//! [`build_index`] reads every GPX file of a directory once and produces an
//! immutable [`TrackIndex`] plus an [`IndexReport`] listing the files that
//! could not be used. A broken file never fails the build.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::geographic::{distance, path_length};
use crate::gpx::{GpxError, read_track};
use crate::measure::Meters;
use crate::types::{GeoPoint, IndexedPoint};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("reading track directory {path:?}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("track {0} has no points")]
    EmptyTrack(String),
}

type Result<T> = std::result::Result<T, IndexError>;

/// Suffixes marking a file as a directional variant of another track.
static VARIANT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)_(inverted|reversed|rev|inverse|backward)$").unwrap());

/// The identity of the physical path a track follows.
///
/// `coast_reversed` and `coast` share the base id `coast`, so the chaining
/// engine can refuse to ride the same road twice in one day.
pub fn base_track_id(id: &str) -> &str {
    match VARIANT_SUFFIX.find(id) {
        Some(m) => &id[..m.start()],
        None => id,
    }
}

/// One track of the library with its precomputed summary values.
///
/// A record always holds at least one point.
#[derive(Clone, Debug)]
pub struct TrackRecord {
    id: String,
    base_id: String,
    name: Option<String>,
    path: Option<PathBuf>,
    points: Vec<IndexedPoint>,
    total_distance: Meters<f64>,
    raw_ascent: Meters<f64>,
    max_elevation: Option<Meters<f64>>,
}

impl TrackRecord {
    pub fn new(id: impl Into<String>, points: Vec<GeoPoint>) -> Result<TrackRecord> {
        let id = id.into();
        if points.is_empty() {
            return Err(IndexError::EmptyTrack(id));
        }

        let total_distance = path_length(&points);
        let raw_ascent = raw_ascent(&points);
        let max_elevation = points
            .iter()
            .filter_map(|p| p.ele())
            .reduce(|a, b| a.max(b));
        let points = points
            .into_iter()
            .enumerate()
            .map(|(sequence_index, point)| IndexedPoint {
                point,
                sequence_index,
            })
            .collect();

        Ok(TrackRecord {
            base_id: base_track_id(&id).to_owned(),
            id,
            name: None,
            path: None,
            points,
            total_distance,
            raw_ascent,
            max_elevation,
        })
    }

    pub fn with_name(self, name: Option<String>) -> Self {
        Self { name, ..self }
    }

    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..self
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    /// The `<name>` of the first named track in the file.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn points(&self) -> &[IndexedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Never true for a constructed record.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start(&self) -> &GeoPoint {
        &self.points[0].point
    }

    pub fn end(&self) -> &GeoPoint {
        &self.points[self.points.len() - 1].point
    }

    pub fn total_distance(&self) -> Meters<f64> {
        self.total_distance
    }

    /// Sum of every positive elevation step, unfiltered. Only meant for
    /// listing the library; day statistics are computed separately.
    pub fn raw_ascent(&self) -> Meters<f64> {
        self.raw_ascent
    }

    pub fn max_elevation(&self) -> Option<Meters<f64>> {
        self.max_elevation
    }
}

fn raw_ascent(points: &[GeoPoint]) -> Meters<f64> {
    let elevations: Vec<f64> = points.iter().filter_map(|p| p.ele()).map(|e| e.0).collect();
    Meters(
        elevations
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| *d > 0.0)
            .fold(0.0, |acc, d| acc + d),
    )
}

/// Read-only mapping from track id to record, iterated in id order.
#[derive(Clone, Debug, Default)]
pub struct TrackIndex {
    tracks: BTreeMap<String, TrackRecord>,
}

impl TrackIndex {
    pub fn new() -> TrackIndex {
        TrackIndex::default()
    }

    /// Insert a record, returning it back if its id is already taken.
    pub fn insert(&mut self, record: TrackRecord) -> std::result::Result<(), TrackRecord> {
        match self.tracks.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(record),
            Entry::Vacant(e) => {
                e.insert(record);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TrackRecord> {
        self.tracks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackRecord> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl FromIterator<TrackRecord> for TrackIndex {
    /// Later records with an id already present are dropped.
    fn from_iter<I: IntoIterator<Item = TrackRecord>>(iter: I) -> Self {
        let mut index = TrackIndex::new();
        for record in iter {
            let _ = index.insert(record);
        }
        index
    }
}

/// Why a file was left out of the index.
#[derive(Error, Clone, PartialEq, Debug, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("unreadable: {0}")]
    Unreadable(String),
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("contains no track points")]
    Empty,
    #[error("duplicate track id")]
    DuplicateId,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Outcome of an index build.
#[derive(Clone, PartialEq, Debug, Default, Serialize)]
pub struct IndexReport {
    pub loaded: usize,
    pub skipped: Vec<SkippedFile>,
}

pub(crate) fn error_chain(err: &dyn StdError) -> String {
    let mut s = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        let _ = write!(s, ": {e}");
        source = e.source();
    }
    s
}

fn is_gpx_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gpx"))
}

fn load_track(path: &Path) -> std::result::Result<TrackRecord, SkipReason> {
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parsed = read_track(path).map_err(|err| match err {
        GpxError::Io(_) => SkipReason::Unreadable(error_chain(&err)),
        _ => SkipReason::Malformed(error_chain(&err)),
    })?;
    let record = TrackRecord::new(id, parsed.points).map_err(|_| SkipReason::Empty)?;
    Ok(record.with_name(parsed.name).with_path(path))
}

/// Load every `.gpx` file directly inside `dir`.
///
/// Only failing to list the directory is an error. Files that cannot be read,
/// do not parse, or hold no points are recorded in the report and skipped.
#[instrument(level = "trace", skip_all)]
pub fn build_index(dir: &Path) -> Result<(TrackIndex, IndexReport)> {
    let dir_error = |source| IndexError::Directory {
        path: dir.to_owned(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();
        if is_gpx_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    debug!("Found {} GPX files in {:?}", paths.len(), dir);

    #[cfg(feature = "rayon")]
    let loaded: Vec<_> = {
        use rayon::prelude::*;
        paths.par_iter().map(|p| load_track(p)).collect()
    };
    #[cfg(not(feature = "rayon"))]
    let loaded: Vec<_> = paths.iter().map(|p| load_track(p)).collect();

    let mut index = TrackIndex::new();
    let mut report = IndexReport::default();
    for (path, result) in paths.into_iter().zip(loaded) {
        let result = result.and_then(|record| index.insert(record).map_err(|_| SkipReason::DuplicateId));
        match result {
            Ok(()) => report.loaded += 1,
            Err(reason) => {
                warn!("Skipping {:?}: {}", path, reason);
                report.skipped.push(SkippedFile { path, reason });
            }
        }
    }

    info!(
        "Indexed {} tracks, skipped {} files",
        report.loaded,
        report.skipped.len()
    );
    Ok((index, report))
}

/// Distance from `p` to the nearer endpoint of `record`.
pub fn endpoint_distance(record: &TrackRecord, p: &GeoPoint) -> Meters<f64> {
    distance(p, record.start()).min(distance(p, record.end()))
}
