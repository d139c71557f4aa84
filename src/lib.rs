//! A CLI tool and library for stitching GPX tracks into bicycle tour days.
//!
//! Given a directory of pre-recorded GPX tracks and a list of overnight stays,
//! greedily chains track slices into one route per day, keeps the direction of
//! travel consistent from one day to the next, and writes each day out as a
//! merged GPX track with distance and elevation statistics.
//!
//! See the [`plan_tour`] function, which is used by the CLI, for the main
//! entry point into the library. The chaining engine itself is
//! [`chain::RouteChainer`].
//!
//! # Feature flags
//!
//! - `cli` enables the additional dependencies needed by the CLI
//! - `brouter` enables [`brouter::BRouter`], a connector that fetches the last
//!   mile to each hotel from a BRouter server
//! - `rayon` (default) loads tracks and writes day tracks in parallel

#[cfg(feature = "brouter")]
pub mod brouter;
pub mod chain;
pub mod elevation;
pub mod geographic;
pub mod gpx;
pub mod index;
pub mod itinerary;
pub mod measure;
pub mod merge;
pub mod passes;
pub mod report;
#[cfg(test)]
mod testonly;
pub mod types;

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{info, instrument};

use crate::index::{IndexError, IndexReport, build_index};
use crate::itinerary::{Booking, ItineraryError, PlanOptions, plan_days, read_bookings};
use crate::merge::ConnectorRouter;
use crate::passes::{PassError, assign_pass_tracks, read_passes};

#[derive(Error, Debug)]
pub enum TourError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Track index error")]
    Index(#[from] IndexError),
    #[error("Itinerary error")]
    Itinerary(#[from] ItineraryError),
    #[error("Passes error")]
    Passes(#[from] PassError),
    #[error("No tracks could be loaded")]
    NoTracks(IndexReport),
}

pub type Result<T> = std::result::Result<T, TourError>;

/// The result of a planning run.
#[derive(Debug)]
pub struct TourPlan {
    /// Bookings sorted by arrival date, each carrying the ride that reaches it.
    pub bookings: Vec<Booking>,
    pub index_report: IndexReport,
}

impl TourPlan {
    pub fn incomplete_days(&self) -> usize {
        self.bookings
            .iter()
            .filter(|b| b.route.as_ref().is_some_and(|r| !r.is_complete()))
            .count()
    }
}

/// Plan every day of a tour.
///
/// Indexes the GPX files in `tracks_dir`, reads the bookings JSON at
/// `bookings_path`, chains a route into every stay, and writes one merged GPX
/// track per day into `output_dir`. When a `router` is given it fills the last
/// mile from the end of each merged track to the hotel. When `passes_path`
/// names a JSON list of mountain passes, each pass gets a track from the
/// nearest stay, see [`passes`].
///
/// Problems with individual track files or days do not fail the run; they are
/// reported in [`TourPlan::index_report`] and on each day's
/// [`itinerary::DayPlan::issues`].
#[instrument(level = "trace", skip_all)]
pub fn plan_tour(
    tracks_dir: &Path,
    bookings_path: &Path,
    output_dir: &Path,
    passes_path: Option<&Path>,
    options: &PlanOptions,
    router: Option<&dyn ConnectorRouter>,
) -> Result<TourPlan> {
    let (index, index_report) = build_index(tracks_dir)?;
    if index.is_empty() {
        return Err(TourError::NoTracks(index_report));
    }
    let mut bookings = read_bookings(bookings_path)?;
    let passes = match passes_path {
        Some(path) => read_passes(path)?,
        None => vec![],
    };
    info!("Planning {} stays over {} tracks", bookings.len(), index.len());

    fs::create_dir_all(output_dir)?;
    plan_days(&mut bookings, &index, options, router, output_dir);
    if !passes.is_empty() {
        assign_pass_tracks(&mut bookings, &passes, &index, &options.passes);
    }

    Ok(TourPlan {
        bookings,
        index_report,
    })
}
