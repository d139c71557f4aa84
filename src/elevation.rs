//! Cumulative ascent and descent from noisy elevation series
//!
//! GPS and barometric elevations wobble by a few meters from point to point,
//! so naively summing every positive step badly overstates climbing. This
//! module offers three filters of increasing robustness:
//!
//! - [`threshold_gain`] only counts a monotone run once it has climbed (or
//!   dropped) at least `threshold` meters.
//! - [`smoothed_gain`] runs a moving average over the series first.
//! - [`segment_gain`] lightly smooths, splits the series into ascending and
//!   descending stretches, and counts each stretch's net change once.
//!
//! [`ElevationProfile::compute`] applies the configured method to a whole
//! materialized day. Missing elevations are skipped, never treated as zero,
//! and fewer than two known elevations always yields zero.

use serde::{Deserialize, Serialize};
use strum::EnumString;
use tracing::trace;

use crate::measure::Meters;
use crate::types::GeoPoint;

/// Which way of the elevation change to count.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GainMode {
    Ascent,
    Descent,
}

impl GainMode {
    /// The change in the counted direction, positive when it counts.
    fn signed(self, delta: f64) -> f64 {
        match self {
            GainMode::Ascent => delta,
            GainMode::Descent => -delta,
        }
    }
}

/// The algorithm used for the reported elevation profile of a day.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, EnumString, strum::Display)]
#[derive(Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "cli", clap(rename_all = "kebab-case"))]
pub enum ElevationMethod {
    Threshold,
    Smoothed,
    SegmentBased,
    /// Mean of the segment-based and smoothed results.
    #[default]
    Blended,
}

/// Parameters of the elevation filters.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ElevationOptions {
    pub threshold: Meters<f64>,
    pub window_size: usize,
    pub min_segment_length: usize,
    pub method: ElevationMethod,
}

impl Default for ElevationOptions {
    fn default() -> Self {
        Self {
            threshold: Meters(3.0),
            window_size: 5,
            min_segment_length: 10,
            method: ElevationMethod::default(),
        }
    }
}

impl ElevationOptions {
    pub fn with_threshold(self, threshold: Meters<f64>) -> Self {
        Self { threshold, ..self }
    }

    pub fn with_window_size(self, window_size: usize) -> Self {
        Self {
            window_size,
            ..self
        }
    }

    pub fn with_min_segment_length(self, min_segment_length: usize) -> Self {
        Self {
            min_segment_length,
            ..self
        }
    }

    pub fn with_method(self, method: ElevationMethod) -> Self {
        Self { method, ..self }
    }
}

fn known(elevations: &[Option<f64>]) -> Vec<f64> {
    elevations.iter().flatten().copied().collect()
}

/// Moving average keeping only fully covered windows.
fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return vec![];
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

fn threshold_gain_known(values: &[f64], threshold: f64, mode: GainMode) -> f64 {
    let mut total = 0.0;
    let mut run = 0.0;
    for pair in values.windows(2) {
        let delta = mode.signed(pair[1] - pair[0]);
        if delta > 0.0 {
            run += delta;
        } else {
            if run >= threshold {
                total += run;
            }
            run = 0.0;
        }
    }
    if run >= threshold {
        total += run;
    }
    total
}

/// Threshold-accumulation gain.
///
/// Consecutive steps in the counted direction are accumulated into a run. A
/// step the other way (or a flat one) ends the run, which is added to the
/// total in full if it reached `threshold`, and discarded otherwise.
pub fn threshold_gain(elevations: &[Option<f64>], threshold: Meters<f64>, mode: GainMode) -> Meters<f64> {
    Meters(threshold_gain_known(&known(elevations), threshold.0, mode))
}

/// Threshold-accumulation over a `window_size` moving average.
///
/// Series too short to fill one more than a single window fall back to
/// threshold accumulation on the raw values.
pub fn smoothed_gain(
    elevations: &[Option<f64>],
    window_size: usize,
    threshold: Meters<f64>,
    mode: GainMode,
) -> Meters<f64> {
    let values = known(elevations);
    if window_size == 0 || values.len() < window_size + 1 {
        return Meters(threshold_gain_known(&values, threshold.0, mode));
    }
    let smoothed = moving_average(&values, window_size);
    Meters(threshold_gain_known(&smoothed, threshold.0, mode))
}

/// Net-change-per-segment gain.
///
/// With fewer than `min_segment_length` known elevations this is plain
/// threshold accumulation with a zero threshold.
pub fn segment_gain(elevations: &[Option<f64>], min_segment_length: usize, mode: GainMode) -> Meters<f64> {
    let values = known(elevations);
    if values.len() < 2 {
        return Meters(0.0);
    }
    if values.len() < min_segment_length {
        return Meters(threshold_gain_known(&values, 0.0, mode));
    }

    let smoothed = moving_average(&values, 3);
    if smoothed.len() < 2 {
        return Meters(0.0);
    }

    let mut total = 0.0;
    let mut segment_start = smoothed[0];
    let mut ascending = smoothed[1] > smoothed[0];
    for i in 1..smoothed.len() - 1 {
        let next_ascending = smoothed[i + 1] > smoothed[i];
        if next_ascending != ascending {
            total += segment_contribution(smoothed[i] - segment_start, ascending, mode);
            segment_start = smoothed[i];
            ascending = next_ascending;
        }
    }
    let last = smoothed[smoothed.len() - 1];
    total += segment_contribution(last - segment_start, ascending, mode);
    Meters(total)
}

fn segment_contribution(change: f64, ascending: bool, mode: GainMode) -> f64 {
    match mode {
        GainMode::Ascent if ascending && change > 0.0 => change,
        GainMode::Descent if !ascending && change < 0.0 => -change,
        _ => 0.0,
    }
}

/// Gain computed with `options.method`.
pub fn gain(elevations: &[Option<f64>], options: &ElevationOptions, mode: GainMode) -> Meters<f64> {
    match options.method {
        ElevationMethod::Threshold => threshold_gain(elevations, options.threshold, mode),
        ElevationMethod::Smoothed => {
            smoothed_gain(elevations, options.window_size, options.threshold, mode)
        }
        ElevationMethod::SegmentBased => segment_gain(elevations, options.min_segment_length, mode),
        ElevationMethod::Blended => {
            let segment = segment_gain(elevations, options.min_segment_length, mode);
            let smoothed = smoothed_gain(elevations, options.window_size, options.threshold, mode);
            (segment + smoothed) / 2.0
        }
    }
}

/// The elevation figures reported for a materialized day.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct ElevationProfile {
    pub ascent: Meters<f64>,
    pub descent: Meters<f64>,
    pub max_elevation: Option<Meters<f64>>,
    pub min_elevation: Option<Meters<f64>>,
}

impl ElevationProfile {
    /// Consecutive identical points, such as the junction a merged track
    /// repeats, count once.
    pub fn compute(points: &[GeoPoint], options: &ElevationOptions) -> ElevationProfile {
        let mut distinct: Vec<&GeoPoint> = points.iter().collect();
        distinct.dedup();
        let elevations: Vec<Option<f64>> = distinct.iter().map(|p| p.ele().map(|e| e.0)).collect();
        let profile = ElevationProfile {
            ascent: gain(&elevations, options, GainMode::Ascent),
            descent: gain(&elevations, options, GainMode::Descent),
            max_elevation: points.iter().filter_map(|p| p.ele()).reduce(|a, b| a.max(b)),
            min_elevation: points.iter().filter_map(|p| p.ele()).reduce(|a, b| a.min(b)),
        };
        trace!("Elevation profile over {} points: {:?}", points.len(), profile);
        profile
    }
}
