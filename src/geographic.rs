//! Great-circle geometry
//!
//! Distances are computed with the haversine formula on a sphere, which is
//! accurate to well within a percent at the scale of cycling tracks and keeps
//! every distance symmetric and cheap enough to scan whole track libraries.

use crate::measure::Meters;
use crate::types::{GeoPoint, IndexedPoint};

/// Mean earth radius used for all distances.
pub const EARTH_RADIUS: Meters<f64> = Meters(6_371_000.0);

/// Great-circle distance between two points, ignoring elevation.
///
/// Longitude differences are taken through `sin²(Δλ/2)`, so two points either
/// side of the antimeridian are measured along the short arc.
///
/// # Example
///
/// ```
/// use tourstitch::geographic::distance;
/// use tourstitch::measure::Degrees;
/// use tourstitch::types::GeoPoint;
///
/// let berlin = GeoPoint::new(Degrees(52.52), Degrees(13.405), None).unwrap();
/// let munich = GeoPoint::new(Degrees(48.1351), Degrees(11.582), None).unwrap();
/// let km = distance(&berlin, &munich).0 / 1000.0;
/// assert!((km - 504.2).abs() < 0.5);
/// ```
pub fn distance(a: &GeoPoint, b: &GeoPoint) -> Meters<f64> {
    let phi1 = a.lat().to_radians();
    let phi2 = b.lat().to_radians();
    let dphi = (b.lat() - a.lat()).to_radians();
    let dlambda = (b.lon() - a.lon()).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    EARTH_RADIUS * (2.0 * h.sqrt().atan2((1.0 - h).sqrt()))
}

/// The result of a nearest-point scan.
///
/// `sequence_index` is `None` only when nothing was scanned, in which case the
/// distance is infinite.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct NearestPoint {
    pub sequence_index: Option<usize>,
    pub distance: Meters<f64>,
}

impl NearestPoint {
    fn none() -> Self {
        Self {
            sequence_index: None,
            distance: Meters::infinity(),
        }
    }
}

/// Find the point of a track nearest to `target`.
///
/// A linear scan; ties go to the first point in sequence order.
pub fn nearest_point(points: &[IndexedPoint], target: &GeoPoint) -> NearestPoint {
    nearest_point_where(points, target, |_| true)
}

/// Like [`nearest_point`], but only considers points accepted by `filter`.
pub fn nearest_point_where<F>(points: &[IndexedPoint], target: &GeoPoint, filter: F) -> NearestPoint
where
    F: Fn(&IndexedPoint) -> bool,
{
    let mut best = NearestPoint::none();
    for p in points.iter().filter(|p| filter(p)) {
        let d = distance(target, &p.point);
        if d < best.distance {
            best = NearestPoint {
                sequence_index: Some(p.sequence_index),
                distance: d,
            };
        }
    }
    best
}

/// Total great-circle length of a polyline.
pub fn path_length<'a, I>(points: I) -> Meters<f64>
where
    I: IntoIterator<Item = &'a GeoPoint>,
{
    let mut total = Meters(0.0);
    let mut prev: Option<&GeoPoint> = None;
    for p in points {
        if let Some(q) = prev {
            total += distance(q, p);
        }
        prev = Some(p);
    }
    total
}
