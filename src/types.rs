use approx::{AbsDiffEq, RelativeEq, abs_diff_eq, relative_eq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::measure::{Degrees, Meters};

#[derive(Error, Debug)]
pub enum TypeError {
    #[error("geographic point invariant: invalid value {1:?} for {0:?}")]
    GeoPointInvariant(GeoPointDimension, Degrees<f64>),
}

type Result<T> = std::result::Result<T, TypeError>;

/// A point on the surface of the earth, as read from a track file.
///
/// Enforces valid latitude and longitude values as type invariants.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint", into = "RawGeoPoint")]
pub struct GeoPoint {
    lat: Degrees<f64>,
    lon: Degrees<f64>,
    ele: Option<Meters<f64>>,
}

#[derive(Debug)]
pub enum GeoPointDimension {
    Latitude,
    Longitude,
}

impl GeoPoint {
    pub fn new(lat: Degrees<f64>, lon: Degrees<f64>, ele: Option<Meters<f64>>) -> Result<GeoPoint> {
        if !(-90.0..=90.0).contains(&lat.0) {
            return Err(TypeError::GeoPointInvariant(
                GeoPointDimension::Latitude,
                lat,
            ));
        }
        if !(-180.0..=180.0).contains(&lon.0) {
            return Err(TypeError::GeoPointInvariant(
                GeoPointDimension::Longitude,
                lon,
            ));
        }
        Ok(Self { lat, lon, ele })
    }

    /// Get point latitude
    pub fn lat(&self) -> Degrees<f64> {
        self.lat
    }

    /// Get point longitude
    pub fn lon(&self) -> Degrees<f64> {
        self.lon
    }

    /// Get point elevation, if known
    pub fn ele(&self) -> Option<Meters<f64>> {
        self.ele
    }

    /// The same position without elevation.
    pub fn flat(&self) -> GeoPoint {
        GeoPoint {
            ele: None,
            ..*self
        }
    }
}

impl Default for GeoPoint {
    fn default() -> GeoPoint {
        GeoPoint {
            lat: Degrees(0.0),
            lon: Degrees(0.0),
            ele: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawGeoPoint {
    lat: f64,
    lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ele: Option<f64>,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = TypeError;

    fn try_from(value: RawGeoPoint) -> Result<Self> {
        GeoPoint::new(Degrees(value.lat), Degrees(value.lon), value.ele.map(Meters))
    }
}

impl From<GeoPoint> for RawGeoPoint {
    fn from(value: GeoPoint) -> Self {
        RawGeoPoint {
            lat: value.lat.0,
            lon: value.lon.0,
            ele: value.ele.map(|e| e.0),
        }
    }
}

impl AbsDiffEq for GeoPoint {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        abs_diff_eq!(self.lat.0, other.lat.0, epsilon = epsilon)
            && abs_diff_eq!(self.lon.0, other.lon.0, epsilon = epsilon)
    }
}

impl RelativeEq for GeoPoint {
    fn default_max_relative() -> Self::Epsilon {
        0.000_000_000_000_001
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        relative_eq!(
            self.lat.0,
            other.lat.0,
            epsilon = epsilon,
            max_relative = max_relative
        ) && relative_eq!(
            self.lon.0,
            other.lon.0,
            epsilon = epsilon,
            max_relative = max_relative
        )
    }
}

/// A track point together with its position in the owning track.
///
/// Sequence indices are assigned by flattening every segment of every track in
/// a file, in file order, and run contiguously from zero. The chaining engine
/// addresses points only through them.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct IndexedPoint {
    pub point: GeoPoint,
    pub sequence_index: usize,
}

/// Instantiate a `GeoPoint` with a tuple-like syntax, optionally including an
/// elevation in meters.
#[macro_export]
macro_rules! geo_point {
    ( $lat:expr, $lon:expr ) => {
        $crate::types::GeoPoint::new(
            $crate::measure::Degrees($lat),
            $crate::measure::Degrees($lon),
            None,
        )?
    };
    ( $lat:expr, $lon:expr, $ele:expr ) => {
        $crate::types::GeoPoint::new(
            $crate::measure::Degrees($lat),
            $crate::measure::Degrees($lon),
            Some($crate::measure::Meters($ele)),
        )?
    };
}

/// Instantiate a vec of `GeoPoint` with tuple-like syntax, optionally including
/// an elevation in meters.
#[macro_export]
macro_rules! geo_points {
    ( $( ( $lat:expr, $lon:expr $(, $ele:expr )? $(,)? ) ),* $(,)? ) => {
        vec![ $( $crate::geo_point!($lat, $lon $( , $ele )?) ),* ]
    };
}
