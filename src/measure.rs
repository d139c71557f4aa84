//! Simple zero-overhead unit of measure types
//!
//! Distances and elevations flow through the chaining engine as [`Meters`], and
//! coordinates as [`Degrees`], so that a latitude can never be summed into a
//! route distance by accident. [`Kilometers`] and [`Miles`] only exist for
//! reporting.

use std::fmt::{Display, Formatter};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

use approx::{AbsDiffEq, RelativeEq, relative_eq};
use num_traits::{Float, Num};
use serde::{Deserialize, Serialize};

macro_rules! unit_of_measure {
    ($u:ident, $suffix:literal) => {
        #[derive(Clone, Copy, Default, PartialEq, PartialOrd, Debug, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $u<N: Num>(pub N);

        impl<N> Add for $u<N>
        where
            N: Num,
        {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl<N> Sub for $u<N>
        where
            N: Num,
        {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl<N> AddAssign for $u<N>
        where
            N: Num + AddAssign,
        {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl<N> Mul<N> for $u<N>
        where
            N: Num,
        {
            type Output = Self;

            fn mul(self, rhs: N) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl<N> Div<N> for $u<N>
        where
            N: Num,
        {
            type Output = Self;

            fn div(self, rhs: N) -> Self {
                Self(self.0 / rhs)
            }
        }

        impl<N> Sum for $u<N>
        where
            N: Num,
        {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold(Self(N::zero()), |acc, x| acc + x)
            }
        }

        impl<N> Display for $u<N>
        where
            N: Num + Display,
        {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                match f.precision() {
                    Some(p) => write!(f, "{:.*}{}", p, self.0, $suffix),
                    None => write!(f, "{}{}", self.0, $suffix),
                }
            }
        }

        // Relative equality traits for approx support

        impl<N> AbsDiffEq for $u<N>
        where
            N: Num + Float + AbsDiffEq<N, Epsilon = N>,
        {
            type Epsilon = N;

            fn default_epsilon() -> Self::Epsilon {
                N::epsilon()
            }

            fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
                self.0.abs_diff_eq(&other.0, epsilon)
            }
        }

        impl<N> RelativeEq for $u<N>
        where
            N: Num + Float + AbsDiffEq<N, Epsilon = N> + RelativeEq<N>,
        {
            fn default_max_relative() -> Self::Epsilon {
                N::epsilon()
            }

            fn relative_eq(
                &self,
                other: &Self,
                epsilon: Self::Epsilon,
                max_relative: Self::Epsilon,
            ) -> bool {
                relative_eq!(
                    self.0,
                    other.0,
                    epsilon = epsilon,
                    max_relative = max_relative
                )
            }
        }
    };
}

// Distance units:
unit_of_measure![Meters, "m"];
unit_of_measure![Kilometers, "km"];
unit_of_measure![Miles, "mi"];

// Angular units:
unit_of_measure![Degrees, "°"];

const METERS_PER_MILE: f64 = 1609.344;

impl<N: Float> Meters<N> {
    /// The larger of two distances, ignoring NaN like [`f64::max`].
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// The smaller of two distances.
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    pub fn infinity() -> Self {
        Self(N::infinity())
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl From<Meters<f64>> for Kilometers<f64> {
    fn from(value: Meters<f64>) -> Self {
        Kilometers(value.0 / 1000.0)
    }
}

impl From<Kilometers<f64>> for Meters<f64> {
    fn from(value: Kilometers<f64>) -> Self {
        Meters(value.0 * 1000.0)
    }
}

impl From<Meters<f64>> for Miles<f64> {
    fn from(value: Meters<f64>) -> Self {
        Miles(value.0 / METERS_PER_MILE)
    }
}

impl Degrees<f64> {
    pub fn to_radians(self) -> f64 {
        self.0.to_radians()
    }
}
