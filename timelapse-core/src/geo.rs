//! Geographic query point and the bounding box derived from it.

use std::fmt;

use crate::{Error, Result};

/// A point of interest plus the half width (in degrees) of the square around it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoQuery {
    latitude: f64,
    longitude: f64,
    half_width: f64,
}

impl GeoQuery {
    /// Validate and build a query.
    ///
    /// Latitude must lie in [-90, 90], longitude in [-180, 180] and the half
    /// width must be a positive finite number.
    pub fn new(latitude: f64, longitude: f64, half_width: f64) -> Result<Self> {
        let valid = (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude)
            && half_width.is_finite()
            && half_width > 0.0;

        if !valid {
            return Err(Error::InvalidGeoQuery { latitude, longitude, half_width });
        }

        Ok(Self { latitude, longitude, half_width })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    /// Square box of `lat ± h`, `lon ± h`. Not clamped to valid coordinates.
    pub fn bounding_box(&self) -> BoundingBox {
        let h = self.half_width;
        BoundingBox {
            south: self.latitude - h,
            west: self.longitude - h,
            north: self.latitude + h,
            east: self.longitude + h,
        }
    }
}

/// Rectangular area in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

/// Formats as `south,west,north,east`, the axis order WMS 1.3.0 expects for EPSG:4326.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}
