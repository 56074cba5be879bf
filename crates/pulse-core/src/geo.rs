//! Geospatial primitives
//!
//! Coordinates are WGS84 in (longitude, latitude) ordering, matching the
//! store's geospatial index convention. Distances are meters. A `GeoPoint`
//! can only be constructed from in-range coordinates, so every point held by
//! the engine is valid by construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PulseError, PulseResult};

/// Mean Earth radius in meters, for haversine distance
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A validated WGS84 coordinate pair
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoJsonPoint", into = "GeoJsonPoint")]
pub struct GeoPoint {
    longitude: f64,
    latitude: f64,
}

impl GeoPoint {
    /// Construct a point, rejecting out-of-range coordinates
    pub fn new(longitude: f64, latitude: f64) -> PulseResult<Self> {
        if !(-180.0..=180.0).contains(&longitude)
            || !(-90.0..=90.0).contains(&latitude)
            || longitude.is_nan()
            || latitude.is_nan()
        {
            return Err(PulseError::InvalidCoordinates {
                longitude,
                latitude,
            });
        }
        Ok(GeoPoint {
            longitude,
            latitude,
        })
    }

    #[inline]
    pub fn longitude(self) -> f64 {
        self.longitude
    }

    #[inline]
    pub fn latitude(self) -> f64 {
        self.latitude
    }

    /// Great-circle distance to another point, in meters
    pub fn distance_m(self, other: GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlng = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Shift the point by meter offsets (east, north), clamping back into
    /// valid coordinate ranges near the poles and the antimeridian.
    pub fn offset_m(self, east_m: f64, north_m: f64) -> GeoPoint {
        let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
        let lat_rad = self.latitude.to_radians();
        // Longitude circles shrink toward the poles
        let dlng = if lat_rad.cos().abs() < 1e-9 {
            0.0
        } else {
            (east_m / (EARTH_RADIUS_M * lat_rad.cos())).to_degrees()
        };

        GeoPoint {
            longitude: (self.longitude + dlng).clamp(-180.0, 180.0),
            latitude: (self.latitude + dlat).clamp(-90.0, 90.0),
        }
    }
}

impl fmt::Debug for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.longitude, self.latitude)
    }
}

/// Wire shape: GeoJSON-style point, `coordinates: [lng, lat]`
#[derive(Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type", default = "point_type")]
    kind: String,
    coordinates: [f64; 2],
}

fn point_type() -> String {
    "Point".to_string()
}

impl TryFrom<GeoJsonPoint> for GeoPoint {
    type Error = PulseError;

    fn try_from(raw: GeoJsonPoint) -> PulseResult<Self> {
        GeoPoint::new(raw.coordinates[0], raw.coordinates[1])
    }
}

impl From<GeoPoint> for GeoJsonPoint {
    fn from(point: GeoPoint) -> Self {
        GeoJsonPoint {
            kind: point_type(),
            coordinates: [point.longitude, point.latitude],
        }
    }
}
