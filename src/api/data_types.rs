//! Wire request/response shapes for the `POST /route` endpoint.

use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::geo::Coordinate;

#[derive(Clone, Debug, Deserialize)]
pub struct CoordinateRequest {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub address: Option<String>,
}

impl CoordinateRequest {
    pub fn to_coordinate(&self) -> Result<Coordinate, RouterError> {
        let coord = Coordinate::new(self.lat, self.lon);
        if !coord.is_valid() {
            return Err(RouterError::InputValidation(format!(
                "coordinate out of range: ({}, {})",
                self.lat, self.lon
            )));
        }
        Ok(coord)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RouteRequest {
    pub origin: CoordinateRequest,
    pub waypoints: Vec<CoordinateRequest>,
}

impl RouteRequest {
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.waypoints.is_empty() {
            return Err(RouterError::InputValidation(
                "waypoints must be non-empty".to_string(),
            ));
        }
        self.origin.to_coordinate()?;
        for waypoint in &self.waypoints {
            waypoint.to_coordinate()?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty_waypoints() {
        let request = RouteRequest {
            origin: CoordinateRequest {
                lat: 0.0,
                lon: 0.0,
                address: None,
            },
            waypoints: vec![],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let request = RouteRequest {
            origin: CoordinateRequest {
                lat: 120.0,
                lon: 0.0,
                address: None,
            },
            waypoints: vec![CoordinateRequest {
                lat: 0.0,
                lon: 0.0,
                address: None,
            }],
        };
        assert!(request.validate().is_err());
    }
}
