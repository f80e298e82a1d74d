//! Process configuration, read once at startup from environment variables.

use std::env;

use crate::error::RouterError;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub graph_path: String,
    pub crime_points_path: Option<String>,
    pub policy_path: Option<String>,
    /// Accepted for compatibility with a maps-API-backed snapper; unused by
    /// the projection-based endpoint snapper this crate implements.
    pub google_maps_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, RouterError> {
        let graph_path = env::var("ROUTER_GRAPH_PATH").map_err(|_| {
            RouterError::InputValidation("ROUTER_GRAPH_PATH must be set".to_string())
        })?;

        Ok(Config {
            bind_addr: env::var("ROUTER_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            graph_path,
            crime_points_path: env::var("ROUTER_CRIME_POINTS_PATH").ok(),
            policy_path: env::var("ROUTER_POLICY_PATH").ok(),
            google_maps_api_key: env::var("GOOGLE_MAPS_API_KEY").ok(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_graph_path_is_input_validation_error() {
        env::remove_var("ROUTER_GRAPH_PATH");
        assert!(matches!(Config::from_env(), Err(RouterError::InputValidation(_))));
    }
}
