mod data_types;

use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer};
use chrono::Utc;
use serde_json::json;

pub use data_types::{CoordinateRequest, ErrorResponse, RouteRequest};

use crate::config::Config;
use crate::crime::CrimePointIndex;
use crate::error::RouterError;
use crate::graph::StreetGraph;
use crate::planner::Planner;
use crate::policy::Policy;
use crate::route::{build_path, to_geojson};
use crate::snapper::snap_onto_graph;

/// Immutable, shared-read state every worker clones a graph copy from.
pub struct AppState {
    pub graph: StreetGraph,
    pub crime_index: CrimePointIndex,
    pub policy: Box<dyn Policy + Send + Sync>,
}

async fn compute_route(
    state: web::Data<AppState>,
    request: web::Json<RouteRequest>,
) -> Result<HttpResponse, RouterError> {
    request.validate()?;

    let mut graph = state.graph.clone();

    let origin_coord = request.origin.to_coordinate()?;
    let origin_id = snap_onto_graph(&mut graph, 0, origin_coord)?;

    let mut waypoint_coords = Vec::with_capacity(request.waypoints.len());
    let mut waypoint_ids = Vec::with_capacity(request.waypoints.len());
    for (i, waypoint) in request.waypoints.iter().enumerate() {
        let coord = waypoint.to_coordinate()?;
        waypoint_coords.push(coord);
        waypoint_ids.push(snap_onto_graph(&mut graph, (i + 1) as u64, coord)?);
    }

    let mut planner = Planner::new(&graph, &state.crime_index);
    planner.set_origin_and_waypoints(origin_id, waypoint_ids)?;

    let mut paths = Vec::new();
    while let Some(_leg) = planner.reset()? {
        let result = planner.run_leg(state.policy.as_ref())?;
        paths.push(build_path(&graph, &result.path, result.fallback_used));
        planner.advance();
    }

    let paths_geojson = to_geojson(&paths);
    let route = crate::route::Route {
        origin: origin_coord,
        waypoints: waypoint_coords,
        departure_time: Utc::now(),
        paths,
        paths_geojson,
    };

    Ok(HttpResponse::Created().json(route))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Starts the HTTP server bound to `config.bind_addr`, serving `POST /route`
/// over the shared `state`.
pub async fn run_server(config: Config, state: Arc<AppState>) -> std::io::Result<()> {
    log::info!("binding router http server on {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(state.clone()))
            .route("/route", web::post().to(compute_route))
            .route("/health", web::get().to(health))
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
