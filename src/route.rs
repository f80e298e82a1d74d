//! Converts planner/baseline node sequences into the externally visible
//! `Path`/`Route` types, including polyline reconstruction, directions, and
//! GeoJSON emission.

use chrono::{DateTime, Utc};
use geojson::{Feature, FeatureCollection, Geometry, Value as GeojsonValue};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::directions::{build_directions, Direction, EdgeStep};
use crate::geo::Coordinate;
use crate::graph::{NodeId, StreetGraph};

/// An edge as seen from the wire: endpoints plus scalar attributes, with
/// `geometry` deliberately excluded (it is absorbed into the path's
/// polyline instead).
#[derive(Clone, Debug, Serialize)]
pub struct WireEdge {
    pub source: Coordinate,
    pub target: Coordinate,
    pub attributes: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Path {
    pub nodes: Vec<Coordinate>,
    pub edges: Vec<WireEdge>,
    pub directions: Vec<Direction>,
    pub polyline: Vec<Coordinate>,
    pub distance_m: f64,
    pub eta_s: f64,
    pub fallback_used: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct Route {
    pub origin: Coordinate,
    pub waypoints: Vec<Coordinate>,
    pub departure_time: DateTime<Utc>,
    pub paths: Vec<Path>,
    pub paths_geojson: Value,
}

/// Average cycling speed used for ETA estimation: 18 km/h.
const AVERAGE_SPEED_M_PER_S: f64 = 18.0 * 1000.0 / 3600.0;

fn edge_attributes(edge: &crate::graph::StreetEdge) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes.insert("length_m".to_string(), serde_json::json!(edge.length_m));
    attributes.insert("bearing_deg".to_string(), serde_json::json!(edge.bearing_deg));
    attributes.insert(
        "highway_class".to_string(),
        serde_json::json!(edge.highway_class),
    );
    attributes.insert(
        "max_speed_kmh".to_string(),
        serde_json::json!(edge.effective_max_speed_kmh()),
    );
    attributes.insert(
        "cycleway_level".to_string(),
        serde_json::json!(edge.cycleway_level),
    );
    attributes.insert("one_way".to_string(), serde_json::json!(edge.one_way));
    if let Some(name) = &edge.name {
        attributes.insert("name".to_string(), serde_json::json!(name));
    }
    attributes
}

/// Builds the polyline for a node sequence, per spec.md §4.4: walking edges
/// (n_i, n_{i+1}), appending geometry points (reversed as needed) excluding
/// each segment's final point, then appending the path's last node.
fn build_polyline(graph: &StreetGraph, nodes: &[NodeId]) -> Vec<Coordinate> {
    if nodes.is_empty() {
        return Vec::new();
    }
    let mut polyline = Vec::new();
    for window in nodes.windows(2) {
        let (u, v) = (window[0], window[1]);
        let u_coord = graph.node(u).map(|n| n.coord);
        let v_coord = graph.node(v).map(|n| n.coord);
        match (graph.edge_attrs(u, v), u_coord, v_coord) {
            (Some(edge), Some(u_coord), Some(v_coord)) => {
                let points = edge.points(&u_coord, &v_coord);
                polyline.extend_from_slice(&points[..points.len() - 1]);
            }
            (None, Some(u_coord), _) => polyline.push(u_coord),
            _ => {}
        }
    }
    if let Some(last) = nodes.last().and_then(|&n| graph.node(n)) {
        polyline.push(last.coord);
    }
    polyline
}

/// Builds a wire-facing `Path` from a node sequence produced by the planner
/// or the shortest-path baseline.
pub fn build_path(graph: &StreetGraph, nodes: &[NodeId], fallback_used: bool) -> Path {
    let node_coords: Vec<Coordinate> = nodes
        .iter()
        .filter_map(|&id| graph.node(id).map(|n| n.coord))
        .collect();

    let mut edges = Vec::new();
    let mut edge_steps = Vec::new();
    let mut distance_m = 0.0;
    let mut polyline_cursor = 0;

    for window in nodes.windows(2) {
        let (u, v) = (window[0], window[1]);
        let Some(edge) = graph.edge_attrs(u, v) else {
            continue;
        };
        let u_coord = graph.node(u).map(|n| n.coord).unwrap_or_default();
        let v_coord = graph.node(v).map(|n| n.coord).unwrap_or_default();

        distance_m += edge.length_m;
        edges.push(WireEdge {
            source: u_coord,
            target: v_coord,
            attributes: edge_attributes(edge),
        });

        let points = edge.points(&u_coord, &v_coord);
        let segment_len = points.len() - 1;
        edge_steps.push(EdgeStep {
            bearing_deg: edge.bearing_deg,
            street_name: edge.name.clone().unwrap_or_default(),
            polyline_range: (polyline_cursor, polyline_cursor + segment_len),
        });
        polyline_cursor += segment_len;
    }

    let polyline = build_polyline(graph, nodes);
    let directions = build_directions(&edge_steps);

    Path {
        nodes: node_coords,
        edges,
        directions,
        polyline,
        distance_m,
        eta_s: distance_m / AVERAGE_SPEED_M_PER_S,
        fallback_used,
    }
}

/// Emits a GeoJSON `FeatureCollection`, one `LineString` feature per path,
/// coordinates in lon-lat order, `id = "Route_<i>"`.
pub fn to_geojson(paths: &[Path]) -> Value {
    let features = paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let coordinates: Vec<Vec<f64>> = path
                .polyline
                .iter()
                .map(|c| c.to_lon_lat().to_vec())
                .collect();
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeojsonValue::LineString(coordinates))),
                id: Some(geojson::feature::Id::String(format!("Route_{i}"))),
                properties: None,
                foreign_members: None,
            }
        })
        .collect();

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    serde_json::to_value(collection).unwrap_or(Value::Null)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{Node, StreetEdge};

    fn node(id: u64, lat: f64, lon: f64) -> Node {
        Node {
            id: NodeId(id),
            coord: Coordinate::new(lat, lon),
            street_count: 2,
        }
    }

    fn edge(length_m: f64) -> StreetEdge {
        StreetEdge {
            length_m,
            bearing_deg: 0.0,
            highway_class: "residential".to_string(),
            max_speed_kmh: None,
            cycleway_level: 0,
            one_way: false,
            name: Some("Main St".to_string()),
            geometry: None,
        }
    }

    fn straight_line_graph() -> StreetGraph {
        let mut graph = StreetGraph::new();
        for i in 0..5 {
            graph.add_node(node(i, 0.0, i as f64 * 0.001)).unwrap();
        }
        for i in 0..4 {
            graph.add_edge(NodeId(i), NodeId(i + 1), edge(100.0)).unwrap();
        }
        graph
    }

    #[test]
    fn path_distance_and_eta_match_straight_line() {
        let graph = straight_line_graph();
        let nodes: Vec<NodeId> = (0..5).map(NodeId).collect();
        let path = build_path(&graph, &nodes, false);

        assert!((path.distance_m - 400.0).abs() < 1e-6);
        assert!((path.eta_s - 400.0 / AVERAGE_SPEED_M_PER_S).abs() < 1e-6);
        assert_eq!(path.polyline.first(), Some(&Coordinate::new(0.0, 0.0)));
        assert_eq!(path.polyline.last(), Some(&Coordinate::new(0.0, 0.004)));
        assert_eq!(path.directions.len(), 2);
        assert_eq!(path.directions[0].ending_action, "continue");
        assert_eq!(path.directions[1].ending_action, "arrive");
    }

    #[test]
    fn geojson_has_one_linestring_feature_per_path() {
        let graph = straight_line_graph();
        let nodes: Vec<NodeId> = (0..5).map(NodeId).collect();
        let path = build_path(&graph, &nodes, false);
        let geojson_value = to_geojson(&[path]);

        assert_eq!(geojson_value["type"], "FeatureCollection");
        assert_eq!(geojson_value["features"].as_array().unwrap().len(), 1);
        assert_eq!(geojson_value["features"][0]["id"], "Route_0");
    }
}
