//! Snaps a free-standing coordinate (an origin or waypoint supplied by a
//! caller) onto the street graph by finding its nearest edge and splitting
//! it, so routing always starts/ends on the graph itself.

use crate::error::RouterError;
use crate::geo::Coordinate;
use crate::graph::{NodeId, StreetGraph};

/// Snaps `point` onto the nearest street edge of `graph`, inserting a new
/// node there. `requested_id` namespaces the inserted node (see
/// [`crate::graph::NodeId::namespaced`]); callers typically pass a small
/// per-request counter (0, 1, 2, ...) so each leg's endpoints get distinct
/// namespaced ids.
pub fn snap_onto_graph(
    graph: &mut StreetGraph,
    requested_id: u64,
    point: Coordinate,
) -> Result<NodeId, RouterError> {
    let edge = graph
        .nearest_edge(point)
        .ok_or_else(|| RouterError::InputValidation("no street edge found near point".into()))?;
    graph.insert_on_edge(requested_id, point, edge)
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

    fn edge() -> StreetEdge {
        StreetEdge {
            length_m: 100.0,
            bearing_deg: 0.0,
            highway_class: "residential".to_string(),
            max_speed_kmh: None,
            cycleway_level: 0,
            one_way: false,
            name: None,
            geometry: None,
        }
    }

    #[test]
    fn snaps_near_a_straight_edge() {
        let mut graph = StreetGraph::new();
        graph.add_node(node(0, 0.0, 0.0)).unwrap();
        graph.add_node(node(1, 0.001, 0.0)).unwrap();
        graph.add_edge(NodeId(0), NodeId(1), edge()).unwrap();

        let off_graph_point = Coordinate::new(0.0005, 0.0001);
        let snapped = snap_onto_graph(&mut graph, 7, off_graph_point).unwrap();

        let neighbors = graph.neighbors(snapped);
        assert!(!neighbors.is_empty());
        assert!(graph.node(snapped).is_some());
    }
}
