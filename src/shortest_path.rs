//! Dijkstra baseline over edge length, used both as the reference path for
//! `step_tolerance` scoring in the planner and as the fallback route when a
//! leg's planner run does not converge.

use petgraph::algo::astar;
use petgraph::visit::EdgeRef;

use crate::error::RouterError;
use crate::graph::{NodeId, StreetGraph};

/// A node sequence from `origin` to `destination`, inclusive, with its
/// total length in meters.
#[derive(Clone, Debug)]
pub struct ShortestPath {
    pub nodes: Vec<NodeId>,
    pub length_m: f64,
}

/// Finds the shortest path by edge length between `origin` and
/// `destination`. Uses `petgraph::algo::astar` with a straight-line
/// haversine heuristic, mirroring the teacher's `Cartograph::shortest_path`
/// call shape.
pub fn shortest_path(
    graph: &StreetGraph,
    origin: NodeId,
    destination: NodeId,
) -> Result<ShortestPath, RouterError> {
    let start = graph.node_index(origin).ok_or(RouterError::GraphInvariant(None))?;
    let end = graph.node_index(destination).ok_or(RouterError::GraphInvariant(None))?;
    let pg = graph.petgraph();
    let end_coord = pg[end].coord;

    let result = astar(
        pg,
        start,
        |node| node == end,
        |edge_ref| edge_ref.weight().length_m,
        |node| pg[node].coord.haversine_distance(&end_coord),
    );

    match result {
        Some((length_m, indices)) => Ok(ShortestPath {
            nodes: indices.into_iter().map(|idx| pg[idx].id).collect(),
            length_m,
        }),
        None => Err(RouterError::NoRoute),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{Node, StreetEdge};

    fn node(id: u64, lat: f64, lon: f64) -> Node {
        Node {
            id: NodeId(id),
            coord: crate::geo::Coordinate::new(lat, lon),
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
            name: None,
            geometry: None,
        }
    }

    #[test]
    fn finds_shortest_of_two_paths() {
        let mut graph = StreetGraph::new();
        for i in 0..4 {
            graph.add_node(node(i, 0.0, i as f64)).unwrap();
        }
        // Direct long edge 0->3, and a short detour 0->1->2->3.
        graph.add_edge(NodeId(0), NodeId(3), edge(1000.0)).unwrap();
        graph.add_edge(NodeId(0), NodeId(1), edge(10.0)).unwrap();
        graph.add_edge(NodeId(1), NodeId(2), edge(10.0)).unwrap();
        graph.add_edge(NodeId(2), NodeId(3), edge(10.0)).unwrap();

        let path = shortest_path(&graph, NodeId(0), NodeId(3)).unwrap();
        assert_eq!(path.nodes, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
        assert!((path.length_m - 30.0).abs() < 1e-6);
    }

    #[test]
    fn no_route_between_disconnected_nodes() {
        let mut graph = StreetGraph::new();
        graph.add_node(node(0, 0.0, 0.0)).unwrap();
        graph.add_node(node(1, 0.0, 1.0)).unwrap();
        assert!(shortest_path(&graph, NodeId(0), NodeId(1)).is_err());
    }
}
