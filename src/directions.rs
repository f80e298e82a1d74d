//! Turn-by-turn direction grouping from a finished path's consecutive edge
//! bearings.

use serde::{Deserialize, Serialize};

const TURN_THRESHOLD_DEG: f64 = 30.0;
const SHARP_TURN_THRESHOLD_DEG: f64 = 150.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub ending_action: String,
    pub street_name: String,
    pub covered_edges_indexes: Vec<usize>,
    pub covered_polyline_points_indexes: Vec<usize>,
}

/// The bearing and street name of one traversed edge, as input to
/// [`build_directions`].
pub struct EdgeStep {
    pub bearing_deg: f64,
    pub street_name: String,
    /// Index range, within the path's polyline, covered by this edge
    /// (inclusive start, exclusive end).
    pub polyline_range: (usize, usize),
}

/// The signed turn angle from `from_bearing` to `to_bearing`, in (-180, 180].
fn signed_turn_angle(from_bearing: f64, to_bearing: f64) -> f64 {
    let mut delta = to_bearing - from_bearing;
    while delta > 180.0 {
        delta -= 360.0;
    }
    while delta <= -180.0 {
        delta += 360.0;
    }
    delta
}

fn turn_action(angle: f64) -> &'static str {
    if angle >= SHARP_TURN_THRESHOLD_DEG || angle <= -SHARP_TURN_THRESHOLD_DEG {
        "turn_around"
    } else if angle >= TURN_THRESHOLD_DEG {
        "turn_right"
    } else if angle <= -TURN_THRESHOLD_DEG {
        "turn_left"
    } else {
        "continue"
    }
}

fn make_direction(edges: &[EdgeStep], start: usize, end: usize, ending_action: String) -> Direction {
    let covered_edges_indexes: Vec<usize> = (start..end).collect();
    let polyline_start = edges[start].polyline_range.0;
    let polyline_end = edges[end - 1].polyline_range.1;
    let covered_polyline_points_indexes: Vec<usize> = (polyline_start..polyline_end).collect();
    Direction {
        ending_action,
        street_name: edges[start].street_name.clone(),
        covered_edges_indexes,
        covered_polyline_points_indexes,
    }
}

/// Groups a path's edges into `Direction` records: contiguous edges sharing
/// a street name, split wherever the turn between them exceeds the turn
/// threshold. The final edge always gets its own terminal `arrive`
/// direction, split off from whatever precedes it, even when no turn or
/// street-name boundary occurred there: arriving is itself a boundary.
pub fn build_directions(edges: &[EdgeStep]) -> Vec<Direction> {
    if edges.is_empty() {
        return vec![Direction {
            ending_action: "arrive".to_string(),
            street_name: String::new(),
            covered_edges_indexes: Vec::new(),
            covered_polyline_points_indexes: Vec::new(),
        }];
    }

    let last_index = edges.len() - 1;
    let mut directions = Vec::new();
    let mut group_start = 0;

    for i in 1..=last_index {
        let angle = signed_turn_angle(edges[i - 1].bearing_deg, edges[i].bearing_deg);
        let ends_group =
            edges[i].street_name != edges[i - 1].street_name || angle.abs() >= TURN_THRESHOLD_DEG;

        if ends_group {
            directions.push(make_direction(edges, group_start, i, turn_action(angle).to_string()));
            group_start = i;
        }
    }

    if group_start < last_index {
        let angle = signed_turn_angle(
            edges[last_index - 1].bearing_deg,
            edges[last_index].bearing_deg,
        );
        directions.push(make_direction(edges, group_start, last_index, turn_action(angle).to_string()));
        group_start = last_index;
    }
    directions.push(make_direction(edges, group_start, edges.len(), "arrive".to_string()));

    directions
}
