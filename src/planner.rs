//! The safety-aware step-by-step planner: a discrete-time decision process
//! that drives a policy across the street graph one neighbor at a time,
//! scored by a multi-term reward, with a shortest-path fallback splice when
//! a leg fails to reach its destination under policy control.

use crate::crime::CrimePointIndex;
use crate::error::RouterError;
use crate::geo::{relative_bearing, Coordinate};
use crate::graph::{NodeId, StreetGraph};
use crate::policy::Policy;
use crate::shortest_path::{shortest_path, ShortestPath};

pub const MAX_ACTIONS: usize = 8;
pub const CRIME_K: usize = 5;

const INVALID_ACTION_REWARD: f64 = -100.0;
const REVISITING_REWARD: f64 = -100.0;
const WENT_TOO_FAR_REWARD: f64 = -100.0;
const ARRIVED_REWARD: f64 = 200.0;
const CRIME_PROXIMITY_RADIUS_M: f64 = 120.0;

/// Per-action padding/sentinel value, matching spec's "-1 before the first
/// step"/"padded with all-fields--1 entries" rule for fixed-size observation
/// fields.
const SENTINEL: f64 = -1.0;

/// Feature set recorded after a step, describing the edge just traversed.
/// All fields are `SENTINEL` before the first step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreviousStep {
    pub cycleway_level: f64,
    pub max_speed_kmh: f64,
    pub relative_bearing_deg: f64,
    pub end_node_visited: f64,
}

impl PreviousStep {
    pub fn sentinel() -> Self {
        PreviousStep {
            cycleway_level: SENTINEL,
            max_speed_kmh: SENTINEL,
            relative_bearing_deg: SENTINEL,
            end_node_visited: SENTINEL,
        }
    }
}

/// Features describing one candidate action (move to one neighbor), padded
/// to [`MAX_ACTIONS`] entries.
#[derive(Clone, Copy, Debug)]
pub struct ActionFeatures {
    pub neighbor: Option<NodeId>,
    pub cycleway_level: f64,
    pub max_speed_kmh: f64,
    pub relative_bearing_deg: f64,
    pub end_node_visited: f64,
    pub distance_to_destination_m: f64,
}

impl ActionFeatures {
    pub fn padding() -> Self {
        ActionFeatures {
            neighbor: None,
            cycleway_level: SENTINEL,
            max_speed_kmh: SENTINEL,
            relative_bearing_deg: SENTINEL,
            end_node_visited: SENTINEL,
            distance_to_destination_m: SENTINEL,
        }
    }
}

/// The observation handed to the policy at every step.
#[derive(Clone, Debug)]
pub struct Observation {
    pub current_node: NodeId,
    pub destination_node: NodeId,
    pub step_count: usize,
    pub step_tolerance: usize,
    pub straight_line_distance_m: f64,
    pub traveled_distance_m: f64,
    pub valid_action_count: usize,
    pub actions: Vec<ActionFeatures>,
    /// Ascending great-circle distances of the `CRIME_K` nearest crime
    /// points, padded with `SENTINEL` when fewer are loaded.
    pub nearest_crime_points: Vec<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Arrived,
    Revisiting,
    WentTooFar,
    InvalidAction,
}

/// The outcome of a completed leg.
#[derive(Clone, Debug)]
pub struct LegResult {
    pub path: Vec<NodeId>,
    pub total_reward: f64,
    pub termination: Termination,
    pub fallback_used: bool,
}

/// `tolerance_multiplier(d)`: 1.7 at d=0, 1.3 at d >= 2000m, linear between.
pub(crate) fn tolerance_multiplier(origin_destination_m: f64) -> f64 {
    let t = (origin_destination_m / 2000.0).clamp(0.0, 1.0);
    1.7 - 0.4 * t
}

/// Folds a relative bearing in [0, 360) to [0, 180] and linearly maps it to
/// a reward in [+15, -15].
pub(crate) fn orientation_reward(relative_bearing_deg: f64) -> f64 {
    let folded = relative_bearing_deg.min(360.0 - relative_bearing_deg);
    15.0 - folded / 180.0 * 30.0
}

pub(crate) fn speed_reward(max_speed_kmh: f64) -> f64 {
    if max_speed_kmh < 40.0 {
        3.0
    } else {
        0.0
    }
}

pub(crate) fn cycleway_reward(cycleway_level: f64) -> f64 {
    if cycleway_level == 2.0 {
        4.0
    } else if cycleway_level == 1.0 {
        2.0
    } else {
        0.0
    }
}

pub(crate) fn progress_reward(distance_decreased: bool) -> f64 {
    if distance_decreased {
        20.0
    } else {
        -10.0
    }
}

pub fn crime_proximity_reward(nearest: &[f64]) -> f64 {
    let close_count = nearest
        .iter()
        .filter(|&&d| d >= 0.0 && d <= CRIME_PROXIMITY_RADIUS_M)
        .count();
    6.0 - 3.0 * close_count as f64
}

/// Running state for one leg (origin -> destination) of a trip.
struct LegState {
    origin: NodeId,
    destination: NodeId,
    destination_coord: Coordinate,
    origin_destination_m: f64,
    path: Vec<NodeId>,
    traveled_distance_m: f64,
    previous_step: PreviousStep,
    previous_distance_m: f64,
    step_tolerance: usize,
}

/// Drives a sequence of legs (origin -> w1 -> w2 -> ... -> wm) across a
/// mutable, per-request copy of the street graph.
pub struct Planner<'g> {
    graph: &'g StreetGraph,
    crime_index: &'g CrimePointIndex,
    remaining: Vec<NodeId>,
    leg: Option<LegState>,
}

impl<'g> Planner<'g> {
    pub fn new(graph: &'g StreetGraph, crime_index: &'g CrimePointIndex) -> Self {
        Planner {
            graph,
            crime_index,
            remaining: Vec::new(),
            leg: None,
        }
    }

    /// Requires `waypoints.len() >= 1`. Stores `[origin, w1, ..., wm]`.
    pub fn set_origin_and_waypoints(
        &mut self,
        origin: NodeId,
        waypoints: Vec<NodeId>,
    ) -> Result<(), RouterError> {
        if waypoints.is_empty() {
            return Err(RouterError::InputValidation(
                "at least one waypoint is required".into(),
            ));
        }
        self.remaining = std::iter::once(origin).chain(waypoints).collect();
        Ok(())
    }

    /// True once only the final destination remains.
    pub fn is_complete(&self) -> bool {
        self.remaining.len() <= 1
    }

    /// Initializes the next leg's episode state from the front two ids in
    /// the remaining waypoint list; returns `None` once the trip is
    /// complete.
    pub fn reset(&mut self) -> Result<Option<(NodeId, NodeId)>, RouterError> {
        if self.is_complete() {
            self.leg = None;
            return Ok(None);
        }
        let origin = self.remaining[0];
        let destination = self.remaining[1];
        let origin_coord = self
            .graph
            .node(origin)
            .ok_or(RouterError::GraphInvariant(None))?
            .coord;
        let destination_coord = self
            .graph
            .node(destination)
            .ok_or(RouterError::GraphInvariant(None))?
            .coord;
        let origin_destination_m = origin_coord.haversine_distance(&destination_coord);

        let step_tolerance = if origin == destination {
            0
        } else {
            let baseline = shortest_path(self.graph, origin, destination)?;
            (baseline.nodes.len() as f64 * 1.2).floor() as usize
        };

        self.leg = Some(LegState {
            origin,
            destination,
            destination_coord,
            origin_destination_m,
            path: vec![origin],
            traveled_distance_m: 0.0,
            previous_step: PreviousStep::sentinel(),
            previous_distance_m: origin_destination_m,
            step_tolerance,
        });
        Ok(Some((origin, destination)))
    }

    /// Pops the leg just completed so the next `reset()` advances to the
    /// following pair.
    pub fn advance(&mut self) {
        if !self.remaining.is_empty() {
            self.remaining.remove(0);
        }
    }

    fn leg(&self) -> &LegState {
        self.leg.as_ref().expect("reset() must run before stepping")
    }

    /// Builds the observation for the current state of the active leg.
    pub fn observation(&self) -> Observation {
        let leg = self.leg();
        let current = *leg.path.last().unwrap();
        let current_coord = self.graph.node(current).map(|n| n.coord).unwrap_or(leg.destination_coord);
        let neighbors = self.graph.neighbors(current);

        let mut actions = Vec::with_capacity(MAX_ACTIONS);
        for neighbor in neighbors.iter().take(MAX_ACTIONS) {
            let edge = self.graph.edge_attrs(current, *neighbor);
            let neighbor_coord = self.graph.node(*neighbor).map(|n| n.coord);
            let (cycleway_level, max_speed_kmh, relative_bearing_deg) = match edge {
                Some(edge) => (
                    edge.cycleway_level as f64,
                    edge.effective_max_speed_kmh() as f64,
                    relative_bearing(&current_coord, neighbor_coord.as_ref().unwrap_or(&current_coord), &leg.destination_coord),
                ),
                None => (SENTINEL, SENTINEL, SENTINEL),
            };
            let end_node_visited = if leg.path.contains(neighbor) { 1.0 } else { 0.0 };
            let distance_to_destination_m = neighbor_coord
                .map(|c| c.haversine_distance(&leg.destination_coord))
                .unwrap_or(SENTINEL);

            actions.push(ActionFeatures {
                neighbor: Some(*neighbor),
                cycleway_level,
                max_speed_kmh,
                relative_bearing_deg,
                end_node_visited,
                distance_to_destination_m,
            });
        }
        let valid_action_count = actions.len();
        while actions.len() < MAX_ACTIONS {
            actions.push(ActionFeatures::padding());
        }

        let mut nearest_crime_points: Vec<f64> = self
            .crime_index
            .k_nearest(current_coord, CRIME_K)
            .into_iter()
            .map(|p| p.distance_m)
            .collect();
        while nearest_crime_points.len() < CRIME_K {
            nearest_crime_points.push(SENTINEL);
        }

        Observation {
            current_node: current,
            destination_node: leg.destination,
            step_count: leg.path.len() - 1,
            step_tolerance: leg.step_tolerance,
            straight_line_distance_m: current_coord.haversine_distance(&leg.destination_coord),
            traveled_distance_m: leg.traveled_distance_m,
            valid_action_count,
            actions,
            nearest_crime_points,
        }
    }

    /// Applies `action` to the active leg. Returns the step reward and,
    /// once the leg has terminated, `Some(termination)`.
    pub fn step(&mut self, action: usize) -> Result<(f64, Option<Termination>), RouterError> {
        let observation = self.observation();
        let leg = self.leg.as_mut().expect("reset() must run before stepping");

        if action >= observation.valid_action_count {
            return Ok((INVALID_ACTION_REWARD, Some(Termination::InvalidAction)));
        }

        let chosen = observation.actions[action];
        let neighbor = chosen.neighbor.expect("valid action always has a neighbor");
        let edge_length_m = self
            .graph
            .edge_attrs(*leg.path.last().unwrap(), neighbor)
            .map(|e| e.length_m)
            .unwrap_or(0.0);

        let step_count = leg.path.len();
        let step_tolerance_penalty = if step_count > leg.step_tolerance {
            -((step_count - leg.step_tolerance) as f64)
        } else {
            0.0
        };

        let mut reward = step_tolerance_penalty
            + speed_reward(chosen.max_speed_kmh)
            + cycleway_reward(chosen.cycleway_level)
            + progress_reward(chosen.distance_to_destination_m < leg.previous_distance_m)
            + orientation_reward(chosen.relative_bearing_deg)
            + crime_proximity_reward(&observation.nearest_crime_points);

        let end_node_visited = chosen.end_node_visited;
        leg.path.push(neighbor);
        leg.traveled_distance_m += edge_length_m;
        leg.previous_distance_m = chosen.distance_to_destination_m;
        leg.previous_step = PreviousStep {
            cycleway_level: chosen.cycleway_level,
            max_speed_kmh: chosen.max_speed_kmh,
            relative_bearing_deg: chosen.relative_bearing_deg,
            end_node_visited,
        };

        if neighbor == leg.destination {
            reward += ARRIVED_REWARD;
            return Ok((reward, Some(Termination::Arrived)));
        }
        if end_node_visited == 1.0 && leg.path.len() > 1 {
            reward += REVISITING_REWARD;
            return Ok((reward, Some(Termination::Revisiting)));
        }
        let tolerance = tolerance_multiplier(leg.origin_destination_m);
        if chosen.distance_to_destination_m > leg.origin_destination_m * tolerance {
            reward += WENT_TOO_FAR_REWARD;
            return Ok((reward, Some(Termination::WentTooFar)));
        }

        Ok((reward, None))
    }

    /// Runs a full leg (already initialized via `reset()`) under `policy`
    /// until termination or a hard step ceiling (`5 * |shortest path|`),
    /// applying the force-arriving splice when the leg does not arrive
    /// under policy control.
    pub fn run_leg(&mut self, policy: &dyn Policy) -> Result<LegResult, RouterError> {
        let (origin, destination) = {
            let leg = self.leg();
            (leg.origin, leg.destination)
        };

        if origin == destination {
            return Ok(LegResult {
                path: vec![origin],
                total_reward: 0.0,
                termination: Termination::Arrived,
                fallback_used: false,
            });
        }

        let baseline = shortest_path(self.graph, origin, destination)?;
        let step_ceiling = (baseline.nodes.len() * 5).max(10);

        let mut total_reward = 0.0;
        let mut termination;
        loop {
            let observation = self.observation();
            let action = policy.act(&observation);
            let (reward, maybe_termination) = self.step(action)?;
            total_reward += reward;

            if let Some(t) = maybe_termination {
                termination = t;
                break;
            }
            if self.leg().path.len() >= step_ceiling {
                termination = Termination::WentTooFar;
                break;
            }
        }

        if termination == Termination::Arrived {
            return Ok(LegResult {
                path: self.leg().path.clone(),
                total_reward,
                termination,
                fallback_used: false,
            });
        }

        Ok(self.force_arriving(termination, total_reward, &baseline)?)
    }

    /// Drops the failing tail of the path (also the last node on
    /// `revisiting`), then splices the shortest path from there to the
    /// destination, marking the leg arrived via fallback.
    fn force_arriving(
        &mut self,
        termination: Termination,
        total_reward: f64,
        leg_baseline: &ShortestPath,
    ) -> Result<LegResult, RouterError> {
        let leg = self.leg.as_mut().expect("reset() must run before stepping");
        leg.path.pop();
        let last = *leg.path.last().unwrap_or(&leg.origin);

        let splice = if last == leg.destination {
            ShortestPath {
                nodes: vec![last],
                length_m: 0.0,
            }
        } else {
            match shortest_path(self.graph, last, leg.destination) {
                Ok(path) => path,
                Err(_) => leg_baseline.clone(),
            }
        };

        let mut path = leg.path.clone();
        path.pop();
        path.extend(splice.nodes);

        Ok(LegResult {
            path,
            total_reward,
            termination,
            fallback_used: true,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{Node, StreetEdge};
    use crate::policy::ShortestPathPolicy;

    fn node(id: u64, lat: f64, lon: f64) -> Node {
        Node {
            id: NodeId(id),
            coord: Coordinate::new(lat, lon),
            street_count: 2,
        }
    }

    fn edge(length_m: f64, bearing_deg: f64) -> StreetEdge {
        StreetEdge {
            length_m,
            bearing_deg,
            highway_class: "residential".to_string(),
            max_speed_kmh: None,
            cycleway_level: 0,
            one_way: false,
            name: None,
            geometry: None,
        }
    }

    fn straight_line_graph() -> StreetGraph {
        let mut graph = StreetGraph::new();
        let step = 100.0 / 111_320.0;
        for i in 0..5 {
            graph.add_node(node(i, i as f64 * step, 0.0)).unwrap();
        }
        for i in 0..4 {
            graph
                .add_edge(NodeId(i), NodeId(i + 1), edge(100.0, 0.0))
                .unwrap();
            graph
                .add_edge(NodeId(i + 1), NodeId(i), edge(100.0, 180.0))
                .unwrap();
        }
        graph
    }

    #[test]
    fn straight_line_leg_arrives_with_shortest_path_policy() {
        let graph = straight_line_graph();
        let crime_index = CrimePointIndex::new(vec![]);
        let baseline = shortest_path(&graph, NodeId(0), NodeId(4)).unwrap();
        let policy = ShortestPathPolicy::new(baseline.nodes.clone());

        let mut planner = Planner::new(&graph, &crime_index);
        planner
            .set_origin_and_waypoints(NodeId(0), vec![NodeId(4)])
            .unwrap();
        planner.reset().unwrap();
        let result = planner.run_leg(&policy).unwrap();

        assert_eq!(result.termination, Termination::Arrived);
        assert!(!result.fallback_used);
        assert_eq!(result.path, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3), NodeId(4)]);
    }

    #[test]
    fn origin_equals_destination_is_trivially_arrived() {
        let graph = straight_line_graph();
        let crime_index = CrimePointIndex::new(vec![]);
        let policy = ShortestPathPolicy::new(vec![NodeId(0)]);

        let mut planner = Planner::new(&graph, &crime_index);
        planner
            .set_origin_and_waypoints(NodeId(0), vec![NodeId(0)])
            .unwrap();
        planner.reset().unwrap();
        let result = planner.run_leg(&policy).unwrap();

        assert_eq!(result.path, vec![NodeId(0)]);
        assert_eq!(result.total_reward, 0.0);
    }

    /// A policy that always selects action 0 on a graph with a cycle should
    /// trigger `revisiting`, then force-arriving should splice a path that
    /// still ends at the destination.
    #[test]
    fn cycle_inducing_policy_falls_back_to_destination() {
        let mut graph = StreetGraph::new();
        // A loop: 0 -> 1 -> 2 -> 0, plus a tail 2 -> 3 (destination).
        for i in 0..4 {
            graph.add_node(node(i, 0.0, i as f64 * 0.001)).unwrap();
        }
        graph.add_edge(NodeId(0), NodeId(1), edge(50.0, 90.0)).unwrap();
        graph.add_edge(NodeId(1), NodeId(2), edge(50.0, 90.0)).unwrap();
        graph.add_edge(NodeId(2), NodeId(0), edge(50.0, 270.0)).unwrap();
        graph.add_edge(NodeId(2), NodeId(3), edge(50.0, 90.0)).unwrap();

        struct AlwaysFirst;
        impl Policy for AlwaysFirst {
            fn act(&self, _obs: &Observation) -> usize {
                0
            }
        }

        let crime_index = CrimePointIndex::new(vec![]);
        let mut planner = Planner::new(&graph, &crime_index);
        planner
            .set_origin_and_waypoints(NodeId(0), vec![NodeId(3)])
            .unwrap();
        planner.reset().unwrap();
        let result = planner.run_leg(&AlwaysFirst).unwrap();

        assert!(result.fallback_used);
        assert_eq!(result.path.last(), Some(&NodeId(3)));
    }

    #[test]
    fn invalid_action_terminates_with_penalty() {
        let graph = straight_line_graph();
        let crime_index = CrimePointIndex::new(vec![]);
        let mut planner = Planner::new(&graph, &crime_index);
        planner
            .set_origin_and_waypoints(NodeId(0), vec![NodeId(4)])
            .unwrap();
        planner.reset().unwrap();
        // Node 0 has a single outgoing neighbor; action 7 is out of range.
        let (reward, termination) = planner.step(7).unwrap();
        assert_eq!(termination, Some(Termination::InvalidAction));
        assert_eq!(reward, INVALID_ACTION_REWARD);
    }

    #[test]
    fn multi_leg_waypoints_advance_in_order() {
        let mut planner_state = Vec::new();
        let graph = straight_line_graph();
        let crime_index = CrimePointIndex::new(vec![]);
        let mut planner = Planner::new(&graph, &crime_index);
        planner
            .set_origin_and_waypoints(NodeId(0), vec![NodeId(2), NodeId(4)])
            .unwrap();

        while let Some(pair) = planner.reset().unwrap() {
            planner_state.push(pair);
            planner.advance();
        }

        assert_eq!(planner_state, vec![(NodeId(0), NodeId(2)), (NodeId(2), NodeId(4))]);
    }
}
