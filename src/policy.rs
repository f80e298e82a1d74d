//! The planner consumes a policy as an opaque scoring function. This module
//! provides the `Policy` trait plus two concrete implementations: a
//! shortest-path follower and a weighted heuristic that scores each
//! neighbor with the same terms the planner's reward function uses.
//!
//! A real deployment would load a pretrained PPO artifact here; training
//! one is out of scope, so `WeightedHeuristicPolicy` plus its serialized
//! `PolicyArtifact` stand in as the "any deterministic tie-breaking policy"
//! the environment contract explicitly allows.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::graph::NodeId;
use crate::planner::Observation;

/// A pure function from observation to action index. The planner never
/// mutates the policy.
pub trait Policy {
    fn act(&self, obs: &Observation) -> usize;
}

/// Always steps toward the next node of the precomputed shortest path,
/// falling back to action 0 if the current node has drifted off that path
/// (which can happen after a force-arriving splice resets the leg).
pub struct ShortestPathPolicy {
    path: Vec<NodeId>,
}

impl ShortestPathPolicy {
    pub fn new(path: Vec<NodeId>) -> Self {
        ShortestPathPolicy { path }
    }
}

impl Policy for ShortestPathPolicy {
    fn act(&self, obs: &Observation) -> usize {
        let current = obs.current_node;
        let Some(position) = self.path.iter().position(|&n| n == current) else {
            return 0;
        };
        let Some(&next) = self.path.get(position + 1) else {
            return 0;
        };
        obs.actions
            .iter()
            .position(|a| a.neighbor == Some(next))
            .unwrap_or(0)
    }
}

/// Per-term weights for [`WeightedHeuristicPolicy`], loaded from a JSON
/// artifact via [`crate::config::Config::policy_path`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyArtifact {
    pub progress_weight: f64,
    pub orientation_weight: f64,
    pub cycleway_weight: f64,
    pub speed_weight: f64,
    pub crime_weight: f64,
}

impl Default for PolicyArtifact {
    fn default() -> Self {
        PolicyArtifact {
            progress_weight: 1.0,
            orientation_weight: 1.0,
            cycleway_weight: 1.0,
            speed_weight: 1.0,
            crime_weight: 1.0,
        }
    }
}

impl PolicyArtifact {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RouterError> {
        let content = fs::read_to_string(path)
            .map_err(|e| RouterError::PolicyFailure(format!("cannot read policy artifact: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| RouterError::PolicyFailure(format!("malformed policy artifact: {e}")))
    }
}

/// Scores each valid neighbor action with the same reward terms the
/// environment itself computes (progress, orientation, cycleway, speed,
/// crime proximity) and picks the best-scoring one. This is the
/// deterministic substitute spec.md §4.5 allows in place of a trained
/// artifact.
pub struct WeightedHeuristicPolicy {
    artifact: PolicyArtifact,
}

impl WeightedHeuristicPolicy {
    pub fn new(artifact: PolicyArtifact) -> Self {
        WeightedHeuristicPolicy { artifact }
    }
}

impl Policy for WeightedHeuristicPolicy {
    fn act(&self, obs: &Observation) -> usize {
        use crate::planner::{cycleway_reward, orientation_reward, progress_reward, crime_proximity_reward, speed_reward};

        let mut best_index = 0;
        let mut best_score = f64::NEG_INFINITY;

        for (index, action) in obs.actions.iter().enumerate().take(obs.valid_action_count) {
            let decreased = action.distance_to_destination_m < obs.straight_line_distance_m;
            let score = self.artifact.progress_weight * progress_reward(decreased)
                + self.artifact.orientation_weight * orientation_reward(action.relative_bearing_deg)
                + self.artifact.cycleway_weight * cycleway_reward(action.cycleway_level)
                + self.artifact.speed_weight * speed_reward(action.max_speed_kmh)
                + self.artifact.crime_weight * crime_proximity_reward(&obs.nearest_crime_points);

            if score > best_score {
                best_score = score;
                best_index = index;
            }
        }
        best_index
    }
}
