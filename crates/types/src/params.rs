//! Per-search agent parameters and the pathfinding error taxonomy.

use glam::Vec3;
use thiserror::Error;

use crate::ids::AgentId;

/// Parameter pack describing the searching agent. The agent fills a fresh
/// pack at the start of every search; the navigation handle caches it for
/// the lifetime of the resulting path.
#[derive(Clone, Copy, Debug)]
pub struct PathParams {
    /// World position the search starts from.
    pub search_start: Vec3,
    /// Half-extents of the agent's bounding box.
    pub search_extent: Vec3,
    /// Minimum Z component of a walkable poly normal. Polys sloped beyond
    /// this are not walkable for the agent.
    pub min_walkable_z: f32,
    /// Maximum height of a drop-down edge the agent accepts.
    pub max_drop_height: f32,
    /// Maximum distance above a poly surface at which the agent still counts
    /// as being on the poly.
    pub max_hover_distance: f32,
    /// Multiplier applied to the agent radius when testing edge widths.
    pub search_lane_multiplier: f32,
    /// Whether the agent can traverse mantle edges.
    pub can_mantle: bool,
    /// Whether mantle edges must be re-validated before use.
    pub needs_mantle_validity_test: bool,
    /// Whether the agent may search at all. A pack with this unset fails
    /// every search immediately.
    pub able_to_search: bool,
    /// Opaque handle of the searching agent.
    pub agent: AgentId,
}

impl PathParams {
    /// Returns the horizontal radius of the agent used for edge width and
    /// clearance tests.
    pub fn radius(&self) -> f32 {
        self.search_extent.x.max(self.search_extent.y)
    }

    /// Returns the radius scaled by the search lane multiplier.
    pub fn lane_radius(&self) -> f32 {
        self.radius() * self.search_lane_multiplier
    }
}

impl Default for PathParams {
    fn default() -> Self {
        Self {
            search_start: Vec3::ZERO,
            search_extent: Vec3::new(34., 34., 88.),
            min_walkable_z: 0.7,
            max_drop_height: 0.,
            max_hover_distance: 50.,
            search_lane_multiplier: 1.,
            can_mantle: false,
            needs_mantle_validity_test: false,
            able_to_search: true,
            agent: AgentId::new(0),
        }
    }
}

/// Taxonomy of pathfinding failures. Errors are recorded on the navigation
/// handle together with the time of failure; they are never propagated as
/// panics and search entry points return plain booleans.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum PathError {
    #[error("agent is not inside any walkable poly")]
    StartPolyNotFound,
    #[error("anchor poly found but its pylon is disabled or unloaded")]
    AnchorPylonNotFound,
    #[error("goal point is outside any walkable poly")]
    GoalPolyNotFound,
    #[error("no path exists between start and goal")]
    NoPathFound,
    #[error("could not compute a valid final destination")]
    ComputeValidFinalDestFail,
    #[error("could not recover a move location from off-path state")]
    GetNextMoveLocationFail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius() {
        let params = PathParams {
            search_extent: Vec3::new(34., 30., 88.),
            search_lane_multiplier: 1.5,
            ..Default::default()
        };
        assert_eq!(params.radius(), 34.);
        assert_eq!(params.lane_radius(), 51.);
    }
}
