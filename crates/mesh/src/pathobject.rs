//! Scripted path objects.
//!
//! A path object drives one or more path-object edges (lifts, doors, jump
//! pads). Edges store the object's stable id instead of an owning pointer;
//! the runtime resolves it through the world registry. The internals of the
//! scripted behavior belong to the host; only this interface is part of the
//! navigation contract.

use glam::Vec3;
use nav_types::{
    ids::{AgentId, EdgeRef, PolyRef},
    params::PathParams,
};

use crate::edge::Edge;

pub trait PathObject {
    /// Whether the object currently lets the agent described by `params`
    /// traverse `edge` out of `src_poly`.
    fn supports(&self, _params: &PathParams, _edge: &Edge, _src_poly: PolyRef) -> bool {
        true
    }

    /// Extra traversal cost added on top of the geometric edge cost.
    fn cost_penalty(&self, _params: &PathParams, _edge: &Edge) -> u32 {
        0
    }

    /// Gives the object a chance to take over movement across its edge.
    /// Returning true means the object moves the agent itself; the handle
    /// pops the edge from its cache and `out_move` holds the staging point
    /// the agent should reach first.
    fn prepare_move_thru(&self, _agent: AgentId, _out_move: &mut Vec3) -> bool {
        false
    }

    /// Post-processes a finished path. Returns true when the cache was
    /// modified; the search re-runs all objects in the cache until a fixed
    /// point is reached.
    fn modify_final_path(&self, _params: &PathParams, _cache: &mut Vec<EdgeRef>) -> bool {
        false
    }

    fn debug_text(&self) -> String {
        "path object".to_owned()
    }
}
