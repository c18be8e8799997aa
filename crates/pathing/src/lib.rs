//! Edge A* over the navigation mesh.
//!
//! The search expands poly-to-poly edges rather than polys: the open list
//! orders edges by estimated overall path weight, all transient bookkeeping
//! lives on the edges behind the session guard, and the result is the edge
//! sequence a navigation handle consumes. Constraints adjust or veto
//! individual expansions; goal evaluators seed the search, decide when it is
//! done and write the resulting path back.

mod astar;
mod constraint;
mod goal;
mod hilevel;
mod openlist;

pub use astar::{find_path, SearchContext, SearchOutcome};
pub use constraint::{
    AlongLine, ConstraintStats, EdgeEval, EnforceTwoWayEdges, MinDistBetweenSpecsOfType,
    PathConstraint, SameCoverLink, Toward, WithinDistanceEnvelope, WithinTraversalDist,
};
pub use goal::{
    AtGoal, ClosestInList, DistanceEnvelopeGoal, FilterContainer, GoalEvaluator, GoalFilter,
    NullGoal, PolyEncompasses, RandomGoal, SearchBudget,
};
