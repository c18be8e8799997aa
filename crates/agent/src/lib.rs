//! Per-agent navigation layer.
//!
//! A [`NavHandle`] owns everything one agent needs to follow paths: the
//! cached parameter pack, the edge cache with its in-use marks, the
//! constraint and goal evaluator chains and the breadcrumb ring. The
//! [`MeshWalker`] is the per-tick integrator that moves an agent gripping
//! the mesh. The agent side of the contract is the [`NavAgent`] trait.

mod handle;
mod walker;

pub use handle::{NavAgent, NavHandle};
pub use walker::{MeshWalker, WalkOutcome, WalkerHooks, WalkerState};
