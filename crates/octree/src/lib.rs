//! Loose octree over axis-aligned bounding boxes.
//!
//! The tree is generic over a copyable element id; it never owns the indexed
//! objects. Child node extents are expanded by 1/16 of the parent extent so
//! a box straddling a split plane always fits exactly one child, which keeps
//! insertion and removal O(depth) without element duplication.

mod octant;
mod tree;

pub use tree::{ElementToken, LooseOctree};
