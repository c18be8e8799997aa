//! Navigation mesh data model.
//!
//! A [`world::NavWorld`] owns a loose octree of pylons; each pylon owns a
//! walkable mesh of convex polys connected by typed edges and an obstacle
//! mesh of blocking volumes. Registered obstacles carve affected polys into
//! sub-meshes at runtime; all edge removal goes through the two-phase
//! deletion queue so agents holding paths are notified exactly once.

mod carve;
mod edge;
mod obstacle;
mod pathobject;
mod poly;
mod pylon;
mod query;
mod world;

pub use edge::{Edge, EdgeKind, EdgeKindTag, SearchState};
pub use obstacle::{Footprint, ObstacleError, ObstacleShape};
pub use pathobject::PathObject;
pub use poly::Poly;
pub use pylon::{BlockingVolume, NavMesh, ObstacleMesh, Pylon, PylonFlags, VolumeHit};
pub use query::{poly_at, poly_center_distance, position_blocked, sweep_obstacles, SweepHit};
pub use world::{EdgeCleanup, NavWorld};
