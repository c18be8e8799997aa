//! Default tunables of the navigation runtime. Values are engine defaults; a
//! game retargeting the runtime may override the per-search ones through the
//! goal evaluator budget.

/// Cost sentinel returned by edge cost evaluation when an edge is unusable.
/// Any cost at or above this value vetoes the edge.
pub const BLOCKED: u32 = 10_000_000;

/// Default cap on A* edge visits per search.
pub const MAX_PATH_VISITS: u32 = 4096;

/// Denominator of the loose octree child expansion. Child extents grow by
/// `parent_extent / LOOSENESS_DENOMINATOR` so a box straddling a split plane
/// still fits exactly one child.
pub const LOOSENESS_DENOMINATOR: f32 = 16.;

/// Number of slots in the per-handle breadcrumb ring buffer.
pub const BREADCRUMB_RING_SIZE: usize = 8;

/// Minimum spacing between recorded breadcrumbs.
pub const BREADCRUMB_DISTANCE_INTERVAL: f32 = 50.;

/// Maximum length of a single navmesh walker integration segment.
pub const MAX_STEP: f32 = 5.0;

/// Maximum downward snap distance applied per tick when conforming an agent
/// to the poly surface.
pub const MAX_FLOOR_DROP_SPEED: f32 = 30.;

/// Step length of the granular reachability line check.
pub const LINECHECK_GRANULARITY: f32 = 5.0;

/// Height an agent may step up over a blocking volume during a reachability
/// sweep.
pub const MAX_STEP_HEIGHT: f32 = 35.;
