//! Point and sweep queries over the navigation world.

use glam::{Vec2, Vec3};
use nav_types::{ids::PolyRef, params::PathParams};
use parry3d::{bounding_volume::Aabb, math::Point};

use crate::world::NavWorld;

/// Earliest blocking-volume hit of an obstacle sweep.
#[derive(Clone, Copy, Debug)]
pub struct SweepHit {
    /// Fraction of the swept segment at which the hit occurred.
    pub fraction: f32,
    /// World position of the hit.
    pub position: Vec3,
    /// Horizontal outward normal of the blocking volume.
    pub normal: Vec2,
    /// Top of the blocking volume, used for step-up decisions.
    pub top: f32,
}

/// Resolves the walkable poly containing `point`.
///
/// The point counts as on a poly when it is horizontally inside the ring and
/// within the agent's hover distance above the surface. Polys sloped beyond
/// the agent's walkable limit are skipped unless their pylon was imported
/// verbatim; carved polys resolve to their sub-mesh polys. Of several
/// candidates the one with the surface closest to the point wins.
pub fn poly_at(world: &NavWorld, point: Vec3, params: &PathParams) -> Option<PolyRef> {
    let hover = params.max_hover_distance;
    let probe = Aabb::new(
        Point::new(point.x, point.y, point.z - hover),
        Point::new(point.x, point.y, point.z + hover),
    );

    let mut best: Option<PolyRef> = None;
    let mut best_distance = f32::INFINITY;
    for pylon_id in world.octree().find_in_aabb(&probe) {
        let Some(pylon) = world.pylon(pylon_id) else {
            continue;
        };
        if pylon.is_disabled() {
            continue;
        }

        for poly in pylon.mesh().polys() {
            if poly.has_sub_mesh() || poly.is_fully_blocked() {
                continue;
            }
            if !pylon.is_imported() && poly.normal().z < params.min_walkable_z {
                continue;
            }
            if !poly.contains(point, hover) {
                continue;
            }
            let distance = (point.z - poly.plane_z_at(point.truncate())).abs();
            if distance < best_distance {
                best_distance = distance;
                best = Some(PolyRef::new(pylon_id, poly.item()));
            }
        }
    }
    best
}

/// Returns the distance between the centers of two polys.
pub fn poly_center_distance(world: &NavWorld, a: PolyRef, b: PolyRef) -> f32 {
    match (world.poly(a), world.poly(b)) {
        (Some(a), Some(b)) => a.center().distance(b.center()),
        _ => f32::INFINITY,
    }
}

/// Returns true when `point` sits inside a blocking volume of any loaded
/// pylon's obstacle mesh.
pub fn position_blocked(world: &NavWorld, point: Vec3) -> bool {
    world
        .octree()
        .find_at_point(point)
        .into_iter()
        .filter_map(|id| world.pylon(id))
        .any(|pylon| !pylon.is_disabled() && pylon.obstacle_mesh().blocks_point(point))
}

/// Sweeps the segment `from..to` against the obstacle meshes of all pylons
/// it crosses. Returns the earliest hit.
pub fn sweep_obstacles(world: &NavWorld, from: Vec3, to: Vec3) -> Option<SweepHit> {
    let mins = from.min(to);
    let maxs = from.max(to);
    let swept = Aabb::new(
        Point::new(mins.x, mins.y, mins.z),
        Point::new(maxs.x, maxs.y, maxs.z),
    );

    let mut best: Option<SweepHit> = None;
    for pylon_id in world.octree().find_in_aabb(&swept) {
        let Some(pylon) = world.pylon(pylon_id) else {
            continue;
        };
        if pylon.is_disabled() {
            continue;
        }

        let hit = pylon
            .obstacle_mesh()
            .sweep(from.truncate(), to.truncate(), mins.z, maxs.z);
        if let Some(hit) = hit {
            if best.map_or(true, |b| hit.fraction < b.fraction) {
                best = Some(SweepHit {
                    fraction: hit.fraction,
                    position: from + (to - from) * hit.fraction,
                    normal: hit.normal,
                    top: hit.top,
                });
            }
        }
    }
    best
}
