//! Runtime obstacle registration.
//!
//! A registered obstacle carves a sub-mesh into every walkable poly its
//! footprints overlap. Unregistration restores the affected polys, clearing
//! sub-meshes whose obstacle count drops to zero. Registration never fails
//! for degenerate geometry; footprint validation happens up front when the
//! shape is constructed.

use glam::Vec2;
use nav_types::ids::{ObstacleId, PolyRef, PylonId};
use parry2d::{math::Point as Point2, shape::ConvexPolygon};
use parry3d::{bounding_volume::Aabb, math::Point};
use thiserror::Error;
use tracing::warn;

use crate::{
    carve,
    world::{EdgeCleanup, NavWorld},
};

/// Vertical slack applied when matching a footprint against a poly surface.
const Z_SLACK: f32 = 4.;

const AREA_EPSILON: f32 = 1e-3;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum ObstacleError {
    #[error("obstacle footprint has fewer than 3 vertices")]
    DegenerateFootprint,
    #[error("obstacle footprint is not convex")]
    NonConvexFootprint,
}

/// A single convex 2-D footprint with its vertical extent.
#[derive(Clone, PartialEq, Debug)]
pub struct Footprint {
    verts: Vec<Vec2>,
    base: f32,
    height: f32,
}

impl Footprint {
    /// Creates a footprint from a vertex ring. The ring is normalized to
    /// counter-clockwise order; non-convex rings are rejected.
    pub fn new(mut verts: Vec<Vec2>, base: f32, height: f32) -> Result<Self, ObstacleError> {
        if verts.len() < 3 {
            return Err(ObstacleError::DegenerateFootprint);
        }

        let mut doubled_area = 0.;
        for i in 0..verts.len() {
            doubled_area += verts[i].perp_dot(verts[(i + 1) % verts.len()]);
        }
        if doubled_area.abs() < AREA_EPSILON {
            return Err(ObstacleError::DegenerateFootprint);
        }
        if doubled_area < 0. {
            verts.reverse();
        }

        for i in 0..verts.len() {
            let a = verts[i];
            let b = verts[(i + 1) % verts.len()];
            let c = verts[(i + 2) % verts.len()];
            if (b - a).perp_dot(c - b) < -AREA_EPSILON {
                warn!("rejecting non-convex obstacle footprint");
                return Err(ObstacleError::NonConvexFootprint);
            }
        }

        Ok(Self {
            verts,
            base,
            height,
        })
    }

    pub fn verts(&self) -> &[Vec2] {
        self.verts.as_slice()
    }

    pub fn base(&self) -> f32 {
        self.base
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    /// Returns true when a surface at `z` falls within the vertical span of
    /// the footprint.
    pub(crate) fn blocks_surface_at(&self, z: f32) -> bool {
        (self.base - Z_SLACK..=self.base + self.height).contains(&z)
    }
}

/// An obstacle shape: one or more convex footprints.
#[derive(Clone, Debug)]
pub struct ObstacleShape {
    footprints: Vec<Footprint>,
}

impl ObstacleShape {
    pub fn new(footprints: Vec<Footprint>) -> Self {
        Self { footprints }
    }

    /// Convenience constructor for the common single-footprint case.
    pub fn single(verts: Vec<Vec2>, base: f32, height: f32) -> Result<Self, ObstacleError> {
        Ok(Self {
            footprints: vec![Footprint::new(verts, base, height)?],
        })
    }

    pub fn footprints(&self) -> &[Footprint] {
        self.footprints.as_slice()
    }

    fn aabb(&self) -> Aabb {
        let mut mins = Vec2::INFINITY;
        let mut maxs = Vec2::NEG_INFINITY;
        let mut z_min = f32::INFINITY;
        let mut z_max = f32::NEG_INFINITY;
        for footprint in &self.footprints {
            for &vert in &footprint.verts {
                mins = mins.min(vert);
                maxs = maxs.max(vert);
            }
            z_min = z_min.min(footprint.base - Z_SLACK);
            z_max = z_max.max(footprint.base + footprint.height);
        }
        Aabb::new(
            Point::new(mins.x, mins.y, z_min),
            Point::new(maxs.x, maxs.y, z_max),
        )
    }
}

/// Registry entry of an active obstacle.
pub(crate) struct RegisteredObstacle {
    shape: ObstacleShape,
    affected: Vec<PolyRef>,
}

impl RegisteredObstacle {
    pub(crate) fn footprints(&self) -> &[Footprint] {
        self.shape.footprints()
    }

    pub(crate) fn affected(&self) -> &[PolyRef] {
        self.affected.as_slice()
    }

    pub(crate) fn affected_in(&self, pylon: PylonId) -> Vec<PolyRef> {
        self.affected
            .iter()
            .filter(|p| p.pylon() == pylon)
            .copied()
            .collect()
    }

    pub(crate) fn forget_pylon(&mut self, pylon: PylonId) {
        self.affected.retain(|p| p.pylon() != pylon);
    }

    pub(crate) fn num_footprints(&self) -> usize {
        self.shape.footprints.len()
    }
}

pub(crate) fn register(
    world: &mut NavWorld,
    id: ObstacleId,
    shape: ObstacleShape,
) -> Vec<EdgeCleanup> {
    let affected = collect_affected(world, &shape, None);
    for &poly_ref in &affected {
        if let Some(poly) = world.poly_mut(poly_ref) {
            poly.add_obstacle(id);
        }
    }
    attach_blocking_volumes(world, id, &shape, &affected);
    world.active_obstacles.insert(
        id,
        RegisteredObstacle {
            shape,
            affected: affected.clone(),
        },
    );
    rebuild_all(world, &affected)
}

pub(crate) fn unregister(world: &mut NavWorld, id: ObstacleId) -> Vec<EdgeCleanup> {
    let Some(registered) = world.active_obstacles.remove(&id) else {
        warn!("unregistering unknown obstacle {}", id.index());
        return Vec::new();
    };

    for pylon_id in affected_pylons(registered.affected()) {
        if let Some(pylon) = world.pylon_mut(pylon_id) {
            pylon.obstacle_mesh_mut().remove_volumes_from(id);
        }
    }

    let mut cleared = Vec::new();
    let mut recarve = Vec::new();
    for &poly_ref in registered.affected() {
        let Some(poly) = world.poly_mut(poly_ref) else {
            continue;
        };
        poly.remove_obstacle(id);
        if poly.num_obstacles_affecting() == 0 {
            cleared.push(poly_ref);
        } else {
            recarve.push(poly_ref);
        }
    }

    world.hold_edge_deletions();
    for &poly_ref in &cleared {
        carve::clear_submesh(world, poly_ref);
    }
    for &poly_ref in &recarve {
        carve::rebuild_submesh(world, poly_ref);
    }
    let events = world.release_edge_deletions();

    for &poly_ref in &cleared {
        carve::build_submesh_edges_for_just_cleared_poly(world, poly_ref);
    }
    for &poly_ref in &recarve {
        carve::create_edges_to_adjacent_pylon_submeshes(world, poly_ref);
    }
    events
}

/// Re-applies all registered obstacles to the polys of a freshly loaded
/// pylon.
pub(crate) fn apply_existing_obstacles(world: &mut NavWorld, pylon: PylonId) -> Vec<EdgeCleanup> {
    let mut ids: Vec<ObstacleId> = world.active_obstacles.keys().copied().collect();
    ids.sort();

    let mut all_affected = Vec::new();
    for id in ids {
        let shape = world.active_obstacles[&id].shape.clone();
        let affected = collect_affected(world, &shape, Some(pylon));
        for &poly_ref in &affected {
            if let Some(poly) = world.poly_mut(poly_ref) {
                poly.add_obstacle(id);
            }
            if let Some(registered) = world.active_obstacles.get_mut(&id) {
                if !registered.affected.contains(&poly_ref) {
                    registered.affected.push(poly_ref);
                }
            }
            if !all_affected.contains(&poly_ref) {
                all_affected.push(poly_ref);
            }
        }
        attach_blocking_volumes(world, id, &shape, &affected);
    }
    rebuild_all(world, &all_affected)
}

fn affected_pylons(affected: &[PolyRef]) -> Vec<PylonId> {
    let mut pylons: Vec<PylonId> = Vec::new();
    for poly_ref in affected {
        if !pylons.contains(&poly_ref.pylon()) {
            pylons.push(poly_ref.pylon());
        }
    }
    pylons
}

/// Mirrors the obstacle's footprints into the obstacle mesh of every pylon
/// it affects so point checks and sweeps see the obstruction.
fn attach_blocking_volumes(
    world: &mut NavWorld,
    id: ObstacleId,
    shape: &ObstacleShape,
    affected: &[PolyRef],
) {
    for pylon_id in affected_pylons(affected) {
        let Some(pylon) = world.pylon_mut(pylon_id) else {
            continue;
        };
        let mesh = pylon.obstacle_mesh_mut();
        if mesh.volumes().iter().any(|v| v.source() == Some(id)) {
            continue;
        }
        for footprint in shape.footprints() {
            let ring: Vec<Point2<f32>> = footprint
                .verts()
                .iter()
                .map(|v| Point2::new(v.x, v.y))
                .collect();
            let Some(polygon) = ConvexPolygon::from_convex_polyline(ring) else {
                continue;
            };
            mesh.add_volume(polygon, footprint.base(), footprint.height(), Some(id));
        }
    }
}

fn rebuild_all(world: &mut NavWorld, affected: &[PolyRef]) -> Vec<EdgeCleanup> {
    world.hold_edge_deletions();
    for &poly_ref in affected {
        carve::rebuild_submesh(world, poly_ref);
    }
    let events = world.release_edge_deletions();
    for &poly_ref in affected {
        carve::create_edges_to_adjacent_pylon_submeshes(world, poly_ref);
    }
    events
}

/// Finds all top-level walkable polys overlapped by a shape's footprints.
fn collect_affected(
    world: &NavWorld,
    shape: &ObstacleShape,
    only_pylon: Option<PylonId>,
) -> Vec<PolyRef> {
    let pylons = world.octree().find_in_aabb(&shape.aabb());

    let mut affected = Vec::new();
    for pylon_id in pylons {
        if only_pylon.is_some_and(|only| only != pylon_id) {
            continue;
        }
        let Some(pylon) = world.pylon(pylon_id) else {
            continue;
        };

        for poly in pylon.mesh().polys() {
            if poly.parent().is_some() {
                continue;
            }
            let ring: Vec<Vec2> = poly.verts().iter().map(|v| v.truncate()).collect();
            for footprint in shape.footprints() {
                let clipped = carve::clip_convex(footprint.verts(), &ring);
                if carve::ring_area(&clipped) <= AREA_EPSILON {
                    continue;
                }
                let centroid =
                    clipped.iter().sum::<Vec2>() / clipped.len() as f32;
                if footprint.blocks_surface_at(poly.plane_z_at(centroid)) {
                    affected.push(PolyRef::new(pylon_id, poly.item()));
                    break;
                }
            }
        }
    }
    affected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footprint_validation() {
        assert_eq!(
            Footprint::new(vec![Vec2::ZERO, Vec2::new(1., 0.)], 0., 10.),
            Err(ObstacleError::DegenerateFootprint),
        );
        assert_eq!(
            Footprint::new(
                vec![
                    Vec2::new(0., 0.),
                    Vec2::new(10., 0.),
                    Vec2::new(2., 2.),
                    Vec2::new(0., 10.),
                ],
                0.,
                10.,
            ),
            Err(ObstacleError::NonConvexFootprint),
        );

        // Clockwise input is normalized to counter-clockwise.
        let footprint = Footprint::new(
            vec![Vec2::new(0., 10.), Vec2::new(10., 10.), Vec2::new(5., 0.)],
            0.,
            10.,
        )
        .unwrap();
        let verts = footprint.verts();
        assert!((verts[1] - verts[0]).perp_dot(verts[2] - verts[1]) > 0.);
    }

    #[test]
    fn test_surface_matching() {
        let footprint =
            Footprint::new(vec![Vec2::ZERO, Vec2::new(1., 0.), Vec2::new(0., 1.)], 50., 100.)
                .unwrap();
        assert!(footprint.blocks_surface_at(50.));
        assert!(footprint.blocks_surface_at(47.));
        assert!(footprint.blocks_surface_at(150.));
        assert!(!footprint.blocks_surface_at(40.));
        assert!(!footprint.blocks_surface_at(160.));
    }
}
