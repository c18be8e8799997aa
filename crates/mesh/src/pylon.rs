//! Pylons: the top-level unit of independent navigation mesh.

use ahash::{AHashMap, AHashSet};
use glam::{Vec2, Vec3};
use nav_octree::ElementToken;
use nav_types::ids::{AgentId, ObstacleId, PylonId};
use parry2d::{
    math::{Point, Vector},
    query::{PointQuery, Ray, RayCast},
    shape::ConvexPolygon,
};
use parry3d::bounding_volume::Aabb;

use crate::{edge::Edge, poly::Poly};

/// Authoring flags of a pylon.
#[derive(Clone, Copy, Default, Debug)]
pub struct PylonFlags {
    /// Disabled pylons are ignored by all queries and searches.
    pub disabled: bool,
    /// Imported pylons were brought in verbatim; the walkable-slope filter
    /// is skipped for their polys.
    pub imported: bool,
    /// Dynamic pylons rebuild their dynamic edges when neighbors stream in.
    pub dynamic: bool,
}

/// Top-level mesh unit. Owns a walkable [`NavMesh`] and an [`ObstacleMesh`]
/// of blocking volumes at its walkable surface.
pub struct Pylon {
    id: PylonId,
    bounds: Aabb,
    token: Option<ElementToken>,
    flags: PylonFlags,
    inclusion: Vec<PylonId>,
    mesh: NavMesh,
    obstacle_mesh: ObstacleMesh,
    pub(crate) hl_session: u32,
}

impl Pylon {
    pub(crate) fn new(id: PylonId, bounds: Aabb, flags: PylonFlags) -> Self {
        Self {
            id,
            bounds,
            token: None,
            flags,
            inclusion: Vec::new(),
            mesh: NavMesh::new(),
            obstacle_mesh: ObstacleMesh::new(),
            hl_session: 0,
        }
    }

    pub fn id(&self) -> PylonId {
        self.id
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn is_disabled(&self) -> bool {
        self.flags.disabled
    }

    pub fn is_imported(&self) -> bool {
        self.flags.imported
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.dynamic
    }

    pub(crate) fn set_disabled(&mut self, disabled: bool) {
        self.flags.disabled = disabled;
    }

    /// Stamps this pylon as part of the current high-level path.
    pub fn mark_high_level(&mut self, session: u32) {
        self.hl_session = session;
    }

    /// Returns true when the pylon was marked as part of the high-level
    /// path during `session`.
    pub fn in_high_level_path(&self, session: u32) -> bool {
        self.hl_session == session
    }

    /// Returns ids of pylons declared adjacent by the level author.
    pub fn inclusion(&self) -> &[PylonId] {
        self.inclusion.as_slice()
    }

    pub(crate) fn add_inclusion(&mut self, pylon: PylonId) {
        if !self.inclusion.contains(&pylon) {
            self.inclusion.push(pylon);
        }
    }

    pub(crate) fn remove_inclusion(&mut self, pylon: PylonId) {
        self.inclusion.retain(|&p| p != pylon);
    }

    pub fn mesh(&self) -> &NavMesh {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut NavMesh {
        &mut self.mesh
    }

    pub fn obstacle_mesh(&self) -> &ObstacleMesh {
        &self.obstacle_mesh
    }

    pub fn obstacle_mesh_mut(&mut self) -> &mut ObstacleMesh {
        &mut self.obstacle_mesh
    }

    pub(crate) fn token(&self) -> Option<ElementToken> {
        self.token
    }

    pub(crate) fn set_token(&mut self, token: Option<ElementToken>) {
        self.token = token;
    }
}

/// A set of polys and edges owned by one pylon. Sub-mesh polys live in the
/// same arena as top-level polys.
pub struct NavMesh {
    polys: Vec<Poly>,
    edges: Vec<Option<Edge>>,
    free_edges: Vec<u32>,
    /// Edges addressed by persistent 64-bit ids; survive sub-mesh rebuilds.
    dynamic_edges: AHashMap<u64, u32>,
    /// Handles whose path cache currently references an edge.
    edge_users: AHashMap<u32, AHashSet<AgentId>>,
    next_group: u16,
}

impl NavMesh {
    fn new() -> Self {
        Self {
            polys: Vec::new(),
            edges: Vec::new(),
            free_edges: Vec::new(),
            dynamic_edges: AHashMap::new(),
            edge_users: AHashMap::new(),
            next_group: 0,
        }
    }

    /// Adds a top-level walkable poly and returns its item index.
    pub fn add_poly(&mut self, verts: Vec<Vec3>, height: f32) -> u32 {
        let item = self.polys.len() as u32;
        self.polys.push(Poly::new(verts, height, item, None));
        item
    }

    pub(crate) fn add_sub_poly(&mut self, parent: u32, verts: Vec<Vec3>, height: f32) -> u32 {
        let item = self.polys.len() as u32;
        self.polys.push(Poly::new(verts, height, item, Some(parent)));
        item
    }

    pub fn poly(&self, item: u32) -> Option<&Poly> {
        self.polys.get(item as usize).filter(|p| p.is_alive())
    }

    pub(crate) fn poly_mut(&mut self, item: u32) -> Option<&mut Poly> {
        self.polys.get_mut(item as usize).filter(|p| p.is_alive())
    }

    /// Like [`Self::poly`] but also resolves killed polys. Carving uses this
    /// to find the parent of a sub-mesh poly which was already torn down.
    pub(crate) fn poly_even_dead(&self, item: u32) -> Option<&Poly> {
        self.polys.get(item as usize)
    }

    /// Iterates over all living polys.
    pub fn polys(&self) -> impl Iterator<Item = &Poly> {
        self.polys.iter().filter(|p| p.is_alive())
    }

    pub fn edge(&self, index: u32) -> Option<&Edge> {
        self.edges.get(index as usize).and_then(|e| e.as_ref())
    }

    pub(crate) fn edge_mut(&mut self, index: u32) -> Option<&mut Edge> {
        self.edges.get_mut(index as usize).and_then(|e| e.as_mut())
    }

    /// Iterates over all present edges with their indices.
    pub fn edges(&self) -> impl Iterator<Item = (u32, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u32, e)))
    }

    pub(crate) fn insert_edge(&mut self, edge: Edge) -> u32 {
        match self.free_edges.pop() {
            Some(index) => {
                debug_assert!(self.edges[index as usize].is_none());
                self.edges[index as usize] = Some(edge);
                index
            }
            None => {
                self.edges.push(Some(edge));
                (self.edges.len() - 1) as u32
            }
        }
    }

    pub(crate) fn take_edge(&mut self, index: u32) -> Option<Edge> {
        let edge = self.edges.get_mut(index as usize).and_then(|e| e.take())?;
        if let Some(id) = edge.dynamic_id() {
            self.dynamic_edges.remove(&id);
        }
        self.edge_users.remove(&index);
        self.free_edges.push(index);
        Some(edge)
    }

    pub(crate) fn fresh_group(&mut self) -> u16 {
        self.next_group += 1;
        self.next_group
    }

    pub(crate) fn register_dynamic_edge(&mut self, id: u64, index: u32) {
        self.dynamic_edges.insert(id, index);
    }

    /// Resolves a persistent dynamic edge id to the current edge index.
    pub fn dynamic_edge(&self, id: u64) -> Option<u32> {
        self.dynamic_edges.get(&id).copied()
    }

    pub(crate) fn mark_edge_user(&mut self, index: u32, agent: AgentId) {
        self.edge_users.entry(index).or_default().insert(agent);
    }

    /// Removes the in-use mark. Returns true if the mark was present.
    pub(crate) fn unmark_edge_user(&mut self, index: u32, agent: AgentId) -> bool {
        match self.edge_users.get_mut(&index) {
            Some(users) => {
                let removed = users.remove(&agent);
                if users.is_empty() {
                    self.edge_users.remove(&index);
                }
                removed
            }
            None => false,
        }
    }

    pub(crate) fn edge_users(&self, index: u32) -> Vec<AgentId> {
        self.edge_users
            .get(&index)
            .map(|users| {
                let mut users: Vec<AgentId> = users.iter().copied().collect();
                users.sort();
                users
            })
            .unwrap_or_default()
    }

    pub fn is_edge_in_use(&self, index: u32) -> bool {
        self.edge_users.contains_key(&index)
    }
}

/// A single blocking convex volume of the obstacle mesh.
pub struct BlockingVolume {
    footprint: ConvexPolygon,
    base: f32,
    height: f32,
    source: Option<ObstacleId>,
}

impl BlockingVolume {
    pub fn footprint(&self) -> &ConvexPolygon {
        &self.footprint
    }

    pub fn base(&self) -> f32 {
        self.base
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn source(&self) -> Option<ObstacleId> {
        self.source
    }

    fn overlaps_z(&self, min: f32, max: f32) -> bool {
        self.base <= max && self.base + self.height >= min
    }
}

/// Result of an obstacle mesh sweep.
#[derive(Clone, Copy, Debug)]
pub struct VolumeHit {
    /// Fraction of the swept segment at which the hit occurred.
    pub fraction: f32,
    /// Horizontal outward normal at the hit.
    pub normal: Vec2,
    /// Top of the blocking volume that was hit.
    pub top: f32,
}

/// Geometry blocking agents at a pylon's walkable surface.
pub struct ObstacleMesh {
    volumes: Vec<BlockingVolume>,
}

impl ObstacleMesh {
    fn new() -> Self {
        Self {
            volumes: Vec::new(),
        }
    }

    /// Adds a blocking volume at the walkable surface.
    pub fn add_volume(
        &mut self,
        footprint: ConvexPolygon,
        base: f32,
        height: f32,
        source: Option<ObstacleId>,
    ) {
        self.volumes.push(BlockingVolume {
            footprint,
            base,
            height,
            source,
        });
    }

    /// Removes all volumes added on behalf of a registered obstacle.
    pub(crate) fn remove_volumes_from(&mut self, source: ObstacleId) {
        self.volumes.retain(|v| v.source != Some(source));
    }

    pub fn volumes(&self) -> &[BlockingVolume] {
        self.volumes.as_slice()
    }

    /// Returns true when `point` is inside a blocking volume.
    pub fn blocks_point(&self, point: Vec3) -> bool {
        let local = Point::new(point.x, point.y);
        self.volumes.iter().any(|v| {
            v.overlaps_z(point.z, point.z) && v.footprint.contains_local_point(&local)
        })
    }

    /// Casts a horizontal segment from `from` to `to` against all volumes
    /// overlapping the `[z_min, z_max]` vertical range. Returns the earliest
    /// hit.
    pub fn sweep(&self, from: Vec2, to: Vec2, z_min: f32, z_max: f32) -> Option<VolumeHit> {
        let dir = to - from;
        if dir.length_squared() <= f32::EPSILON {
            return None;
        }
        let ray = Ray::new(Point::new(from.x, from.y), Vector::new(dir.x, dir.y));

        let mut best: Option<VolumeHit> = None;
        for volume in &self.volumes {
            if !volume.overlaps_z(z_min, z_max) {
                continue;
            }
            if let Some(hit) = volume
                .footprint
                .cast_local_ray_and_get_normal(&ray, 1., true)
            {
                if best.map_or(true, |b| hit.toi < b.fraction) {
                    best = Some(VolumeHit {
                        fraction: hit.toi,
                        normal: Vec2::new(hit.normal.x, hit.normal.y),
                        top: volume.base + volume.height,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn box_footprint(min: Vec2, max: Vec2) -> ConvexPolygon {
        ConvexPolygon::from_convex_polyline(vec![
            Point::new(min.x, min.y),
            Point::new(max.x, min.y),
            Point::new(max.x, max.y),
            Point::new(min.x, max.y),
        ])
        .unwrap()
    }

    #[test]
    fn test_blocks_point() {
        let mut mesh = ObstacleMesh::new();
        mesh.add_volume(
            box_footprint(Vec2::new(0., 0.), Vec2::new(10., 10.)),
            0.,
            50.,
            None,
        );

        assert!(mesh.blocks_point(Vec3::new(5., 5., 10.)));
        assert!(!mesh.blocks_point(Vec3::new(15., 5., 10.)));
        assert!(!mesh.blocks_point(Vec3::new(5., 5., 60.)));
    }

    #[test]
    fn test_sweep() {
        let mut mesh = ObstacleMesh::new();
        mesh.add_volume(
            box_footprint(Vec2::new(40., -10.), Vec2::new(60., 10.)),
            0.,
            50.,
            None,
        );

        let hit = mesh
            .sweep(Vec2::new(0., 0.), Vec2::new(100., 0.), 0., 10.)
            .unwrap();
        assert_abs_diff_eq!(hit.fraction, 0.4);
        assert_abs_diff_eq!(hit.normal.x, -1.);

        assert!(mesh
            .sweep(Vec2::new(0., 20.), Vec2::new(100., 20.), 0., 10.)
            .is_none());
        // Above the volume.
        assert!(mesh
            .sweep(Vec2::new(0., 0.), Vec2::new(100., 0.), 60., 70.)
            .is_none());
    }
}
