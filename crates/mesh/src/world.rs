//! World-scoped registry of pylons, obstacles and pending edge deletions.

use ahash::AHashMap;
use glam::Vec3;
use nav_octree::LooseOctree;
use nav_types::{
    ids::{AgentId, EdgeRef, ObstacleId, PathObjectId, PolyRef, PylonId},
    params::PathParams,
    tunables::BLOCKED,
};
use parry3d::bounding_volume::Aabb;
use tracing::warn;

use crate::{
    carve,
    edge::{Edge, EdgeKind},
    obstacle::{self, RegisteredObstacle},
    pathobject::PathObject,
    poly::Poly,
    pylon::{Pylon, PylonFlags},
};

/// Notification that an edge referenced by agent path caches was invalidated.
/// Emitted by the deletion flush; the agent layer empties the cache of every
/// listed user and notifies the agent of the path change.
#[derive(Clone, Debug)]
pub struct EdgeCleanup {
    pub edge: EdgeRef,
    pub users: Vec<AgentId>,
}

/// The navigation world: a loose octree of pylons plus the registries shared
/// by all searches. A value object owned by the host level container and
/// passed explicitly to every navigation operation.
pub struct NavWorld {
    octree: LooseOctree<PylonId>,
    pylons: AHashMap<PylonId, Pylon>,
    pub(crate) active_obstacles: AHashMap<ObstacleId, RegisteredObstacle>,
    /// Edge -> notify-only flag. Actual deletion wins over notify-only when
    /// the same edge is queued twice.
    pending_deletion: AHashMap<EdgeRef, bool>,
    hold_depth: u32,
    session: u32,
    path_objects: AHashMap<PathObjectId, Box<dyn PathObject>>,
    next_pylon: u32,
    next_obstacle: u32,
    next_path_object: u32,
    next_dynamic_edge: u64,
}

impl NavWorld {
    /// Creates an empty navigation world covering `bounds`.
    pub fn new(bounds: Aabb) -> Self {
        Self {
            octree: LooseOctree::new(bounds),
            pylons: AHashMap::new(),
            active_obstacles: AHashMap::new(),
            pending_deletion: AHashMap::new(),
            hold_depth: 0,
            session: 0,
            path_objects: AHashMap::new(),
            next_pylon: 0,
            next_obstacle: 0,
            next_path_object: 0,
            next_dynamic_edge: 0,
        }
    }

    /// Picks a fresh pathfinding session id. Stale per-edge search state from
    /// earlier sessions is cleared lazily by the session guard on the edges.
    pub fn next_session(&mut self) -> u32 {
        self.session = self.session.wrapping_add(1).max(1);
        self.session
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn octree(&self) -> &LooseOctree<PylonId> {
        &self.octree
    }

    // Pylon lifecycle.

    /// Adds an empty pylon to the world and the spatial index. The host
    /// populates its mesh afterwards and finishes with [`Self::post_load_fixup`].
    pub fn add_pylon(&mut self, bounds: Aabb, flags: PylonFlags) -> PylonId {
        let id = PylonId::new(self.next_pylon);
        self.next_pylon += 1;

        let mut pylon = Pylon::new(id, bounds, flags);
        let token = self.octree.insert(id, &bounds);
        pylon.set_token(Some(token));
        self.pylons.insert(id, pylon);
        id
    }

    /// Finishes attaching a freshly populated pylon: records mutual inclusion
    /// with overlapping pylons and re-applies already registered obstacles to
    /// the new polys.
    pub fn post_load_fixup(&mut self, id: PylonId) -> Vec<EdgeCleanup> {
        let Some(bounds) = self.pylons.get(&id).map(|p| *p.bounds()) else {
            return Vec::new();
        };

        let neighbors: Vec<PylonId> = self
            .octree
            .find_in_aabb(&bounds)
            .into_iter()
            .filter(|&n| n != id)
            .collect();
        for neighbor in neighbors {
            if let Some(pylon) = self.pylons.get_mut(&id) {
                pylon.add_inclusion(neighbor);
            }
            if let Some(pylon) = self.pylons.get_mut(&neighbor) {
                pylon.add_inclusion(id);
            }
        }

        obstacle::apply_existing_obstacles(self, id)
    }

    /// Detaches a pylon: destroys all its edges and all cross-pylon edges
    /// referencing it, removes it from the index and drops its mesh. Returns
    /// the cleanup events of every invalidated edge.
    pub fn remove_pylon(&mut self, id: PylonId) -> Vec<EdgeCleanup> {
        if !self.pylons.contains_key(&id) {
            return Vec::new();
        }

        self.hold_edge_deletions();

        let mut doomed: Vec<EdgeRef> = Vec::new();
        for (pylon_id, pylon) in &self.pylons {
            for (index, edge) in pylon.mesh().edges() {
                let owned = *pylon_id == id;
                let references =
                    edge.poly0().pylon() == id || edge.poly1().pylon() == id;
                if owned || references {
                    doomed.push(EdgeRef::new(*pylon_id, index));
                }
            }
        }
        for edge in doomed {
            self.destroy_edge(edge, false);
        }
        let events = self.release_edge_deletions();

        if let Some(pylon) = self.pylons.remove(&id) {
            if let Some(token) = pylon.token() {
                self.octree.remove(token);
            }
        }
        for pylon in self.pylons.values_mut() {
            pylon.remove_inclusion(id);
        }
        for registered in self.active_obstacles.values_mut() {
            registered.forget_pylon(id);
        }

        events
    }

    pub fn pylon(&self, id: PylonId) -> Option<&Pylon> {
        self.pylons.get(&id)
    }

    pub fn pylon_mut(&mut self, id: PylonId) -> Option<&mut Pylon> {
        self.pylons.get_mut(&id)
    }

    pub fn pylons(&self) -> impl Iterator<Item = &Pylon> {
        self.pylons.values()
    }

    /// Enables or disables a pylon and re-carves the polys of registered
    /// obstacles overlapping it.
    pub fn set_pylon_disabled(&mut self, id: PylonId, disabled: bool) -> Vec<EdgeCleanup> {
        let affected: Vec<PolyRef> = match self.pylons.get_mut(&id) {
            Some(pylon) => {
                pylon.set_disabled(disabled);
                self.active_obstacles
                    .values()
                    .flat_map(|r| r.affected_in(id))
                    .collect()
            }
            None => return Vec::new(),
        };
        self.trigger_rebuild_for_polys(&affected)
    }

    /// Returns ids of pylons adjacent to `id`: its inclusion list plus every
    /// pylon reachable through an edge incident to one of its polys.
    pub fn pylon_neighbors(&self, id: PylonId) -> Vec<PylonId> {
        let Some(pylon) = self.pylons.get(&id) else {
            return Vec::new();
        };

        let mut neighbors: Vec<PylonId> = pylon.inclusion().to_vec();
        for poly in pylon.mesh().polys() {
            for &edge_ref in poly.edges() {
                let Some(edge) = self.edge(edge_ref) else {
                    continue;
                };
                for other in [edge.poly0().pylon(), edge.poly1().pylon()] {
                    if other != id && !neighbors.contains(&other) {
                        neighbors.push(other);
                    }
                }
            }
        }
        neighbors
    }

    // Poly and edge access.

    pub fn poly(&self, poly: PolyRef) -> Option<&Poly> {
        self.pylons.get(&poly.pylon())?.mesh().poly(poly.index())
    }

    pub(crate) fn poly_mut(&mut self, poly: PolyRef) -> Option<&mut Poly> {
        self.pylons
            .get_mut(&poly.pylon())?
            .mesh_mut()
            .poly_mut(poly.index())
    }

    pub fn edge(&self, edge: EdgeRef) -> Option<&Edge> {
        self.pylons.get(&edge.pylon())?.mesh().edge(edge.index())
    }

    pub fn edge_mut(&mut self, edge: EdgeRef) -> Option<&mut Edge> {
        self.pylons
            .get_mut(&edge.pylon())?
            .mesh_mut()
            .edge_mut(edge.index())
    }

    /// Returns references of all edges incident to `poly`.
    pub fn incident_edges(&self, poly: PolyRef) -> Vec<EdgeRef> {
        self.poly(poly)
            .map(|p| p.edges().to_vec())
            .unwrap_or_default()
    }

    /// Returns all edges incident to `poly` belonging to the same group as
    /// `edge`.
    pub fn edges_in_group(&self, poly: PolyRef, edge: EdgeRef) -> Vec<EdgeRef> {
        let Some(reference) = self.edge(edge) else {
            return Vec::new();
        };
        self.incident_edges(poly)
            .into_iter()
            .filter(|&candidate| {
                self.edge(candidate)
                    .is_some_and(|e| e.in_same_group_as(reference))
            })
            .collect()
    }

    /// Creates an edge between two polys in a fresh group. The edge is owned
    /// by the first poly's pylon. Returns `None` if either poly is missing.
    pub fn add_edge(
        &mut self,
        kind: EdgeKind,
        polys: [PolyRef; 2],
        verts: [Vec3; 2],
        width: f32,
    ) -> Option<EdgeRef> {
        let group = self
            .pylons
            .get_mut(&polys[0].pylon())?
            .mesh_mut()
            .fresh_group();
        self.add_edge_in_group(kind, polys, verts, width, group)
    }

    /// Creates an edge in an existing group (stacked edges on the same poly
    /// boundary share one).
    pub fn add_edge_in_group(
        &mut self,
        kind: EdgeKind,
        polys: [PolyRef; 2],
        verts: [Vec3; 2],
        width: f32,
        group: u16,
    ) -> Option<EdgeRef> {
        self.poly(polys[0])?;
        self.poly(polys[1])?;

        let owner = polys[0].pylon();
        let index = self
            .pylons
            .get_mut(&owner)?
            .mesh_mut()
            .insert_edge(Edge::new(kind, polys, verts, width, group));
        let edge = EdgeRef::new(owner, index);

        for poly in polys {
            if let Some(poly) = self.poly_mut(poly) {
                poly.add_edge_ref(edge);
            }
        }
        Some(edge)
    }

    /// Creates or replaces an edge addressed by a persistent 64-bit id. Used
    /// by dynamic pylons whose edges into neighbors must survive sub-mesh
    /// rebuilds. Replacing an existing edge goes through the deletion queue.
    pub fn add_dynamic_edge(
        &mut self,
        persistent_id: u64,
        kind: EdgeKind,
        polys: [PolyRef; 2],
        verts: [Vec3; 2],
        width: f32,
    ) -> (Option<EdgeRef>, Vec<EdgeCleanup>) {
        let owner = polys[0].pylon();
        if self.pylons.get(&owner).is_some_and(|p| !p.is_dynamic()) {
            warn!(
                "dynamic edge {} registered on non-dynamic {}",
                persistent_id, owner,
            );
        }
        let previous = self
            .pylons
            .get(&owner)
            .and_then(|p| p.mesh().dynamic_edge(persistent_id));
        let mut events = Vec::new();
        if let Some(previous) = previous {
            events = self.destroy_edge(EdgeRef::new(owner, previous), false);
        }

        let Some(edge) = self.add_edge(kind, polys, verts, width) else {
            return (None, events);
        };
        if let Some(pylon) = self.pylons.get_mut(&owner) {
            pylon.mesh_mut().register_dynamic_edge(persistent_id, edge.index());
        }
        if let Some(edge) = self.edge_mut(edge) {
            edge.set_dynamic_id(persistent_id);
        }
        (Some(edge), events)
    }

    /// Hands out a fresh persistent dynamic edge id.
    pub fn fresh_dynamic_edge_id(&mut self) -> u64 {
        self.next_dynamic_edge += 1;
        self.next_dynamic_edge
    }

    // Two-phase edge deletion.

    /// Marks an edge pending-delete and queues it. With a zero hold depth the
    /// queue flushes immediately and the cleanup events are returned; under a
    /// hold the events come out of [`Self::release_edge_deletions`]. Pending
    /// edges are never returned by successor expansion.
    pub fn destroy_edge(&mut self, edge: EdgeRef, notify_only: bool) -> Vec<EdgeCleanup> {
        if let Some(e) = self.edge_mut(edge) {
            e.set_pending_delete();
        } else {
            return Vec::new();
        }

        self.pending_deletion
            .entry(edge)
            .and_modify(|n| *n &= notify_only)
            .or_insert(notify_only);

        if self.hold_depth == 0 {
            self.flush_pending_deletions()
        } else {
            Vec::new()
        }
    }

    /// Increments the deletion hold depth. While the depth is positive,
    /// queued deletions are deferred; call sites performing a burst of mesh
    /// mutations bracket it with hold/release so handles are notified exactly
    /// once.
    pub fn hold_edge_deletions(&mut self) {
        self.hold_depth += 1;
    }

    /// Decrements the hold depth; at zero the queue is flushed and the
    /// cleanup events are returned.
    pub fn release_edge_deletions(&mut self) -> Vec<EdgeCleanup> {
        debug_assert!(self.hold_depth > 0);
        self.hold_depth = self.hold_depth.saturating_sub(1);
        if self.hold_depth == 0 {
            self.flush_pending_deletions()
        } else {
            Vec::new()
        }
    }

    fn flush_pending_deletions(&mut self) -> Vec<EdgeCleanup> {
        let mut pending: Vec<(EdgeRef, bool)> = self.pending_deletion.drain().collect();
        pending.sort_by_key(|(edge, _)| (edge.pylon(), edge.index()));

        let mut events = Vec::with_capacity(pending.len());
        for (edge, notify_only) in pending {
            let users = self
                .pylons
                .get(&edge.pylon())
                .map(|p| p.mesh().edge_users(edge.index()))
                .unwrap_or_default();
            events.push(EdgeCleanup { edge, users });

            if notify_only {
                if let Some(e) = self.edge_mut(edge) {
                    e.clear_pending_delete();
                }
            } else {
                self.remove_edge_now(edge);
            }
        }
        events
    }

    fn remove_edge_now(&mut self, edge: EdgeRef) {
        let Some(removed) = self
            .pylons
            .get_mut(&edge.pylon())
            .and_then(|p| p.mesh_mut().take_edge(edge.index()))
        else {
            return;
        };
        for poly in [removed.poly0(), removed.poly1()] {
            if let Some(poly) = self.poly_mut(poly) {
                poly.remove_edge_ref(edge);
            }
        }
    }

    /// Marks an edge as referenced by an agent's path cache.
    pub fn mark_edge_in_use(&mut self, edge: EdgeRef, agent: AgentId) {
        if let Some(pylon) = self.pylons.get_mut(&edge.pylon()) {
            pylon.mesh_mut().mark_edge_user(edge.index(), agent);
        }
    }

    /// Removes an in-use mark. Returns true if the mark was present, so a
    /// repeated cache clear is a detectable no-op.
    pub fn unmark_edge_in_use(&mut self, edge: EdgeRef, agent: AgentId) -> bool {
        self.pylons
            .get_mut(&edge.pylon())
            .map(|p| p.mesh_mut().unmark_edge_user(edge.index(), agent))
            .unwrap_or(false)
    }

    // Obstacle registry.

    /// Registers an obstacle: carves a sub-mesh into every walkable poly its
    /// footprints overlap. Returns the obstacle id together with cleanup
    /// events for edges invalidated by re-carving.
    pub fn register_obstacle(
        &mut self,
        shape: crate::obstacle::ObstacleShape,
    ) -> (ObstacleId, Vec<EdgeCleanup>) {
        let id = ObstacleId::new(self.next_obstacle);
        self.next_obstacle += 1;
        let events = obstacle::register(self, id, shape);
        (id, events)
    }

    /// Unregisters an obstacle, re-carving or clearing affected sub-meshes.
    pub fn unregister_obstacle(&mut self, id: ObstacleId) -> Vec<EdgeCleanup> {
        obstacle::unregister(self, id)
    }

    /// Re-carves the given top-level polys from their currently registered
    /// obstacles without changing any registration.
    pub fn trigger_rebuild_for_polys(&mut self, polys: &[PolyRef]) -> Vec<EdgeCleanup> {
        self.hold_edge_deletions();
        for &poly in polys {
            carve::rebuild_submesh(self, poly);
        }
        let events = self.release_edge_deletions();
        for &poly in polys {
            carve::create_edges_to_adjacent_pylon_submeshes(self, poly);
        }
        events
    }

    pub fn is_obstacle_active(&self, id: ObstacleId) -> bool {
        self.active_obstacles.contains_key(&id)
    }

    /// Returns the top-level polys currently affected by an obstacle.
    pub fn obstacle_affects(&self, id: ObstacleId) -> Vec<PolyRef> {
        self.active_obstacles
            .get(&id)
            .map(|r| r.affected().to_vec())
            .unwrap_or_default()
    }

    // Path objects.

    pub fn register_path_object(&mut self, object: Box<dyn PathObject>) -> PathObjectId {
        let id = PathObjectId::new(self.next_path_object);
        self.next_path_object += 1;
        self.path_objects.insert(id, object);
        id
    }

    pub fn path_object(&self, id: PathObjectId) -> Option<&dyn PathObject> {
        self.path_objects.get(&id).map(|o| o.as_ref())
    }

    // Edge supports and cost.

    /// Returns true when the agent described by `params` can traverse `edge`
    /// out of `src_poly`. Combines the pending-delete gate, the width test,
    /// kind-specific gating and one-way direction.
    pub fn edge_supports(
        &self,
        edge_ref: EdgeRef,
        params: &PathParams,
        src_poly: PolyRef,
    ) -> bool {
        let Some(edge) = self.edge(edge_ref) else {
            return false;
        };
        if edge.is_pending_delete() {
            return false;
        }
        if edge.is_one_way() && src_poly != edge.poly0() {
            return false;
        }
        if edge.width() < params.lane_radius() {
            return false;
        }

        match edge.kind() {
            EdgeKind::BackRef | EdgeKind::Dummy => false,
            EdgeKind::CrossPylon => {
                let other = edge.other_poly(src_poly).pylon();
                self.pylons
                    .get(&other)
                    .is_some_and(|p| !p.is_disabled())
            }
            EdgeKind::Drop(height) => height <= params.max_drop_height,
            EdgeKind::Mantle(height) => {
                if !params.can_mantle {
                    return false;
                }
                if !params.needs_mantle_validity_test {
                    return true;
                }
                // The landing spot above the ledge must be clear of blocking
                // volumes.
                let landing = edge.center() + Vec3::new(0., 0., height + 1.);
                let dest = edge.other_poly(src_poly).pylon();
                self.pylons
                    .get(&dest)
                    .map_or(true, |p| !p.obstacle_mesh().blocks_point(landing))
            }
            EdgeKind::PathObject(id) => self
                .path_object(id)
                .is_some_and(|o| o.supports(params, edge, src_poly)),
            EdgeKind::Normal | EdgeKind::OneWay => true,
        }
    }

    /// Computes the traversal cost of `edge` approached from `prev_point`.
    /// Returns the cost in integer distance units together with the point on
    /// the edge used for the evaluation, which becomes the successor's
    /// predecessor position. A result at or above [`BLOCKED`] vetoes the
    /// edge; a degenerate zero is coerced to 1 with a warning.
    pub fn edge_cost_for(
        &self,
        edge_ref: EdgeRef,
        params: &PathParams,
        prev_point: Vec3,
    ) -> (u32, Vec3) {
        let Some(edge) = self.edge(edge_ref) else {
            return (BLOCKED, prev_point);
        };

        let point = edge.closest_point_constrained(prev_point, params.radius());
        let base = prev_point.distance(point).round() as u32;
        let extra = match edge.kind() {
            EdgeKind::Drop(height) | EdgeKind::Mantle(height) => height.round() as u32,
            EdgeKind::PathObject(id) => self
                .path_object(id)
                .map(|o| o.cost_penalty(params, edge))
                .unwrap_or(BLOCKED),
            _ => 0,
        };

        let mut cost = base.saturating_add(extra);
        if cost == 0 {
            warn!("zero traversal cost on {}, coercing to 1", edge_ref);
            cost = 1;
        }
        (cost, point)
    }

    /// Tests that the straight move between the constrained points of two
    /// consecutive path edges stays inside the poly between them. Both polys
    /// are convex, so endpoint containment implies segment containment.
    pub fn supports_move_to_edge(
        &self,
        params: &PathParams,
        from_edge: EdgeRef,
        to_edge: EdgeRef,
        poly_between: PolyRef,
    ) -> bool {
        let (Some(from), Some(to), Some(poly)) = (
            self.edge(from_edge),
            self.edge(to_edge),
            self.poly(poly_between),
        ) else {
            return false;
        };
        let exit = from.closest_point_constrained(to.center(), params.radius());
        let entry = to.closest_point_constrained(from.center(), params.radius());
        poly.contains_xy(exit.truncate()) && poly.contains_xy(entry.truncate())
    }

    // Diagnostics.

    /// Checks the obstacle invariants: a poly has a sub-mesh iff obstacles
    /// affect it, and every registered obstacle appears in the obstacle set
    /// of every poly it affects. Returns human-readable violations.
    pub fn verify_path_obstacles(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for pylon in self.pylons.values() {
            for poly in pylon.mesh().polys() {
                if poly.parent().is_some() {
                    continue;
                }
                let carved = poly.has_sub_mesh() || poly.is_fully_blocked();
                if carved != (poly.num_obstacles_affecting() > 0) {
                    issues.push(format!(
                        "{}: sub-mesh presence disagrees with obstacle count {}",
                        PolyRef::new(pylon.id(), poly.item()),
                        poly.num_obstacles_affecting(),
                    ));
                }
            }
        }

        for (&id, registered) in &self.active_obstacles {
            for &poly_ref in registered.affected() {
                match self.poly(poly_ref) {
                    Some(poly) if poly.obstacles().contains(&id) => (),
                    _ => issues.push(format!(
                        "obstacle {} missing from obstacle set of {}",
                        id.index(),
                        poly_ref,
                    )),
                }
            }
        }
        issues
    }

    /// Checks that every path-object edge references a registered object.
    pub fn verify_path_objects(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for pylon in self.pylons.values() {
            for (index, edge) in pylon.mesh().edges() {
                if let EdgeKind::PathObject(id) = edge.kind() {
                    if !self.path_objects.contains_key(&id) {
                        issues.push(format!(
                            "{} references unregistered path object {}",
                            EdgeRef::new(pylon.id(), index),
                            id.index(),
                        ));
                    }
                }
            }
        }
        issues
    }

    /// Returns a one-line-per-obstacle description of the registry.
    pub fn obstacle_info_text(&self) -> String {
        let mut ids: Vec<ObstacleId> = self.active_obstacles.keys().copied().collect();
        ids.sort();

        let mut out = String::new();
        for id in ids {
            let registered = &self.active_obstacles[&id];
            out.push_str(&format!(
                "obstacle {}: {} footprints, {} affected polys\n",
                id.index(),
                registered.num_footprints(),
                registered.affected().len(),
            ));
        }
        out
    }

    /// Returns descriptions of all path-object edges in the world.
    pub fn path_object_edges_text(&self) -> String {
        let mut out = String::new();
        for pylon in self.pylons.values() {
            for (index, edge) in pylon.mesh().edges() {
                if matches!(edge.kind(), EdgeKind::PathObject(_)) {
                    out.push_str(&format!(
                        "{}: {}\n",
                        EdgeRef::new(pylon.id(), index),
                        edge.debug_text(),
                    ));
                }
            }
        }
        out
    }

    /// Returns descriptions of all edges `params` cannot traverse, for
    /// debug drawing.
    pub fn non_supporting_edges_text(&self, params: &PathParams) -> String {
        let mut out = String::new();
        for pylon in self.pylons.values() {
            for (index, edge) in pylon.mesh().edges() {
                let edge_ref = EdgeRef::new(pylon.id(), index);
                if !self.edge_supports(edge_ref, params, edge.poly0()) {
                    out.push_str(&format!("{}: {}\n", edge_ref, edge.debug_text()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use parry3d::math::Point;

    use super::*;

    fn world() -> NavWorld {
        NavWorld::new(Aabb::new(
            Point::new(-10_000., -10_000., -1_000.),
            Point::new(10_000., 10_000., 1_000.),
        ))
    }

    fn pylon_bounds() -> Aabb {
        Aabb::new(Point::new(0., 0., -10.), Point::new(2000., 1000., 100.))
    }

    fn two_poly_world() -> (NavWorld, PolyRef, PolyRef, EdgeRef) {
        two_poly_world_with(PylonFlags::default())
    }

    fn two_poly_world_with(flags: PylonFlags) -> (NavWorld, PolyRef, PolyRef, EdgeRef) {
        let mut world = world();
        let pylon = world.add_pylon(pylon_bounds(), flags);
        let mesh = world.pylon_mut(pylon).unwrap().mesh_mut();
        let a = mesh.add_poly(
            vec![
                Vec3::new(0., 0., 0.),
                Vec3::new(1000., 0., 0.),
                Vec3::new(1000., 1000., 0.),
                Vec3::new(0., 1000., 0.),
            ],
            200.,
        );
        let b = mesh.add_poly(
            vec![
                Vec3::new(1000., 0., 0.),
                Vec3::new(2000., 0., 0.),
                Vec3::new(2000., 1000., 0.),
                Vec3::new(1000., 1000., 0.),
            ],
            200.,
        );
        let a = PolyRef::new(pylon, a);
        let b = PolyRef::new(pylon, b);
        let edge = world
            .add_edge(
                EdgeKind::Normal,
                [a, b],
                [Vec3::new(1000., 0., 0.), Vec3::new(1000., 1000., 0.)],
                1000.,
            )
            .unwrap();
        world.post_load_fixup(pylon);
        (world, a, b, edge)
    }

    #[test]
    fn test_add_edge_registers_refs() {
        let (world, a, b, edge) = two_poly_world();
        assert_eq!(world.incident_edges(a), vec![edge]);
        assert_eq!(world.incident_edges(b), vec![edge]);
        assert_eq!(world.edge(edge).unwrap().other_poly(a), b);
    }

    #[test]
    fn test_two_phase_deletion() {
        let (mut world, a, _, edge) = two_poly_world();
        let agent = AgentId::new(7);
        world.mark_edge_in_use(edge, agent);

        world.hold_edge_deletions();
        let immediate = world.destroy_edge(edge, false);
        assert!(immediate.is_empty());
        // Pending edges are unsupported while the hold lasts.
        assert!(!world.edge_supports(edge, &PathParams::default(), a));

        let events = world.release_edge_deletions();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].edge, edge);
        assert_eq!(events[0].users, vec![agent]);
        assert!(world.edge(edge).is_none());
        assert!(world.incident_edges(a).is_empty());
    }

    #[test]
    fn test_notify_only_deletion_keeps_edge() {
        let (mut world, _, _, edge) = two_poly_world();
        let events = world.destroy_edge(edge, true);
        assert_eq!(events.len(), 1);
        let kept = world.edge(edge).unwrap();
        assert!(!kept.is_pending_delete());
    }

    #[test]
    fn test_supports_gating() {
        let (mut world, a, b, _) = two_poly_world();
        let params = PathParams::default();

        let narrow = world
            .add_edge(
                EdgeKind::Normal,
                [a, b],
                [Vec3::new(1000., 0., 0.), Vec3::new(1000., 20., 0.)],
                20.,
            )
            .unwrap();
        assert!(!world.edge_supports(narrow, &params, a));

        let drop = world
            .add_edge(
                EdgeKind::Drop(80.),
                [a, b],
                [Vec3::new(1000., 200., 0.), Vec3::new(1000., 400., 0.)],
                200.,
            )
            .unwrap();
        assert!(!world.edge_supports(drop, &params, a));
        let mut falling = params;
        falling.max_drop_height = 100.;
        assert!(world.edge_supports(drop, &falling, a));
        // One-way: never traversable in reverse.
        assert!(!world.edge_supports(drop, &falling, b));

        let mantle = world
            .add_edge(
                EdgeKind::Mantle(80.),
                [a, b],
                [Vec3::new(1000., 500., 0.), Vec3::new(1000., 700., 0.)],
                200.,
            )
            .unwrap();
        assert!(!world.edge_supports(mantle, &params, a));
        let mut climber = params;
        climber.can_mantle = true;
        assert!(world.edge_supports(mantle, &climber, a));

        // Back-ref markers are never traversable, from either side.
        let marker = world
            .add_edge(
                EdgeKind::BackRef,
                [a, b],
                [Vec3::new(1000., 800., 0.), Vec3::new(1000., 900., 0.)],
                200.,
            )
            .unwrap();
        assert!(!world.edge_supports(marker, &climber, a));
        assert!(!world.edge_supports(marker, &climber, b));
    }

    #[test]
    fn test_mantle_validity() {
        let (mut world, a, b, _) = two_poly_world();
        let mantle = world
            .add_edge(
                EdgeKind::Mantle(80.),
                [a, b],
                [Vec3::new(1000., 500., 0.), Vec3::new(1000., 700., 0.)],
                200.,
            )
            .unwrap();

        let mut params = PathParams::default();
        params.can_mantle = true;
        params.needs_mantle_validity_test = true;
        assert!(world.edge_supports(mantle, &params, a));

        // A blocking volume over the ledge top invalidates the climb.
        let footprint = parry2d::shape::ConvexPolygon::from_convex_polyline(vec![
            parry2d::math::Point::new(950., 550.),
            parry2d::math::Point::new(1050., 550.),
            parry2d::math::Point::new(1050., 650.),
            parry2d::math::Point::new(950., 650.),
        ])
        .unwrap();
        world
            .pylon_mut(a.pylon())
            .unwrap()
            .obstacle_mesh_mut()
            .add_volume(footprint, 60., 60., None);
        assert!(!world.edge_supports(mantle, &params, a));

        params.needs_mantle_validity_test = false;
        assert!(world.edge_supports(mantle, &params, a));
    }

    #[test]
    fn test_dynamic_edge_replacement() {
        let (mut world, a, b, _) = two_poly_world_with(PylonFlags {
            dynamic: true,
            ..Default::default()
        });
        assert!(world.pylon(a.pylon()).unwrap().is_dynamic());

        let id = world.fresh_dynamic_edge_id();
        let verts = [Vec3::new(1000., 100., 0.), Vec3::new(1000., 300., 0.)];
        let (first, events) = world.add_dynamic_edge(id, EdgeKind::Normal, [a, b], verts, 200.);
        let first = first.unwrap();
        assert!(events.is_empty());
        assert_eq!(world.edge(first).unwrap().dynamic_id(), Some(id));

        // Re-registering the same persistent id replaces the edge and
        // notifies its users.
        let agent = AgentId::new(4);
        world.mark_edge_in_use(first, agent);
        let (second, events) = world.add_dynamic_edge(id, EdgeKind::Normal, [a, b], verts, 200.);
        let second = second.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].edge, first);
        assert_eq!(events[0].users, vec![agent]);
        assert_eq!(
            world.pylon(a.pylon()).unwrap().mesh().dynamic_edge(id),
            Some(second.index()),
        );
    }

    #[test]
    fn test_registered_obstacle_blocks_positions() {
        let (mut world, a, _, _) = two_poly_world();
        let shape = crate::obstacle::ObstacleShape::single(
            vec![
                glam::Vec2::new(400., 400.),
                glam::Vec2::new(600., 400.),
                glam::Vec2::new(600., 600.),
                glam::Vec2::new(400., 600.),
            ],
            0.,
            100.,
        )
        .unwrap();
        let (obstacle, _) = world.register_obstacle(shape);

        assert!(crate::query::position_blocked(
            &world,
            Vec3::new(500., 500., 10.),
        ));
        let volumes = world.pylon(a.pylon()).unwrap().obstacle_mesh().volumes();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].source(), Some(obstacle));

        world.unregister_obstacle(obstacle);
        assert!(!crate::query::position_blocked(
            &world,
            Vec3::new(500., 500., 10.),
        ));
        assert!(world
            .pylon(a.pylon())
            .unwrap()
            .obstacle_mesh()
            .volumes()
            .is_empty());
    }

    #[test]
    fn test_cost_writes_back_edge_point() {
        let (world, _, _, edge) = two_poly_world();
        let params = PathParams::default();
        let (cost, point) = world.edge_cost_for(edge, &params, Vec3::new(900., 500., 0.));
        assert_eq!(cost, 100);
        assert_eq!(point, Vec3::new(1000., 500., 0.));

        // Near a vertex the point is clamped in by the agent radius.
        let (_, clamped) = world.edge_cost_for(edge, &params, Vec3::new(900., 5., 0.));
        assert_eq!(clamped, Vec3::new(1000., 34., 0.));
    }

    #[test]
    fn test_remove_pylon_detaches_everything() {
        let (mut world, _, _, edge) = two_poly_world();
        let pylon = edge.pylon();
        let events = world.remove_pylon(pylon);
        assert_eq!(events.len(), 1);
        assert!(world.pylon(pylon).is_none());
        assert!(world.octree().is_empty());
    }
}
