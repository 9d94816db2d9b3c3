//! Navigation mesh queries
//!
//! A [`NavMeshQuery`] borrows a [`NavMesh`] immutably and owns the mutable
//! search state (node pools and open list) used by the path searches. Any
//! number of queries may share one mesh, across threads included, while the
//! mesh cannot change under them.

use log::trace;

use super::nav_mesh::{
    closest_point_on_poly_in_tile, poly_bounds, poly_height, MeshTile, NavMesh, Poly,
    LINK_SIDE_INTERNAL,
};
use super::node_pool::{NodeFlags, NodePool, NodeQueue, MAX_NODE_POOL_SIZE};
use super::sliced_pathfinding::SearchState;
use super::{
    PolyFilter, PolyRef, PolyType, Result, Status, StraightPathFlags, StraightPathOptions,
    EXT_LINK, MAX_VERTS_PER_POLY, OFFMESH_EDGE,
};
use divert_common::{
    calc_poly_center, dist_point_segment_sqr_2d_with_t, distance_pt_poly_edges_sqr,
    intersect_seg_seg_2d, overlap_bounds, point_in_polygon_2d, sqr, tri_area_2d, vadd, vdist,
    vequal, vert_at, vlerp, vsub, visfinite,
};

/// Node capacity of the pool used by local surface walks
const TINY_NODE_POOL_SIZE: usize = 64;

/// Maximum number of polygons queued during a surface walk
const MOVE_STACK_SIZE: usize = 48;

/// Maximum neighbours considered per edge during a surface walk
const MAX_EDGE_NEIGHBOURS: usize = 8;

/// Portals closer than this to the start point are skipped when pulling a path
const PORTAL_SKIP_EPS: f32 = 0.001;

/// Result of a corridor search
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    /// Polygon corridor from the start polygon
    pub polys: Vec<PolyRef>,
    /// Success status with `PARTIAL_RESULT`, `OUT_OF_NODES` or
    /// `BUFFER_TOO_SMALL` details when they apply
    pub status: Status,
    /// Accumulated cost to the last polygon of the corridor
    pub cost: f32,
}

/// Vertex of a straight path
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct StraightPathPoint {
    pub pos: [f32; 3],
    pub flags: StraightPathFlags,
    /// Polygon entered at this vertex, invalid for the end point
    pub poly: PolyRef,
}

/// Result of string pulling a corridor
#[derive(Debug, Clone, PartialEq)]
pub struct StraightPathResult {
    pub points: Vec<StraightPathPoint>,
    pub status: Status,
}

/// Result of a surface walk
#[derive(Debug, Clone, PartialEq)]
pub struct MoveAlongSurfaceResult {
    /// Position reached
    pub pos: [f32; 3],
    /// Polygons crossed from the start polygon to the one holding `pos`
    pub visited: Vec<PolyRef>,
    pub status: Status,
}

/// Query engine bound to one navigation mesh
pub struct NavMeshQuery<'a> {
    pub(crate) nav_mesh: &'a NavMesh,
    pub(crate) node_pool: NodePool,
    pub(crate) open_list: NodeQueue,
    tiny_node_pool: NodePool,
    pub(crate) search: SearchState,
    pub(crate) sliced_filter: Option<Box<dyn PolyFilter + 'a>>,
}

impl std::fmt::Debug for NavMeshQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavMeshQuery")
            .field("max_nodes", &self.node_pool.max_nodes())
            .field("search", &self.search)
            .finish_non_exhaustive()
    }
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query with room for `max_nodes` search nodes
    pub fn new(nav_mesh: &'a NavMesh, max_nodes: usize) -> Result<Self> {
        if max_nodes == 0 || max_nodes >= MAX_NODE_POOL_SIZE {
            return Err(Status::invalid_param());
        }
        Ok(Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes)?,
            open_list: NodeQueue::new(max_nodes)?,
            tiny_node_pool: NodePool::new(TINY_NODE_POOL_SIZE)?,
            search: SearchState::default(),
            sliced_filter: None,
        })
    }

    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    pub fn max_nodes(&self) -> usize {
        self.node_pool.max_nodes()
    }

    /// Finds the polygon corridor between two polygons
    ///
    /// `start_pos` and `end_pos` should lie inside their polygons. An
    /// unreachable end polygon is a failure; running out of nodes returns
    /// the corridor to the polygon closest to the end, flagged
    /// `PARTIAL_RESULT | OUT_OF_NODES`.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &dyn PolyFilter,
        max_path: usize,
    ) -> Result<PathResult> {
        if max_path == 0 {
            return Err(Status::invalid_param());
        }
        self.begin_search(start_ref, end_ref, start_pos, end_pos)?;
        self.step_search(filter, usize::MAX);
        let result = self.finish_search(max_path);
        self.search = SearchState::default();
        result
    }

    /// String-pulls a polygon corridor into a list of waypoints
    ///
    /// The first point is `start_pos` and the last `end_pos`, each clamped to
    /// the boundary of its polygon when outside it. With
    /// `AREA_CROSSINGS`/`ALL_CROSSINGS` extra points are added where the
    /// path crosses polygon edges.
    pub fn find_straight_path(
        &self,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        path: &[PolyRef],
        max_straight_path: usize,
        options: StraightPathOptions,
    ) -> Result<StraightPathResult> {
        if !visfinite(start_pos) || !visfinite(end_pos) || path.is_empty() || max_straight_path == 0 {
            return Err(Status::invalid_param());
        }

        for &poly_ref in path {
            self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        }

        let mut out = StraightPathWriter {
            points: Vec::new(),
            max: max_straight_path,
        };

        let closest_start = self.closest_point_on_poly_boundary(path[0], start_pos)?;
        let last = path[path.len() - 1];
        let mut closest_end = self.closest_point_on_poly_boundary(last, end_pos)?;

        let stat = out.append(&closest_start, StraightPathFlags::START, path[0]);
        if !stat.is_in_progress() {
            return Ok(out.finish(stat));
        }

        if path.len() > 1 {
            let mut apex = closest_start;
            let mut portal_left = apex;
            let mut portal_right = apex;
            let mut apex_index = 0usize;
            let mut left_index = 0usize;
            let mut right_index = 0usize;
            let mut left_type = PolyType::Ground;
            let mut right_type = PolyType::Ground;
            let mut left_ref = path[0];
            let mut right_ref = path[0];

            let mut i = 0usize;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    match self.get_portal_points(path[i], path[i + 1]) {
                        Ok((l, r, _, to_type)) => {
                            // Starting right at the first portal; skip it.
                            if i == 0 {
                                let (d, _) = dist_point_segment_sqr_2d_with_t(&apex, &l, &r);
                                if d < sqr(PORTAL_SKIP_EPS) {
                                    i += 1;
                                    continue;
                                }
                            }
                            (l, r, to_type)
                        }
                        Err(_) => {
                            // The corridor breaks here; stop at the last good polygon.
                            closest_end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            let mut stat = Status::in_progress();
                            if options.intersects(
                                StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS,
                            ) {
                                stat = self.append_portals(&mut out, apex_index, i, &closest_end, path, options)?;
                            }
                            if stat.is_in_progress() {
                                out.append(&closest_end, StraightPathFlags::empty(), path[i]);
                            }
                            return Ok(out.finish(Status::success_detail(Status::PARTIAL_RESULT)));
                        }
                    }
                } else {
                    (closest_end, closest_end, PolyType::Ground)
                };
                let next_ref = path.get(i + 1).copied().unwrap_or_default();

                // Right side of the funnel
                if tri_area_2d(&apex, &portal_right, &right) <= 0.0 {
                    if vequal(&apex, &portal_right) || tri_area_2d(&apex, &portal_left, &right) > 0.0 {
                        portal_right = right;
                        right_ref = next_ref;
                        right_type = to_type;
                        right_index = i;
                    } else {
                        if options.intersects(
                            StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS,
                        ) {
                            let stat = self.append_portals(
                                &mut out,
                                apex_index,
                                left_index,
                                &portal_left,
                                path,
                                options,
                            )?;
                            if !stat.is_in_progress() {
                                return Ok(out.finish(stat));
                            }
                        }

                        apex = portal_left;
                        apex_index = left_index;
                        let stat = out.append(&apex, corner_flags(left_ref, left_type), left_ref);
                        if !stat.is_in_progress() {
                            return Ok(out.finish(stat));
                        }

                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left side of the funnel
                if tri_area_2d(&apex, &portal_left, &left) >= 0.0 {
                    if vequal(&apex, &portal_left) || tri_area_2d(&apex, &portal_right, &left) < 0.0 {
                        portal_left = left;
                        left_ref = next_ref;
                        left_type = to_type;
                        left_index = i;
                    } else {
                        if options.intersects(
                            StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS,
                        ) {
                            let stat = self.append_portals(
                                &mut out,
                                apex_index,
                                right_index,
                                &portal_right,
                                path,
                                options,
                            )?;
                            if !stat.is_in_progress() {
                                return Ok(out.finish(stat));
                            }
                        }

                        apex = portal_right;
                        apex_index = right_index;
                        let stat = out.append(&apex, corner_flags(right_ref, right_type), right_ref);
                        if !stat.is_in_progress() {
                            return Ok(out.finish(stat));
                        }

                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            if options.intersects(StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS) {
                let stat =
                    self.append_portals(&mut out, apex_index, path.len() - 1, &closest_end, path, options)?;
                if !stat.is_in_progress() {
                    return Ok(out.finish(stat));
                }
            }
        }

        let stat = out.append(&closest_end, StraightPathFlags::END, PolyRef::default());
        Ok(out.finish(stat))
    }

    /// Adds a vertex at each portal of `path[start..end]` crossed by the
    /// segment from the last vertex to `end_pos`
    fn append_portals(
        &self,
        out: &mut StraightPathWriter,
        start_index: usize,
        end_index: usize,
        end_pos: &[f32; 3],
        path: &[PolyRef],
        options: StraightPathOptions,
    ) -> Result<Status> {
        let Some(start_pos) = out.points.last().map(|p| p.pos) else {
            return Ok(Status::in_progress());
        };

        for i in start_index..end_index {
            let from = path[i];
            let to = path[i + 1];
            let (_, from_poly) = self.nav_mesh.get_tile_and_poly_by_ref(from)?;
            let (_, to_poly) = self.nav_mesh.get_tile_and_poly_by_ref(to)?;

            let Ok((left, right, _, _)) = self.get_portal_points(from, to) else {
                break;
            };

            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from_poly.area == to_poly.area {
                continue;
            }

            if let Some((_, t)) = intersect_seg_seg_2d(&start_pos, end_pos, &left, &right) {
                let pt = vlerp(&left, &right, t);
                let stat = out.append(&pt, StraightPathFlags::empty(), to);
                if !stat.is_in_progress() {
                    return Ok(stat);
                }
            }
        }
        Ok(Status::in_progress())
    }

    /// Moves from `start_pos` towards `end_pos` across the mesh surface
    ///
    /// Walls stop the movement and the position slides to the closest point
    /// on them. The walk stays within the circle through both points and
    /// visits at most a small, fixed number of polygons.
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &dyn PolyFilter,
        max_visited: usize,
    ) -> Result<MoveAlongSurfaceResult> {
        let mesh = self.nav_mesh;
        if !visfinite(start_pos) || !visfinite(end_pos) || max_visited == 0 {
            return Err(Status::invalid_param());
        }
        let (start_tile, start_poly) = mesh.get_tile_and_poly_by_ref(start_ref)?;
        if !filter.pass_filter(start_ref, start_tile, start_poly) {
            return Err(Status::invalid_param());
        }

        let pool = &mut self.tiny_node_pool;
        pool.clear();

        let start = pool.get_node(start_ref).ok_or(Status::failure_detail(Status::OUT_OF_NODES))?;
        {
            let node = pool.node_mut(start);
            node.parent = None;
            node.cost = 0.0;
            node.total = 0.0;
            node.flags = NodeFlags::CLOSED;
        }

        let mut queue = std::collections::VecDeque::with_capacity(MOVE_STACK_SIZE);
        queue.push_back(start);

        let mut best_pos = *start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = None;

        let search_pos = vlerp(start_pos, end_pos, 0.5);
        let search_rad_sqr = sqr(vdist(start_pos, end_pos) / 2.0 + 0.001);

        while let Some(cur) = queue.pop_front() {
            let cur_ref = pool.node(cur).id;
            let Ok((cur_tile, cur_poly)) = mesh.get_tile_and_poly_by_ref(cur_ref) else {
                continue;
            };
            let (verts, nv) = cur_tile.poly_vertices(cur_poly);

            if point_in_polygon_2d(end_pos, &verts, nv) {
                best_node = Some(cur);
                best_pos = *end_pos;
                break;
            }

            let mut j = nv - 1;
            for i in 0..nv {
                let mut neis = [PolyRef::default(); MAX_EDGE_NEIGHBOURS];
                let mut nneis = 0;

                let nei = cur_poly.neis[j];
                if nei & EXT_LINK != 0 {
                    for link in cur_tile.links_of(cur_poly) {
                        if link.edge as usize != j || !link.reference.is_valid() {
                            continue;
                        }
                        let Ok((nei_tile, nei_poly)) = mesh.get_tile_and_poly_by_ref(link.reference) else {
                            continue;
                        };
                        if filter.pass_filter(link.reference, nei_tile, nei_poly) && nneis < MAX_EDGE_NEIGHBOURS {
                            neis[nneis] = link.reference;
                            nneis += 1;
                        }
                    }
                } else if nei != 0 {
                    let idx = (nei - 1) as usize;
                    if let Some(poly) = cur_tile.polys.get(idx) {
                        let r = PolyRef::new(mesh.get_poly_ref_base(cur_tile).id() | idx as u32);
                        if filter.pass_filter(r, cur_tile, poly) {
                            neis[nneis] = r;
                            nneis += 1;
                        }
                    }
                }

                let vj = vert_at(&verts, j);
                let vi = vert_at(&verts, i);
                if nneis == 0 {
                    // Wall edge: slide along it.
                    let (d, t) = dist_point_segment_sqr_2d_with_t(end_pos, &vj, &vi);
                    if d < best_dist {
                        best_pos = vlerp(&vj, &vi, t);
                        best_dist = d;
                        best_node = Some(cur);
                    }
                } else {
                    for &r in &neis[..nneis] {
                        let Some(n) = pool.get_node(r) else {
                            continue;
                        };
                        if pool.node(n).flags.contains(NodeFlags::CLOSED) {
                            continue;
                        }
                        let (d, _) = dist_point_segment_sqr_2d_with_t(&search_pos, &vj, &vi);
                        if d > search_rad_sqr {
                            continue;
                        }
                        if queue.len() < MOVE_STACK_SIZE {
                            let node = pool.node_mut(n);
                            node.parent = Some(cur);
                            node.flags.insert(NodeFlags::CLOSED);
                            queue.push_back(n);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = Vec::new();
        let mut cur = best_node;
        while let Some(idx) = cur {
            let node = pool.node(idx);
            visited.push(node.id);
            cur = node.parent;
        }
        visited.reverse();

        let mut status = Status::success();
        if visited.len() > max_visited {
            visited.truncate(max_visited);
            status = status.with_detail(Status::BUFFER_TOO_SMALL);
        }

        trace!(
            "Surface walk from {} reached {:?} across {} polygons",
            start_ref,
            best_pos,
            visited.len()
        );

        Ok(MoveAlongSurfaceResult {
            pos: best_pos,
            visited,
            status,
        })
    }

    /// Finds the polygon nearest to `center` within the box `center ± half_extents`
    ///
    /// When `center` lies above or below a polygon, vertical distance within
    /// the tile's walkable climb counts as zero.
    pub fn find_nearest_poly(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &dyn PolyFilter,
    ) -> Result<(PolyRef, [f32; 3])> {
        if !visfinite(center) || !visfinite(half_extents) || half_extents.iter().any(|&e| e < 0.0) {
            return Err(Status::invalid_param());
        }

        let bmin = vsub(center, half_extents);
        let bmax = vadd(center, half_extents);

        let mut nearest: Option<(PolyRef, [f32; 3])> = None;
        let mut nearest_dist = f32::MAX;
        self.for_each_poly_in_box(&bmin, &bmax, filter, |r, tile, poly| {
            let (closest, over_poly) = closest_point_on_poly_in_tile(tile, poly, center);
            let diff = vsub(center, &closest);
            let d = if over_poly {
                let dy = diff[1].abs() - tile.walkable_climb();
                if dy > 0.0 {
                    dy * dy
                } else {
                    0.0
                }
            } else {
                diff[0] * diff[0] + diff[1] * diff[1] + diff[2] * diff[2]
            };
            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((r, closest));
            }
            true
        });

        nearest.ok_or(Status::failure())
    }

    /// Polygons passing the filter whose bounds overlap `center ± half_extents`
    ///
    /// At most `max_polys` references are returned; more matches set
    /// `BUFFER_TOO_SMALL` on the returned status.
    pub fn query_polygons(
        &self,
        center: &[f32; 3],
        half_extents: &[f32; 3],
        filter: &dyn PolyFilter,
        max_polys: usize,
    ) -> Result<(Vec<PolyRef>, Status)> {
        if !visfinite(center) || !visfinite(half_extents) || max_polys == 0 {
            return Err(Status::invalid_param());
        }
        let bmin = vsub(center, half_extents);
        let bmax = vadd(center, half_extents);

        let mut polys = Vec::new();
        let mut status = Status::success();
        self.for_each_poly_in_box(&bmin, &bmax, filter, |r, _, _| {
            if polys.len() >= max_polys {
                status = status.with_detail(Status::BUFFER_TOO_SMALL);
                return false;
            }
            polys.push(r);
            true
        });
        Ok((polys, status))
    }

    /// Visits ground polygons overlapping a box until `visit` returns false
    fn for_each_poly_in_box<F>(&self, bmin: &[f32; 3], bmax: &[f32; 3], filter: &dyn PolyFilter, mut visit: F)
    where
        F: FnMut(PolyRef, &MeshTile, &Poly) -> bool,
    {
        let mesh = self.nav_mesh;
        for slot in mesh.tiles_overlapping(bmin, bmax) {
            let Some(tile) = mesh.get_tile(slot) else {
                continue;
            };
            let base = mesh.get_poly_ref_base(tile);
            for (ip, poly) in tile.polys.iter().enumerate() {
                if poly.is_off_mesh_connection() {
                    continue;
                }
                let (pmin, pmax) = poly_bounds(tile, poly);
                if !overlap_bounds(bmin, bmax, &pmin, &pmax) {
                    continue;
                }
                let r = PolyRef::new(base.id() | ip as u32);
                if !filter.pass_filter(r, tile, poly) {
                    continue;
                }
                if !visit(r, tile, poly) {
                    return;
                }
            }
        }
    }

    /// Closest point on a polygon and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }
        self.nav_mesh.closest_point_on_poly(poly_ref, pos)
    }

    /// `pos` if it lies inside the polygon on the xz-plane, otherwise the
    /// closest point on the polygon boundary
    pub fn closest_point_on_poly_boundary(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<[f32; 3]> {
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        let (verts, nv) = tile.poly_vertices(poly);

        let mut edge_dist = [0.0; MAX_VERTS_PER_POLY];
        let mut edge_t = [0.0; MAX_VERTS_PER_POLY];
        if distance_pt_poly_edges_sqr(pos, &verts, nv, &mut edge_dist, &mut edge_t) {
            return Ok(*pos);
        }

        let mut imin = 0;
        for i in 1..nv {
            if edge_dist[i] < edge_dist[imin] {
                imin = i;
            }
        }
        let va = vert_at(&verts, imin);
        let vb = vert_at(&verts, (imin + 1) % nv);
        Ok(vlerp(&va, &vb, edge_t[imin]))
    }

    /// Height of a polygon at `pos`
    ///
    /// Fails with `INVALID_PARAM` when `pos` is outside the polygon.
    pub fn get_poly_height(&self, poly_ref: PolyRef, pos: &[f32; 3]) -> Result<f32> {
        if !visfinite(pos) {
            return Err(Status::invalid_param());
        }
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        poly_height(tile, poly, pos).ok_or(Status::invalid_param())
    }

    /// Left and right end of the portal between two adjacent polygons, plus
    /// the types of both polygons
    pub fn get_portal_points(
        &self,
        from: PolyRef,
        to: PolyRef,
    ) -> Result<([f32; 3], [f32; 3], PolyType, PolyType)> {
        let (from_tile, from_poly) = self.nav_mesh.get_tile_and_poly_by_ref(from)?;
        let (to_tile, to_poly) = self.nav_mesh.get_tile_and_poly_by_ref(to)?;
        let (left, right) = portal_points(from, from_tile, from_poly, to, to_tile, to_poly)?;
        Ok((left, right, from_poly.poly_type, to_poly.poly_type))
    }

    /// Midpoint of the portal between two adjacent polygons
    pub fn get_edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<[f32; 3]> {
        let (left, right, _, _) = self.get_portal_points(from, to)?;
        Ok(vlerp(&left, &right, 0.5))
    }

    /// Centroid of a polygon's vertices
    pub fn get_poly_center(&self, poly_ref: PolyRef) -> Result<[f32; 3]> {
        let (tile, poly) = self.nav_mesh.get_tile_and_poly_by_ref(poly_ref)?;
        Ok(calc_poly_center(&poly.verts[..poly.vert_count as usize], &tile.verts))
    }

    /// True if the reference resolves and the polygon passes the filter
    pub fn is_valid_poly_ref(&self, poly_ref: PolyRef, filter: &dyn PolyFilter) -> bool {
        self.nav_mesh
            .get_tile_and_poly_by_ref(poly_ref)
            .is_ok_and(|(tile, poly)| filter.pass_filter(poly_ref, tile, poly))
    }

    /// True if the last path search closed the polygon
    pub fn is_in_closed_list(&self, poly_ref: PolyRef) -> bool {
        self.node_pool
            .find_node(poly_ref)
            .is_some_and(|n| self.node_pool.node(n).flags.contains(NodeFlags::CLOSED))
    }
}

/// Straight path output with capacity bookkeeping
struct StraightPathWriter {
    points: Vec<StraightPathPoint>,
    max: usize,
}

impl StraightPathWriter {
    /// Appends a vertex, merging it into the previous one when they coincide
    ///
    /// Returns `IN_PROGRESS` while more vertices may follow.
    fn append(&mut self, pos: &[f32; 3], flags: StraightPathFlags, poly: PolyRef) -> Status {
        let len = self.points.len();
        match self.points.last_mut() {
            Some(last) if vequal(&last.pos, pos) => {
                last.flags = flags;
                last.poly = poly;
            }
            _ if len >= self.max => {
                return Status::success_detail(Status::BUFFER_TOO_SMALL);
            }
            _ => {
                self.points.push(StraightPathPoint {
                    pos: *pos,
                    flags,
                    poly,
                });
                if self.points.len() >= self.max {
                    return Status::success_detail(Status::BUFFER_TOO_SMALL);
                }
                if flags == StraightPathFlags::END {
                    return Status::success();
                }
            }
        }
        Status::in_progress()
    }

    fn finish(self, status: Status) -> StraightPathResult {
        let status = if status.is_in_progress() {
            Status::success()
        } else {
            status
        };
        let status = if self.points.len() >= self.max {
            status.with_detail(Status::BUFFER_TOO_SMALL)
        } else {
            status
        };
        StraightPathResult {
            points: self.points,
            status,
        }
    }
}

fn corner_flags(poly: PolyRef, poly_type: PolyType) -> StraightPathFlags {
    if !poly.is_valid() {
        StraightPathFlags::END
    } else if poly_type == PolyType::OffMeshConnection {
        StraightPathFlags::OFFMESH_CONNECTION
    } else {
        StraightPathFlags::empty()
    }
}

/// Portal between two linked polygons as (left, right)
///
/// Off-mesh connections have a single-point portal at the endpoint the link
/// attaches to. Tile boundary portals are narrowed to the overlapping
/// section recorded in the link.
pub(crate) fn portal_points(
    from: PolyRef,
    from_tile: &MeshTile,
    from_poly: &Poly,
    to: PolyRef,
    to_tile: &MeshTile,
    to_poly: &Poly,
) -> Result<([f32; 3], [f32; 3])> {
    let link = from_tile
        .links_of(from_poly)
        .find(|l| l.reference == to)
        .ok_or(Status::invalid_param())?;

    if from_poly.is_off_mesh_connection() {
        let v = from_tile.poly_vertex(from_poly, link.edge as usize);
        return Ok((v, v));
    }

    if to_poly.is_off_mesh_connection() {
        let back = to_tile
            .links_of(to_poly)
            .find(|l| l.reference == from)
            .ok_or(Status::invalid_param())?;
        let v = to_tile.poly_vertex(to_poly, back.edge as usize);
        return Ok((v, v));
    }

    if link.edge == OFFMESH_EDGE {
        return Err(Status::invalid_param());
    }
    let nv = from_poly.vert_count as usize;
    let v0 = from_tile.poly_vertex(from_poly, link.edge as usize);
    let v1 = from_tile.poly_vertex(from_poly, (link.edge as usize + 1) % nv);

    if link.side != LINK_SIDE_INTERNAL && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        let tmin = link.bmin as f32 * s;
        let tmax = link.bmax as f32 * s;
        return Ok((vlerp(&v0, &v1, tmin), vlerp(&v0, &v1, tmax)));
    }
    Ok((v0, v1))
}
