//! Incremental polygon corridor search
//!
//! The A* search behind [`NavMeshQuery::find_path`] is a small state machine
//! that can be stepped a bounded number of iterations at a time:
//!
//! ```text
//! Idle -> Searching -> Succeeded | Failed | OutOfNodes
//! ```
//!
//! Hosts that need to spread a long search across frames, or stop it when a
//! budget runs out, drive it with [`NavMeshQuery::init_sliced_find_path`],
//! [`NavMeshQuery::update_sliced_find_path`] and one of the finalize calls.
//! `find_path` runs the same search to completion, so it resets any sliced
//! search in progress on the same query.

use log::{trace, warn};

use super::nav_mesh_query::{portal_points, NavMeshQuery, PathResult};
use super::node_pool::{NodeFlags, NodeIndex};
use super::{PolyFilter, PolyRef, Result, Status};
use divert_common::{vdist, visfinite};

/// Scale applied to the distance heuristic so it never overestimates
pub(crate) const H_SCALE: f32 = 0.999;

/// State of a sliced path search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlicedPathState {
    /// No search has been started, or the last one was finalized
    #[default]
    Idle,
    /// The open list still has nodes to expand
    Searching,
    /// The end polygon was reached
    Succeeded,
    /// The end polygon is unreachable
    Failed,
    /// The node pool ran out before the end polygon was reached
    OutOfNodes,
}

impl SlicedPathState {
    /// True once the search has stopped expanding nodes
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::OutOfNodes)
    }
}

/// Bookkeeping of the current search
#[derive(Debug, Clone, Default)]
pub(crate) struct SearchState {
    pub(crate) state: SlicedPathState,
    pub(crate) detail: u32,
    pub(crate) start_ref: PolyRef,
    pub(crate) end_ref: PolyRef,
    pub(crate) start_pos: [f32; 3],
    pub(crate) end_pos: [f32; 3],
    pub(crate) last_best: Option<NodeIndex>,
    pub(crate) last_best_cost: f32,
    pub(crate) iterations: usize,
}

impl<'a> NavMeshQuery<'a> {
    /// Starts a sliced path search
    ///
    /// The filter is cloned into the query and used by every later update.
    pub fn init_sliced_find_path<F>(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
        filter: &F,
    ) -> Result<()>
    where
        F: PolyFilter + Clone + 'a,
    {
        self.begin_search(start_ref, end_ref, start_pos, end_pos)?;
        self.sliced_filter = Some(Box::new(filter.clone()));
        Ok(())
    }

    /// Expands at most `max_iter` nodes of the sliced search
    ///
    /// Returns the number of iterations done and the resulting state.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> Result<(usize, SlicedPathState)> {
        match self.search.state {
            SlicedPathState::Idle => return Err(Status::failure()),
            SlicedPathState::Searching => {}
            done => return Ok((0, done)),
        }
        let filter = self.sliced_filter.take().ok_or(Status::failure())?;
        let done = self.step_search(filter.as_ref(), max_iter);
        self.sliced_filter = Some(filter);
        Ok((done, self.search.state))
    }

    /// Current state of the sliced search
    pub fn sliced_path_state(&self) -> SlicedPathState {
        self.search.state
    }

    /// Ends the sliced search and returns its corridor
    ///
    /// A search that has not reached the end polygon yields the path to the
    /// node closest to it, flagged `PARTIAL_RESULT`.
    pub fn finalize_sliced_find_path(&mut self, max_path: usize) -> Result<PathResult> {
        let result = self.finish_search(max_path);
        self.reset_search();
        result
    }

    /// Ends the sliced search, continuing an existing corridor
    ///
    /// Returns the path to the furthest polygon of `existing` that the search
    /// visited, falling back to the node closest to the end polygon.
    pub fn finalize_sliced_find_path_partial(
        &mut self,
        existing: &[PolyRef],
        max_path: usize,
    ) -> Result<PathResult> {
        let result = self.finish_search_partial(existing, max_path);
        self.reset_search();
        result
    }

    /// Abandons the sliced search
    pub fn cancel_sliced_find_path(&mut self) {
        self.reset_search();
    }

    fn reset_search(&mut self) {
        self.search = SearchState::default();
        self.sliced_filter = None;
    }

    /// Validates a search request and seeds the open list with the start node
    pub(crate) fn begin_search(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &[f32; 3],
        end_pos: &[f32; 3],
    ) -> Result<()> {
        self.reset_search();

        if !self.nav_mesh.is_valid_poly_ref(start_ref)
            || !self.nav_mesh.is_valid_poly_ref(end_ref)
            || !visfinite(start_pos)
            || !visfinite(end_pos)
        {
            return Err(Status::invalid_param());
        }

        self.search.start_ref = start_ref;
        self.search.end_ref = end_ref;
        self.search.start_pos = *start_pos;
        self.search.end_pos = *end_pos;

        self.node_pool.clear();
        self.open_list.clear();

        if start_ref == end_ref {
            self.search.state = SlicedPathState::Succeeded;
            return Ok(());
        }

        let start = self
            .node_pool
            .get_node(start_ref)
            .ok_or(Status::failure_detail(Status::OUT_OF_NODES))?;
        let h = vdist(start_pos, end_pos) * H_SCALE;
        let node = self.node_pool.node_mut(start);
        node.pos = *start_pos;
        node.parent = None;
        node.cost = 0.0;
        node.total = h;
        node.flags = NodeFlags::OPEN;
        self.open_list.push(start, h);

        self.search.last_best = Some(start);
        self.search.last_best_cost = h;
        self.search.state = SlicedPathState::Searching;
        Ok(())
    }

    /// Runs up to `max_iter` A* iterations; returns how many ran
    pub(crate) fn step_search(&mut self, filter: &dyn PolyFilter, max_iter: usize) -> usize {
        let mesh = self.nav_mesh;
        let end_ref = self.search.end_ref;
        let end_pos = self.search.end_pos;
        let mut iter = 0;
        if self.search.state != SlicedPathState::Searching {
            return iter;
        }

        while iter < max_iter {
            let Some(best) = self.open_list.pop() else {
                break;
            };
            iter += 1;

            let best_node = self.node_pool.node_mut(best);
            best_node.flags.remove(NodeFlags::OPEN);
            best_node.flags.insert(NodeFlags::CLOSED);
            let best_ref = best_node.id;
            let best_pos = best_node.pos;
            let best_cost = best_node.cost;
            let parent = best_node.parent;
            let parent_ref = parent.map_or(PolyRef::default(), |p| self.node_pool.node(p).id);

            if best_ref == end_ref {
                self.search.last_best = Some(best);
                self.search.state = SlicedPathState::Succeeded;
                break;
            }

            let Ok((best_tile, best_poly)) = mesh.get_tile_and_poly_by_ref(best_ref) else {
                continue;
            };

            for link in best_tile.links_of(best_poly) {
                let nei_ref = link.reference;
                if !nei_ref.is_valid() || nei_ref == parent_ref {
                    continue;
                }
                let Ok((nei_tile, nei_poly)) = mesh.get_tile_and_poly_by_ref(nei_ref) else {
                    continue;
                };
                if !filter.pass_filter(nei_ref, nei_tile, nei_poly) {
                    continue;
                }

                let Some(nei) = self.node_pool.get_node(nei_ref) else {
                    self.search.detail |= Status::OUT_OF_NODES;
                    continue;
                };

                if self.node_pool.node(nei).is_new() {
                    let Ok((left, right)) =
                        portal_points(best_ref, best_tile, best_poly, nei_ref, nei_tile, nei_poly)
                    else {
                        continue;
                    };
                    self.node_pool.node_mut(nei).pos = [
                        (left[0] + right[0]) * 0.5,
                        (left[1] + right[1]) * 0.5,
                        (left[2] + right[2]) * 0.5,
                    ];
                }
                let nei_pos = self.node_pool.node(nei).pos;

                let (cost, heuristic) = if nei_ref == end_ref {
                    let cur_cost = filter.get_cost(
                        &best_pos, &nei_pos, parent_ref, best_ref, best_tile, best_poly, nei_ref,
                    );
                    let end_cost = filter.get_cost(
                        &nei_pos,
                        &end_pos,
                        best_ref,
                        nei_ref,
                        nei_tile,
                        nei_poly,
                        PolyRef::default(),
                    );
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.get_cost(
                        &best_pos, &nei_pos, parent_ref, best_ref, best_tile, best_poly, nei_ref,
                    );
                    (best_cost + cur_cost, vdist(&nei_pos, &end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let node = self.node_pool.node_mut(nei);
                if node.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= node.total {
                    continue;
                }

                node.parent = Some(best);
                node.flags.remove(NodeFlags::CLOSED);
                node.cost = cost;
                node.total = total;

                if node.flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(nei, total);
                } else {
                    node.flags.insert(NodeFlags::OPEN);
                    self.open_list.push(nei, total);
                }

                if heuristic < self.search.last_best_cost {
                    self.search.last_best_cost = heuristic;
                    self.search.last_best = Some(nei);
                }
            }
        }

        self.search.iterations += iter;

        if self.search.state == SlicedPathState::Searching && self.open_list.is_empty() {
            self.search.state = if self.search.detail & Status::OUT_OF_NODES != 0 {
                warn!(
                    "Path search from {} to {} ran out of nodes after {} iterations",
                    self.search.start_ref, end_ref, self.search.iterations
                );
                SlicedPathState::OutOfNodes
            } else {
                SlicedPathState::Failed
            };
        }

        if self.search.state.is_finished() {
            trace!(
                "Path search from {} to {} finished as {:?}: {} iterations, {} nodes",
                self.search.start_ref,
                end_ref,
                self.search.state,
                self.search.iterations,
                self.node_pool.node_count()
            );
        }
        iter
    }

    /// Builds the corridor of a finished (or abandoned) search
    pub(crate) fn finish_search(&self, max_path: usize) -> Result<PathResult> {
        if max_path == 0 {
            return Err(Status::invalid_param());
        }
        match self.search.state {
            SlicedPathState::Idle => return Err(Status::failure()),
            SlicedPathState::Failed => return Err(Status::failure()),
            _ => {}
        }

        if self.search.start_ref == self.search.end_ref {
            return Ok(PathResult {
                polys: vec![self.search.start_ref],
                status: Status::success(),
                cost: 0.0,
            });
        }

        let node = self.search.last_best.ok_or(Status::failure())?;
        let mut detail = self.search.detail;
        if self.node_pool.node(node).id != self.search.end_ref {
            detail |= Status::PARTIAL_RESULT;
        }
        Ok(self.path_to_node(node, max_path, detail))
    }

    fn finish_search_partial(&self, existing: &[PolyRef], max_path: usize) -> Result<PathResult> {
        if existing.is_empty() || max_path == 0 {
            return Err(Status::invalid_param());
        }
        match self.search.state {
            SlicedPathState::Idle => return Err(Status::failure()),
            SlicedPathState::Failed => return Err(Status::failure()),
            _ => {}
        }

        if self.search.start_ref == self.search.end_ref {
            return Ok(PathResult {
                polys: vec![self.search.start_ref],
                status: Status::success(),
                cost: 0.0,
            });
        }

        let mut detail = self.search.detail;
        let visited = existing.iter().rev().find_map(|&r| {
            self.node_pool
                .find_node(r)
                .filter(|&n| !self.node_pool.node(n).is_new())
        });
        let node = match visited {
            Some(n) => n,
            None => {
                detail |= Status::PARTIAL_RESULT;
                self.search.last_best.ok_or(Status::failure())?
            }
        };
        if self.node_pool.node(node).id != self.search.end_ref {
            detail |= Status::PARTIAL_RESULT;
        }
        Ok(self.path_to_node(node, max_path, detail))
    }

    /// Walks parent links back to the start; keeps the first `max_path` polygons
    fn path_to_node(&self, node: NodeIndex, max_path: usize, mut detail: u32) -> PathResult {
        let mut polys = Vec::new();
        let mut cur = Some(node);
        while let Some(idx) = cur {
            let n = self.node_pool.node(idx);
            polys.push(n.id);
            cur = n.parent;
        }
        polys.reverse();
        if polys.len() > max_path {
            polys.truncate(max_path);
            detail |= Status::BUFFER_TOO_SMALL;
        }
        PathResult {
            polys,
            status: Status::success_detail(detail),
            cost: self.node_pool.node(node).cost,
        }
    }
}
