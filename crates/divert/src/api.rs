//! Owned handles for host applications
//!
//! Each long-lived object (mesh, filter, query engine) is a handle that owns
//! its resources and frees them when dropped. Positions are [`Vector`]s and
//! every failure names the operation it came from.

use log::trace;
use thiserror::Error;

use crate::{
    NavMesh, NavMeshParams, NavMeshQuery, PolyFlags, PolyRef, QueryFilter, Status,
    StraightPathFlags, StraightPathOptions, TileFlags, TileRef,
};

/// World-space position, x and z horizontal, y up
pub type Vector = glam::Vec3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivertError {
    #[error("navigation mesh operation failed: {0}")]
    Failure(Status),
    #[error("get_poly_height failed: {0}")]
    GetPolyHeightFailure(Status),
    #[error("find_nearest_poly failed: {0}")]
    FindNearestPolyFailure(Status),
    #[error("closest_point_on_poly failed: {0}")]
    ClosestPointOnPolyFailure(Status),
    #[error("closest_point_on_poly_boundary failed: {0}")]
    ClosestPointOnPolyBoundaryFailure(Status),
    #[error("find_path failed: {0}")]
    FindPathFailure(Status),
    #[error("find_straight_path failed: {0}")]
    FindStraightPathFailure(Status),
    #[error("move_along_surface failed: {0}")]
    MoveAlongSurfaceFailure(Status),
}

impl DivertError {
    /// Status the failing operation reported
    pub fn status(&self) -> Status {
        match *self {
            Self::Failure(s)
            | Self::GetPolyHeightFailure(s)
            | Self::FindNearestPolyFailure(s)
            | Self::ClosestPointOnPolyFailure(s)
            | Self::ClosestPointOnPolyBoundaryFailure(s)
            | Self::FindPathFailure(s)
            | Self::FindStraightPathFailure(s)
            | Self::MoveAlongSurfaceFailure(s) => s,
        }
    }
}

pub type DivertResult<T> = std::result::Result<T, DivertError>;

/// Owned navigation mesh
#[derive(Debug)]
pub struct NavMeshHandle {
    nav_mesh: NavMesh,
}

impl NavMeshHandle {
    /// Creates an empty tiled mesh
    pub fn new(params: &NavMeshParams) -> DivertResult<Self> {
        let nav_mesh = NavMesh::new(params.clone()).map_err(DivertError::Failure)?;
        Ok(Self { nav_mesh })
    }

    /// Creates a mesh holding exactly one tile
    pub fn new_single_tile(data: Vec<u8>) -> DivertResult<Self> {
        let nav_mesh =
            NavMesh::new_single_tile(data, TileFlags::FREE_DATA).map_err(DivertError::Failure)?;
        Ok(Self { nav_mesh })
    }

    /// Adds an encoded tile; the mesh takes ownership of the data
    pub fn add_tile(&mut self, data: Vec<u8>) -> DivertResult<TileRef> {
        let tile_ref = self
            .nav_mesh
            .add_tile(data, TileFlags::FREE_DATA, None)
            .map_err(DivertError::Failure)?;
        trace!("Added tile {:#x}", tile_ref.id());
        Ok(tile_ref)
    }

    pub fn nav_mesh(&self) -> &NavMesh {
        &self.nav_mesh
    }

    pub fn nav_mesh_mut(&mut self) -> &mut NavMesh {
        &mut self.nav_mesh
    }
}

/// Owned query filter with 16-bit flag masks
#[derive(Debug, Clone, Default)]
pub struct QueryFilterHandle {
    filter: QueryFilter,
}

impl QueryFilterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_include_flags(&mut self, include_flags: u16) {
        self.filter
            .set_include_flags(PolyFlags::from_bits_retain(include_flags));
    }

    pub fn get_include_flags(&self) -> u16 {
        self.filter.include_flags().bits()
    }

    pub fn set_exclude_flags(&mut self, exclude_flags: u16) {
        self.filter
            .set_exclude_flags(PolyFlags::from_bits_retain(exclude_flags));
    }

    pub fn get_exclude_flags(&self) -> u16 {
        self.filter.exclude_flags().bits()
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut QueryFilter {
        &mut self.filter
    }
}

/// Query engine bound to a mesh handle for its whole lifetime
#[derive(Debug)]
pub struct NavMeshQueryHandle<'a> {
    query: NavMeshQuery<'a>,
}

impl<'a> NavMeshQueryHandle<'a> {
    /// Creates a query engine with room for `max_nodes` search nodes
    pub fn new(nav_mesh: &'a NavMeshHandle, max_nodes: usize) -> DivertResult<Self> {
        let query = NavMeshQuery::new(&nav_mesh.nav_mesh, max_nodes).map_err(DivertError::Failure)?;
        Ok(Self { query })
    }

    /// Height of a polygon at the given position
    pub fn get_poly_height(&self, poly_ref: PolyRef, position: &Vector) -> DivertResult<f32> {
        self.query
            .get_poly_height(poly_ref, &position.to_array())
            .map_err(DivertError::GetPolyHeightFailure)
    }

    /// Nearest polygon to `center` within `center ± extents`
    pub fn find_nearest_poly(
        &self,
        center: &Vector,
        extents: &Vector,
        filter: &QueryFilterHandle,
    ) -> DivertResult<(PolyRef, Vector)> {
        let (poly_ref, closest) = self
            .query
            .find_nearest_poly(&center.to_array(), &extents.to_array(), &filter.filter)
            .map_err(DivertError::FindNearestPolyFailure)?;
        Ok((poly_ref, Vector::from_array(closest)))
    }

    /// Closest point on a polygon, and whether `position` lies over it
    pub fn closest_point_on_poly(
        &self,
        poly_ref: PolyRef,
        position: &Vector,
    ) -> DivertResult<(Vector, bool)> {
        let (closest, over_poly) = self
            .query
            .closest_point_on_poly(poly_ref, &position.to_array())
            .map_err(DivertError::ClosestPointOnPolyFailure)?;
        Ok((Vector::from_array(closest), over_poly))
    }

    pub fn closest_point_on_poly_boundary(
        &self,
        poly_ref: PolyRef,
        position: &Vector,
    ) -> DivertResult<Vector> {
        self.query
            .closest_point_on_poly_boundary(poly_ref, &position.to_array())
            .map(Vector::from_array)
            .map_err(DivertError::ClosestPointOnPolyBoundaryFailure)
    }

    /// Polygon corridor from `start_ref` to `end_ref`, at most `max_path` long
    ///
    /// The status carries `PARTIAL_RESULT`, `OUT_OF_NODES` or
    /// `BUFFER_TOO_SMALL` when the corridor is incomplete.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: &Vector,
        end_pos: &Vector,
        filter: &QueryFilterHandle,
        max_path: usize,
    ) -> DivertResult<(Vec<PolyRef>, Status)> {
        let result = self.query.find_path(
            start_ref,
            end_ref,
            &start_pos.to_array(),
            &end_pos.to_array(),
            &filter.filter,
            max_path,
        );
        trace!("FindPathStatus: {:?}", result.as_ref().map(|p| p.status));
        let path = result.map_err(DivertError::FindPathFailure)?;
        Ok((path.polys, path.status))
    }

    /// Waypoints along a corridor as (position, flags, polygon) triples,
    /// with the status of the string pull
    pub fn find_straight_path(
        &self,
        start_pos: &Vector,
        end_pos: &Vector,
        poly_path: &[PolyRef],
        max_path: usize,
        options: StraightPathOptions,
    ) -> DivertResult<(Vec<(Vector, StraightPathFlags, PolyRef)>, Status)> {
        let result = self
            .query
            .find_straight_path(
                &start_pos.to_array(),
                &end_pos.to_array(),
                poly_path,
                max_path,
                options,
            )
            .map_err(DivertError::FindStraightPathFailure)?;
        trace!("FindStraightPathStatus: {}", result.status);

        let points = result
            .points
            .into_iter()
            .map(|p| (Vector::from_array(p.pos), p.flags, p.poly))
            .collect();
        Ok((points, result.status))
    }

    /// Moves along the surface; returns the reached position, the
    /// polygons visited on the way and the walk's status
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyRef,
        start_pos: &Vector,
        end_pos: &Vector,
        filter: &QueryFilterHandle,
        max_visit: usize,
    ) -> DivertResult<(Vector, Vec<PolyRef>, Status)> {
        let result = self
            .query
            .move_along_surface(
                start_ref,
                &start_pos.to_array(),
                &end_pos.to_array(),
                &filter.filter,
                max_visit,
            )
            .map_err(DivertError::MoveAlongSurfaceFailure)?;
        Ok((Vector::from_array(result.pos), result.visited, result.status))
    }

    pub fn query(&self) -> &NavMeshQuery<'a> {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut NavMeshQuery<'a> {
        &mut self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{grid_params, grid_tile, TestResult};

    fn handle_mesh() -> DivertResult<NavMeshHandle> {
        let mut mesh = NavMeshHandle::new(&grid_params(4, 16))?;
        let data = grid_tile(0, 0, 0, 2).map_err(DivertError::Failure)?;
        mesh.add_tile(data)?;
        Ok(mesh)
    }

    #[test]
    fn test_nav_mesh_handle() -> TestResult {
        let mut params = grid_params(1, 1000);
        params.tile_width = 32.0;
        params.tile_height = 32.0;
        assert!(NavMeshHandle::new(&params).is_ok());

        params.max_tiles = 0;
        let err = NavMeshHandle::new(&params).err();
        assert_eq!(err, Some(DivertError::Failure(Status::invalid_param())));

        let mesh = NavMeshHandle::new_single_tile(grid_tile(0, 0, 0, 2)?)?;
        assert_eq!(mesh.nav_mesh().tile_count(), 1);
        Ok(())
    }

    #[test]
    fn test_add_tile_twice_fails() -> TestResult {
        let mut mesh = handle_mesh()?;
        let err = mesh.add_tile(grid_tile(0, 0, 0, 2)?).err();
        let status = err.map(|e| e.status()).ok_or("second add succeeded")?;
        assert!(status.is_failure());
        assert!(status.has_detail(Status::ALREADY_OCCUPIED));
        Ok(())
    }

    #[test]
    fn test_query_filter_handle() {
        let mut filter = QueryFilterHandle::new();
        assert_eq!(filter.get_include_flags(), 0xffff);
        assert_eq!(filter.get_exclude_flags(), 0);

        filter.set_include_flags(1);
        assert_eq!(filter.get_include_flags(), 1);

        filter.set_exclude_flags(1);
        assert_eq!(filter.get_exclude_flags(), 1);

        // Bits without a named flag survive the round trip.
        filter.set_include_flags(0x8001);
        assert_eq!(filter.get_include_flags(), 0x8001);
    }

    #[test]
    fn test_query_handle_round_trip() -> TestResult {
        let mesh = handle_mesh()?;
        let filter = QueryFilterHandle::new();
        let mut query = NavMeshQueryHandle::new(&mesh, 100)?;
        let extents = Vector::new(1.0, 1.0, 1.0);

        let start_pos = Vector::new(2.5, 0.5, 2.5);
        let end_pos = Vector::new(7.5, 0.0, 7.5);
        let (start_ref, start_closest) = query.find_nearest_poly(&start_pos, &extents, &filter)?;
        let (end_ref, end_closest) = query.find_nearest_poly(&end_pos, &extents, &filter)?;
        assert_eq!(start_closest, Vector::new(2.5, 0.0, 2.5));

        assert_eq!(query.get_poly_height(start_ref, &start_pos)?, 0.0);

        let (closest, over) = query.closest_point_on_poly(start_ref, &Vector::new(7.0, 1.0, 2.0))?;
        assert!(!over);
        assert!(closest.distance(Vector::new(5.0, 0.0, 2.0)) < 1e-5);
        let boundary = query.closest_point_on_poly_boundary(start_ref, &start_closest)?;
        assert_eq!(boundary, start_closest);

        let (path, status) = query.find_path(start_ref, end_ref, &start_closest, &end_closest, &filter, 16)?;
        assert_eq!(status, Status::success());
        assert_eq!(path.len(), 3);
        assert_eq!(path.first(), Some(&start_ref));
        assert_eq!(path.last(), Some(&end_ref));

        let (straight, status) = query.find_straight_path(
            &start_closest,
            &end_closest,
            &path,
            16,
            StraightPathOptions::empty(),
        )?;
        assert_eq!(status, Status::success());
        let (first, first_flags, _) = straight.first().ok_or("empty straight path")?;
        let (last, last_flags, _) = straight.last().ok_or("empty straight path")?;
        assert_eq!(*first, start_closest);
        assert_eq!(*first_flags, StraightPathFlags::START);
        assert_eq!(*last, end_closest);
        assert_eq!(*last_flags, StraightPathFlags::END);

        let (pos, visited, status) =
            query.move_along_surface(start_ref, &start_closest, &Vector::new(2.5, 0.0, -4.0), &filter, 8)?;
        assert_eq!(pos, Vector::new(2.5, 0.0, 0.0));
        assert_eq!(visited, vec![start_ref]);
        assert_eq!(status, Status::success());
        Ok(())
    }

    #[test]
    fn test_query_handle_reports_truncation() -> TestResult {
        let mesh = handle_mesh()?;
        let filter = QueryFilterHandle::new();
        let mut query = NavMeshQueryHandle::new(&mesh, 100)?;
        let extents = Vector::new(1.0, 1.0, 1.0);
        let (start_ref, start_pos) = query.find_nearest_poly(&Vector::new(2.5, 0.0, 2.5), &extents, &filter)?;
        let (end_ref, end_pos) = query.find_nearest_poly(&Vector::new(7.5, 0.0, 7.5), &extents, &filter)?;

        let (full, _) = query.find_path(start_ref, end_ref, &start_pos, &end_pos, &filter, 16)?;
        let (path, status) = query.find_path(start_ref, end_ref, &start_pos, &end_pos, &filter, 2)?;
        assert_eq!(path, &full[..2]);
        assert!(status.is_success());
        assert!(status.has_detail(Status::BUFFER_TOO_SMALL));

        let (straight, status) =
            query.find_straight_path(&start_pos, &end_pos, &full, 1, StraightPathOptions::empty())?;
        assert_eq!(straight.len(), 1);
        assert!(status.has_detail(Status::BUFFER_TOO_SMALL));

        let across = Vector::new(7.5, 0.0, 2.5);
        let (pos, visited, status) = query.move_along_surface(start_ref, &start_pos, &across, &filter, 1)?;
        assert_eq!(pos, across);
        assert_eq!(visited, vec![start_ref]);
        assert!(status.has_detail(Status::BUFFER_TOO_SMALL));
        Ok(())
    }

    #[test]
    fn test_query_handle_errors_name_operation() -> TestResult {
        let mesh = handle_mesh()?;
        let filter = QueryFilterHandle::new();
        let mut query = NavMeshQueryHandle::new(&mesh, 100)?;
        let pos = Vector::new(1.0, 0.0, 1.0);
        let bad = PolyRef::default();
        let invalid = Status::invalid_param();

        assert_eq!(
            query.get_poly_height(bad, &pos).err(),
            Some(DivertError::GetPolyHeightFailure(invalid))
        );
        assert_eq!(
            query.closest_point_on_poly(bad, &pos).err(),
            Some(DivertError::ClosestPointOnPolyFailure(invalid))
        );
        assert_eq!(
            query.closest_point_on_poly_boundary(bad, &pos).err(),
            Some(DivertError::ClosestPointOnPolyBoundaryFailure(invalid))
        );
        assert_eq!(
            query.find_path(bad, bad, &pos, &pos, &filter, 8).err(),
            Some(DivertError::FindPathFailure(invalid))
        );
        assert_eq!(
            query
                .find_straight_path(&pos, &pos, &[], 8, StraightPathOptions::empty())
                .err(),
            Some(DivertError::FindStraightPathFailure(invalid))
        );
        assert_eq!(
            query.move_along_surface(bad, &pos, &pos, &filter, 8).err(),
            Some(DivertError::MoveAlongSurfaceFailure(invalid))
        );

        let far = Vector::new(100.0, 0.0, 100.0);
        let err = query.find_nearest_poly(&far, &Vector::ONE, &filter).err();
        assert_eq!(err, Some(DivertError::FindNearestPolyFailure(Status::failure())));
        assert_eq!(err.map(|e| e.to_string()).as_deref(), Some("find_nearest_poly failed: Failure"));

        assert!(NavMeshQueryHandle::new(&mesh, 0).is_err());
        Ok(())
    }
}
