//! Off-mesh connections: endpoint snapping, one-way traversal and the
//! markers they leave in straight paths.

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::{assert_vec_near, grid_builder, grid_params, poly_at, TestResult};
    use crate::{
        NavMesh, NavMeshQuery, PolyFlags, PolyRef, PolyType, QueryFilter, Status, StraightPathFlags,
        StraightPathOptions, TileFlags,
    };

    const JUMP_START: [f32; 3] = [1.6, 0.0, 5.0];
    const JUMP_END: [f32; 3] = [8.3, 0.0, 5.0];
    const START: [f32; 3] = [1.0, 0.0, 4.0];
    const END: [f32; 3] = [9.0, 0.0, 4.0];

    /// 3x3 grid split by a hole column, bridged by one connection
    ///
    /// Ground polygons are 0..6 row by row, the connection is polygon 6.
    fn bridged_mesh(start: [f32; 3], end: [f32; 3], radius: f32, bidir: bool) -> crate::Result<NavMesh> {
        let mut builder = grid_builder(0, 0, 0, 3, &|cx: usize, _: usize| {
            (cx != 1).then_some((PolyFlags::WALK, 0))
        })?;
        builder
            .add_off_mesh_connection(start, end, radius, bidir, PolyFlags::JUMP, 2, 77)
            .map_err(Status::from)?;
        let data = builder.build().map_err(Status::from)?;

        let mut mesh = NavMesh::new(grid_params(1, 16))?;
        mesh.add_tile(data, TileFlags::FREE_DATA, None)?;
        Ok(mesh)
    }

    fn poly_ref(mesh: &NavMesh, index: u32) -> crate::Result<PolyRef> {
        let tile = mesh.get_tile_at(0, 0, 0).ok_or(Status::failure())?;
        Ok(PolyRef::new(mesh.get_poly_ref_base(tile).id() | index))
    }

    #[test]
    fn test_path_uses_connection() -> TestResult {
        let mesh = bridged_mesh(JUMP_START, JUMP_END, 1.0, true)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start = poly_at(&mesh, &START)?;
        let end = poly_at(&mesh, &END)?;
        let jump = poly_ref(&mesh, 6)?;

        let path = query.find_path(start, end, &START, &END, &filter, 16)?;
        assert_eq!(path.status, Status::success());
        assert_eq!(path.polys, vec![start, jump, end]);

        let (left, right, from_type, to_type) = query.get_portal_points(start, jump)?;
        assert_eq!(left, right);
        assert_vec_near(&left, &JUMP_START, 1e-5);
        assert_eq!((from_type, to_type), (PolyType::Ground, PolyType::OffMeshConnection));

        // The way back works as well.
        let back = query.find_path(end, start, &END, &START, &filter, 16)?;
        assert_eq!(back.polys, vec![end, jump, start]);

        // Excluding the connection's flags leaves the halves apart.
        let no_jump = QueryFilter::new(PolyFlags::ALL, PolyFlags::JUMP);
        let err = query.find_path(start, end, &START, &END, &no_jump, 16).err();
        assert_eq!(err, Some(Status::failure()));
        Ok(())
    }

    #[test]
    fn test_straight_path_marks_connection() -> TestResult {
        let mesh = bridged_mesh(JUMP_START, JUMP_END, 1.0, true)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start = poly_at(&mesh, &START)?;
        let end = poly_at(&mesh, &END)?;
        let jump = poly_ref(&mesh, 6)?;

        let path = query.find_path(start, end, &START, &END, &filter, 16)?;
        let straight =
            query.find_straight_path(&START, &END, &path.polys, 16, StraightPathOptions::empty())?;
        assert_eq!(straight.status, Status::success());

        let points = &straight.points;
        assert_eq!(points.len(), 4);
        assert_vec_near(&points[0].pos, &START, 1e-5);
        assert_eq!(points[0].flags, StraightPathFlags::START);
        assert_eq!(points[0].poly, start);

        assert_vec_near(&points[1].pos, &JUMP_START, 1e-5);
        assert_eq!(points[1].flags, StraightPathFlags::OFFMESH_CONNECTION);
        assert_eq!(points[1].poly, jump);

        assert_vec_near(&points[2].pos, &JUMP_END, 1e-5);
        assert_eq!(points[2].flags, StraightPathFlags::empty());
        assert_eq!(points[2].poly, end);

        assert_vec_near(&points[3].pos, &END, 1e-5);
        assert_eq!(points[3].flags, StraightPathFlags::END);
        assert!(!points[3].poly.is_valid());
        Ok(())
    }

    #[test]
    fn test_one_way_connection() -> TestResult {
        let mesh = bridged_mesh(JUMP_START, JUMP_END, 1.0, false)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start = poly_at(&mesh, &START)?;
        let end = poly_at(&mesh, &END)?;

        let forward = query.find_path(start, end, &START, &END, &filter, 16)?;
        assert_eq!(forward.polys.len(), 3);

        let err = query.find_path(end, start, &END, &START, &filter, 16).err();
        assert_eq!(err, Some(Status::failure()));
        Ok(())
    }

    #[test]
    fn test_endpoints_snap_to_surface() -> TestResult {
        let mesh = bridged_mesh([1.6, 0.5, 5.0], JUMP_END, 1.0, true)?;
        let jump = poly_ref(&mesh, 6)?;

        let (tile, poly) = mesh.get_tile_and_poly_by_ref(jump)?;
        assert!(poly.is_off_mesh_connection());
        assert_vec_near(&tile.poly_vertex(poly, 0), &JUMP_START, 1e-5);
        assert_vec_near(&tile.poly_vertex(poly, 1), &JUMP_END, 1e-5);

        let con = mesh.get_off_mesh_connection_by_ref(jump)?;
        assert_eq!(con.start_pos(), [1.6, 0.5, 5.0]);
        assert_eq!(con.radius, 1.0);
        assert_eq!(con.user_id, 77);
        assert!(con.is_bidirectional());
        assert_eq!(mesh.get_poly_area(jump)?, 2);

        let ground = poly_at(&mesh, &START)?;
        assert_eq!(
            mesh.get_off_mesh_connection_by_ref(ground).err(),
            Some(Status::invalid_param())
        );
        Ok(())
    }

    #[test]
    fn test_endpoint_out_of_reach_is_not_linked() -> TestResult {
        // The end sits in the hole, further than the radius from any polygon.
        let mesh = bridged_mesh(JUMP_START, [5.0, 0.0, 5.0], 0.5, true)?;
        let jump = poly_ref(&mesh, 6)?;
        let (tile, poly) = mesh.get_tile_and_poly_by_ref(jump)?;
        assert_eq!(tile.links_of(poly).count(), 1);

        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start = poly_at(&mesh, &START)?;
        let end = poly_at(&mesh, &END)?;
        let err = query.find_path(start, end, &START, &END, &filter, 16).err();
        assert_eq!(err, Some(Status::failure()));
        Ok(())
    }

    #[test]
    fn test_surface_movement_ignores_connections() -> TestResult {
        let mesh = bridged_mesh(JUMP_START, JUMP_END, 1.0, true)?;
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start = poly_at(&mesh, &START)?;

        let result = query.move_along_surface(start, &START, &END, &QueryFilter::default(), 16)?;
        assert_vec_near(&result.pos, &[10.0 / 3.0, 0.0, 4.0], 1e-4);
        assert_eq!(result.visited, vec![start]);
        Ok(())
    }
}
