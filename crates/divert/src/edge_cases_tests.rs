//! Edge cases of the query engine: degenerate requests, stale or invalid
//! references, exhausted buffers and node budgets.

#[cfg(test)]
mod tests {
    use crate::test_mesh_helpers::{
        assert_vec_near, grid_mesh, grid_params, grid_tile, grid_tile_with, poly_at, TestResult,
    };
    use crate::{
        NavMesh, NavMeshQuery, PolyFlags, PolyRef, QueryFilter, Status, StraightPathFlags,
        StraightPathOptions, TileFlags,
    };

    #[test]
    fn test_path_to_same_polygon() -> TestResult {
        let mesh = grid_mesh(2)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let pos = [2.0, 0.0, 2.0];
        let poly = poly_at(&mesh, &pos)?;

        let path = query.find_path(poly, poly, &pos, &pos, &filter, 8)?;
        assert_eq!(path.polys, vec![poly]);
        assert_eq!(path.status, Status::success());
        Ok(())
    }

    #[test]
    fn test_nearest_poly_outside_mesh() -> TestResult {
        let mesh = grid_mesh(2)?;
        let query = NavMeshQuery::new(&mesh, 64)?;
        let filter = QueryFilter::default();

        let err = query.find_nearest_poly(&[50.0, 0.0, 50.0], &[1.0, 1.0, 1.0], &filter).err();
        assert_eq!(err, Some(Status::failure()));

        // Inside the tile footprint but far above it.
        let err = query.find_nearest_poly(&[5.0, 40.0, 5.0], &[1.0, 1.0, 1.0], &filter).err();
        assert_eq!(err, Some(Status::failure()));

        let (r, pos) = query.find_nearest_poly(&[2.0, 0.5, 3.0], &[1.0, 1.0, 1.0], &filter)?;
        assert!(r.is_valid());
        assert_vec_near(&pos, &[2.0, 0.0, 3.0], 1e-5);
        Ok(())
    }

    #[test]
    fn test_nearest_poly_from_outside_edge() -> TestResult {
        let mesh = grid_mesh(2)?;
        let query = NavMeshQuery::new(&mesh, 64)?;
        let (r, pos) =
            query.find_nearest_poly(&[-0.5, 0.0, 2.0], &[1.0, 1.0, 1.0], &QueryFilter::default())?;
        assert_eq!(r, poly_at(&mesh, &[1.0, 0.0, 2.0])?);
        assert_vec_near(&pos, &[0.0, 0.0, 2.0], 1e-5);
        Ok(())
    }

    #[test]
    fn test_move_within_polygon() -> TestResult {
        let mesh = grid_mesh(2)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start_pos = [1.0, 0.0, 1.0];
        let end_pos = [3.5, 0.0, 4.0];
        let start = poly_at(&mesh, &start_pos)?;

        let result = query.move_along_surface(start, &start_pos, &end_pos, &filter, 8)?;
        assert_eq!(result.pos, end_pos);
        assert_eq!(result.visited, vec![start]);
        assert_eq!(result.status, Status::success());
        Ok(())
    }

    #[test]
    fn test_move_across_polygons() -> TestResult {
        let mesh = grid_mesh(2)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start_pos = [2.5, 0.0, 2.5];
        let end_pos = [7.5, 0.0, 2.5];
        let start = poly_at(&mesh, &start_pos)?;

        let result = query.move_along_surface(start, &start_pos, &end_pos, &filter, 8)?;
        assert_eq!(result.pos, end_pos);
        assert_eq!(result.visited, vec![start, poly_at(&mesh, &end_pos)?]);

        let truncated = query.move_along_surface(start, &start_pos, &end_pos, &filter, 1)?;
        assert_eq!(truncated.visited, vec![start]);
        assert!(truncated.status.has_detail(Status::BUFFER_TOO_SMALL));
        Ok(())
    }

    #[test]
    fn test_move_slides_along_wall() -> TestResult {
        let mesh = grid_mesh(2)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start_pos = [2.5, 0.0, 2.5];
        let end_pos = [4.0, 0.0, -3.0];
        let start = poly_at(&mesh, &start_pos)?;

        let result = query.move_along_surface(start, &start_pos, &end_pos, &filter, 8)?;
        assert_vec_near(&result.pos, &[4.0, 0.0, 0.0], 1e-5);
        assert_eq!(result.visited, vec![start]);
        Ok(())
    }

    #[test]
    fn test_invalid_references() -> TestResult {
        let mesh = grid_mesh(2)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let pos = [1.0, 0.0, 1.0];
        let good = poly_at(&mesh, &pos)?;
        let invalid = Status::invalid_param();

        for bad in [PolyRef::default(), PolyRef::new(good.id() | 0xf), PolyRef::new(u32::MAX)] {
            assert_eq!(query.get_poly_height(bad, &pos).err(), Some(invalid));
            assert_eq!(query.closest_point_on_poly(bad, &pos).err(), Some(invalid));
            assert_eq!(query.closest_point_on_poly_boundary(bad, &pos).err(), Some(invalid));
            assert_eq!(query.get_poly_center(bad).err(), Some(invalid));
            assert_eq!(query.find_path(good, bad, &pos, &pos, &filter, 8).err(), Some(invalid));
            assert_eq!(query.find_path(bad, good, &pos, &pos, &filter, 8).err(), Some(invalid));
            assert_eq!(
                query.move_along_surface(bad, &pos, &pos, &filter, 8).err(),
                Some(invalid)
            );
            assert_eq!(
                query
                    .find_straight_path(&pos, &pos, &[bad], 8, StraightPathOptions::empty())
                    .err(),
                Some(invalid)
            );
            assert!(!query.is_valid_poly_ref(bad, &filter));
        }
        Ok(())
    }

    #[test]
    fn test_stale_reference_after_reload() -> TestResult {
        let mut mesh = NavMesh::new(grid_params(2, 16))?;
        let tile = mesh.add_tile(grid_tile(0, 0, 0, 2)?, TileFlags::FREE_DATA, None)?;
        let stale = PolyRef::new(tile.id() | 1);
        mesh.remove_tile(tile)?;
        mesh.add_tile(grid_tile(0, 0, 0, 2)?, TileFlags::FREE_DATA, None)?;

        let query = NavMeshQuery::new(&mesh, 64)?;
        let pos = [7.5, 0.0, 2.5];
        assert_eq!(query.get_poly_height(stale, &pos).err(), Some(Status::invalid_param()));
        assert_eq!(query.get_poly_height(poly_at(&mesh, &pos)?, &pos)?, 0.0);
        Ok(())
    }

    #[test]
    fn test_non_finite_input() -> TestResult {
        let mesh = grid_mesh(2)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let pos = [1.0, 0.0, 1.0];
        let nan = [f32::NAN, 0.0, 1.0];
        let poly = poly_at(&mesh, &pos)?;
        let invalid = Some(Status::invalid_param());

        assert_eq!(query.find_nearest_poly(&nan, &[1.0; 3], &filter).err(), invalid);
        assert_eq!(query.find_nearest_poly(&pos, &[-1.0, 1.0, 1.0], &filter).err(), invalid);
        assert_eq!(query.get_poly_height(poly, &nan).err(), invalid);
        assert_eq!(query.find_path(poly, poly, &nan, &pos, &filter, 8).err(), invalid);
        assert_eq!(query.move_along_surface(poly, &pos, &nan, &filter, 8).err(), invalid);
        Ok(())
    }

    #[test]
    fn test_query_capacity_limits() -> TestResult {
        let mesh = grid_mesh(2)?;
        assert_eq!(NavMeshQuery::new(&mesh, 0).err(), Some(Status::invalid_param()));
        assert!(NavMeshQuery::new(&mesh, 65_535).is_err());
        assert_eq!(NavMeshQuery::new(&mesh, 65_534)?.max_nodes(), 65_534);
        Ok(())
    }

    #[test]
    fn test_poly_height_and_closest_point() -> TestResult {
        let mesh = grid_mesh(2)?;
        let query = NavMeshQuery::new(&mesh, 64)?;
        let poly = poly_at(&mesh, &[2.5, 0.0, 2.5])?;

        assert_eq!(query.get_poly_height(poly, &[1.0, 3.0, 4.0])?, 0.0);
        assert_eq!(
            query.get_poly_height(poly, &[7.0, 0.0, 2.0]).err(),
            Some(Status::invalid_param())
        );

        let (closest, over) = query.closest_point_on_poly(poly, &[1.0, 3.0, 4.0])?;
        assert!(over);
        assert_vec_near(&closest, &[1.0, 0.0, 4.0], 1e-6);

        let (closest, over) = query.closest_point_on_poly(poly, &[7.0, 2.0, 2.0])?;
        assert!(!over);
        assert_vec_near(&closest, &[5.0, 0.0, 2.0], 1e-6);

        let inside = [1.0, 3.0, 4.0];
        assert_eq!(query.closest_point_on_poly_boundary(poly, &inside)?, inside);
        let boundary = query.closest_point_on_poly_boundary(poly, &[2.0, 0.0, -3.0])?;
        assert_vec_near(&boundary, &[2.0, 0.0, 0.0], 1e-6);

        assert_vec_near(&query.get_poly_center(poly)?, &[2.5, 0.0, 2.5], 1e-6);
        Ok(())
    }

    #[test]
    fn test_path_buffer_too_small() -> TestResult {
        let mesh = grid_mesh(4)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 256)?;
        let start_pos = [1.0, 0.0, 1.0];
        let end_pos = [9.0, 0.0, 1.0];
        let start = poly_at(&mesh, &start_pos)?;
        let end = poly_at(&mesh, &end_pos)?;

        let full = query.find_path(start, end, &start_pos, &end_pos, &filter, 16)?;
        assert_eq!(full.polys.len(), 4);

        let short = query.find_path(start, end, &start_pos, &end_pos, &filter, 2)?;
        assert!(short.status.is_success());
        assert!(short.status.has_detail(Status::BUFFER_TOO_SMALL));
        assert_eq!(short.polys, full.polys[..2].to_vec());

        let straight =
            query.find_straight_path(&start_pos, &end_pos, &full.polys, 1, StraightPathOptions::empty())?;
        assert_eq!(straight.points.len(), 1);
        assert_eq!(straight.points[0].flags, StraightPathFlags::START);
        assert!(straight.status.has_detail(Status::BUFFER_TOO_SMALL));

        assert_eq!(
            query.find_path(start, end, &start_pos, &end_pos, &filter, 0).err(),
            Some(Status::invalid_param())
        );
        Ok(())
    }

    #[test]
    fn test_out_of_nodes_returns_partial_path() -> TestResult {
        let mesh = grid_mesh(4)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 4)?;
        let start_pos = [1.0, 0.0, 1.0];
        let end_pos = [9.0, 0.0, 9.0];
        let start = poly_at(&mesh, &start_pos)?;
        let end = poly_at(&mesh, &end_pos)?;

        let path = query.find_path(start, end, &start_pos, &end_pos, &filter, 16)?;
        assert!(path.status.is_success());
        assert!(path.status.has_detail(Status::OUT_OF_NODES));
        assert!(path.status.has_detail(Status::PARTIAL_RESULT));
        assert_eq!(path.polys[0], start);
        assert!(!path.polys.contains(&end));
        assert!(query.is_in_closed_list(start));
        Ok(())
    }

    #[test]
    fn test_unreachable_end_fails() -> TestResult {
        // A hole column splits the tile in two.
        let data = grid_tile_with(0, 0, 0, 3, |cx, _| (cx != 1).then_some((PolyFlags::WALK, 0)))?;
        let mut mesh = NavMesh::new(grid_params(1, 16))?;
        mesh.add_tile(data, TileFlags::FREE_DATA, None)?;

        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start_pos = [1.5, 0.0, 5.0];
        let end_pos = [8.5, 0.0, 5.0];
        let start = poly_at(&mesh, &start_pos)?;
        let end = poly_at(&mesh, &end_pos)?;

        let err = query.find_path(start, end, &start_pos, &end_pos, &filter, 16).err();
        assert_eq!(err, Some(Status::failure()));
        Ok(())
    }

    #[test]
    fn test_straight_path_turns_around_hole() -> TestResult {
        let s = 10.0 / 3.0;
        let data = grid_tile_with(0, 0, 0, 3, |cx, cz| {
            (!(cx == 1 && cz < 2)).then_some((PolyFlags::WALK, 0))
        })?;
        let mut mesh = NavMesh::new(grid_params(1, 16))?;
        mesh.add_tile(data, TileFlags::FREE_DATA, None)?;

        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&mesh, 64)?;
        let start_pos = [1.5, 0.0, 1.5];
        let end_pos = [8.5, 0.0, 1.5];
        let start = poly_at(&mesh, &start_pos)?;
        let end = poly_at(&mesh, &end_pos)?;

        let path = query.find_path(start, end, &start_pos, &end_pos, &filter, 16)?;
        assert_eq!(path.polys.len(), 7);

        let straight =
            query.find_straight_path(&start_pos, &end_pos, &path.polys, 16, StraightPathOptions::empty())?;
        assert!(straight.points.len() <= path.polys.len() + 1);
        let points: Vec<[f32; 3]> = straight.points.iter().map(|p| p.pos).collect();
        assert_eq!(points.len(), 4);
        assert_vec_near(&points[0], &start_pos, 1e-5);
        assert_vec_near(&points[1], &[s, 0.0, 2.0 * s], 1e-4);
        assert_vec_near(&points[2], &[2.0 * s, 0.0, 2.0 * s], 1e-4);
        assert_vec_near(&points[3], &end_pos, 1e-5);
        assert_eq!(straight.points[3].flags, StraightPathFlags::END);
        Ok(())
    }

    #[test]
    fn test_straight_path_clamps_outside_points() -> TestResult {
        let mesh = grid_mesh(2)?;
        let query = NavMeshQuery::new(&mesh, 64)?;
        let a = poly_at(&mesh, &[2.5, 0.0, 2.5])?;
        let b = poly_at(&mesh, &[7.5, 0.0, 2.5])?;

        let straight = query.find_straight_path(
            &[-3.0, 0.0, 2.5],
            &[13.0, 0.0, 2.5],
            &[a, b],
            8,
            StraightPathOptions::empty(),
        )?;
        let first = straight.points.first().ok_or(Status::failure())?;
        let last = straight.points.last().ok_or(Status::failure())?;
        assert_vec_near(&first.pos, &[0.0, 0.0, 2.5], 1e-5);
        assert_vec_near(&last.pos, &[10.0, 0.0, 2.5], 1e-5);
        Ok(())
    }

    #[test]
    fn test_straight_path_broken_corridor_is_partial() -> TestResult {
        let mesh = grid_mesh(2)?;
        let query = NavMeshQuery::new(&mesh, 64)?;
        let a = poly_at(&mesh, &[2.5, 0.0, 2.5])?;
        let far = poly_at(&mesh, &[7.5, 0.0, 7.5])?;

        // The two cells only touch at a corner.
        let straight = query.find_straight_path(
            &[2.5, 0.0, 2.5],
            &[7.5, 0.0, 7.5],
            &[a, far],
            8,
            StraightPathOptions::empty(),
        )?;
        assert!(straight.status.has_detail(Status::PARTIAL_RESULT));
        let last = straight.points.last().ok_or(Status::failure())?;
        assert_eq!(last.poly, a);
        assert_vec_near(&last.pos, &[5.0, 0.0, 5.0], 1e-5);
        Ok(())
    }

    #[test]
    fn test_broken_corridor_respects_buffer() -> TestResult {
        let mesh = grid_mesh(4)?;
        let query = NavMeshQuery::new(&mesh, 64)?;
        let start_pos = [1.25, 0.0, 1.25];
        let end_pos = [8.75, 0.0, 8.75];
        let mut corridor = (0..4)
            .map(|cx| poly_at(&mesh, &[cx as f32 * 2.5 + 1.25, 0.0, 1.25]))
            .collect::<crate::Result<Vec<_>>>()?;
        corridor.push(poly_at(&mesh, &end_pos)?);

        // Edge crossings alone overflow two slots before the break is reached.
        let straight =
            query.find_straight_path(&start_pos, &end_pos, &corridor, 2, StraightPathOptions::ALL_CROSSINGS)?;
        assert_eq!(straight.points.len(), 2);
        assert!(straight.status.has_detail(Status::BUFFER_TOO_SMALL));
        assert!(straight.status.has_detail(Status::PARTIAL_RESULT));

        let roomy =
            query.find_straight_path(&start_pos, &end_pos, &corridor, 8, StraightPathOptions::ALL_CROSSINGS)?;
        assert_eq!(roomy.points.len(), 5);
        assert!(!roomy.status.has_detail(Status::BUFFER_TOO_SMALL));
        assert_vec_near(&roomy.points[4].pos, &[8.75, 0.0, 2.5], 1e-5);
        Ok(())
    }

    #[test]
    fn test_straight_path_rejects_stale_corridor() -> TestResult {
        let mut mesh = NavMesh::new(grid_params(8, 32))?;
        for x in 0..3 {
            mesh.add_tile(grid_tile(x, 0, 0, 2)?, TileFlags::FREE_DATA, None)?;
        }
        let start_pos = [2.5, 0.0, 2.5];
        let end_pos = [27.5, 0.0, 2.5];

        let corridor = {
            let mut query = NavMeshQuery::new(&mesh, 128)?;
            let start = poly_at(&mesh, &start_pos)?;
            let end = poly_at(&mesh, &end_pos)?;
            query.find_path(start, end, &start_pos, &end_pos, &QueryFilter::default(), 32)?.polys
        };
        assert!(corridor.len() > 2);

        let middle = mesh.get_tile_ref_at(1, 0, 0).ok_or(Status::failure())?;
        mesh.remove_tile(middle)?;

        let query = NavMeshQuery::new(&mesh, 128)?;
        let err = query
            .find_straight_path(&start_pos, &end_pos, &corridor, 16, StraightPathOptions::empty())
            .err();
        assert_eq!(err, Some(Status::invalid_param()));
        Ok(())
    }
}
