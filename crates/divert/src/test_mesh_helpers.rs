//! Programmatic test meshes
//!
//! Tiles are square grids of square cells on a 10 x 10 tile lattice. Cell
//! (cx, cz) of a tile spans `[x0 + cx * s, x0 + (cx + 1) * s]` on x and the
//! same on z, where `s = TILE_SIZE / cells`. Polygons are numbered row by
//! row (`cz * cells + cx`) skipping holes; tile border edges are portals.

use crate::binary_format::TileBuilder;
use crate::{
    NavMesh, NavMeshParams, NavMeshQuery, PolyFlags, PolyRef, QueryFilter, Result, Status,
    TileFlags, EXT_LINK,
};

pub type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

pub const TILE_SIZE: f32 = 10.0;

/// Vertical offset between layers of the same grid cell
pub const LAYER_HEIGHT: f32 = 5.0;

pub fn grid_params(max_tiles: u32, max_polys: u32) -> NavMeshParams {
    NavMeshParams {
        origin: [0.0, 0.0, 0.0],
        tile_width: TILE_SIZE,
        tile_height: TILE_SIZE,
        max_tiles,
        max_polys,
    }
}

/// Walkable grid tile with every cell present
pub fn grid_tile(tx: i32, ty: i32, layer: i32, cells: usize) -> Result<Vec<u8>> {
    grid_tile_with(tx, ty, layer, cells, |_, _| Some((PolyFlags::WALK, 0)))
}

/// Grid tile whose cells are described by `cell`: `None` leaves a hole,
/// otherwise the polygon flags and area of the cell
pub fn grid_tile_with<F>(tx: i32, ty: i32, layer: i32, cells: usize, cell: F) -> Result<Vec<u8>>
where
    F: Fn(usize, usize) -> Option<(PolyFlags, u8)>,
{
    grid_builder(tx, ty, layer, cells, &cell)?.build().map_err(Status::from)
}

/// Builder pre-filled with a grid so tests can append off-mesh connections
pub fn grid_builder<F>(tx: i32, ty: i32, layer: i32, cells: usize, cell: &F) -> Result<TileBuilder>
where
    F: Fn(usize, usize) -> Option<(PolyFlags, u8)>,
{
    let s = TILE_SIZE / cells as f32;
    let x0 = tx as f32 * TILE_SIZE;
    let z0 = ty as f32 * TILE_SIZE;
    let h = layer as f32 * LAYER_HEIGHT;

    let mut builder = TileBuilder::new(tx, ty, layer).bounds(
        [x0, h - 1.0, z0],
        [x0 + TILE_SIZE, h + 1.0, z0 + TILE_SIZE],
    );
    for k in 0..=cells {
        for i in 0..=cells {
            builder.add_vertex([x0 + i as f32 * s, h, z0 + k as f32 * s])?;
        }
    }

    // Polygon index of each present cell.
    let mut index = vec![None; cells * cells];
    let mut next = 0u16;
    for cz in 0..cells {
        for cx in 0..cells {
            if cell(cx, cz).is_some() {
                index[cz * cells + cx] = Some(next);
                next += 1;
            }
        }
    }

    let vert = |i: usize, k: usize| (k * (cells + 1) + i) as u16;
    let nei = |cx: Option<usize>, cz: Option<usize>, side: u16| -> u16 {
        match (cx, cz) {
            (Some(cx), Some(cz)) if cx < cells && cz < cells => {
                index[cz * cells + cx].map_or(0, |p| p + 1)
            }
            _ => EXT_LINK | side,
        }
    };

    for cz in 0..cells {
        for cx in 0..cells {
            let Some((flags, area)) = cell(cx, cz) else {
                continue;
            };
            let verts = [vert(cx, cz), vert(cx, cz + 1), vert(cx + 1, cz + 1), vert(cx + 1, cz)];
            let neis = [
                nei(cx.checked_sub(1), Some(cz), 4),
                nei(Some(cx), Some(cz + 1), 2),
                nei(Some(cx + 1), Some(cz), 0),
                nei(Some(cx), cz.checked_sub(1), 6),
            ];
            builder.add_polygon(&verts, &neis, flags, area)?;
        }
    }
    Ok(builder)
}

/// Single grid tile at (0, 0)
pub fn grid_mesh(cells: usize) -> Result<NavMesh> {
    let mut mesh = NavMesh::new(grid_params(4, (cells * cells) as u32 + 8))?;
    mesh.add_tile(grid_tile(0, 0, 0, cells)?, TileFlags::FREE_DATA, None)?;
    Ok(mesh)
}

/// Two grid tiles side by side along x, at (0, 0) and (1, 0)
pub fn two_tile_mesh(cells: usize) -> Result<NavMesh> {
    let mut mesh = NavMesh::new(grid_params(8, (cells * cells) as u32 + 8))?;
    mesh.add_tile(grid_tile(0, 0, 0, cells)?, TileFlags::FREE_DATA, None)?;
    mesh.add_tile(grid_tile(1, 0, 0, cells)?, TileFlags::FREE_DATA, None)?;
    Ok(mesh)
}

/// Polygon under a point, found with a small search box
pub fn poly_at(mesh: &NavMesh, pos: &[f32; 3]) -> Result<PolyRef> {
    let query = NavMeshQuery::new(mesh, 16)?;
    let (r, _) = query.find_nearest_poly(pos, &[0.1, 2.0, 0.1], &QueryFilter::default())?;
    Ok(r)
}

/// Sum of segment lengths along a polyline
pub fn polyline_length(points: &[[f32; 3]]) -> f32 {
    points
        .windows(2)
        .map(|w| divert_common::vdist(&w[0], &w[1]))
        .sum()
}

pub fn assert_vec_near(actual: &[f32; 3], expected: &[f32; 3], eps: f32) {
    for i in 0..3 {
        assert!(
            (actual[i] - expected[i]).abs() <= eps,
            "expected {expected:?}, got {actual:?}"
        );
    }
}
