//! 2D and 3D geometry operations for navigation mesh queries
//!
//! Most operations work on the XZ plane (Y-up coordinate system). Polygon
//! vertices are passed as flat `[x, y, z, ...]` slices together with a vertex
//! count, the same layout tiles store them in.
//!
//! Every function here is pure and tolerates degenerate input: zero-length
//! edges, collinear triangles and points far outside the polygon all produce
//! a defined answer instead of NaN.

use crate::math::{vert_at, vlerp, vperp_xz};

/// Calculate twice the signed area of a 2D triangle on the XZ plane.
///
/// Positive for the winding used by navigation mesh polygons, negative for
/// the reverse winding, zero when the points are collinear.
#[inline]
pub fn tri_area_2d(a: &[f32], b: &[f32], c: &[f32]) -> f32 {
    let abx = b[0] - a[0];
    let abz = b[2] - a[2];
    let acx = c[0] - a[0];
    let acz = c[2] - a[2];
    acx * abz - abx * acz
}

/// Check if two axis-aligned bounding boxes overlap.
#[inline]
pub fn overlap_bounds(amin: &[f32; 3], amax: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> bool {
    amin[0] <= bmax[0]
        && amax[0] >= bmin[0]
        && amin[1] <= bmax[1]
        && amax[1] >= bmin[1]
        && amin[2] <= bmax[2]
        && amax[2] >= bmin[2]
}

/// Check if a point is inside a convex polygon on the XZ plane.
///
/// Crossing-number test; the division is only evaluated for edges that
/// straddle the point's z, so horizontal and zero-length edges are safe.
pub fn point_in_polygon_2d(pt: &[f32], verts: &[f32], nverts: usize) -> bool {
    let mut inside = false;
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let vi = &verts[i * 3..i * 3 + 3];
        let vj = &verts[j * 3..j * 3 + 3];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Squared xz-plane distance from `p` to segment `a..b`, plus the segment
/// parameter of the closest point.
///
/// A zero-length segment yields `t = 0` and the distance to `a`.
pub fn dist_point_segment_sqr_2d_with_t(p: &[f32], a: &[f32], b: &[f32]) -> (f32, f32) {
    let dx = b[0] - a[0];
    let dz = b[2] - a[2];
    let d = dx * dx + dz * dz;
    let t = if d > 0.0 {
        (((p[0] - a[0]) * dx + (p[2] - a[2]) * dz) / d).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let cx = a[0] + t * dx - p[0];
    let cz = a[2] + t * dz - p[2];
    (cx * cx + cz * cz, t)
}

/// Distances from a point to each polygon edge on the XZ plane.
///
/// Edge `j` runs from vertex `j` to vertex `j + 1`. Writes the squared
/// distance into `edge_dist[j]` and the segment parameter into `edge_t[j]`,
/// and returns whether the point lies inside the polygon.
pub fn distance_pt_poly_edges_sqr(
    pt: &[f32],
    verts: &[f32],
    nverts: usize,
    edge_dist: &mut [f32],
    edge_t: &mut [f32],
) -> bool {
    let mut inside = false;
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let vi = &verts[i * 3..i * 3 + 3];
        let vj = &verts[j * 3..j * 3 + 3];
        if ((vi[2] > pt[2]) != (vj[2] > pt[2]))
            && (pt[0] < (vj[0] - vi[0]) * (pt[2] - vi[2]) / (vj[2] - vi[2]) + vi[0])
        {
            inside = !inside;
        }
        let (d, t) = dist_point_segment_sqr_2d_with_t(pt, vj, vi);
        edge_dist[j] = d;
        edge_t[j] = t;
        j = i;
    }
    inside
}

/// Height of triangle `abc` below or above `p`, if `p` projects inside it.
///
/// Triangles with (near) zero xz area return `None`.
pub fn closest_height_point_triangle(
    p: &[f32],
    a: &[f32],
    b: &[f32],
    c: &[f32],
) -> Option<f32> {
    const EPS: f32 = 1e-6;

    let v0 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let v1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v2 = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];

    let mut denom = v0[0] * v1[2] - v0[2] * v1[0];
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1[2] * v2[0] - v1[0] * v2[2];
    let mut v = v0[0] * v2[2] - v0[2] * v2[0];

    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a[1] + (v0[1] * u + v1[1] * v) / denom)
    } else {
        None
    }
}

/// Height of a convex polygon at `p`, using the polygon's triangle fan.
///
/// Returns `None` when `p` is outside the polygon on the XZ plane. Points on
/// the boundary that slip between fan triangles through rounding fall back to
/// the height of the closest edge.
pub fn poly_height_at(p: &[f32], verts: &[f32], nverts: usize) -> Option<f32> {
    if nverts < 3 || !point_in_polygon_2d(p, verts, nverts) {
        return None;
    }

    let a = &verts[0..3];
    for i in 1..nverts - 1 {
        let b = &verts[i * 3..i * 3 + 3];
        let c = &verts[(i + 1) * 3..(i + 1) * 3 + 3];
        if let Some(h) = closest_height_point_triangle(p, a, b, c) {
            return Some(h);
        }
    }

    let mut best = f32::MAX;
    let mut height = a[1];
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vj = vert_at(verts, j);
        let vi = vert_at(verts, i);
        let (d, t) = dist_point_segment_sqr_2d_with_t(p, &vj, &vi);
        if d < best {
            best = d;
            height = vlerp(&vj, &vi, t)[1];
        }
        j = i;
    }
    Some(height)
}

/// Closest point on a polygon boundary on the XZ plane, interpolating y
/// along the edge. Returns the point and the squared xz distance to it.
pub fn closest_point_on_poly_edges(p: &[f32], verts: &[f32], nverts: usize) -> ([f32; 3], f32) {
    let mut best = f32::MAX;
    let mut closest = [p[0], p[1], p[2]];
    let mut j = nverts.wrapping_sub(1);
    for i in 0..nverts {
        let vj = vert_at(verts, j);
        let vi = vert_at(verts, i);
        let (d, t) = dist_point_segment_sqr_2d_with_t(p, &vj, &vi);
        if d < best {
            best = d;
            closest = vlerp(&vj, &vi, t);
        }
        j = i;
    }
    (closest, best)
}

/// Intersects the lines through `ap..aq` and `bp..bq` on the XZ plane.
///
/// Returns the parameters `(s, t)` along each line, or `None` when the lines
/// are parallel.
pub fn intersect_seg_seg_2d(ap: &[f32], aq: &[f32], bp: &[f32], bq: &[f32]) -> Option<(f32, f32)> {
    let u = [aq[0] - ap[0], 0.0, aq[2] - ap[2]];
    let v = [bq[0] - bp[0], 0.0, bq[2] - bp[2]];
    let w = [ap[0] - bp[0], 0.0, ap[2] - bp[2]];
    let d = vperp_xz(&u, &v);
    if d.abs() < 1e-6 {
        return None;
    }
    Some((vperp_xz(&v, &w) / d, vperp_xz(&u, &w) / d))
}

/// Centroid of a polygon given by vertex indices into a flat vertex buffer.
pub fn calc_poly_center(indices: &[u16], verts: &[f32]) -> [f32; 3] {
    let mut center = [0.0f32; 3];
    if indices.is_empty() {
        return center;
    }
    for &idx in indices {
        let v = vert_at(verts, idx as usize);
        center[0] += v[0];
        center[1] += v[1];
        center[2] += v[2];
    }
    let s = 1.0 / indices.len() as f32;
    [center[0] * s, center[1] * s, center[2] * s]
}
