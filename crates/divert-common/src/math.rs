//! Vector and scalar helpers on `[f32; 3]` positions
//!
//! Positions are stored as plain arrays in tile data, so the helpers here work
//! on arrays and slices rather than `glam` types. The y axis is up; "2D"
//! helpers operate on the xz-plane.

/// Squares a value
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Reads a position out of a flat `[x, y, z, x, y, z, ...]` vertex buffer
#[inline]
pub fn vert_at(verts: &[f32], index: usize) -> [f32; 3] {
    let i = index * 3;
    [verts[i], verts[i + 1], verts[i + 2]]
}

/// Vector addition (a + b)
#[inline]
pub fn vadd(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Vector subtraction (a - b)
#[inline]
pub fn vsub(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Linear interpolation from a toward b
#[inline]
pub fn vlerp(a: &[f32; 3], b: &[f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Component-wise minimum
#[inline]
pub fn vmin(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])]
}

/// Component-wise maximum
#[inline]
pub fn vmax(a: &[f32; 3], b: &[f32; 3]) -> [f32; 3] {
    [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])]
}

/// Distance between two points
#[inline]
pub fn vdist(a: &[f32], b: &[f32]) -> f32 {
    vdist_sqr(a, b).sqrt()
}

/// Squared distance between two points
#[inline]
pub fn vdist_sqr(a: &[f32], b: &[f32]) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    dx * dx + dy * dy + dz * dz
}

/// xz-plane perp product (u.x * v.z - u.z * v.x)
#[inline]
pub fn vperp_xz(u: &[f32], v: &[f32]) -> f32 {
    u[0] * v[2] - u[2] * v[0]
}

/// Performs a 'sloppy' colocation check of the specified points
#[inline]
pub fn vequal(a: &[f32], b: &[f32]) -> bool {
    const THR: f32 = 1.0 / 16384.0;
    vdist_sqr(a, b) < THR * THR
}

/// Checks that all components are finite
#[inline]
pub fn visfinite(v: &[f32; 3]) -> bool {
    v[0].is_finite() && v[1].is_finite() && v[2].is_finite()
}

/// Returns the next power of two, or zero for zero
#[inline]
pub fn next_pow2(mut v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// Integer base-2 logarithm (floor), zero for zero
#[inline]
pub fn ilog2(v: u32) -> u32 {
    if v == 0 {
        0
    } else {
        31 - v.leading_zeros()
    }
}
