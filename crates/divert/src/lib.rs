//! Tiled navigation meshes and path queries
//!
//! This crate answers spatial queries over a navigation mesh built from
//! convex polygons: nearest polygon lookup, polygon corridor search (A*),
//! straight path string pulling and constrained movement along the surface.
//!
//! # Example
//!
//! ```rust,ignore
//! use divert::{NavMesh, NavMeshParams, NavMeshQuery, QueryFilter};
//!
//! let mut nav_mesh = NavMesh::new(params)?;
//! nav_mesh.add_tile(tile_data, TileFlags::FREE_DATA, None)?;
//!
//! let mut query = NavMeshQuery::new(&nav_mesh, 2048)?;
//! let filter = QueryFilter::default();
//! let (start_ref, start_pos) = query.find_nearest_poly(&start, &extents, &filter)?;
//! let (end_ref, end_pos) = query.find_nearest_poly(&end, &extents, &filter)?;
//! let path = query.find_path(start_ref, end_ref, &start_pos, &end_pos, &filter, 256)?;
//! let straight = query.find_straight_path(&start_pos, &end_pos, &path.polys, 256, StraightPathOptions::empty())?;
//! ```
//!
//! # Architecture
//!
//! - [`NavMesh`]: tile slots, polygon references and adjacency links
//! - [`NavMeshQuery`]: search state and query operations bound to one mesh
//! - [`QueryFilter`]: flag based traversal predicate with per-area costs
//! - [`Status`]: bitmask status threaded through every operation
//! - [`api`]: owned handles for hosts that want one error type per call

use bitflags::bitflags;

pub mod api;
pub mod binary_format;
pub mod nav_mesh;
pub mod nav_mesh_query;
pub mod node_pool;
pub mod sliced_pathfinding;
pub mod status;

#[cfg(test)]
mod test_mesh_helpers;

#[cfg(test)]
mod edge_cases_tests;
#[cfg(test)]
mod off_mesh_connection_tests;

pub use binary_format::{load_tile_from_binary, save_tile_to_binary, TileBuilder};
pub use nav_mesh::{Link, MeshTile, NavMesh, OffMeshConnection, Poly, TileHeader};
pub use nav_mesh_query::{
    MoveAlongSurfaceResult, NavMeshQuery, PathResult, StraightPathPoint, StraightPathResult,
};
pub use sliced_pathfinding::SlicedPathState;
pub use status::{Result, Status};

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Maximum number of area classes a filter assigns costs to
pub const MAX_AREAS: usize = 64;

/// Marks a polygon edge as a portal into a neighbouring tile; the low bits
/// hold the side (0..7) the portal faces
pub const EXT_LINK: u16 = 0x8000;

/// Link edge marker used for links attached to off-mesh connections
pub const OFFMESH_EDGE: u8 = 0xff;

/// Off-mesh connection flag: traversable in both directions
pub const OFFMESH_CON_BIDIR: u8 = 1;

/// Reference to a polygon in the navigation mesh
///
/// Encodes a salt, a tile slot and a polygon index. Zero is never a valid
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    /// Creates a new polygon reference
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Gets the raw id of the polygon reference
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// Checks if the polygon reference is non-null
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for PolyRef {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<PolyRef> for u32 {
    fn from(poly_ref: PolyRef) -> Self {
        poly_ref.0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Reference to a tile in the navigation mesh
///
/// Same layout as [`PolyRef`] with a polygon index of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileRef(u32);

impl TileRef {
    /// Creates a new tile reference
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Gets the raw id of the tile reference
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// Checks if the tile reference is non-null
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl From<TileRef> for PolyRef {
    fn from(tile_ref: TileRef) -> Self {
        PolyRef(tile_ref.0)
    }
}

bitflags! {
    /// Polygon flags used by query filters
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        /// Ground that can be walked on
        const WALK = 0x01;
        /// Water that can be swum through
        const SWIM = 0x02;
        /// Door that can be opened
        const DOOR = 0x04;
        /// Connection that requires a jump
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;
        /// All flags
        const ALL = 0xffff;
    }
}

bitflags! {
    /// Flags attached to tiles when they are added to a mesh
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TileFlags: u8 {
        /// The mesh owns the tile data and drops it when the tile is removed
        const FREE_DATA = 0x01;
    }
}

bitflags! {
    /// Flags describing a vertex of a straight path
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the start position
        const START = 0x01;
        /// The vertex is the end position
        const END = 0x02;
        /// The vertex is the start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags! {
    /// Options for `find_straight_path`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathOptions: u32 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

/// Type of a navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
#[repr(u8)]
pub enum PolyType {
    /// Regular polygon on the mesh surface
    #[default]
    Ground = 0,
    /// Two-vertex polygon representing an off-mesh connection
    OffMeshConnection = 1,
}

/// Fixed configuration of a navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World-space origin of the tile grid
    pub origin: [f32; 3],
    /// Width of each tile along the x-axis
    pub tile_width: f32,
    /// Height of each tile along the z-axis
    pub tile_height: f32,
    /// Maximum number of tiles the mesh can hold
    pub max_tiles: u32,
    /// Maximum number of polygons per tile
    pub max_polys: u32,
}

/// Traversal predicate and cost model used by queries
pub trait PolyFilter {
    /// Returns true if the polygon can be visited
    fn pass_filter(&self, poly_ref: PolyRef, tile: &MeshTile, poly: &Poly) -> bool;

    /// Returns the cost of moving from `pa` to `pb` across `cur_poly`
    ///
    /// `prev_ref` and `next_ref` are the polygons before and after the
    /// current one and may be invalid at the ends of the path.
    fn get_cost(
        &self,
        pa: &[f32; 3],
        pb: &[f32; 3],
        prev_ref: PolyRef,
        cur_ref: PolyRef,
        cur_tile: &MeshTile,
        cur_poly: &Poly,
        next_ref: PolyRef,
    ) -> f32;
}

/// Default query filter: include/exclude flag masks plus area costs
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct QueryFilter {
    /// Cost multiplier per area class
    #[cfg_attr(feature = "serialization", serde(with = "area_costs"))]
    pub area_cost: [f32; MAX_AREAS],
    /// A polygon must have at least one of these flags
    pub include_flags: PolyFlags,
    /// A polygon must have none of these flags
    pub exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; MAX_AREAS],
            include_flags: PolyFlags::ALL,
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    /// Creates a filter with the given include and exclude masks
    pub fn new(include_flags: PolyFlags, exclude_flags: PolyFlags) -> Self {
        Self {
            include_flags,
            exclude_flags,
            ..Default::default()
        }
    }

    pub fn include_flags(&self) -> PolyFlags {
        self.include_flags
    }

    pub fn set_include_flags(&mut self, flags: PolyFlags) {
        self.include_flags = flags;
    }

    pub fn exclude_flags(&self) -> PolyFlags {
        self.exclude_flags
    }

    pub fn set_exclude_flags(&mut self, flags: PolyFlags) {
        self.exclude_flags = flags;
    }

    /// Cost multiplier for an area; unknown areas cost 1.0
    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost.get(area as usize).copied().unwrap_or(1.0)
    }

    /// Sets the cost multiplier for an area; out of range areas are ignored
    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(slot) = self.area_cost.get_mut(area as usize) {
            *slot = cost;
        }
    }

    /// Flag test shared by every polygon check
    #[inline]
    pub fn passes_flags(&self, flags: PolyFlags) -> bool {
        flags.intersects(self.include_flags) && !flags.intersects(self.exclude_flags)
    }
}

impl PolyFilter for QueryFilter {
    fn pass_filter(&self, _poly_ref: PolyRef, _tile: &MeshTile, poly: &Poly) -> bool {
        self.passes_flags(poly.flags)
    }

    fn get_cost(
        &self,
        pa: &[f32; 3],
        pb: &[f32; 3],
        _prev_ref: PolyRef,
        _cur_ref: PolyRef,
        _cur_tile: &MeshTile,
        cur_poly: &Poly,
        _next_ref: PolyRef,
    ) -> f32 {
        divert_common::vdist(pa, pb) * self.area_cost(cur_poly.area)
    }
}

#[cfg(feature = "serialization")]
mod area_costs {
    use super::MAX_AREAS;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(costs: &[f32; MAX_AREAS], s: S) -> Result<S::Ok, S::Error> {
        costs.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[f32; MAX_AREAS], D::Error> {
        let costs = Vec::<f32>::deserialize(d)?;
        let mut out = [1.0; MAX_AREAS];
        if costs.len() != MAX_AREAS {
            return Err(serde::de::Error::invalid_length(
                costs.len(),
                &"64 area costs",
            ));
        }
        out.copy_from_slice(&costs);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_ref_validity() {
        assert!(!PolyRef::default().is_valid());
        assert!(PolyRef::new(42).is_valid());
        assert_eq!(u32::from(PolyRef::new(42)), 42);
        assert_eq!(PolyRef::from(TileRef::new(7)), PolyRef::new(7));
    }

    #[test]
    fn test_default_filter() {
        let filter = QueryFilter::default();
        assert_eq!(filter.include_flags(), PolyFlags::ALL);
        assert!(filter.exclude_flags().is_empty());
        assert_eq!(filter.area_cost(0), 1.0);
        assert_eq!(filter.area_cost(200), 1.0);
        assert!(filter.passes_flags(PolyFlags::WALK));
        assert!(!filter.passes_flags(PolyFlags::empty()));
    }

    #[test]
    fn test_filter_flag_rules() {
        let filter = QueryFilter::new(PolyFlags::WALK | PolyFlags::SWIM, PolyFlags::DISABLED);
        assert!(filter.passes_flags(PolyFlags::WALK));
        assert!(filter.passes_flags(PolyFlags::SWIM | PolyFlags::DOOR));
        assert!(!filter.passes_flags(PolyFlags::DOOR));
        assert!(!filter.passes_flags(PolyFlags::WALK | PolyFlags::DISABLED));
    }
}
