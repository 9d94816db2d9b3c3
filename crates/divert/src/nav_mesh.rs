//! Tiled navigation mesh
//!
//! The mesh owns a fixed number of tile slots. Tiles are addressed on a grid
//! by (x, y, layer) and polygons by [`PolyRef`], which packs a slot salt, the
//! slot index and the polygon index. Removing a tile bumps the slot salt so
//! references into the old tile stop resolving.
//!
//! Adjacency is stored as per-polygon linked lists of [`Link`]s inside each
//! tile. Links are built when a tile is added: internal links from the
//! polygon neighbour table, off-mesh connection links, and portal links to
//! and from every tile already loaded in the eight surrounding cells.

use std::collections::HashMap;

use log::{debug, warn};

use super::binary_format::{load_tile_from_binary, read_tile_header, OFFMESH_SIDE_INTERNAL};
use super::{
    NavMeshParams, PolyFlags, PolyRef, PolyType, Result, Status, TileFlags, TileRef, EXT_LINK,
    MAX_VERTS_PER_POLY, OFFMESH_CON_BIDIR, OFFMESH_EDGE,
};
use divert_common::{
    closest_point_on_poly_edges, dist_point_segment_sqr_2d_with_t, ilog2, next_pow2,
    overlap_bounds, poly_height_at, sqr, vadd, vert_at, vlerp, vmax, vmin, vsub, visfinite,
};

/// Minimum number of salt bits a mesh configuration must leave
const MIN_SALT_BITS: u32 = 10;

/// Tolerance when matching portal edges between tiles
const PORTAL_EPS: f32 = 0.01;

/// Maximum number of polygons one portal edge links to
const MAX_PORTAL_CONNECTIONS: usize = 4;

/// Maximum number of polygons considered when snapping off-mesh endpoints
const MAX_SNAP_CANDIDATES: usize = 128;

/// Side value of links that do not cross a tile boundary
pub const LINK_SIDE_INTERNAL: u8 = 0xff;

/// Tile grid offsets for each portal side
const NEIGHBOUR_OFFSETS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Side of a neighbouring tile that faces `side`
#[inline]
pub fn opposite_side(side: u8) -> u8 {
    (side + 4) & 0x7
}

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// Neighbour polygon
    pub reference: PolyRef,
    /// Next link of the same polygon
    pub next: Option<u32>,
    /// Edge of the owning polygon the link leaves through
    pub edge: u8,
    /// Tile side the portal faces, or [`LINK_SIDE_INTERNAL`]
    pub side: u8,
    /// Start of the usable portal section, 0..=255 along the edge
    pub bmin: u8,
    /// End of the usable portal section, 0..=255 along the edge
    pub bmax: u8,
}

/// Polygon in a tile
#[derive(Debug, Clone, PartialEq)]
pub struct Poly {
    /// First link index
    pub first_link: Option<u32>,
    /// Vertex indices into the tile vertex array
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Neighbour table: 0 wall, `n + 1` internal, `EXT_LINK | side` portal
    pub neis: [u16; MAX_VERTS_PER_POLY],
    /// Flags for the polygon
    pub flags: PolyFlags,
    /// Number of vertices in the polygon
    pub vert_count: u8,
    /// Area class of the polygon
    pub area: u8,
    /// Polygon type
    pub poly_type: PolyType,
}

impl Poly {
    /// Creates a new polygon
    pub fn new(area: u8, poly_type: PolyType, flags: PolyFlags) -> Self {
        Self {
            first_link: None,
            verts: [0; MAX_VERTS_PER_POLY],
            neis: [0; MAX_VERTS_PER_POLY],
            flags,
            vert_count: 0,
            area,
            poly_type,
        }
    }

    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type == PolyType::OffMeshConnection
    }
}

/// Off-mesh connection between two points of a tile
#[derive(Debug, Clone, PartialEq)]
pub struct OffMeshConnection {
    /// Start and end positions
    pub pos: [f32; 6],
    /// Snap radius of the endpoints
    pub radius: f32,
    /// Index of the polygon representing the connection
    pub poly: u16,
    /// Connection flags
    pub flags: u8,
    /// Tile side of the end point
    pub side: u8,
    /// User id
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn start_pos(&self) -> [f32; 3] {
        [self.pos[0], self.pos[1], self.pos[2]]
    }

    pub fn end_pos(&self) -> [f32; 3] {
        [self.pos[3], self.pos[4], self.pos[5]]
    }

    pub fn is_bidirectional(&self) -> bool {
        self.flags & OFFMESH_CON_BIDIR != 0
    }
}

/// Tile header information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileHeader {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    pub poly_count: u32,
    pub vert_count: u32,
    pub off_mesh_con_count: u32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
}

/// Mesh tile in the navigation mesh
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    /// Salt of the slot the tile lives in
    pub salt: u32,
    /// Tile header, `None` while the slot is free
    pub header: Option<TileHeader>,
    /// Polygons in the tile
    pub polys: Vec<Poly>,
    /// Vertices in the tile [x,y,z,...]
    pub verts: Vec<f32>,
    /// Link storage shared by all polygons of the tile
    pub links: Vec<Link>,
    /// Off-mesh connections
    pub off_mesh_cons: Vec<OffMeshConnection>,
    /// Flags the tile was added with
    pub flags: TileFlags,
    links_free_list: Option<u32>,
    data: Vec<u8>,
    index: usize,
    next: Option<usize>,
}

impl MeshTile {
    /// Creates a new empty mesh tile
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot index of the tile inside its mesh
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn header(&self) -> Option<&TileHeader> {
        self.header.as_ref()
    }

    /// Walkable climb of the tile, zero for an empty slot
    pub fn walkable_climb(&self) -> f32 {
        self.header.as_ref().map_or(0.0, |h| h.walkable_climb)
    }

    /// Position of vertex `j` of a polygon
    pub fn poly_vertex(&self, poly: &Poly, j: usize) -> [f32; 3] {
        vert_at(&self.verts, poly.verts[j] as usize)
    }

    /// Polygon vertices as a flat array plus the vertex count
    pub fn poly_vertices(&self, poly: &Poly) -> ([f32; MAX_VERTS_PER_POLY * 3], usize) {
        let mut out = [0.0; MAX_VERTS_PER_POLY * 3];
        let nv = poly.vert_count as usize;
        for j in 0..nv {
            out[j * 3..j * 3 + 3].copy_from_slice(&self.poly_vertex(poly, j));
        }
        (out, nv)
    }

    /// Iterates the links of a polygon
    pub fn links_of<'t>(&'t self, poly: &Poly) -> impl Iterator<Item = &'t Link> + 't {
        let first = poly.first_link;
        std::iter::successors(first.and_then(|i| self.links.get(i as usize)), move |link| {
            link.next.and_then(|i| self.links.get(i as usize))
        })
    }

    fn alloc_link(&mut self) -> Result<u32> {
        if let Some(idx) = self.links_free_list {
            self.links_free_list = self.links[idx as usize].next;
            return Ok(idx);
        }
        self.links.try_reserve(1)?;
        let idx = u32::try_from(self.links.len())
            .map_err(|_| Status::failure_detail(Status::OUT_OF_MEMORY))?;
        self.links.push(Link {
            reference: PolyRef::default(),
            next: None,
            edge: 0,
            side: 0,
            bmin: 0,
            bmax: 0,
        });
        Ok(idx)
    }

    fn free_link(&mut self, idx: u32) {
        self.links[idx as usize].next = self.links_free_list;
        self.links_free_list = Some(idx);
    }

    /// Prepends a link to a polygon's link list
    fn push_link(&mut self, poly: usize, mut link: Link) -> Result<()> {
        let idx = self.alloc_link()?;
        link.next = self.polys[poly].first_link;
        self.links[idx as usize] = link;
        self.polys[poly].first_link = Some(idx);
        Ok(())
    }

    fn is_occupied(&self) -> bool {
        self.header.is_some()
    }
}

/// Bit layout of polygon references for one mesh configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RefLayout {
    salt_bits: u32,
    tile_bits: u32,
    poly_bits: u32,
}

impl RefLayout {
    fn salt_mask(&self) -> u32 {
        ((1u64 << self.salt_bits) - 1) as u32
    }

    fn tile_mask(&self) -> u32 {
        ((1u64 << self.tile_bits) - 1) as u32
    }

    fn poly_mask(&self) -> u32 {
        ((1u64 << self.poly_bits) - 1) as u32
    }

    fn encode(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
        PolyRef::new(
            ((salt & self.salt_mask()) << (self.poly_bits + self.tile_bits))
                | ((tile & self.tile_mask()) << self.poly_bits)
                | (poly & self.poly_mask()),
        )
    }

    fn decode_salt(&self, r: PolyRef) -> u32 {
        (r.id() >> (self.poly_bits + self.tile_bits)) & self.salt_mask()
    }

    fn decode_tile(&self, r: PolyRef) -> u32 {
        (r.id() >> self.poly_bits) & self.tile_mask()
    }

    fn decode_poly(&self, r: PolyRef) -> u32 {
        r.id() & self.poly_mask()
    }
}

/// Tiled navigation mesh
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    layout: RefLayout,
    tiles: Vec<MeshTile>,
    tile_lut: HashMap<(i32, i32), Vec<usize>>,
    next_free: Option<usize>,
}

impl NavMesh {
    /// Creates an empty mesh with a fixed configuration
    ///
    /// Fails with `INVALID_PARAM` when the configuration is inconsistent or
    /// leaves fewer than 10 salt bits in a polygon reference.
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if !visfinite(&params.origin)
            || !params.tile_width.is_finite()
            || !params.tile_height.is_finite()
            || params.tile_width <= 0.0
            || params.tile_height <= 0.0
            || params.max_tiles == 0
            || params.max_polys == 0
        {
            warn!("Rejected navigation mesh parameters {:?}", params);
            return Err(Status::invalid_param());
        }

        // Anything past 2^22 cannot leave room for the salt anyway.
        const MAX_COUNT: u32 = 1 << 22;
        if params.max_tiles > MAX_COUNT || params.max_polys > MAX_COUNT {
            warn!("Rejected navigation mesh parameters {:?}", params);
            return Err(Status::invalid_param());
        }

        let tile_bits = ilog2(next_pow2(params.max_tiles));
        let poly_bits = ilog2(next_pow2(params.max_polys));
        let salt_bits = (32 - tile_bits - poly_bits).min(31);
        if salt_bits < MIN_SALT_BITS {
            warn!(
                "Polygon reference budget exceeded: {} tile bits, {} poly bits",
                tile_bits, poly_bits
            );
            return Err(Status::invalid_param());
        }

        let max_tiles = params.max_tiles as usize;
        let mut tiles = Vec::new();
        tiles.try_reserve_exact(max_tiles)?;
        let mut next_free = None;
        for i in 0..max_tiles {
            tiles.push(MeshTile {
                salt: 1,
                index: i,
                ..Default::default()
            });
        }
        for i in (0..max_tiles).rev() {
            tiles[i].next = next_free;
            next_free = Some(i);
        }

        debug!(
            "Created navigation mesh: {} tiles, {} polys per tile, {} salt bits",
            params.max_tiles, params.max_polys, salt_bits
        );

        Ok(Self {
            params,
            layout: RefLayout {
                salt_bits,
                tile_bits,
                poly_bits,
            },
            tiles,
            tile_lut: HashMap::new(),
            next_free,
        })
    }

    /// Creates a mesh holding exactly one tile
    ///
    /// The configuration is derived from the tile header: the origin is the
    /// tile's minimum bound and the tile size its extent.
    pub fn new_single_tile(data: Vec<u8>, flags: TileFlags) -> Result<Self> {
        let header = read_tile_header(&data)?;
        let params = NavMeshParams {
            origin: header.bmin,
            tile_width: header.bmax[0] - header.bmin[0],
            tile_height: header.bmax[2] - header.bmin[2],
            max_tiles: 1,
            max_polys: header.poly_count.max(1),
        };
        let mut mesh = Self::new(params)?;
        mesh.add_tile(data, flags, None)?;
        Ok(mesh)
    }

    /// Gets the mesh configuration
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Number of salt bits in polygon references
    pub fn salt_bits(&self) -> u32 {
        self.layout.salt_bits
    }

    /// Packs a salt, tile slot and polygon index into a reference
    pub fn encode_poly_id(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
        self.layout.encode(salt, tile, poly)
    }

    /// Splits a reference into (salt, tile slot, polygon index)
    pub fn decode_poly_id(&self, reference: PolyRef) -> (u32, u32, u32) {
        (
            self.layout.decode_salt(reference),
            self.layout.decode_tile(reference),
            self.layout.decode_poly(reference),
        )
    }

    pub fn decode_poly_id_salt(&self, reference: PolyRef) -> u32 {
        self.layout.decode_salt(reference)
    }

    pub fn decode_poly_id_tile(&self, reference: PolyRef) -> u32 {
        self.layout.decode_tile(reference)
    }

    pub fn decode_poly_id_poly(&self, reference: PolyRef) -> u32 {
        self.layout.decode_poly(reference)
    }

    /// Grid cell containing a world position
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        let tx = ((pos[0] - self.params.origin[0]) / self.params.tile_width).floor() as i32;
        let ty = ((pos[2] - self.params.origin[2]) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    /// Reference of the first polygon of a tile; other polygons are `base | index`
    pub fn get_poly_ref_base(&self, tile: &MeshTile) -> PolyRef {
        self.layout.encode(tile.salt, tile.index as u32, 0)
    }

    pub fn get_tile_ref(&self, tile: &MeshTile) -> TileRef {
        TileRef::new(self.get_poly_ref_base(tile).id())
    }

    /// Slot by index, occupied or not
    pub fn get_tile(&self, index: usize) -> Option<&MeshTile> {
        self.tiles.get(index)
    }

    /// Iterates the occupied tiles
    pub fn tiles(&self) -> impl Iterator<Item = &MeshTile> {
        self.tiles.iter().filter(|t| t.is_occupied())
    }

    /// Number of occupied tiles
    pub fn tile_count(&self) -> usize {
        self.tile_lut.values().map(Vec::len).sum()
    }

    fn tile_indices_at(&self, x: i32, y: i32) -> &[usize] {
        self.tile_lut
            .get(&(x, y))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Tiles in the eight cells around (x, y) with the side they lie on
    ///
    /// Cells beyond the `i32` grid range have no tiles.
    fn neighbour_tiles(&self, x: i32, y: i32) -> Vec<(u8, usize)> {
        let mut out = Vec::new();
        for (side, (dx, dy)) in NEIGHBOUR_OFFSETS.iter().enumerate() {
            let (Some(nx), Some(ny)) = (x.checked_add(*dx), y.checked_add(*dy)) else {
                continue;
            };
            out.extend(self.tile_indices_at(nx, ny).iter().map(|&i| (side as u8, i)));
        }
        out
    }

    /// Drops every link other tiles hold into `slot`
    fn unconnect_tile(&mut self, slot: usize, x: i32, y: i32) {
        let layers: Vec<usize> = self
            .tile_indices_at(x, y)
            .iter()
            .copied()
            .filter(|&i| i != slot)
            .collect();
        for other in layers {
            self.unconnect_links(other, slot);
        }
        for (_, nei) in self.neighbour_tiles(x, y) {
            self.unconnect_links(nei, slot);
        }
    }

    /// Tile at a grid location and layer
    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tile_indices_at(x, y)
            .iter()
            .map(|&i| &self.tiles[i])
            .find(|t| t.header.as_ref().is_some_and(|h| h.layer == layer))
    }

    /// All layers at a grid location
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_indices_at(x, y)
            .iter()
            .map(|&i| &self.tiles[i])
            .collect()
    }

    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<TileRef> {
        self.get_tile_at(x, y, layer).map(|t| self.get_tile_ref(t))
    }

    /// Resolves a tile reference, checking its salt
    pub fn get_tile_by_ref(&self, tile_ref: TileRef) -> Option<&MeshTile> {
        let r = PolyRef::from(tile_ref);
        if !r.is_valid() {
            return None;
        }
        let tile = self.tiles.get(self.layout.decode_tile(r) as usize)?;
        (tile.is_occupied() && tile.salt == self.layout.decode_salt(r)).then_some(tile)
    }

    /// Resolves a polygon reference, checking its salt
    ///
    /// Fails with `INVALID_PARAM` for null, stale or out of range references.
    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly)> {
        if !reference.is_valid() {
            return Err(Status::invalid_param());
        }
        let (salt, it, ip) = self.decode_poly_id(reference);
        let tile = self
            .tiles
            .get(it as usize)
            .filter(|t| t.is_occupied() && t.salt == salt)
            .ok_or(Status::invalid_param())?;
        let poly = tile.polys.get(ip as usize).ok_or(Status::invalid_param())?;
        Ok((tile, poly))
    }

    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.get_tile_and_poly_by_ref(reference).is_ok()
    }

    pub fn get_poly_flags(&self, reference: PolyRef) -> Result<PolyFlags> {
        Ok(self.get_tile_and_poly_by_ref(reference)?.1.flags)
    }

    pub fn get_poly_area(&self, reference: PolyRef) -> Result<u8> {
        Ok(self.get_tile_and_poly_by_ref(reference)?.1.area)
    }

    /// Off-mesh connection represented by a polygon
    pub fn get_off_mesh_connection_by_ref(&self, reference: PolyRef) -> Result<&OffMeshConnection> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(reference)?;
        if !poly.is_off_mesh_connection() {
            return Err(Status::invalid_param());
        }
        let ip = self.layout.decode_poly(reference) as u16;
        tile.off_mesh_cons
            .iter()
            .find(|c| c.poly == ip)
            .ok_or(Status::invalid_param())
    }

    /// Adds a tile from its encoded data
    ///
    /// `last_ref` asks for the slot a previous tile reference pointed at; the
    /// slot keeps its current salt. Fails with `INVALID_PARAM` for malformed
    /// data or oversized tiles, adds `ALREADY_OCCUPIED` when the grid
    /// location and layer are taken, and `OUT_OF_MEMORY` when no slot is free.
    pub fn add_tile(
        &mut self,
        data: Vec<u8>,
        flags: TileFlags,
        last_ref: Option<TileRef>,
    ) -> Result<TileRef> {
        let header = read_tile_header(&data)?;

        if header.poly_count > self.params.max_polys {
            warn!(
                "Tile ({}, {}, {}) has {} polygons, mesh allows {}",
                header.x, header.y, header.layer, header.poly_count, self.params.max_polys
            );
            return Err(Status::invalid_param());
        }

        if self.get_tile_at(header.x, header.y, header.layer).is_some() {
            warn!(
                "Tile location ({}, {}, {}) is already occupied",
                header.x, header.y, header.layer
            );
            return Err(Status::invalid_param().with_detail(Status::ALREADY_OCCUPIED));
        }

        let mut loaded = load_tile_from_binary(&data)?;

        let slot = match last_ref {
            Some(r) if r.is_valid() => self.take_free_slot(self.layout.decode_tile(r.into()) as usize)?,
            _ => self.pop_free_slot()?,
        };

        let tile = &mut self.tiles[slot];
        tile.header = loaded.header.take();
        tile.polys = std::mem::take(&mut loaded.polys);
        tile.verts = std::mem::take(&mut loaded.verts);
        tile.off_mesh_cons = std::mem::take(&mut loaded.off_mesh_cons);
        tile.links = Vec::new();
        tile.links_free_list = None;
        tile.flags = flags;
        tile.data = data;
        tile.next = None;

        self.tile_lut
            .entry((header.x, header.y))
            .or_default()
            .push(slot);

        if let Err(status) = self.link_new_tile(slot, &header) {
            warn!("Linking tile ({}, {}, {}) failed: {}", header.x, header.y, header.layer, status);
            self.unconnect_tile(slot, header.x, header.y);
            self.release_slot(slot);
            return Err(status);
        }

        let tile_ref = self.get_tile_ref(&self.tiles[slot]);
        debug!(
            "Added tile ({}, {}, {}) to slot {} with {} polygons, ref {:#x}",
            header.x,
            header.y,
            header.layer,
            slot,
            header.poly_count,
            tile_ref.id()
        );
        Ok(tile_ref)
    }

    fn link_new_tile(&mut self, slot: usize, header: &TileHeader) -> Result<()> {
        self.connect_int_links(slot)?;
        self.connect_off_mesh_links(slot)?;

        let layers: Vec<usize> = self
            .tile_indices_at(header.x, header.y)
            .iter()
            .copied()
            .filter(|&i| i != slot)
            .collect();
        for other in layers {
            self.connect_ext_links(slot, other, None)?;
            self.connect_ext_links(other, slot, None)?;
        }

        for (side, nei) in self.neighbour_tiles(header.x, header.y) {
            self.connect_ext_links(slot, nei, Some(side))?;
            self.connect_ext_links(nei, slot, Some(opposite_side(side)))?;
        }
        Ok(())
    }

    fn pop_free_slot(&mut self) -> Result<usize> {
        let slot = self
            .next_free
            .ok_or(Status::failure_detail(Status::OUT_OF_MEMORY))?;
        self.next_free = self.tiles[slot].next;
        self.tiles[slot].next = None;
        Ok(slot)
    }

    fn take_free_slot(&mut self, slot: usize) -> Result<usize> {
        let mut prev: Option<usize> = None;
        let mut cur = self.next_free;
        while let Some(i) = cur {
            if i == slot {
                let next = self.tiles[i].next;
                match prev {
                    Some(p) => self.tiles[p].next = next,
                    None => self.next_free = next,
                }
                self.tiles[i].next = None;
                return Ok(i);
            }
            prev = Some(i);
            cur = self.tiles[i].next;
        }
        Err(Status::failure_detail(Status::OUT_OF_MEMORY))
    }

    /// Removes a tile, invalidating every reference into it
    ///
    /// Returns the tile data unless the tile was added with
    /// [`TileFlags::FREE_DATA`], in which case the mesh drops it.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<Option<Vec<u8>>> {
        let slot = self
            .get_tile_by_ref(tile_ref)
            .map(MeshTile::index)
            .ok_or(Status::invalid_param())?;

        let (x, y, layer) = match self.tiles[slot].header.as_ref() {
            Some(h) => (h.x, h.y, h.layer),
            None => return Err(Status::invalid_param()),
        };

        self.unconnect_tile(slot, x, y);

        let data = self.release_slot(slot);
        debug!("Removed tile ({}, {}, {}) from slot {}", x, y, layer, slot);
        Ok(data)
    }

    /// Clears a slot, bumps its salt and returns it to the free list
    fn release_slot(&mut self, slot: usize) -> Option<Vec<u8>> {
        if let Some((x, y)) = self.tiles[slot].header.as_ref().map(|h| (h.x, h.y)) {
            if let Some(list) = self.tile_lut.get_mut(&(x, y)) {
                list.retain(|&i| i != slot);
                if list.is_empty() {
                    self.tile_lut.remove(&(x, y));
                }
            }
        }

        let salt_mask = self.layout.salt_mask();
        let tile = &mut self.tiles[slot];
        let data = std::mem::take(&mut tile.data);
        let owned = tile.flags.contains(TileFlags::FREE_DATA);

        tile.header = None;
        tile.polys = Vec::new();
        tile.verts = Vec::new();
        tile.links = Vec::new();
        tile.links_free_list = None;
        tile.off_mesh_cons = Vec::new();
        tile.flags = TileFlags::empty();

        tile.salt = (tile.salt + 1) & salt_mask;
        if tile.salt == 0 {
            tile.salt = 1;
        }

        tile.next = self.next_free;
        self.next_free = Some(slot);

        (!owned).then_some(data)
    }

    /// Builds links between polygons of the same tile
    fn connect_int_links(&mut self, slot: usize) -> Result<()> {
        let base = self.get_poly_ref_base(&self.tiles[slot]);
        let tile = &mut self.tiles[slot];
        for ip in 0..tile.polys.len() {
            tile.polys[ip].first_link = None;
            if tile.polys[ip].is_off_mesh_connection() {
                continue;
            }
            let nv = tile.polys[ip].vert_count as usize;
            // Reverse so the list ends up in edge order.
            for j in (0..nv).rev() {
                let nei = tile.polys[ip].neis[j];
                if nei == 0 || nei & EXT_LINK != 0 {
                    continue;
                }
                tile.push_link(
                    ip,
                    Link {
                        reference: PolyRef::new(base.id() | (nei as u32 - 1)),
                        next: None,
                        edge: j as u8,
                        side: LINK_SIDE_INTERNAL,
                        bmin: 0,
                        bmax: 0,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Snaps both ends of every off-mesh connection in a tile to the ground
    /// polygons below them and links them up
    fn connect_off_mesh_links(&mut self, slot: usize) -> Result<()> {
        let base = self.get_poly_ref_base(&self.tiles[slot]);
        let climb = self.tiles[slot].walkable_climb();

        for ci in 0..self.tiles[slot].off_mesh_cons.len() {
            let con = self.tiles[slot].off_mesh_cons[ci].clone();
            let con_poly = con.poly as usize;
            let half_extents = [con.radius, climb, con.radius];

            // Start: connection -> ground and ground -> connection.
            let start = con.start_pos();
            let Some((land_ref, snapped)) =
                self.snap_off_mesh_endpoint(slot, &start, &half_extents, con.radius)
            else {
                continue;
            };
            let land = self.layout.decode_poly(land_ref) as usize;
            let tile = &mut self.tiles[slot];
            let v0 = tile.polys[con_poly].verts[0] as usize;
            tile.verts[v0 * 3..v0 * 3 + 3].copy_from_slice(&snapped);
            tile.push_link(con_poly, off_mesh_link(land_ref, 0))?;
            tile.push_link(
                land,
                off_mesh_link(PolyRef::new(base.id() | con.poly as u32), OFFMESH_EDGE),
            )?;

            // End points living in another tile are not linked.
            if con.side != OFFMESH_SIDE_INTERNAL {
                continue;
            }

            let end = con.end_pos();
            let Some((land_ref, snapped)) =
                self.snap_off_mesh_endpoint(slot, &end, &half_extents, con.radius)
            else {
                continue;
            };
            let land = self.layout.decode_poly(land_ref) as usize;
            let tile = &mut self.tiles[slot];
            let v1 = tile.polys[con_poly].verts[1] as usize;
            tile.verts[v1 * 3..v1 * 3 + 3].copy_from_slice(&snapped);
            tile.push_link(con_poly, off_mesh_link(land_ref, 1))?;
            if con.is_bidirectional() {
                tile.push_link(
                    land,
                    off_mesh_link(PolyRef::new(base.id() | con.poly as u32), OFFMESH_EDGE),
                )?;
            }
        }
        Ok(())
    }

    fn snap_off_mesh_endpoint(
        &self,
        slot: usize,
        pos: &[f32; 3],
        half_extents: &[f32; 3],
        radius: f32,
    ) -> Option<(PolyRef, [f32; 3])> {
        let (r, nearest) = self.find_nearest_poly_in_tile(&self.tiles[slot], pos, half_extents)?;
        let d = sqr(nearest[0] - pos[0]) + sqr(nearest[2] - pos[2]);
        (d <= sqr(radius)).then_some((r, nearest))
    }

    /// Links the portal edges of `slot` that face `target`
    ///
    /// `side` restricts the portals considered; `None` takes every portal,
    /// which is used between layers of the same grid cell.
    fn connect_ext_links(&mut self, slot: usize, target: usize, side: Option<u8>) -> Result<()> {
        let mut pending: Vec<(usize, Link)> = Vec::new();
        {
            let tile = &self.tiles[slot];
            let target_tile = &self.tiles[target];
            if !tile.is_occupied() || !target_tile.is_occupied() {
                return Ok(());
            }

            for (ip, poly) in tile.polys.iter().enumerate() {
                let nv = poly.vert_count as usize;
                for j in 0..nv {
                    if poly.neis[j] & EXT_LINK == 0 {
                        continue;
                    }
                    let dir = (poly.neis[j] & 0xff) as u8;
                    if side.is_some_and(|s| s != dir) {
                        continue;
                    }

                    let va = tile.poly_vertex(poly, j);
                    let vb = tile.poly_vertex(poly, (j + 1) % nv);
                    for (reference, area) in
                        self.find_connecting_polys(&va, &vb, target_tile, opposite_side(dir))
                    {
                        let (bmin, bmax) = portal_limits(&va, &vb, dir, area);
                        pending.push((
                            ip,
                            Link {
                                reference,
                                next: None,
                                edge: j as u8,
                                side: dir,
                                bmin,
                                bmax,
                            },
                        ));
                    }
                }
            }
        }

        let tile = &mut self.tiles[slot];
        for (ip, link) in pending {
            tile.push_link(ip, link)?;
        }
        Ok(())
    }

    /// Polygons of `tile` whose portal edges on `side` line up with `va..vb`
    ///
    /// Returns each match with the overlapping range along the edge.
    fn find_connecting_polys(
        &self,
        va: &[f32; 3],
        vb: &[f32; 3],
        tile: &MeshTile,
        side: u8,
    ) -> Vec<(PolyRef, [f32; 2])> {
        let mut result = Vec::new();
        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = get_slab_coord(va, side);
        let m = EXT_LINK | side as u16;
        let base = self.get_poly_ref_base(tile);
        let climb = tile.walkable_climb();

        for (ip, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] != m {
                    continue;
                }
                let vc = tile.poly_vertex(poly, j);
                let vd = tile.poly_vertex(poly, (j + 1) % nv);
                let bpos = get_slab_coord(&vc, side);
                if (apos - bpos).abs() > PORTAL_EPS {
                    continue;
                }
                let (bmin, bmax) = calc_slab_end_points(&vc, &vd, side);
                if !overlap_slabs(&amin, &amax, &bmin, &bmax, PORTAL_EPS, climb) {
                    continue;
                }
                if result.len() < MAX_PORTAL_CONNECTIONS {
                    result.push((
                        PolyRef::new(base.id() | ip as u32),
                        [amin[0].max(bmin[0]), amax[0].min(bmax[0])],
                    ));
                }
                break;
            }
        }
        result
    }

    /// Drops links of `slot` that point into `target`
    fn unconnect_links(&mut self, slot: usize, target: usize) {
        let layout = self.layout;
        let target = target as u32;
        let tile = &mut self.tiles[slot];
        for ip in 0..tile.polys.len() {
            let mut prev: Option<u32> = None;
            let mut cur = tile.polys[ip].first_link;
            while let Some(j) = cur {
                let link = tile.links[j as usize];
                cur = link.next;
                if layout.decode_tile(link.reference) == target {
                    match prev {
                        Some(p) => tile.links[p as usize].next = link.next,
                        None => tile.polys[ip].first_link = link.next,
                    }
                    tile.free_link(j);
                } else {
                    prev = Some(j);
                }
            }
        }
    }

    /// Ground polygons of a tile whose bounds overlap a box
    pub fn query_polygons_in_tile(
        &self,
        tile: &MeshTile,
        qmin: &[f32; 3],
        qmax: &[f32; 3],
        max_polys: usize,
    ) -> Vec<PolyRef> {
        let base = self.get_poly_ref_base(tile);
        let mut result = Vec::new();
        for (ip, poly) in tile.polys.iter().enumerate() {
            if result.len() >= max_polys {
                break;
            }
            if poly.is_off_mesh_connection() {
                continue;
            }
            let (bmin, bmax) = poly_bounds(tile, poly);
            if overlap_bounds(qmin, qmax, &bmin, &bmax) {
                result.push(PolyRef::new(base.id() | ip as u32));
            }
        }
        result
    }

    /// Indices of occupied tiles whose grid cells overlap a box on the xz-plane
    pub(crate) fn tiles_overlapping(&self, bmin: &[f32; 3], bmax: &[f32; 3]) -> Vec<usize> {
        let (minx, miny) = self.calc_tile_loc(bmin);
        let (maxx, maxy) = self.calc_tile_loc(bmax);
        let cells = (maxx as i64 - minx as i64 + 1) * (maxy as i64 - miny as i64 + 1);

        let mut result = Vec::new();
        if cells > self.tile_lut.len() as i64 {
            for (&(x, y), slots) in &self.tile_lut {
                if (minx..=maxx).contains(&x) && (miny..=maxy).contains(&y) {
                    result.extend_from_slice(slots);
                }
            }
            result.sort_unstable();
        } else {
            for y in miny..=maxy {
                for x in minx..=maxx {
                    result.extend_from_slice(self.tile_indices_at(x, y));
                }
            }
        }
        result
    }

    /// Nearest ground polygon of one tile to a point
    pub fn find_nearest_poly_in_tile(
        &self,
        tile: &MeshTile,
        center: &[f32; 3],
        half_extents: &[f32; 3],
    ) -> Option<(PolyRef, [f32; 3])> {
        let bmin = vsub(center, half_extents);
        let bmax = vadd(center, half_extents);
        let climb = tile.walkable_climb();

        let mut nearest: Option<(PolyRef, [f32; 3])> = None;
        let mut nearest_dist = f32::MAX;
        for r in self.query_polygons_in_tile(tile, &bmin, &bmax, MAX_SNAP_CANDIDATES) {
            let Some(poly) = tile.polys.get(self.layout.decode_poly(r) as usize) else {
                continue;
            };
            let (closest, over_poly) = closest_point_on_poly_in_tile(tile, poly, center);
            let diff = vsub(center, &closest);
            let d = if over_poly {
                let dy = diff[1].abs() - climb;
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
        }
        nearest
    }

    /// Closest point on a polygon and whether `pos` lies over it
    pub fn closest_point_on_poly(&self, reference: PolyRef, pos: &[f32; 3]) -> Result<([f32; 3], bool)> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(reference)?;
        Ok(closest_point_on_poly_in_tile(tile, poly, pos))
    }
}

fn off_mesh_link(reference: PolyRef, edge: u8) -> Link {
    Link {
        reference,
        next: None,
        edge,
        side: LINK_SIDE_INTERNAL,
        bmin: 0,
        bmax: 0,
    }
}

/// Height of a polygon at `pos`, `None` when `pos` is outside it
///
/// Off-mesh connections interpolate along their segment.
pub fn poly_height(tile: &MeshTile, poly: &Poly, pos: &[f32; 3]) -> Option<f32> {
    if poly.is_off_mesh_connection() {
        let v0 = tile.poly_vertex(poly, 0);
        let v1 = tile.poly_vertex(poly, 1);
        let (_, t) = dist_point_segment_sqr_2d_with_t(pos, &v0, &v1);
        return Some(v0[1] + (v1[1] - v0[1]) * t);
    }
    let (verts, nv) = tile.poly_vertices(poly);
    poly_height_at(pos, &verts, nv)
}

/// Closest point on a polygon and whether `pos` lies over it
pub fn closest_point_on_poly_in_tile(tile: &MeshTile, poly: &Poly, pos: &[f32; 3]) -> ([f32; 3], bool) {
    if poly.is_off_mesh_connection() {
        let v0 = tile.poly_vertex(poly, 0);
        let v1 = tile.poly_vertex(poly, 1);
        let (_, t) = dist_point_segment_sqr_2d_with_t(pos, &v0, &v1);
        return (vlerp(&v0, &v1, t), false);
    }
    if let Some(h) = poly_height(tile, poly, pos) {
        return ([pos[0], h, pos[2]], true);
    }
    let (verts, nv) = tile.poly_vertices(poly);
    (closest_point_on_poly_edges(pos, &verts, nv).0, false)
}

/// Axis-aligned bounds of a polygon
pub fn poly_bounds(tile: &MeshTile, poly: &Poly) -> ([f32; 3], [f32; 3]) {
    let mut bmin = tile.poly_vertex(poly, 0);
    let mut bmax = bmin;
    for j in 1..poly.vert_count as usize {
        let v = tile.poly_vertex(poly, j);
        bmin = vmin(&bmin, &v);
        bmax = vmax(&bmax, &v);
    }
    (bmin, bmax)
}

/// Coordinate that is constant along portals facing `side`
fn get_slab_coord(va: &[f32; 3], side: u8) -> f32 {
    match side {
        0 | 4 => va[0],
        2 | 6 => va[2],
        _ => 0.0,
    }
}

/// Endpoints of a portal edge as (along-edge, height) pairs, ordered
fn calc_slab_end_points(va: &[f32; 3], vb: &[f32; 3], side: u8) -> ([f32; 2], [f32; 2]) {
    let axis = match side {
        0 | 4 => 2,
        2 | 6 => 0,
        _ => return ([0.0; 2], [0.0; 2]),
    };
    if va[axis] < vb[axis] {
        ([va[axis], va[1]], [vb[axis], vb[1]])
    } else {
        ([vb[axis], vb[1]], [va[axis], va[1]])
    }
}

/// Checks whether two portal slabs overlap along the edge and in height
fn overlap_slabs(
    amin: &[f32; 2],
    amax: &[f32; 2],
    bmin: &[f32; 2],
    bmax: &[f32; 2],
    px: f32,
    py: f32,
) -> bool {
    // Shrink by the tolerance so slabs touching at a corner do not connect.
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let dmin = (bd * minx + bk) - (ad * minx + ak);
    let dmax = (bd * maxx + bk) - (ad * maxx + ak);

    if dmin * dmax < 0.0 {
        return true;
    }
    let thr = sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Compresses the overlapping portal range into link limits
fn portal_limits(va: &[f32; 3], vb: &[f32; 3], dir: u8, area: [f32; 2]) -> (u8, u8) {
    let axis = match dir {
        0 | 4 => 2,
        2 | 6 => 0,
        _ => return (0, 255),
    };
    let len = vb[axis] - va[axis];
    if len.abs() < f32::EPSILON {
        return (0, 255);
    }
    let mut tmin = (area[0] - va[axis]) / len;
    let mut tmax = (area[1] - va[axis]) / len;
    if tmin > tmax {
        std::mem::swap(&mut tmin, &mut tmax);
    }
    (
        (tmin.clamp(0.0, 1.0) * 255.0).round() as u8,
        (tmax.clamp(0.0, 1.0) * 255.0).round() as u8,
    )
}
