//! Binary tile data format
//!
//! Tiles reach the mesh as byte buffers. A buffer is a little-endian header
//! followed by the vertex, polygon and off-mesh connection tables:
//!
//! ```text
//! header      72 bytes
//! vertices    vert_count * 3 * f32
//! polygons    poly_count * (6 * u16 verts, 6 * u16 neis, u16 flags, u8 vert_count, u8 area_and_type)
//! off-mesh    off_mesh_con_count * (6 * f32 pos, f32 radius, u16 poly, u8 flags, u8 side, u32 user_id)
//! ```
//!
//! Links are not stored; the mesh builds them when the tile is added.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use super::nav_mesh::{MeshTile, OffMeshConnection, Poly, TileHeader};
use super::{PolyFlags, PolyType, EXT_LINK, MAX_VERTS_PER_POLY, OFFMESH_CON_BIDIR};
use divert_common::{vmax, vmin, Error, Result};

/// Magic number for tile data ('DIVT')
pub const TILE_MAGIC: u32 =
    (b'D' as u32) << 24 | (b'I' as u32) << 16 | (b'V' as u32) << 8 | b'T' as u32;

/// Current tile data version
pub const TILE_VERSION: u32 = 1;

/// Size of the encoded tile header
pub const HEADER_SIZE: usize = 72;
const VERT_SIZE: usize = 12;
const POLY_SIZE: usize = 28;
const OFF_MESH_CON_SIZE: usize = 36;

/// Side value of an off-mesh connection whose both ends lie in its own tile
pub const OFFMESH_SIDE_INTERNAL: u8 = 0xff;

/// Area bits of `area_and_type`
const AREA_MASK: u8 = 0x3f;

#[derive(Debug, Clone)]
struct RawHeader {
    magic: u32,
    version: u32,
    header: TileHeader,
}

impl RawHeader {
    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let version = reader.read_u32::<LittleEndian>()?;
        let header = TileHeader {
            x: reader.read_i32::<LittleEndian>()?,
            y: reader.read_i32::<LittleEndian>()?,
            layer: reader.read_i32::<LittleEndian>()?,
            user_id: reader.read_u32::<LittleEndian>()?,
            poly_count: reader.read_u32::<LittleEndian>()?,
            vert_count: reader.read_u32::<LittleEndian>()?,
            off_mesh_con_count: reader.read_u32::<LittleEndian>()?,
            walkable_height: reader.read_f32::<LittleEndian>()?,
            walkable_radius: reader.read_f32::<LittleEndian>()?,
            walkable_climb: reader.read_f32::<LittleEndian>()?,
            bmin: read_vec3(reader)?,
            bmax: read_vec3(reader)?,
        };
        Ok(Self {
            magic,
            version,
            header,
        })
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let h = &self.header;
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_i32::<LittleEndian>(h.x)?;
        writer.write_i32::<LittleEndian>(h.y)?;
        writer.write_i32::<LittleEndian>(h.layer)?;
        writer.write_u32::<LittleEndian>(h.user_id)?;
        writer.write_u32::<LittleEndian>(h.poly_count)?;
        writer.write_u32::<LittleEndian>(h.vert_count)?;
        writer.write_u32::<LittleEndian>(h.off_mesh_con_count)?;
        writer.write_f32::<LittleEndian>(h.walkable_height)?;
        writer.write_f32::<LittleEndian>(h.walkable_radius)?;
        writer.write_f32::<LittleEndian>(h.walkable_climb)?;
        write_vec3(writer, &h.bmin)?;
        write_vec3(writer, &h.bmax)?;
        Ok(())
    }
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<[f32; 3]> {
    Ok([
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ])
}

fn write_vec3<W: Write>(writer: &mut W, v: &[f32; 3]) -> Result<()> {
    writer.write_f32::<LittleEndian>(v[0])?;
    writer.write_f32::<LittleEndian>(v[1])?;
    writer.write_f32::<LittleEndian>(v[2])?;
    Ok(())
}

fn read_poly<R: Read>(reader: &mut R) -> Result<Poly> {
    let mut verts = [0u16; MAX_VERTS_PER_POLY];
    for v in &mut verts {
        *v = reader.read_u16::<LittleEndian>()?;
    }
    let mut neis = [0u16; MAX_VERTS_PER_POLY];
    for n in &mut neis {
        *n = reader.read_u16::<LittleEndian>()?;
    }
    let flags = PolyFlags::from_bits_retain(reader.read_u16::<LittleEndian>()?);
    let vert_count = reader.read_u8()?;
    let area_and_type = reader.read_u8()?;

    let poly_type = match area_and_type >> 6 {
        0 => PolyType::Ground,
        1 => PolyType::OffMeshConnection,
        other => {
            return Err(Error::InvalidTileData(format!(
                "unknown polygon type {other}"
            )))
        }
    };

    let mut poly = Poly::new(area_and_type & AREA_MASK, poly_type, flags);
    poly.verts = verts;
    poly.neis = neis;
    poly.vert_count = vert_count;
    Ok(poly)
}

fn write_poly<W: Write>(writer: &mut W, poly: &Poly) -> Result<()> {
    for &v in &poly.verts {
        writer.write_u16::<LittleEndian>(v)?;
    }
    for &n in &poly.neis {
        writer.write_u16::<LittleEndian>(n)?;
    }
    writer.write_u16::<LittleEndian>(poly.flags.bits())?;
    writer.write_u8(poly.vert_count)?;
    writer.write_u8((poly.area & AREA_MASK) | ((poly.poly_type as u8) << 6))?;
    Ok(())
}

fn read_off_mesh_con<R: Read>(reader: &mut R) -> Result<OffMeshConnection> {
    let mut pos = [0.0f32; 6];
    for p in &mut pos {
        *p = reader.read_f32::<LittleEndian>()?;
    }
    Ok(OffMeshConnection {
        pos,
        radius: reader.read_f32::<LittleEndian>()?,
        poly: reader.read_u16::<LittleEndian>()?,
        flags: reader.read_u8()?,
        side: reader.read_u8()?,
        user_id: reader.read_u32::<LittleEndian>()?,
    })
}

fn write_off_mesh_con<W: Write>(writer: &mut W, con: &OffMeshConnection) -> Result<()> {
    for &p in &con.pos {
        writer.write_f32::<LittleEndian>(p)?;
    }
    writer.write_f32::<LittleEndian>(con.radius)?;
    writer.write_u16::<LittleEndian>(con.poly)?;
    writer.write_u8(con.flags)?;
    writer.write_u8(con.side)?;
    writer.write_u32::<LittleEndian>(con.user_id)?;
    Ok(())
}

/// Number of bytes a tile with the given counts occupies
pub fn tile_data_size(vert_count: u32, poly_count: u32, off_mesh_con_count: u32) -> Option<usize> {
    let verts = (vert_count as usize).checked_mul(VERT_SIZE)?;
    let polys = (poly_count as usize).checked_mul(POLY_SIZE)?;
    let cons = (off_mesh_con_count as usize).checked_mul(OFF_MESH_CON_SIZE)?;
    HEADER_SIZE
        .checked_add(verts)?
        .checked_add(polys)?
        .checked_add(cons)
}

/// Reads only the header of a tile buffer, checking magic and version
pub fn read_tile_header(data: &[u8]) -> Result<TileHeader> {
    if data.len() < HEADER_SIZE {
        return Err(Error::InvalidTileData(format!(
            "buffer of {} bytes is shorter than the tile header",
            data.len()
        )));
    }
    let raw = RawHeader::read_from(&mut Cursor::new(data))?;
    if raw.magic != TILE_MAGIC {
        return Err(Error::WrongMagic(raw.magic));
    }
    if raw.version != TILE_VERSION {
        return Err(Error::WrongVersion(raw.version));
    }
    Ok(raw.header)
}

/// Decodes a tile buffer into an unlinked [`MeshTile`]
///
/// Counts are checked against the buffer length, vertex indices against the
/// vertex count and internal neighbour indices against the polygon count.
pub fn load_tile_from_binary(data: &[u8]) -> Result<MeshTile> {
    let header = read_tile_header(data)?;

    let expected = tile_data_size(header.vert_count, header.poly_count, header.off_mesh_con_count)
        .ok_or_else(|| Error::InvalidTileData("tile counts overflow".into()))?;
    if data.len() < expected {
        return Err(Error::InvalidTileData(format!(
            "tile declares {expected} bytes but buffer holds {}",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    cursor.set_position(HEADER_SIZE as u64);

    let mut verts = Vec::new();
    verts.try_reserve_exact(header.vert_count as usize * 3).map_err(|_| {
        Error::InvalidTileData("cannot allocate vertex table".into())
    })?;
    for _ in 0..header.vert_count * 3 {
        verts.push(cursor.read_f32::<LittleEndian>()?);
    }

    let mut polys = Vec::with_capacity(header.poly_count as usize);
    for i in 0..header.poly_count {
        let poly = read_poly(&mut cursor)?;
        validate_poly(i, &poly, &header)?;
        polys.push(poly);
    }

    let mut off_mesh_cons = Vec::with_capacity(header.off_mesh_con_count as usize);
    for i in 0..header.off_mesh_con_count {
        let con = read_off_mesh_con(&mut cursor)?;
        let target = polys.get(con.poly as usize);
        if !matches!(target, Some(p) if p.poly_type == PolyType::OffMeshConnection) {
            return Err(Error::InvalidTileData(format!(
                "off-mesh connection {i} points at polygon {} which is not an off-mesh polygon",
                con.poly
            )));
        }
        off_mesh_cons.push(con);
    }

    let mut tile = MeshTile::new();
    tile.header = Some(header);
    tile.verts = verts;
    tile.polys = polys;
    tile.off_mesh_cons = off_mesh_cons;
    Ok(tile)
}

fn validate_poly(index: u32, poly: &Poly, header: &TileHeader) -> Result<()> {
    let nv = poly.vert_count as usize;
    let count_ok = match poly.poly_type {
        PolyType::Ground => (3..=MAX_VERTS_PER_POLY).contains(&nv),
        PolyType::OffMeshConnection => nv == 2,
    };
    if !count_ok {
        return Err(Error::InvalidTileData(format!(
            "polygon {index} has {nv} vertices"
        )));
    }

    for j in 0..nv {
        if poly.verts[j] as u32 >= header.vert_count {
            return Err(Error::InvalidTileData(format!(
                "polygon {index} references vertex {} of {}",
                poly.verts[j], header.vert_count
            )));
        }
        let nei = poly.neis[j];
        if nei & EXT_LINK != 0 && nei & !EXT_LINK > 7 {
            return Err(Error::InvalidTileData(format!(
                "polygon {index} has a portal on side {}",
                nei & !EXT_LINK
            )));
        }
        if nei & EXT_LINK == 0 && nei as u32 > header.poly_count {
            return Err(Error::InvalidTileData(format!(
                "polygon {index} references neighbour {} of {}",
                nei - 1,
                header.poly_count
            )));
        }
    }
    Ok(())
}

/// Encodes a tile's header, vertices, polygons and off-mesh connections
pub fn save_tile_to_binary(tile: &MeshTile) -> Result<Vec<u8>> {
    let header = tile
        .header
        .as_ref()
        .ok_or_else(|| Error::InvalidTileData("tile has no header".into()))?;

    let mut header = header.clone();
    header.vert_count = (tile.verts.len() / 3) as u32;
    header.poly_count = tile.polys.len() as u32;
    header.off_mesh_con_count = tile.off_mesh_cons.len() as u32;

    let size = tile_data_size(header.vert_count, header.poly_count, header.off_mesh_con_count)
        .ok_or_else(|| Error::InvalidTileData("tile counts overflow".into()))?;
    let mut buffer = Vec::with_capacity(size);

    RawHeader {
        magic: TILE_MAGIC,
        version: TILE_VERSION,
        header,
    }
    .write_to(&mut buffer)?;

    for &v in &tile.verts {
        buffer.write_f32::<LittleEndian>(v)?;
    }
    for poly in &tile.polys {
        write_poly(&mut buffer, poly)?;
    }
    for con in &tile.off_mesh_cons {
        write_off_mesh_con(&mut buffer, con)?;
    }

    Ok(buffer)
}

/// Assembles tile buffers for hosts that generate polygons themselves
///
/// Polygons are expected in the mesh winding order (see
/// [`divert_common::tri_area_2d`]); `neis` follow the tile convention:
/// `0` for a wall, `n + 1` for internal neighbour `n`, `EXT_LINK | side`
/// for a portal into the neighbouring tile on `side`.
#[derive(Debug, Clone)]
pub struct TileBuilder {
    header: TileHeader,
    bounds: Option<([f32; 3], [f32; 3])>,
    verts: Vec<f32>,
    polys: Vec<Poly>,
    off_mesh_cons: Vec<OffMeshConnection>,
}

impl TileBuilder {
    /// Starts a tile at grid location (x, y, layer)
    pub fn new(x: i32, y: i32, layer: i32) -> Self {
        Self {
            header: TileHeader {
                x,
                y,
                layer,
                walkable_height: 2.0,
                walkable_radius: 0.6,
                walkable_climb: 0.9,
                ..Default::default()
            },
            bounds: None,
            verts: Vec::new(),
            polys: Vec::new(),
            off_mesh_cons: Vec::new(),
        }
    }

    /// Sets the agent dimensions the tile was built for
    pub fn walkable(mut self, height: f32, radius: f32, climb: f32) -> Self {
        self.header.walkable_height = height;
        self.header.walkable_radius = radius;
        self.header.walkable_climb = climb;
        self
    }

    pub fn user_id(mut self, user_id: u32) -> Self {
        self.header.user_id = user_id;
        self
    }

    /// Sets the tile bounds; defaults to the bounds of the vertices
    pub fn bounds(mut self, bmin: [f32; 3], bmax: [f32; 3]) -> Self {
        self.bounds = Some((bmin, bmax));
        self
    }

    /// Appends a vertex and returns its index
    pub fn add_vertex(&mut self, pos: [f32; 3]) -> Result<u16> {
        let index = self.verts.len() / 3;
        let index = u16::try_from(index)
            .map_err(|_| Error::InvalidTileData("too many vertices".into()))?;
        self.verts.extend_from_slice(&pos);
        Ok(index)
    }

    /// Appends a ground polygon and returns its index
    pub fn add_polygon(
        &mut self,
        verts: &[u16],
        neis: &[u16],
        flags: PolyFlags,
        area: u8,
    ) -> Result<u16> {
        if verts.len() < 3 || verts.len() > MAX_VERTS_PER_POLY || neis.len() != verts.len() {
            return Err(Error::InvalidTileData(format!(
                "polygon needs 3..={MAX_VERTS_PER_POLY} vertices and one neighbour per edge"
            )));
        }
        let mut poly = Poly::new(area & AREA_MASK, PolyType::Ground, flags);
        poly.verts[..verts.len()].copy_from_slice(verts);
        poly.neis[..neis.len()].copy_from_slice(neis);
        poly.vert_count = verts.len() as u8;
        self.push_poly(poly)
    }

    /// Appends an off-mesh connection between two points of this tile
    ///
    /// Returns the index of the two-vertex polygon representing it.
    #[allow(clippy::too_many_arguments)]
    pub fn add_off_mesh_connection(
        &mut self,
        start: [f32; 3],
        end: [f32; 3],
        radius: f32,
        bidirectional: bool,
        flags: PolyFlags,
        area: u8,
        user_id: u32,
    ) -> Result<u16> {
        let v0 = self.add_vertex(start)?;
        let v1 = self.add_vertex(end)?;
        let mut poly = Poly::new(area & AREA_MASK, PolyType::OffMeshConnection, flags);
        poly.verts[0] = v0;
        poly.verts[1] = v1;
        poly.vert_count = 2;
        let index = self.push_poly(poly)?;

        let mut pos = [0.0; 6];
        pos[..3].copy_from_slice(&start);
        pos[3..].copy_from_slice(&end);
        self.off_mesh_cons.push(OffMeshConnection {
            pos,
            radius,
            poly: index,
            flags: if bidirectional { OFFMESH_CON_BIDIR } else { 0 },
            side: OFFMESH_SIDE_INTERNAL,
            user_id,
        });
        Ok(index)
    }

    fn push_poly(&mut self, poly: Poly) -> Result<u16> {
        let index = u16::try_from(self.polys.len())
            .map_err(|_| Error::InvalidTileData("too many polygons".into()))?;
        self.polys.push(poly);
        Ok(index)
    }

    /// Encodes the tile
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut header = self.header.clone();
        let (bmin, bmax) = match self.bounds {
            Some(bounds) => bounds,
            None => {
                let mut bmin = [f32::MAX; 3];
                let mut bmax = [f32::MIN; 3];
                for v in self.verts.chunks_exact(3) {
                    let v = [v[0], v[1], v[2]];
                    bmin = vmin(&bmin, &v);
                    bmax = vmax(&bmax, &v);
                }
                if self.verts.is_empty() {
                    ([0.0; 3], [0.0; 3])
                } else {
                    (bmin, bmax)
                }
            }
        };
        header.bmin = bmin;
        header.bmax = bmax;

        let mut tile = MeshTile::new();
        tile.header = Some(header);
        tile.verts = self.verts.clone();
        tile.polys = self.polys.clone();
        tile.off_mesh_cons = self.off_mesh_cons.clone();
        save_tile_to_binary(&tile)
    }
}
