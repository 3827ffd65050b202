//! Tile encoding and deduplication. Tiles are always processed as 2bpp
//! internally; the 1bpp projection only happens at serialization time, which
//! keeps every other stage bit-depth agnostic.

use std::collections::HashMap;

use crate::color::GbColor;
use crate::error::{Diagnostic, Diagnostics, GfxError};
use crate::image::Tile;
use crate::palette::Palette;
use crate::{AttrmapEntry, ColorSetRef, Options};

/// Bit-reversal table for horizontal mirroring, one entry per byte value.
pub(crate) const FLIP_TABLE: [u8; 256] = build_flip_table();

const fn build_flip_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut b = i as u8;
        b = b >> 4 | b << 4;
        b = (b & 0xCC) >> 2 | (b & 0x33) << 2;
        b = (b & 0xAA) >> 1 | (b & 0x55) << 1;
        table[i] = b;
        i += 1;
    }
    table
}

/// How a tile relates to an already-seen tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    HFlip,
    VFlip,
    VHFlip,
}

/// One encoded tile: eight rows of interleaved bitplane pairs, plus a lax
/// 16-bit hash (the XOR of all rows, with each row additionally XORed with
/// its horizontal mirror when horizontal mirroring is allowed, so that
/// mirror-equivalent tiles land in the same bucket).
#[derive(Debug, Clone)]
pub struct TileData {
    data: [u8; 16],
    hash: u16,
}

impl TileData {
    /// Encodes one row: bit `x` of the low byte is plane 0 of pixel
    /// `(7 - x, y)`, bit `x` of the high byte is plane 1.
    pub fn row_bitplanes(tile: &Tile<'_>, palette: &Palette, y: u32, use_curve: bool) -> u16 {
        let mut row = 0u16;
        for x in 0..8 {
            row <<= 1;
            let index = palette.index_of(GbColor::from_rgba(tile.pixel(x, y), use_curve));
            if index & 1 != 0 {
                row |= 1;
            }
            if index & 2 != 0 {
                row |= 0x100;
            }
        }
        row
    }

    pub fn new(tile: &Tile<'_>, palette: &Palette, use_curve: bool, mirror_x: bool) -> Self {
        let mut data = [0u8; 16];
        let mut hash = 0u16;
        for y in 0..8 {
            let bitplanes = Self::row_bitplanes(tile, palette, y, use_curve);
            hash_bitplanes(bitplanes, &mut hash, mirror_x);
            data[y as usize * 2] = bitplanes as u8;
            data[y as usize * 2 + 1] = (bitplanes >> 8) as u8;
        }
        Self { data, hash }
    }

    pub fn from_raw(data: [u8; 16], mirror_x: bool) -> Self {
        let mut hash = 0u16;
        for y in 0..8 {
            let bitplanes = u16::from(data[y * 2]) | u16::from(data[y * 2 + 1]) << 8;
            hash_bitplanes(bitplanes, &mut hash, mirror_x);
        }
        Self { data, hash }
    }

    pub fn data(&self) -> &[u8; 16] {
        &self.data
    }

    pub fn hash(&self) -> u16 {
        self.hash
    }

    /// Checks whether `other` is this tile, possibly under the enabled
    /// mirrorings. When a tile is symmetric enough that both vertical
    /// variants match, plain `VFlip` wins.
    pub fn try_matching(
        &self,
        other: &TileData,
        mirror_x: bool,
        mirror_y: bool,
    ) -> Option<MatchType> {
        if self.data == other.data {
            return Some(MatchType::Exact);
        }

        if mirror_x
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(&lhs, &rhs)| lhs == FLIP_TABLE[rhs as usize])
        {
            return Some(MatchType::HFlip);
        }

        if !mirror_y {
            return None;
        }

        let mut has_vflip = true;
        let mut has_vhflip = true;
        for i in 0..self.data.len() {
            // `^ 1` pairs each byte with the same bitplane of the
            // vertically-mirrored row (the array length is even).
            let lhs = self.data[i];
            let rhs = other.data[(15 - i) ^ 1];
            if lhs != rhs {
                has_vflip = false;
            }
            if lhs != FLIP_TABLE[rhs as usize] {
                has_vhflip = false;
            }
            if !has_vflip && !has_vhflip {
                return None;
            }
        }

        if has_vflip {
            return Some(MatchType::VFlip);
        }
        if mirror_x && has_vhflip {
            return Some(MatchType::VHFlip);
        }
        None
    }
}

fn hash_bitplanes(bitplanes: u16, hash: &mut u16, mirror_x: bool) {
    *hash ^= bitplanes;
    if mirror_x {
        // Fold in the mirrored row as well, so a tile and its horizontal
        // flip hash identically. Vertical flips already do, since the
        // symmetric row gets XORed the same way.
        *hash ^= u16::from(FLIP_TABLE[(bitplanes >> 8) as usize]) << 8
            | u16::from(FLIP_TABLE[(bitplanes & 0xFF) as usize]);
    }
}

/// The deduplicated tile table. Tiles keep their insertion order; the index
/// into that order is the global tile ID, from which bank and in-bank ID are
/// later derived.
#[derive(Debug)]
pub struct UniqueTiles {
    mirror_x: bool,
    mirror_y: bool,
    buckets: HashMap<u16, Vec<u16>>,
    tiles: Vec<TileData>,
}

impl UniqueTiles {
    pub fn new(mirror_x: bool, mirror_y: bool) -> Self {
        Self {
            mirror_x,
            mirror_y,
            buckets: HashMap::new(),
            tiles: Vec::new(),
        }
    }

    /// Adds a tile, returning its global ID and how it matched. `None` means
    /// the tile was new and has been inserted.
    pub fn add_tile(&mut self, tile: TileData) -> (u16, Option<MatchType>) {
        if let Some(ids) = self.buckets.get(&tile.hash()) {
            for &id in ids {
                if let Some(match_type) =
                    self.tiles[id as usize].try_matching(&tile, self.mirror_x, self.mirror_y)
                {
                    return (id, Some(match_type));
                }
            }
        }
        let id = self.tiles.len() as u16;
        self.buckets.entry(tile.hash()).or_default().push(id);
        self.tiles.push(tile);
        (id, None)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles in insertion (ID) order.
    pub fn iter(&self) -> impl Iterator<Item = &TileData> {
        self.tiles.iter()
    }
}

/// Seeds the tile table from a pre-existing tileset. Its tiles must all be
/// distinct under the enabled mirrorings, and are kept in file order so the
/// IDs they were authored against stay valid.
pub fn load_tileset(
    data: &[u8],
    options: &Options,
    tiles: &mut UniqueTiles,
    diag: &mut Diagnostics,
) -> Result<(), GfxError> {
    let tile_size = usize::from(options.bit_depth) * 8;
    if data.len() % tile_size != 0 {
        return Err(GfxError::TilesetNotMultiple {
            len: data.len(),
            tile_size,
        });
    }

    for chunk in data.chunks_exact(tile_size) {
        let mut raw = [0u8; 16];
        if tile_size == 8 {
            // Expand 1bpp rows: plane 1 is all zeroes.
            for (i, &byte) in chunk.iter().enumerate() {
                raw[i * 2] = byte;
            }
        } else {
            raw.copy_from_slice(chunk);
        }

        let (tile_id, match_type) = tiles.add_tile(TileData::from_raw(raw, options.allow_mirror_x));
        if match_type.is_some() {
            diag.report(Diagnostic::TilesetTileReused { tile_id });
        }
    }
    Ok(())
}

/// Walks the image's tiles, deduplicating as it goes and filling in each
/// attrmap entry's tile ID, bank, and mirror flags.
pub fn dedup_tiles(
    image: &crate::image::Image,
    attrmap: &mut [AttrmapEntry],
    palettes: &[Palette],
    mappings: &[usize],
    options: &Options,
    tileset: Option<&[u8]>,
    diag: &mut Diagnostics,
) -> Result<UniqueTiles, GfxError> {
    let mut tiles = UniqueTiles::new(options.allow_mirror_x, options.allow_mirror_y);

    if let Some(data) = tileset {
        load_tileset(data, options, &mut tiles, diag)?;
    }
    let tileset_without_output = tileset.is_some() && options.output.is_none();

    for (tile, attr) in image.tiles(options).zip(attrmap.iter_mut()) {
        if attr.color_set == ColorSetRef::Background {
            attr.x_flip = false;
            attr.y_flip = false;
            attr.bank = false;
            attr.tile_id = options.base_tile_ids[0];
            continue;
        }

        let palette = &palettes[attr.pal_id(mappings)];
        let (global_id, match_type) = tiles.add_tile(TileData::new(
            &tile,
            palette,
            options.use_color_curve,
            options.allow_mirror_x,
        ));

        if tileset_without_output && match_type.is_none() {
            diag.report(Diagnostic::TileNotInTileset {
                x: tile.x,
                y: tile.y,
            });
        }

        attr.x_flip = matches!(match_type, Some(MatchType::HFlip | MatchType::VHFlip));
        attr.y_flip = matches!(match_type, Some(MatchType::VFlip | MatchType::VHFlip));
        attr.bank = global_id >= options.max_nb_tiles[0];
        let in_bank = if attr.bank {
            global_id - options.max_nb_tiles[0]
        } else {
            global_id
        };
        attr.tile_id = (in_bank as u8).wrapping_add(options.base_tile_ids[usize::from(attr.bank)]);
    }

    Ok(tiles)
}
