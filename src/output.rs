//! Artifact emitters. Every writer here is generic over `io::Write`; the
//! pipeline wraps them with scoped file handles, and tests drive them with
//! byte vectors.

use std::io::{self, Write};

use crate::image::Image;
use crate::palette::Palette;
use crate::tile::{TileData, UniqueTiles};
use crate::{AttrmapEntry, ColorSetRef, Options};

/// Emits every palette as `nb_colors` little-endian 16-bit colors. Unused
/// slots serialize as `0xFFFF`.
pub fn write_palettes<W: Write>(mut out: W, palettes: &[Palette], nb_colors: u8) -> io::Result<()> {
    for palette in palettes {
        for slot in palette.slots().iter().take(usize::from(nb_colors)) {
            out.write_all(&slot.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Emits the deduplicated tiles in ID order, skipping the last `trim` tiles.
/// At 1bpp only the low-plane byte of each row is written.
pub fn write_tile_data<W: Write>(
    mut out: W,
    tiles: &UniqueTiles,
    options: &Options,
) -> io::Result<()> {
    let keep = tiles.len().saturating_sub(options.trim);
    for tile in tiles.iter().take(keep) {
        if options.bit_depth == 2 {
            out.write_all(tile.data())?;
        } else {
            for y in 0..8 {
                out.write_all(&[tile.data()[y * 2]])?;
            }
        }
    }
    Ok(())
}

/// Emits tile data without deduplication: every visited tile in order,
/// skipping fully-background tiles, each encoded with its mapped palette.
pub fn write_unoptimized_tile_data<W: Write>(
    mut out: W,
    image: &Image,
    attrmap: &[AttrmapEntry],
    palettes: &[Palette],
    mappings: &[usize],
    options: &Options,
) -> io::Result<()> {
    let nb_tiles = u64::from(image.width_tiles(options)) * u64::from(image.height_tiles(options));
    let trim = options.trim as u64;
    if nb_tiles <= trim {
        return Ok(());
    }
    let mut remaining = nb_tiles - trim;

    for (tile, attr) in image.tiles(options).zip(attrmap) {
        if attr.color_set != ColorSetRef::Background {
            // A fully transparent tile encodes against palette 0.
            let palette = &palettes[attr.pal_id(mappings)];
            for y in 0..8 {
                let bitplanes = TileData::row_bitplanes(&tile, palette, y, options.use_color_curve);
                out.write_all(&[bitplanes as u8])?;
                if options.bit_depth == 2 {
                    out.write_all(&[(bitplanes >> 8) as u8])?;
                }
            }
        }

        remaining -= 1;
        if remaining == 0 {
            break;
        }
    }
    Ok(())
}

/// Fills in tile IDs and banks for the non-deduplicated path: tiles are
/// numbered in visitation order, rolling over into bank 1 when bank 0 is
/// full. Background tiles take ID 0 and do not consume a number, matching
/// their omission from the tile data stream.
pub fn assign_sequential_ids(attrmap: &mut [AttrmapEntry], options: &Options) {
    let mut tile_id: u16 = 0;
    let mut bank = false;
    for attr in attrmap {
        if !bank && tile_id == options.max_nb_tiles[0] {
            bank = true;
            tile_id = 0;
        }
        let background = attr.color_set == ColorSetRef::Background;
        let base = options.base_tile_ids[usize::from(bank)];
        attr.bank = bank;
        attr.tile_id = if background {
            base
        } else {
            (tile_id as u8).wrapping_add(base)
        };
        if !background {
            tile_id += 1;
        }
    }
}

/// Reorders visitation-order attrmap entries into row-major order for
/// emission. Column-major visitation only affects tile ID assignment; the
/// map artifacts are always laid out row by row.
pub fn row_major_order(
    attrmap: &[AttrmapEntry],
    width_tiles: usize,
    height_tiles: usize,
    column_major: bool,
) -> Vec<AttrmapEntry> {
    if !column_major {
        return attrmap.to_vec();
    }
    let mut ordered = Vec::with_capacity(attrmap.len());
    for row in 0..height_tiles {
        for col in 0..width_tiles {
            ordered.push(attrmap[col * height_tiles + row]);
        }
    }
    ordered
}

/// One byte per tile: the bank-relative tile ID (base already applied).
pub fn write_tilemap<W: Write>(mut out: W, attrmap: &[AttrmapEntry]) -> io::Result<()> {
    for attr in attrmap {
        out.write_all(&[attr.tile_id])?;
    }
    Ok(())
}

/// One byte per tile: palette in bits 0-2, bank in bit 3, then the X and Y
/// mirror flags in bits 5 and 6.
pub fn write_attrmap<W: Write>(
    mut out: W,
    attrmap: &[AttrmapEntry],
    mappings: &[usize],
    options: &Options,
) -> io::Result<()> {
    for attr in attrmap {
        let pal_id = (attr.pal_id(mappings) as u8).wrapping_add(options.base_pal_id);
        let byte = (pal_id & 0b111)
            | u8::from(attr.bank) << 3
            | u8::from(attr.x_flip) << 5
            | u8::from(attr.y_flip) << 6;
        out.write_all(&[byte])?;
    }
    Ok(())
}

/// One byte per tile: the full palette ID, for images that need more
/// palettes than the attribute byte can address.
pub fn write_palmap<W: Write>(
    mut out: W,
    attrmap: &[AttrmapEntry],
    mappings: &[usize],
    options: &Options,
) -> io::Result<()> {
    for attr in attrmap {
        out.write_all(&[(attr.pal_id(mappings) as u8).wrapping_add(options.base_pal_id)])?;
    }
    Ok(())
}
