//! Game Boy graphics conversion core.
//!
//! Ingests an indexed or true-color PNG and produces the console-ready
//! artifacts: a table of RGB555 palettes, a stream of 1bpp or 2bpp 8x8
//! tiles, and the per-tile metadata streams (tilemap, attribute map,
//! palette map). The interesting parts are color quantization into a
//! 15-bit space, packing tile color sets into fixed-capacity palettes,
//! and mirror-aware tile deduplication.
//!
//! The crate is a processing core: it consumes a fully-resolved [`Options`]
//! record and emits structured [`Diagnostic`] events. Command-line parsing
//! and user-facing rendering of diagnostics belong to the caller.

#![forbid(unsafe_code)]

pub mod color;
pub mod color_set;
pub mod error;
pub mod image;
pub mod output;
pub mod pack;
pub mod palette;
pub mod tile;

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

pub use color::GbColor;
pub use color_set::{ColorSet, Comparison};
pub use error::{Diagnostic, Diagnostics, GfxError, Severity};
pub use image::{Image, ImagePalette, Tile, Tiles};
pub use palette::{Palette, MAX_COLORS};
pub use tile::{MatchType, TileData, UniqueTiles};

/// The pixel type used throughout: 8-bit RGBA.
pub type Rgba = rgb::RGBA<u8>;

/// A rectangular region of the input image, measured in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlice {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

/// Where palettes come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PalSpec {
    /// The packer invents palettes from the image's tile color sets.
    #[default]
    None,
    /// The caller supplies the palettes; tiles must fit them as given.
    /// `None` entries are gaps and stay empty.
    Explicit(Vec<[Option<Rgba>; MAX_COLORS]>),
    /// The PNG's embedded palette becomes a single explicit palette.
    Embedded,
    /// Monochrome target: the image must be grayscale-suitable, and colors
    /// are ordered by brightness bin.
    Dmg,
}

/// The fully-resolved configuration record driving a conversion. Read-only
/// for the duration of the pipeline.
#[derive(Debug, Clone)]
pub struct Options {
    /// Output bits per pixel, 1 or 2. At 1bpp only the low byte of each
    /// row's bitplane pair is emitted.
    pub bit_depth: u8,
    /// Maximum number of palettes the packer may produce.
    pub nb_palettes: u16,
    /// Palette capacity; 0 means `1 << bit_depth`.
    pub nb_colors_per_pal: u8,
    pub pal_spec: PalSpec,
    /// Tiles consisting solely of this color are flagged as background and
    /// omitted from the tile data.
    pub bg_color: Option<Rgba>,
    pub allow_dedup: bool,
    /// Mirror options imply deduplication.
    pub allow_mirror_x: bool,
    pub allow_mirror_y: bool,
    /// Quantize through the display-compensating tone curve instead of
    /// plain bit truncation.
    pub use_color_curve: bool,
    /// Per-bank tile capacity.
    pub max_nb_tiles: [u16; 2],
    /// Offsets added to emitted tile IDs, per bank.
    pub base_tile_ids: [u8; 2],
    /// Offset added to emitted palette IDs.
    pub base_pal_id: u8,
    /// Region of the image to process; `None` processes everything.
    pub input_slice: Option<InputSlice>,
    /// Visit tiles top-to-bottom before left-to-right.
    pub column_major: bool,
    /// Skip this many tiles at the end of the tile data stream.
    pub trim: usize,
    /// Pre-existing tile data to merge against.
    pub input_tileset: Option<PathBuf>,
    /// Artifact destinations; `None` skips the artifact.
    pub output: Option<PathBuf>,
    pub tilemap: Option<PathBuf>,
    pub attrmap: Option<PathBuf>,
    pub palmap: Option<PathBuf>,
    pub palettes: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bit_depth: 2,
            nb_palettes: 8,
            nb_colors_per_pal: 0,
            pal_spec: PalSpec::None,
            bg_color: None,
            allow_dedup: false,
            allow_mirror_x: false,
            allow_mirror_y: false,
            use_color_curve: false,
            max_nb_tiles: [256, 0],
            base_tile_ids: [0, 0],
            base_pal_id: 0,
            input_slice: None,
            column_major: false,
            trim: 0,
            input_tileset: None,
            output: None,
            tilemap: None,
            attrmap: None,
            palmap: None,
            palettes: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_depth(mut self, depth: u8) -> Self {
        self.bit_depth = depth;
        self
    }

    pub fn nb_palettes(mut self, nb: u16) -> Self {
        self.nb_palettes = nb;
        self
    }

    pub fn nb_colors_per_pal(mut self, nb: u8) -> Self {
        self.nb_colors_per_pal = nb;
        self
    }

    pub fn pal_spec(mut self, spec: PalSpec) -> Self {
        self.pal_spec = spec;
        self
    }

    pub fn bg_color(mut self, color: Rgba) -> Self {
        self.bg_color = Some(color);
        self
    }

    pub fn dedup(mut self) -> Self {
        self.allow_dedup = true;
        self
    }

    pub fn mirror_x(mut self) -> Self {
        self.allow_mirror_x = true;
        self
    }

    pub fn mirror_y(mut self) -> Self {
        self.allow_mirror_y = true;
        self
    }

    pub fn color_curve(mut self) -> Self {
        self.use_color_curve = true;
        self
    }

    pub fn input_slice(mut self, slice: InputSlice) -> Self {
        self.input_slice = Some(slice);
        self
    }

    pub fn column_major(mut self) -> Self {
        self.column_major = true;
        self
    }

    pub fn trim(mut self, nb_tiles: usize) -> Self {
        self.trim = nb_tiles;
        self
    }

    pub fn input_tileset(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_tileset = Some(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn tilemap(mut self, path: impl Into<PathBuf>) -> Self {
        self.tilemap = Some(path.into());
        self
    }

    pub fn attrmap(mut self, path: impl Into<PathBuf>) -> Self {
        self.attrmap = Some(path.into());
        self
    }

    pub fn palmap(mut self, path: impl Into<PathBuf>) -> Self {
        self.palmap = Some(path.into());
        self
    }

    pub fn palettes(mut self, path: impl Into<PathBuf>) -> Self {
        self.palettes = Some(path.into());
        self
    }

    /// Checks the record's internal consistency, before any image is read.
    pub fn validate(&self) -> Result<(), GfxError> {
        if !matches!(self.bit_depth, 1 | 2) {
            return Err(GfxError::InvalidBitDepth(self.bit_depth));
        }
        let max = 1u8 << self.bit_depth;
        if self.nb_colors_per_pal > max {
            return Err(GfxError::PaletteTooLarge {
                depth: self.bit_depth,
                max,
                got: self.nb_colors_per_pal,
            });
        }
        if self.nb_palettes > 256 {
            return Err(GfxError::TooManyPalettesRequested(self.nb_palettes));
        }
        for &cap in &self.max_nb_tiles {
            if cap > 256 {
                return Err(GfxError::BankTooLarge(cap));
            }
        }
        if matches!(&self.pal_spec, PalSpec::Explicit(spec) if spec.is_empty()) {
            return Err(GfxError::EmptyPaletteSpec);
        }
        Ok(())
    }

    /// The resolved palette capacity.
    pub fn colors_per_palette(&self) -> u8 {
        if self.nb_colors_per_pal == 0 {
            1 << self.bit_depth
        } else {
            self.nb_colors_per_pal
        }
    }

    /// How many of those slots can hold opaque colors.
    pub fn max_opaque_colors(&self, has_transparency: bool) -> u8 {
        self.colors_per_palette() - u8::from(has_transparency)
    }

    /// Mirror options imply deduplication.
    pub fn dedup_enabled(&self) -> bool {
        self.allow_dedup || self.allow_mirror_x || self.allow_mirror_y
    }
}

/// What a tile's colors resolved to during proto-palette construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSetRef {
    /// Index into the deduplicated color set list.
    Set(usize),
    /// The tile is fully transparent.
    #[default]
    Transparent,
    /// The tile consists solely of the background color.
    Background,
}

/// Per-source-tile metadata. Created while building color sets; the tile
/// ID, bank, and mirror flags are filled in by the deduplicator (or by
/// sequential numbering on the non-deduplicated path).
#[derive(Debug, Clone, Copy, Default)]
pub struct AttrmapEntry {
    pub color_set: ColorSetRef,
    /// Bank-relative, with the configured base already applied.
    pub tile_id: u8,
    pub bank: bool,
    pub x_flip: bool,
    pub y_flip: bool,
}

impl AttrmapEntry {
    /// The packed palette this tile uses. Transparent and background tiles
    /// default to palette 0.
    pub fn pal_id(&self, mappings: &[usize]) -> usize {
        match self.color_set {
            ColorSetRef::Set(id) => mappings[id],
            ColorSetRef::Transparent | ColorSetRef::Background => {
                mappings.first().copied().unwrap_or(0)
            }
        }
    }
}

/// Runs the whole pipeline on a PNG read from `input`, writing whichever
/// artifacts the options configure. Recoverable problems are reported into
/// `diag`; the pipeline stops at the next stage boundary once any
/// error-severity event has been recorded.
pub fn process<R: Read>(
    input: R,
    options: &Options,
    diag: &mut Diagnostics,
) -> Result<(), GfxError> {
    options.validate()?;

    log::info!("reading tiles...");
    let image = Image::decode(input, options, diag)?;
    let has_transparency = image.has_transparent_pixels();
    let max_opaque = options.max_opaque_colors(has_transparency);

    if options.pal_spec == PalSpec::Dmg {
        if has_transparency {
            return Err(GfxError::DmgWithTransparency);
        }
        if !image.is_suitable_for_grayscale(max_opaque) {
            return Err(GfxError::DmgNotGrayscale);
        }
    }

    let (color_sets, mut attrmap) = build_color_sets(&image, options, max_opaque, diag)?;
    log::debug!("image contains {} color set(s)", color_sets.len());
    diag.checkpoint()?;

    let (mappings, palettes) = match &options.pal_spec {
        PalSpec::None | PalSpec::Dmg => generate_palettes(&color_sets, &image, options, max_opaque),
        PalSpec::Explicit(spec) => {
            make_palettes_as_specified(&color_sets, spec, options, has_transparency, diag)
        }
        PalSpec::Embedded => {
            let spec = embedded_spec(&image, max_opaque)?;
            make_palettes_as_specified(&color_sets, &spec, options, has_transparency, diag)
        }
    };
    log::debug!("packed into {} palette(s)", palettes.len());

    if palettes.len() > usize::from(options.nb_palettes) {
        return Err(GfxError::TooManyPalettes {
            generated: palettes.len(),
            max: options.nb_palettes,
        });
    }
    diag.checkpoint()?;

    if let Some(path) = &options.palettes {
        emit(path, |out| {
            output::write_palettes(out, &palettes, options.colors_per_palette())
        })?;
    }

    let budget = usize::from(options.max_nb_tiles[0]) + usize::from(options.max_nb_tiles[1]);
    let width_tiles = image.width_tiles(options) as usize;
    let height_tiles = image.height_tiles(options) as usize;

    if !options.dedup_enabled() {
        if options.input_tileset.is_some() {
            return Err(GfxError::TilesetRequiresDedup);
        }
        let nb_tiles = width_tiles * height_tiles;
        if nb_tiles > budget {
            return Err(GfxError::TileBudgetExceeded {
                count: nb_tiles,
                max0: options.max_nb_tiles[0],
                max1: options.max_nb_tiles[1],
            });
        }

        output::assign_sequential_ids(&mut attrmap, options);
        if let Some(path) = &options.output {
            log::info!("generating unoptimized tile data...");
            emit(path, |out| {
                output::write_unoptimized_tile_data(
                    out, &image, &attrmap, &palettes, &mappings, options,
                )
            })?;
        }
        let ordered =
            output::row_major_order(&attrmap, width_tiles, height_tiles, options.column_major);
        write_maps(&ordered, &mappings, options)?;
    } else {
        log::info!("deduplicating tiles...");
        let tileset_data = match &options.input_tileset {
            Some(path) => Some(fs::read(path)?),
            None => None,
        };
        let tiles = tile::dedup_tiles(
            &image,
            &mut attrmap,
            &palettes,
            &mappings,
            options,
            tileset_data.as_deref(),
            diag,
        )?;
        log::debug!("deduplicated to {} tile(s)", tiles.len());

        if tiles.len() > budget {
            return Err(GfxError::TileBudgetExceeded {
                count: tiles.len(),
                max0: options.max_nb_tiles[0],
                max1: options.max_nb_tiles[1],
            });
        }
        diag.checkpoint()?;

        if let Some(path) = &options.output {
            emit(path, |out| output::write_tile_data(out, &tiles, options))?;
        }
        let ordered =
            output::row_major_order(&attrmap, width_tiles, height_tiles, options.column_major);
        write_maps(&ordered, &mappings, options)?;
    }

    Ok(())
}

/// Convenience wrapper opening the input image from a path.
pub fn process_file(
    path: impl AsRef<Path>,
    options: &Options,
    diag: &mut Diagnostics,
) -> Result<(), GfxError> {
    let file = fs::File::open(path.as_ref())?;
    process(io::BufReader::new(file), options, diag)
}

/// Emits just the palette file from an explicit palette spec, with no input
/// image at all.
pub fn process_palettes_only(options: &Options) -> Result<(), GfxError> {
    options.validate()?;
    let PalSpec::Explicit(spec) = &options.pal_spec else {
        return Err(GfxError::PaletteSpecRequired);
    };

    let palettes: Vec<Palette> = spec
        .iter()
        .map(|s| Palette::from_spec(s, options.use_color_curve, false))
        .collect();
    if palettes.len() > usize::from(options.nb_palettes) {
        return Err(GfxError::TooManyPalettes {
            generated: palettes.len(),
            max: options.nb_palettes,
        });
    }

    if let Some(path) = &options.palettes {
        emit(path, |out| {
            output::write_palettes(out, &palettes, options.colors_per_palette())
        })?;
    }
    Ok(())
}

/// Walks the image's tiles, building the deduplicated color set list and
/// one attrmap entry per tile.
fn build_color_sets(
    image: &Image,
    options: &Options,
    max_opaque: u8,
    diag: &mut Diagnostics,
) -> Result<(Vec<ColorSet>, Vec<AttrmapEntry>), GfxError> {
    let has_transparency = image.has_transparent_pixels();
    let bg_color = options
        .bg_color
        .map(|c| GbColor::from_rgba(c, options.use_color_curve));

    let mut color_sets: Vec<ColorSet> = Vec::new();
    let mut attrmap: Vec<AttrmapEntry> = Vec::new();

    for tile in image.tiles(options) {
        let mut attr = AttrmapEntry::default();

        // Distinct colors for packing. The transparent color participates
        // only when the image as a whole has no transparency; otherwise it
        // is covered by the reserved palette slot.
        let mut tile_colors: BTreeSet<GbColor> = BTreeSet::new();
        for dy in 0..8 {
            for dx in 0..8 {
                let color = GbColor::from_rgba(tile.pixel(dx, dy), options.use_color_curve);
                if !color.is_transparent() || !has_transparency {
                    tile_colors.insert(color);
                }
            }
        }

        if tile_colors.len() > usize::from(max_opaque) {
            diag.report(Diagnostic::TooManyColors {
                x: tile.x,
                y: tile.y,
                count: tile_colors.len(),
                max: max_opaque,
            });
            attrmap.push(attr);
            continue;
        }

        if tile_colors.is_empty() {
            attr.color_set = ColorSetRef::Transparent;
            attrmap.push(attr);
            continue;
        }

        if let Some(bg) = bg_color {
            if tile_colors.contains(&bg) {
                if tile_colors.len() == 1 {
                    attr.color_set = ColorSetRef::Background;
                    attrmap.push(attr);
                    continue;
                }
                return Err(GfxError::BgColorInTile {
                    x: tile.x,
                    y: tile.y,
                    bg_color: options.bg_color.map(color::css).unwrap_or_default(),
                });
            }
        }

        let set: ColorSet = tile_colors.into_iter().collect();

        // Merge into the running list: an existing superset absorbs us, and
        // we absorb an existing subset by overwriting its slot in place
        // (earlier IDs pointing at it stay valid).
        let mut assigned = None;
        for (id, existing) in color_sets.iter_mut().enumerate() {
            match set.compare(existing) {
                Comparison::WeContainThem => {
                    *existing = set;
                    assigned = Some(id);
                    break;
                }
                Comparison::TheyContainUs => {
                    assigned = Some(id);
                    break;
                }
                Comparison::Neither => {}
            }
        }

        attr.color_set = ColorSetRef::Set(assigned.unwrap_or_else(|| {
            color_sets.push(set);
            color_sets.len() - 1
        }));
        attrmap.push(attr);
    }

    Ok((color_sets, attrmap))
}

/// Packs color sets into palettes and orders the colors within each.
fn generate_palettes(
    color_sets: &[ColorSet],
    image: &Image,
    options: &Options,
    max_opaque: u8,
) -> (Vec<usize>, Vec<Palette>) {
    let has_transparency = image.has_transparent_pixels();
    let (mappings, nb_palettes) = pack::overload_and_remove(color_sets, usize::from(max_opaque));

    let mut palettes = vec![Palette::new(has_transparency); nb_palettes];
    for (set_id, &pal_id) in mappings.iter().enumerate() {
        for color in color_sets[set_id].iter() {
            palettes[pal_id].add_color(color);
        }
    }
    // A fully transparent image still needs one palette to encode against.
    if palettes.is_empty() && has_transparency {
        palettes.push(Palette::new(true));
    }

    if options.pal_spec == PalSpec::Dmg {
        palette::sort_grayscale(&mut palettes, image.colors(), max_opaque);
    } else if let Some(spec) = image.embedded_palette() {
        palette::sort_indexed(&mut palettes, spec, options.use_color_curve);
    } else if image.is_suitable_for_grayscale(max_opaque) {
        palette::sort_grayscale(&mut palettes, image.colors(), max_opaque);
    } else {
        palette::sort_rgb(&mut palettes);
    }

    (mappings, palettes)
}

/// The explicit-spec path: palettes are taken as given, and each color set
/// must be a subset of one of them.
fn make_palettes_as_specified(
    color_sets: &[ColorSet],
    spec: &[[Option<Rgba>; MAX_COLORS]],
    options: &Options,
    has_transparency: bool,
    diag: &mut Diagnostics,
) -> (Vec<usize>, Vec<Palette>) {
    let palettes: Vec<Palette> = spec
        .iter()
        .map(|s| Palette::from_spec(s, options.use_color_curve, has_transparency))
        .collect();

    let mut mappings = vec![0usize; color_sets.len()];
    for (i, set) in color_sets.iter().enumerate() {
        match palettes
            .iter()
            .position(|pal| set.iter().all(|color| pal.contains(color)))
        {
            Some(pal_id) => mappings[i] = pal_id,
            None => {
                // Mapping 0 is a placeholder; the checkpoint right after
                // palette generation aborts before it can be used.
                diag.report(Diagnostic::UnmappableColors {
                    colors: set.iter().collect(),
                });
            }
        }
    }

    (mappings, palettes)
}

/// Turns the PNG's embedded palette into a single explicit palette spec.
fn embedded_spec(
    image: &Image,
    max_opaque: u8,
) -> Result<Vec<[Option<Rgba>; MAX_COLORS]>, GfxError> {
    let Some(embedded) = image.embedded_palette() else {
        return Err(GfxError::NoEmbeddedPalette);
    };
    let mut spec = [None; MAX_COLORS];
    for (slot, &rgba) in spec.iter_mut().zip(embedded.iter().take(usize::from(max_opaque))) {
        *slot = Some(rgba);
    }
    Ok(vec![spec])
}

fn write_maps(
    attrmap: &[AttrmapEntry],
    mappings: &[usize],
    options: &Options,
) -> Result<(), GfxError> {
    if let Some(path) = &options.tilemap {
        emit(path, |out| output::write_tilemap(out, attrmap))?;
    }
    if let Some(path) = &options.attrmap {
        emit(path, |out| output::write_attrmap(out, attrmap, mappings, options))?;
    }
    if let Some(path) = &options.palmap {
        emit(path, |out| output::write_palmap(out, attrmap, mappings, options))?;
    }
    Ok(())
}

/// Scopes a buffered file handle around one emitter: created on entry,
/// flushed and closed on every exit path.
fn emit<F>(path: &Path, write: F) -> Result<(), GfxError>
where
    F: FnOnce(&mut io::BufWriter<fs::File>) -> io::Result<()>,
{
    let mut out = io::BufWriter::new(fs::File::create(path)?);
    write(&mut out)?;
    out.flush()?;
    Ok(())
}
