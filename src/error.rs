use thiserror::Error;

use crate::color::GbColor;

/// Fatal pipeline errors. Any of these aborts processing immediately; nothing
/// is flushed to the output files.
#[derive(Debug, Error)]
pub enum GfxError {
    #[error("input ended after {len} bytes, too short to be a PNG")]
    InputTooShort { len: usize },

    #[error("input is not a PNG image")]
    NotPng,

    #[error("failed to decode PNG")]
    PngDecode(#[from] png::DecodingError),

    #[error("image dimensions {width}x{height} are not multiples of 8")]
    BadDimensions { width: u32, height: u32 },

    #[error(
        "slice of {width}x{height} tiles at ({left}, {top}) is outside the {image_width}x{image_height} image"
    )]
    SliceOutOfBounds {
        left: u16,
        top: u16,
        width: u16,
        height: u16,
        image_width: u32,
        image_height: u32,
    },

    #[error("bit depth must be 1 or 2, got {0}")]
    InvalidBitDepth(u8),

    #[error("{depth}bpp palettes can only contain {max} colors, not {got}")]
    PaletteTooLarge { depth: u8, max: u8, got: u8 },

    #[error("at most 256 palettes are supported, requested {0}")]
    TooManyPalettesRequested(u16),

    #[error("a tile bank can hold at most 256 tiles, requested {0}")]
    BankTooLarge(u16),

    #[error("an input tileset requires tile deduplication to be enabled")]
    TilesetRequiresDedup,

    #[error("tile at ({x}, {y}) contains the background color #{bg_color:08x} among others")]
    BgColorInTile { x: u32, y: u32, bg_color: u32 },

    #[error("generated {generated} palettes, over the maximum of {max}")]
    TooManyPalettes { generated: usize, max: u16 },

    #[error("image contains transparent pixels, incompatible with a DMG palette")]
    DmgWithTransparency,

    #[error("image contains too many or non-gray colors, incompatible with a DMG palette")]
    DmgNotGrayscale,

    #[error("an embedded palette was requested, but the PNG does not contain one")]
    NoEmbeddedPalette,

    #[error("emitting palettes without an input image requires an explicit palette spec")]
    PaletteSpecRequired,

    #[error("an explicit palette spec must contain at least one palette")]
    EmptyPaletteSpec,

    #[error("input tileset is {len} bytes, not a multiple of the {tile_size}-byte tile size")]
    TilesetNotMultiple { len: usize, tile_size: usize },

    #[error("image contains {count} tiles, exceeding the limit of {max0} + {max1}")]
    TileBudgetExceeded { count: usize, max0: u16, max1: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("aborting due to {count} earlier error(s)")]
    EarlierErrors { count: usize },
}

/// A recoverable event emitted by the pipeline. Rendering these for users is
/// the caller's concern; the core only records them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error(
        "color #{css:08x} is neither transparent (alpha < 16) nor opaque (alpha >= 240) \
         [first seen at x: {x}, y: {y}]"
    )]
    IndeterminateAlpha { css: u32, x: u32, y: u32 },

    #[error(
        "fusing colors #{first:08x} and #{second:08x} into Game Boy color ${gb_color:04x} \
         [first seen at x: {x}, y: {y}]"
    )]
    ColorFusion {
        first: u32,
        second: u32,
        gb_color: u16,
        x: u32,
        y: u32,
    },

    #[error("tile at ({x}, {y}) has {count} colors, more than {max}")]
    TooManyColors { x: u32, y: u32, count: usize, max: u8 },

    #[error("failed to fit tile colors {colors:?} in the specified palettes")]
    UnmappableColors { colors: Vec<GbColor> },

    #[error("the input tileset's tile #{tile_id} was deduplicated against an earlier tile")]
    TilesetTileReused { tile_id: u16 },

    #[error(
        "tile at ({x}, {y}) is not within the input tileset, and no tile data output is configured"
    )]
    TileNotInTileset { x: u32, y: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::ColorFusion { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Collects recoverable diagnostics. Error-severity events accumulate in a
/// counter which is consulted at stage checkpoints; processing continues in
/// between so that one pass reports as much as possible.
#[derive(Debug, Default)]
pub struct Diagnostics {
    events: Vec<Diagnostic>,
    nb_errors: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, event: Diagnostic) {
        match event.severity() {
            Severity::Warning => log::warn!("{event}"),
            Severity::Error => {
                log::error!("{event}");
                self.nb_errors += 1;
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[Diagnostic] {
        &self.events
    }

    pub fn error_count(&self) -> usize {
        self.nb_errors
    }

    /// Aborts if any error-severity event has been reported so far.
    pub fn checkpoint(&self) -> Result<(), GfxError> {
        if self.nb_errors != 0 {
            Err(GfxError::EarlierErrors {
                count: self.nb_errors,
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fusion_is_a_warning() {
        let mut diag = Diagnostics::new();
        diag.report(Diagnostic::ColorFusion {
            first: 0xF8F8F8FF,
            second: 0xFFFFFFFF,
            gb_color: 0x7FFF,
            x: 0,
            y: 0,
        });
        assert_eq!(diag.error_count(), 0);
        assert!(diag.checkpoint().is_ok());
        assert_eq!(diag.events().len(), 1);
    }

    #[test]
    fn errors_trip_the_checkpoint() {
        let mut diag = Diagnostics::new();
        diag.report(Diagnostic::TooManyColors {
            x: 0,
            y: 0,
            count: 5,
            max: 4,
        });
        assert_eq!(diag.error_count(), 1);
        assert!(matches!(
            diag.checkpoint(),
            Err(GfxError::EarlierErrors { count: 1 })
        ));
    }
}
