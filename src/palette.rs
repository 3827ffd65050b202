//! Hardware palettes: fixed-capacity ordered color containers, plus the
//! strategies used to order colors within each packed palette.

use rgb::RGBA;

use crate::color::{self, GbColor};
use crate::image::ImagePalette;

/// Hardware palette capacity at the maximum bit depth.
pub const MAX_COLORS: usize = 4;

/// A palette as it will be emitted: up to [`MAX_COLORS`] slots, where
/// [`GbColor::EMPTY`] marks an unused slot. When the image contains
/// transparency, slot 0 holds the transparent sentinel and opaque colors
/// occupy the remaining slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: [GbColor; MAX_COLORS],
    has_transparency: bool,
}

impl Palette {
    pub fn new(has_transparency: bool) -> Self {
        let mut colors = [GbColor::EMPTY; MAX_COLORS];
        if has_transparency {
            colors[0] = GbColor::TRANSPARENT;
        }
        Self {
            colors,
            has_transparency,
        }
    }

    /// Builds a palette from a user-specified color list, preserving slot
    /// positions (gaps included). Transparent spec entries are skipped; the
    /// reserved slot already covers them.
    pub fn from_spec(
        spec: &[Option<RGBA<u8>>; MAX_COLORS],
        use_curve: bool,
        has_transparency: bool,
    ) -> Self {
        let mut pal = Palette::new(has_transparency);
        let offset = usize::from(has_transparency);
        for (i, slot) in spec.iter().enumerate() {
            let Some(rgba) = slot else { continue };
            if color::is_transparent(*rgba) {
                continue;
            }
            if offset + i < MAX_COLORS {
                pal.colors[offset + i] = GbColor::from_rgba(*rgba, use_curve);
            }
        }
        pal
    }

    /// Inserts a color into the first free slot. Already-present colors are
    /// left alone. The packer guarantees the palette never overflows.
    pub fn add_color(&mut self, color: GbColor) {
        for slot in &mut self.colors {
            if *slot == color {
                return;
            }
            if *slot == GbColor::EMPTY {
                *slot = color;
                return;
            }
        }
        debug_assert!(false, "palette overflow");
    }

    /// The 2bpp index of a color. Transparent pixels always map to slot 0.
    /// The color must be present; the packing stage guarantees this for
    /// every pixel that reaches the encoder.
    pub fn index_of(&self, color: GbColor) -> u8 {
        if color.is_transparent() {
            return 0;
        }
        let offset = usize::from(self.has_transparency);
        for (i, &slot) in self.colors.iter().enumerate().skip(offset) {
            if slot == color {
                return i as u8;
            }
        }
        debug_assert!(false, "color {color:?} not in palette");
        0
    }

    pub fn contains(&self, color: GbColor) -> bool {
        self.opaque_colors().any(|c| c == color)
    }

    /// Number of used slots, counting gaps and the reserved transparency
    /// slot: the index one past the last occupied slot.
    pub fn len(&self) -> usize {
        self.colors
            .iter()
            .rposition(|&c| c != GbColor::EMPTY)
            .map_or(0, |i| i + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The opaque colors, skipping the reserved transparency slot and any
    /// gaps left by an explicit spec.
    pub fn opaque_colors(&self) -> impl Iterator<Item = GbColor> + '_ {
        let offset = usize::from(self.has_transparency);
        self.colors[offset..]
            .iter()
            .copied()
            .filter(|&c| c != GbColor::EMPTY)
    }

    /// All slots in emission order, [`GbColor::EMPTY`] included.
    pub fn slots(&self) -> &[GbColor; MAX_COLORS] {
        &self.colors
    }

    fn replace_opaque(&mut self, sorted: &[GbColor]) {
        let offset = usize::from(self.has_transparency);
        for slot in &mut self.colors[offset..] {
            *slot = GbColor::EMPTY;
        }
        for (slot, &color) in self.colors[offset..].iter_mut().zip(sorted) {
            *slot = color;
        }
    }
}

/// DMG-style ordering: each gray color goes to its exact brightness bin,
/// brightest in slot 0. Only applied when every color landed in a distinct
/// bin, which grayscale suitability has already established.
pub fn sort_grayscale(palettes: &mut [Palette], image_palette: &ImagePalette, nb_bins: u8) {
    for pal in palettes {
        let offset = usize::from(pal.has_transparency);
        let mut sorted = [GbColor::EMPTY; MAX_COLORS];
        for color in pal.opaque_colors() {
            // The first RGBA registered for this color decides its bin.
            let Some(rgba) = image_palette.first_rgba(color) else {
                continue;
            };
            let bin = usize::from(color::gray_index(rgba, nb_bins));
            sorted[bin] = color;
        }
        let keep = MAX_COLORS - offset;
        pal.replace_opaque(&sorted[..keep]);
    }
}

/// Embedded-palette ordering: colors take the relative order they have in
/// the indexed PNG's palette; colors the spec does not mention keep their
/// previous relative order, after the specified ones.
pub fn sort_indexed(palettes: &mut [Palette], spec: &[RGBA<u8>], use_curve: bool) {
    let spec_colors: Vec<GbColor> = spec
        .iter()
        .map(|&rgba| GbColor::from_rgba(rgba, use_curve))
        .collect();
    for pal in palettes {
        let mut colors: Vec<GbColor> = pal.opaque_colors().collect();
        colors.sort_by_key(|c| {
            spec_colors
                .iter()
                .position(|s| s == c)
                .unwrap_or(usize::MAX)
        });
        pal.replace_opaque(&colors);
    }
}

/// General-purpose ordering: brightest color first, by luma-weighted value
/// on the 8-bit-expanded channels, ties broken by the raw color value.
pub fn sort_rgb(palettes: &mut [Palette]) {
    for pal in palettes {
        let mut colors: Vec<GbColor> = pal.opaque_colors().collect();
        colors.sort_by_key(|&c| (std::cmp::Reverse(c.luma()), c));
        pal.replace_opaque(&colors);
    }
}
