//! PNG ingestion. Decodes any supported color representation into an
//! RGBA8888 pixel grid, registering every color along the way, and exposes
//! the 8x8 tile windows the rest of the pipeline works on.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use rgb::RGBA;

use crate::color::{self, GbColor};
use crate::error::{Diagnostic, Diagnostics, GfxError};
use crate::Options;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// The image-wide color registry: maps each quantized color to the first
/// RGBA value that produced it. Insertion-only; used to report fusions, to
/// decide grayscale suitability, and to seed the grayscale sort.
#[derive(Debug, Default)]
pub struct ImagePalette {
    slots: BTreeMap<u16, RGBA<u8>>,
}

impl ImagePalette {
    /// Registers a color. If the slot already holds a *different* RGBA value
    /// (same quantized color), that earlier value is returned so the caller
    /// can report the fusion.
    fn register(&mut self, gb_color: GbColor, rgba: RGBA<u8>) -> Option<RGBA<u8>> {
        match self.slots.get(&gb_color.0) {
            None => {
                self.slots.insert(gb_color.0, rgba);
                None
            }
            Some(&first) if first != rgba => Some(first),
            Some(_) => None,
        }
    }

    pub fn first_rgba(&self, color: GbColor) -> Option<RGBA<u8>> {
        self.slots.get(&color.0).copied()
    }

    /// Distinct opaque colors registered so far.
    pub fn opaque_len(&self) -> usize {
        self.opaque_colors().count()
    }

    /// Opaque colors with their first-seen RGBA, in ascending color order.
    pub fn opaque_colors(&self) -> impl Iterator<Item = (GbColor, RGBA<u8>)> + '_ {
        self.slots
            .iter()
            .filter(|&(&raw, _)| !GbColor(raw).is_transparent())
            .map(|(&raw, &rgba)| (GbColor(raw), rgba))
    }
}

/// A decoded image: RGBA8888 pixels plus everything the decode pass learned
/// about it (registered colors, embedded palette, transparency).
#[derive(Debug)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<RGBA<u8>>,
    colors: ImagePalette,
    color_type: png::ColorType,
    embedded_palette: Option<Vec<RGBA<u8>>>,
    has_transparent_pixels: bool,
}

impl Image {
    /// Decodes a PNG from `input`, converting everything to RGBA8888 and
    /// registering every pixel's color. Interlaced (Adam7) images are
    /// deinterlaced before tile iteration can begin.
    pub fn decode<R: Read>(
        mut input: R,
        options: &Options,
        diag: &mut Diagnostics,
    ) -> Result<Image, GfxError> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        if data.len() < PNG_SIGNATURE.len() {
            return Err(GfxError::InputTooShort { len: data.len() });
        }
        if data[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
            return Err(GfxError::NotPng);
        }

        let mut decoder = png::Decoder::new(Cursor::new(&data));
        decoder.set_transformations(
            png::Transformations::EXPAND
                | png::Transformations::STRIP_16
                | png::Transformations::ALPHA,
        );
        let mut reader = decoder.read_info()?;

        let (width, height, color_type, embedded_palette) = {
            let info = reader.info();
            let embedded = info.palette.as_ref().map(|plte| {
                let trns = info.trns.as_deref().unwrap_or(&[]);
                plte.chunks_exact(3)
                    .enumerate()
                    .map(|(i, c)| RGBA::new(c[0], c[1], c[2], trns.get(i).copied().unwrap_or(0xFF)))
                    .collect::<Vec<_>>()
            });
            (info.width, info.height, info.color_type, embedded)
        };

        log::debug!("input image: {width}x{height} pixels, {color_type:?}");
        if let Some(pal) = &embedded_palette {
            log::debug!("embedded palette has {} colors", pal.len());
        }

        validate_geometry(width, height, options)?;

        let mut buf = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf)?;
        buf.truncate(frame.buffer_size());

        let pixels: Vec<RGBA<u8>> = match frame.color_type {
            png::ColorType::Rgba => buf
                .chunks_exact(4)
                .map(|c| RGBA::new(c[0], c[1], c[2], c[3]))
                .collect(),
            png::ColorType::GrayscaleAlpha => buf
                .chunks_exact(2)
                .map(|c| RGBA::new(c[0], c[0], c[0], c[1]))
                .collect(),
            // The requested transformations leave no other layout.
            _ => return Err(GfxError::NotPng),
        };

        let mut image = Image {
            width,
            height,
            pixels,
            colors: ImagePalette::default(),
            color_type,
            embedded_palette,
            has_transparent_pixels: false,
        };
        image.register_colors(options, diag);
        Ok(image)
    }

    /// The color-registrar pass: classify every pixel's alpha, quantize, and
    /// record first-seen RGBA values. Fusions are warned once per pair, and
    /// indeterminate alphas error once per distinct pixel value.
    fn register_colors(&mut self, options: &Options, diag: &mut Diagnostics) {
        let bg_is_transparent = options
            .bg_color
            .is_some_and(|bg| color::is_transparent(bg));
        let mut fused_pairs: Vec<(u32, u32)> = Vec::new();
        let mut indeterminates: Vec<u32> = Vec::new();

        for y in 0..self.height {
            for x in 0..self.width {
                let px = self.pixels[(y * self.width + x) as usize];
                if !color::is_transparent(px) && !color::is_opaque(px) {
                    let css = color::css(px);
                    if !indeterminates.contains(&css) {
                        diag.report(Diagnostic::IndeterminateAlpha { css, x, y });
                        indeterminates.push(css);
                    }
                    continue;
                }

                let gb_color = GbColor::from_rgba(px, options.use_color_curve);
                if gb_color.is_transparent() && !bg_is_transparent {
                    self.has_transparent_pixels = true;
                }
                if let Some(other) = self.colors.register(gb_color, px) {
                    let pair = (color::css(px), color::css(other));
                    if !fused_pairs.contains(&pair) {
                        diag.report(Diagnostic::ColorFusion {
                            first: pair.0,
                            second: pair.1,
                            gb_color: gb_color.0,
                            x,
                            y,
                        });
                        fused_pairs.push(pair);
                    }
                }
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> RGBA<u8> {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn colors(&self) -> &ImagePalette {
        &self.colors
    }

    pub fn color_type(&self) -> png::ColorType {
        self.color_type
    }

    /// The PLTE entries (with tRNS alpha) of an indexed PNG, if present.
    pub fn embedded_palette(&self) -> Option<&[RGBA<u8>]> {
        self.embedded_palette.as_deref()
    }

    pub fn has_transparent_pixels(&self) -> bool {
        self.has_transparent_pixels
    }

    /// Width of the processed region, in tiles.
    pub fn width_tiles(&self, options: &Options) -> u32 {
        match &options.input_slice {
            Some(slice) => u32::from(slice.width),
            None => self.width / 8,
        }
    }

    /// Height of the processed region, in tiles.
    pub fn height_tiles(&self, options: &Options) -> u32 {
        match &options.input_slice {
            Some(slice) => u32::from(slice.height),
            None => self.height / 8,
        }
    }

    /// Visits the slice's 8x8 tiles in row-major order, or column-major when
    /// so configured. Each call returns a fresh single-pass iterator.
    pub fn tiles<'a>(&'a self, options: &Options) -> Tiles<'a> {
        let (left, top) = match &options.input_slice {
            Some(slice) => (u32::from(slice.left) * 8, u32::from(slice.top) * 8),
            None => (0, 0),
        };
        Tiles {
            image: self,
            column_major: options.column_major,
            left,
            top,
            width: self.width_tiles(options) * 8,
            height: self.height_tiles(options) * 8,
            x: 0,
            y: 0,
            done: false,
        }
    }

    /// An image qualifies for grayscale ordering when all of its opaque
    /// colors are gray, there are few enough of them, and no two fall into
    /// the same brightness bin.
    pub fn is_suitable_for_grayscale(&self, max_opaque_colors: u8) -> bool {
        if self.colors.opaque_len() > usize::from(max_opaque_colors) {
            return false;
        }
        let mut bins = 0u8;
        for (_, rgba) in self.colors.opaque_colors() {
            if !color::is_gray(rgba) {
                return false;
            }
            let mask = 1 << color::gray_index(rgba, max_opaque_colors);
            if bins & mask != 0 {
                return false;
            }
            bins |= mask;
        }
        true
    }
}

fn validate_geometry(width: u32, height: u32, options: &Options) -> Result<(), GfxError> {
    match &options.input_slice {
        None => {
            if width % 8 != 0 || height % 8 != 0 {
                return Err(GfxError::BadDimensions { width, height });
            }
        }
        Some(slice) => {
            let right = (u32::from(slice.left) + u32::from(slice.width)) * 8;
            let bottom = (u32::from(slice.top) + u32::from(slice.height)) * 8;
            if right > width || bottom > height {
                return Err(GfxError::SliceOutOfBounds {
                    left: slice.left,
                    top: slice.top,
                    width: slice.width,
                    height: slice.height,
                    image_width: width,
                    image_height: height,
                });
            }
        }
    }
    Ok(())
}

/// An 8x8 window into the image. `x` and `y` are the top-left pixel
/// coordinates within the full image.
#[derive(Debug, Clone, Copy)]
pub struct Tile<'a> {
    image: &'a Image,
    pub x: u32,
    pub y: u32,
}

impl Tile<'_> {
    pub fn pixel(&self, dx: u32, dy: u32) -> RGBA<u8> {
        self.image.pixel(self.x + dx, self.y + dy)
    }
}

/// Lazy single-pass tile visitor. Not restartable; ask the image for a new
/// one to iterate again.
#[derive(Debug)]
pub struct Tiles<'a> {
    image: &'a Image,
    column_major: bool,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    done: bool,
}

impl<'a> Iterator for Tiles<'a> {
    type Item = Tile<'a>;

    fn next(&mut self) -> Option<Tile<'a>> {
        if self.done || self.width == 0 || self.height == 0 {
            return None;
        }
        let tile = Tile {
            image: self.image,
            x: self.left + self.x,
            y: self.top + self.y,
        };
        if self.column_major {
            self.y += 8;
            if self.y == self.height {
                self.y = 0;
                self.x += 8;
                if self.x == self.width {
                    self.done = true;
                }
            }
        } else {
            self.x += 8;
            if self.x == self.width {
                self.x = 0;
                self.y += 8;
                if self.y == self.height {
                    self.done = true;
                }
            }
        }
        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;

    fn encode_png(width: u32, height: u32, pixels: &[RGBA<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            let bytes: Vec<u8> = pixels.iter().flat_map(|p| [p.r, p.g, p.b, p.a]).collect();
            writer.write_image_data(&bytes).unwrap();
        }
        out
    }

    #[test]
    fn decodes_rgba_and_registers_colors() {
        let pixels = vec![RGBA::new(255, 0, 0, 255); 64];
        let data = encode_png(8, 8, &pixels);
        let options = Options::default();
        let mut diag = Diagnostics::new();
        let image = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();

        assert_eq!(image.width(), 8);
        assert_eq!(image.height(), 8);
        assert_eq!(image.colors().opaque_len(), 1);
        assert!(!image.has_transparent_pixels());
        assert!(diag.events().is_empty());
    }

    #[test]
    fn rejects_non_png_input() {
        let options = Options::default();
        let mut diag = Diagnostics::new();
        assert!(matches!(
            Image::decode(Cursor::new(b"GIF89a__".to_vec()), &options, &mut diag),
            Err(GfxError::NotPng)
        ));
        assert!(matches!(
            Image::decode(Cursor::new(b"abc".to_vec()), &options, &mut diag),
            Err(GfxError::InputTooShort { len: 3 })
        ));
    }

    #[test]
    fn rejects_unaligned_dimensions() {
        let pixels = vec![RGBA::new(0, 0, 0, 255); 7 * 8];
        let data = encode_png(7, 8, &pixels);
        let options = Options::default();
        let mut diag = Diagnostics::new();
        assert!(matches!(
            Image::decode(Cursor::new(data), &options, &mut diag),
            Err(GfxError::BadDimensions { width: 7, .. })
        ));
    }

    #[test]
    fn fusion_warns_once_per_pair() {
        // Two distinct RGBA values that quantize to the same 5-bit color.
        let mut pixels = vec![RGBA::new(248, 0, 0, 255); 32];
        pixels.extend(vec![RGBA::new(255, 0, 0, 255); 32]);
        let data = encode_png(8, 8, &pixels);
        let options = Options::default();
        let mut diag = Diagnostics::new();
        let image = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();

        assert_eq!(image.colors().opaque_len(), 1);
        let fusions = diag
            .events()
            .iter()
            .filter(|e| matches!(e, Diagnostic::ColorFusion { .. }))
            .count();
        assert_eq!(fusions, 1);
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn indeterminate_alpha_errors_once_per_value() {
        let mut pixels = vec![RGBA::new(10, 20, 30, 128); 32];
        pixels.extend(vec![RGBA::new(10, 20, 30, 255); 32]);
        let data = encode_png(8, 8, &pixels);
        let options = Options::default();
        let mut diag = Diagnostics::new();
        let _ = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();

        assert_eq!(diag.error_count(), 1);
        assert!(matches!(
            diag.events()[0],
            Diagnostic::IndeterminateAlpha { css: 0x0A141E80, .. }
        ));
    }

    #[test]
    fn transparent_pixels_are_detected() {
        let mut pixels = vec![RGBA::new(255, 255, 255, 255); 32];
        pixels.extend(vec![RGBA::new(0, 0, 0, 0); 32]);
        let data = encode_png(8, 8, &pixels);
        let options = Options::default();
        let mut diag = Diagnostics::new();
        let image = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();
        assert!(image.has_transparent_pixels());
    }

    #[test]
    fn tile_visitor_orders() {
        let pixels = vec![RGBA::new(0, 0, 0, 255); 16 * 16];
        let data = encode_png(16, 16, &pixels);
        let mut diag = Diagnostics::new();

        let options = Options::default();
        let image = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();
        let coords: Vec<(u32, u32)> = image.tiles(&options).map(|t| (t.x, t.y)).collect();
        assert_eq!(coords, vec![(0, 0), (8, 0), (0, 8), (8, 8)]);

        let columns = Options {
            column_major: true,
            ..Options::default()
        };
        let coords: Vec<(u32, u32)> = image.tiles(&columns).map(|t| (t.x, t.y)).collect();
        assert_eq!(coords, vec![(0, 0), (0, 8), (8, 0), (8, 8)]);
    }

    #[test]
    fn slice_restricts_visitation() {
        let pixels = vec![RGBA::new(0, 0, 0, 255); 24 * 16];
        let data = encode_png(24, 16, &pixels);
        let mut diag = Diagnostics::new();
        let options = Options {
            input_slice: Some(crate::InputSlice {
                left: 1,
                top: 0,
                width: 2,
                height: 1,
            }),
            ..Options::default()
        };
        let image = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();
        let coords: Vec<(u32, u32)> = image.tiles(&options).map(|t| (t.x, t.y)).collect();
        assert_eq!(coords, vec![(8, 0), (16, 0)]);
    }

    #[test]
    fn slice_out_of_bounds_is_fatal() {
        let pixels = vec![RGBA::new(0, 0, 0, 255); 8 * 8];
        let data = encode_png(8, 8, &pixels);
        let mut diag = Diagnostics::new();
        let options = Options {
            input_slice: Some(crate::InputSlice {
                left: 0,
                top: 0,
                width: 2,
                height: 1,
            }),
            ..Options::default()
        };
        assert!(matches!(
            Image::decode(Cursor::new(data), &options, &mut diag),
            Err(GfxError::SliceOutOfBounds { .. })
        ));
    }

    #[test]
    fn grayscale_suitability() {
        let mut pixels = vec![RGBA::new(255, 255, 255, 255); 32];
        pixels.extend(vec![RGBA::new(0, 0, 0, 255); 32]);
        let data = encode_png(8, 8, &pixels);
        let mut diag = Diagnostics::new();
        let options = Options::default();
        let image = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();
        assert!(image.is_suitable_for_grayscale(4));

        let mut pixels = vec![RGBA::new(255, 0, 0, 255); 32];
        pixels.extend(vec![RGBA::new(0, 0, 0, 255); 32]);
        let data = encode_png(8, 8, &pixels);
        let image = Image::decode(Cursor::new(data), &options, &mut diag).unwrap();
        assert!(!image.is_suitable_for_grayscale(4));
    }
}
