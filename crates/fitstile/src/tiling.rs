//! Tiling configuration resolved from the compression keywords.
//!
//! An n-dimensional image is partitioned into axis-aligned tiles; the last
//! tile along an axis may be a ragged remainder. This module turns the
//! ZBITPIX/ZNAXISn/ZTILEn/ZCMPTYPE/ZVALn keyword family into a
//! [`TileConfig`] and owns the tile-grid arithmetic the decoder relies on:
//! linear index -> per-axis coordinates -> clamped pixel sub-region.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::header::Header;

/// Highest supported tiling dimensionality.
pub const MAX_TILE_DIM: usize = 6;

/// Pixel element type, encoded as a BITPIX-style integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl PixelType {
    pub fn from_zbitpix(value: i64) -> Result<Self> {
        match value {
            8 => Ok(PixelType::U8),
            16 => Ok(PixelType::I16),
            32 => Ok(PixelType::I32),
            64 => Ok(PixelType::I64),
            -32 => Ok(PixelType::F32),
            -64 => Ok(PixelType::F64),
            other => Err(Error::InvalidPixelType(other)),
        }
    }

    pub fn zbitpix(&self) -> i64 {
        match self {
            PixelType::U8 => 8,
            PixelType::I16 => 16,
            PixelType::I32 => 32,
            PixelType::I64 => 64,
            PixelType::F32 => -32,
            PixelType::F64 => -64,
        }
    }

    pub fn byte_size(&self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::I16 => 2,
            PixelType::I32 | PixelType::F32 => 4,
            PixelType::I64 | PixelType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PixelType::F32 | PixelType::F64)
    }
}

/// Compression algorithm tag with its tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Compression {
    /// RICE_1: block-adaptive Rice coding of pixel differences.
    Rice { blocksize: usize, bytepix: usize },
    /// GZIP_1: deflate over the big-endian sample bytes.
    Gzip,
    /// HCOMPRESS_1: 2-D H-transform with quadtree bitplane coding.
    HCompress { scale: i32, smooth: bool },
    /// PLIO_1: IRAF line-list run-length coding.
    Plio,
    /// Tiles stored without compression.
    None,
}

impl Compression {
    /// The ZCMPTYPE tag for this algorithm.
    pub fn tag(&self) -> &'static str {
        match self {
            Compression::Rice { .. } => "RICE_1",
            Compression::Gzip => "GZIP_1",
            Compression::HCompress { .. } => "HCOMPRESS_1",
            Compression::Plio => "PLIO_1",
            Compression::None => "NOCOMPRESS",
        }
    }
}

/// Which scale/zero pair reconstructs quantized samples.
///
/// Stored explicitly instead of the reference implementation's `-1`
/// column-number sentinels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleMode {
    /// Every tile carries its own scale/zero in the ZSCALE/ZZERO columns.
    PerTile,
    /// One scale/zero pair for the whole image, from the header keywords.
    PerImage { scale: f64, zero: f64 },
    /// Samples are stored unscaled.
    None,
}

/// Which blank/null sentinel marks missing pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankMode {
    /// Every tile carries its own sentinel in the ZBLANK column.
    PerTile,
    /// One sentinel for the whole image, from the ZBLANK keyword.
    Value(i64),
    /// No blank convention is active.
    None,
}

/// Pixel sub-region covered by one tile: per-axis start and extent, axis 0
/// fastest-varying. Edge tiles are clamped to the image boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRegion {
    pub start: Vec<usize>,
    pub shape: Vec<usize>,
}

impl TileRegion {
    /// Number of pixels in the region.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The resolved tiling configuration for one compressed image.
///
/// Built once per decode session from the header and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TileConfig {
    pub pixel: PixelType,
    /// Full image extent per axis (ZNAXISn), axis 0 fastest-varying.
    pub image_shape: Vec<usize>,
    /// Tile extent per axis (ZTILEn), clamped to the image extent.
    pub tile_shape: Vec<usize>,
    pub compression: Compression,
    pub scale_mode: ScaleMode,
    pub blank_mode: BlankMode,
    /// Quantization level for lossy floating-point tiling (ZQLEVEL).
    pub quantize_level: f64,
}

impl TileConfig {
    /// Resolve the tiling configuration from a binary table header.
    ///
    /// Unrecognized ZCMPTYPE values resolve to [`Compression::None`]
    /// rather than failing, matching the permissive convention of the
    /// format; missing ZNAXISn/ZTILEn keywords degrade to singleton axes.
    pub fn resolve(header: &Header) -> Result<TileConfig> {
        let pixel = PixelType::from_zbitpix(header.integer_or("ZBITPIX", 0))?;

        let naxis = header.integer_or("ZNAXIS", 0);
        if !(1..=MAX_TILE_DIM as i64).contains(&naxis) {
            return Err(Error::Layout("ZNAXIS outside the supported range"));
        }
        let naxis = naxis as usize;

        let mut image_shape = Vec::with_capacity(naxis);
        for n in 1..=naxis {
            let extent = header.integer_or(&alloc::format!("ZNAXIS{n}"), 1);
            if extent < 1 {
                return Err(Error::Layout("image extent must be at least 1"));
            }
            image_shape.push(extent as usize);
        }

        let mut tile_shape = Vec::with_capacity(naxis);
        for n in 1..=naxis {
            // Default tiling is one image row per tile.
            let default = if n == 1 { image_shape[0] as i64 } else { 1 };
            let extent = header.integer_or(&alloc::format!("ZTILE{n}"), default);
            if extent < 1 {
                return Err(Error::Layout("tile extent must be at least 1"));
            }
            tile_shape.push((extent as usize).min(image_shape[n - 1]));
        }

        let compression = match header.string_or("ZCMPTYPE", "") {
            "RICE_1" => {
                let default_bytepix = if pixel == PixelType::I16 { 2 } else { 4 };
                Compression::Rice {
                    blocksize: header.integer_or("ZVAL1", 32).max(1) as usize,
                    bytepix: header.integer_or("ZVAL2", default_bytepix).max(1) as usize,
                }
            }
            "GZIP_1" => Compression::Gzip,
            "HCOMPRESS_1" => Compression::HCompress {
                scale: header.integer_or("ZVAL1", 0) as i32,
                smooth: header.integer_or("ZVAL2", 0) != 0,
            },
            "PLIO_1" => Compression::Plio,
            _ => Compression::None,
        };

        // Per-tile conventions are signaled by the presence of the
        // corresponding table columns; scan TTYPEn for them.
        let tfields = header.integer_or("TFIELDS", 0).max(0) as usize;
        let mut has_zscale_col = false;
        let mut has_zzero_col = false;
        let mut has_zblank_col = false;
        for i in 1..=tfields {
            match header.string_or(&alloc::format!("TTYPE{i}"), "") {
                "ZSCALE" => has_zscale_col = true,
                "ZZERO" => has_zzero_col = true,
                "ZBLANK" => has_zblank_col = true,
                _ => {}
            }
        }

        let scale_mode = if has_zscale_col && has_zzero_col {
            ScaleMode::PerTile
        } else if header.contains("ZSCALE") || header.contains("ZZERO") {
            ScaleMode::PerImage {
                scale: header.real_or("ZSCALE", 1.0),
                zero: header.real_or("ZZERO", 0.0),
            }
        } else {
            ScaleMode::None
        };

        let blank_mode = if has_zblank_col {
            BlankMode::PerTile
        } else if header.contains("ZBLANK") {
            BlankMode::Value(header.integer_or("ZBLANK", 0))
        } else {
            BlankMode::None
        };

        Ok(TileConfig {
            pixel,
            image_shape,
            tile_shape,
            compression,
            scale_mode,
            blank_mode,
            quantize_level: header.real_or("ZQLEVEL", 16.0),
        })
    }

    /// Build a configuration for encoding.
    pub fn new(
        pixel: PixelType,
        image_shape: &[usize],
        tile_shape: &[usize],
        compression: Compression,
    ) -> Result<TileConfig> {
        if image_shape.is_empty() || image_shape.len() > MAX_TILE_DIM {
            return Err(Error::Layout("ZNAXIS outside the supported range"));
        }
        if tile_shape.len() != image_shape.len() {
            return Err(Error::Layout("tile and image dimensionality differ"));
        }
        if image_shape.iter().chain(tile_shape.iter()).any(|&e| e < 1) {
            return Err(Error::Layout("image and tile extents must be at least 1"));
        }
        let tile_shape = tile_shape
            .iter()
            .zip(image_shape)
            .map(|(&t, &i)| t.min(i))
            .collect();
        Ok(TileConfig {
            pixel,
            image_shape: image_shape.to_vec(),
            tile_shape,
            compression,
            scale_mode: ScaleMode::None,
            blank_mode: BlankMode::None,
            quantize_level: 16.0,
        })
    }

    /// Number of tiles along each axis: `ceil(image / tile)`.
    pub fn axis_tile_counts(&self) -> Vec<usize> {
        self.image_shape
            .iter()
            .zip(&self.tile_shape)
            .map(|(&image, &tile)| image.div_ceil(tile))
            .collect()
    }

    /// Total number of tiles, which is also the expected table row count.
    pub fn tile_count(&self) -> usize {
        self.axis_tile_counts().iter().product()
    }

    /// Pixel count of a full (non-ragged) tile.
    pub fn max_tile_len(&self) -> usize {
        self.tile_shape.iter().product()
    }

    /// Total pixel count of the image.
    pub fn total_pixels(&self) -> usize {
        self.image_shape.iter().product()
    }

    /// The pixel sub-region of tile `index`.
    ///
    /// The linear index is decomposed mixed-radix against the per-axis
    /// tile counts, axis 0 varying fastest; extents are clamped at the
    /// image edge so trailing tiles may be smaller.
    pub fn tile_region(&self, index: usize) -> TileRegion {
        let counts = self.axis_tile_counts();
        let mut start = Vec::with_capacity(counts.len());
        let mut shape = Vec::with_capacity(counts.len());
        let mut rem = index;
        for (axis, &count) in counts.iter().enumerate() {
            let coord = rem % count;
            rem /= count;
            let begin = coord * self.tile_shape[axis];
            let end = (begin + self.tile_shape[axis]).min(self.image_shape[axis]);
            start.push(begin);
            shape.push(end - begin);
        }
        TileRegion { start, shape }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn config(image: &[usize], tile: &[usize]) -> TileConfig {
        TileConfig::new(PixelType::I16, image, tile, Compression::Gzip).unwrap()
    }

    #[test]
    fn tile_count_matches_ceiling_product() {
        let c = config(&[100, 45], &[32, 10]);
        assert_eq!(c.axis_tile_counts(), vec![4, 5]);
        assert_eq!(c.tile_count(), 20);

        let c = config(&[7], &[7]);
        assert_eq!(c.tile_count(), 1);

        let c = config(&[10, 10, 3], &[4, 10, 2]);
        assert_eq!(c.tile_count(), 3 * 1 * 2);
    }

    #[test]
    fn regions_cover_image_exactly_once() {
        let c = config(&[11, 5, 3], &[4, 2, 2]);
        let mut hits = vec![0u8; c.total_pixels()];
        for t in 0..c.tile_count() {
            let region = c.tile_region(t);
            assert!(!region.is_empty());
            // Walk every pixel of the region in image coordinates.
            let mut coord = vec![0usize; region.shape.len()];
            loop {
                let mut offset = 0;
                let mut stride = 1;
                for axis in 0..coord.len() {
                    offset += (region.start[axis] + coord[axis]) * stride;
                    stride *= c.image_shape[axis];
                }
                hits[offset] += 1;
                let mut axis = 0;
                loop {
                    coord[axis] += 1;
                    if coord[axis] < region.shape[axis] {
                        break;
                    }
                    coord[axis] = 0;
                    axis += 1;
                    if axis == coord.len() {
                        break;
                    }
                }
                if axis == coord.len() {
                    break;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
    }

    #[test]
    fn ragged_tail_is_clamped() {
        let c = config(&[10], &[4]);
        assert_eq!(c.tile_region(2), TileRegion { start: vec![8], shape: vec![2] });
    }

    #[test]
    fn resolve_defaults_to_row_tiles() {
        let mut h = Header::new();
        h.set_integer("ZBITPIX", 16);
        h.set_integer("ZNAXIS", 2);
        h.set_integer("ZNAXIS1", 440);
        h.set_integer("ZNAXIS2", 300);
        h.set_string("ZCMPTYPE", "RICE_1");

        let c = TileConfig::resolve(&h).unwrap();
        assert_eq!(c.pixel, PixelType::I16);
        assert_eq!(c.image_shape, vec![440, 300]);
        assert_eq!(c.tile_shape, vec![440, 1]);
        assert_eq!(c.tile_count(), 300);
        // 16-bit images default to 2 bytes per pixel.
        assert_eq!(
            c.compression,
            Compression::Rice { blocksize: 32, bytepix: 2 }
        );
        assert_eq!(c.scale_mode, ScaleMode::None);
        assert_eq!(c.blank_mode, BlankMode::None);
    }

    #[test]
    fn unrecognized_tag_resolves_to_none() {
        let mut h = Header::new();
        h.set_integer("ZBITPIX", 32);
        h.set_integer("ZNAXIS", 1);
        h.set_integer("ZNAXIS1", 16);
        h.set_string("ZCMPTYPE", "SQUASH_9");

        let c = TileConfig::resolve(&h).unwrap();
        assert_eq!(c.compression, Compression::None);
    }

    #[test]
    fn missing_zcmptype_resolves_to_none() {
        let mut h = Header::new();
        h.set_integer("ZBITPIX", 8);
        h.set_integer("ZNAXIS", 1);
        h.set_integer("ZNAXIS1", 4);

        let c = TileConfig::resolve(&h).unwrap();
        assert_eq!(c.compression, Compression::None);
    }

    #[test]
    fn per_tile_scale_detected_from_columns() {
        let mut h = Header::new();
        h.set_integer("ZBITPIX", -32);
        h.set_integer("ZNAXIS", 1);
        h.set_integer("ZNAXIS1", 8);
        h.set_string("ZCMPTYPE", "RICE_1");
        h.set_integer("TFIELDS", 3);
        h.set_string("TTYPE1", "COMPRESSED_DATA");
        h.set_string("TTYPE2", "ZSCALE");
        h.set_string("TTYPE3", "ZZERO");

        let c = TileConfig::resolve(&h).unwrap();
        assert_eq!(c.scale_mode, ScaleMode::PerTile);
    }

    #[test]
    fn per_image_scale_from_keywords() {
        let mut h = Header::new();
        h.set_integer("ZBITPIX", -32);
        h.set_integer("ZNAXIS", 1);
        h.set_integer("ZNAXIS1", 8);
        h.set_real("ZSCALE", 0.5);
        h.set_real("ZZERO", 100.0);
        h.set_integer("ZBLANK", -9999);

        let c = TileConfig::resolve(&h).unwrap();
        assert_eq!(c.scale_mode, ScaleMode::PerImage { scale: 0.5, zero: 100.0 });
        assert_eq!(c.blank_mode, BlankMode::Value(-9999));
    }

    #[test]
    fn resolve_rejects_bad_geometry() {
        let mut h = Header::new();
        h.set_integer("ZBITPIX", 16);
        h.set_integer("ZNAXIS", 0);
        assert!(matches!(TileConfig::resolve(&h), Err(Error::Layout(_))));

        h.set_integer("ZNAXIS", 7);
        assert!(matches!(TileConfig::resolve(&h), Err(Error::Layout(_))));

        h.set_integer("ZNAXIS", 2);
        h.set_integer("ZNAXIS1", 0);
        assert!(matches!(TileConfig::resolve(&h), Err(Error::Layout(_))));
    }

    #[test]
    fn oversized_tile_extent_is_clamped() {
        let mut h = Header::new();
        h.set_integer("ZBITPIX", 16);
        h.set_integer("ZNAXIS", 1);
        h.set_integer("ZNAXIS1", 10);
        h.set_integer("ZTILE1", 64);

        let c = TileConfig::resolve(&h).unwrap();
        assert_eq!(c.tile_shape, vec![10]);
        assert_eq!(c.tile_count(), 1);
    }
}
