//! Tile-compressed image decoding and encoding.
//!
//! A compressed image is a binary table with one row per tile: a
//! COMPRESSED_DATA descriptor column addressing each tile's byte stream in
//! the heap, optional ZSCALE/ZZERO columns for per-tile quantization, and
//! optional UNCOMPRESSED_DATA / GZIP_COMPRESSED_DATA columns holding tiles
//! that did not compress. Decoding walks the tile grid, locates each
//! tile's bytes, dispatches to the selected codec, applies blank and
//! scale/zero reconstruction, and scatters the pixels into the output
//! image. Tiles cover disjoint sub-regions, so the per-tile work is
//! independent; this loop runs them in order.
//!
//! Encoding is symmetric, with one hard rule: a tile whose compressed
//! form is not strictly smaller than its raw form is stored verbatim in
//! the fallback column, so the format never inflates data.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::bintable::{self, ColumnDescriptor, ColumnKind, ElementType};
use crate::endian::{
    read_f32_be, read_f64_be, read_i16_be, read_i32_be, read_i64_be, read_u16_be, write_f32_be,
    write_f64_be, write_i16_be, write_i32_be, write_i64_be, write_u16_be,
};
use crate::error::{Error, Result};
use crate::gzip;
use crate::hcomp;
use crate::header::Header;
use crate::heap::HeapLayout;
use crate::plio;
use crate::quantize::{self, NULL_VALUE};
use crate::rice;
use crate::tiling::{BlankMode, Compression, PixelType, ScaleMode, TileConfig, TileRegion};

const COMPRESSED_DATA: &str = "COMPRESSED_DATA";
const UNCOMPRESSED_DATA: &str = "UNCOMPRESSED_DATA";
const GZIP_COMPRESSED_DATA: &str = "GZIP_COMPRESSED_DATA";

/// Image pixel data, typed by the ZBITPIX value.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    U8(Vec<u8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ImageData {
    /// A zero-filled buffer of `len` pixels of the given type.
    pub fn zeroed(pixel: PixelType, len: usize) -> ImageData {
        match pixel {
            PixelType::U8 => ImageData::U8(vec![0; len]),
            PixelType::I16 => ImageData::I16(vec![0; len]),
            PixelType::I32 => ImageData::I32(vec![0; len]),
            PixelType::I64 => ImageData::I64(vec![0; len]),
            PixelType::F32 => ImageData::F32(vec![0.0; len]),
            PixelType::F64 => ImageData::F64(vec![0.0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ImageData::U8(v) => v.len(),
            ImageData::I16(v) => v.len(),
            ImageData::I32(v) => v.len(),
            ImageData::I64(v) => v.len(),
            ImageData::F32(v) => v.len(),
            ImageData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pixel_type(&self) -> PixelType {
        match self {
            ImageData::U8(_) => PixelType::U8,
            ImageData::I16(_) => PixelType::I16,
            ImageData::I32(_) => PixelType::I32,
            ImageData::I64(_) => PixelType::I64,
            ImageData::F32(_) => PixelType::F32,
            ImageData::F64(_) => PixelType::F64,
        }
    }
}

// ---------------------------------------------------------------------------
// Region gather/scatter
// ---------------------------------------------------------------------------

/// Visit the image-buffer offset of each contiguous row of a tile region.
///
/// Regions are axis-aligned with axis 0 fastest-varying, so every tile
/// row of `shape[0]` pixels is contiguous in the image buffer.
fn for_each_region_row(
    image_shape: &[usize],
    region: &TileRegion,
    mut f: impl FnMut(usize, usize),
) {
    let row = region.shape[0];
    let rows: usize = region.shape[1..].iter().product();
    for r in 0..rows {
        let mut rem = r;
        let mut offset = region.start[0];
        let mut stride = image_shape[0];
        for axis in 1..region.shape.len() {
            let c = rem % region.shape[axis];
            rem /= region.shape[axis];
            offset += (region.start[axis] + c) * stride;
            stride *= image_shape[axis];
        }
        f(offset, row);
    }
}

/// Copy `vals` (row-major tile order) into the region of `out`.
fn scatter<T: Copy>(out: &mut [T], image_shape: &[usize], region: &TileRegion, vals: &[T]) {
    let mut src = 0;
    for_each_region_row(image_shape, region, |offset, row| {
        out[offset..offset + row].copy_from_slice(&vals[src..src + row]);
        src += row;
    });
}

/// Extract the region of `src` as a row-major tile buffer.
fn gather<T: Copy>(src: &[T], image_shape: &[usize], region: &TileRegion) -> Vec<T> {
    let mut out = Vec::with_capacity(region.len());
    for_each_region_row(image_shape, region, |offset, row| {
        out.extend_from_slice(&src[offset..offset + row]);
    });
    out
}

// ---------------------------------------------------------------------------
// Sample conversion helpers
// ---------------------------------------------------------------------------

fn bytes_to_i16(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2).map(read_i16_be).collect()
}

fn bytes_to_i32(data: &[u8]) -> Vec<i32> {
    data.chunks_exact(4).map(read_i32_be).collect()
}

fn bytes_to_i64(data: &[u8]) -> Vec<i64> {
    data.chunks_exact(8).map(read_i64_be).collect()
}

fn bytes_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4).map(read_f32_be).collect()
}

fn bytes_to_f64(data: &[u8]) -> Vec<f64> {
    data.chunks_exact(8).map(read_f64_be).collect()
}

fn bytes_to_u16(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2).map(read_u16_be).collect()
}

/// The tile samples as stored on disk: big-endian bytes of the pixel type.
fn tile_raw_bytes(image: &ImageData, image_shape: &[usize], region: &TileRegion) -> Vec<u8> {
    match image {
        ImageData::U8(v) => gather(v, image_shape, region),
        ImageData::I16(v) => {
            let tile = gather(v, image_shape, region);
            let mut out = vec![0u8; tile.len() * 2];
            for (chunk, &s) in out.chunks_exact_mut(2).zip(&tile) {
                write_i16_be(chunk, s);
            }
            out
        }
        ImageData::I32(v) => {
            let tile = gather(v, image_shape, region);
            let mut out = vec![0u8; tile.len() * 4];
            for (chunk, &s) in out.chunks_exact_mut(4).zip(&tile) {
                write_i32_be(chunk, s);
            }
            out
        }
        ImageData::I64(v) => {
            let tile = gather(v, image_shape, region);
            let mut out = vec![0u8; tile.len() * 8];
            for (chunk, &s) in out.chunks_exact_mut(8).zip(&tile) {
                write_i64_be(chunk, s);
            }
            out
        }
        ImageData::F32(v) => {
            let tile = gather(v, image_shape, region);
            let mut out = vec![0u8; tile.len() * 4];
            for (chunk, &s) in out.chunks_exact_mut(4).zip(&tile) {
                write_f32_be(chunk, s);
            }
            out
        }
        ImageData::F64(v) => {
            let tile = gather(v, image_shape, region);
            let mut out = vec![0u8; tile.len() * 8];
            for (chunk, &s) in out.chunks_exact_mut(8).zip(&tile) {
                write_f64_be(chunk, s);
            }
            out
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct TableColumns<'a> {
    offsets: Vec<usize>,
    compressed: (usize, &'a ColumnDescriptor),
    uncompressed: Option<(usize, &'a ColumnDescriptor)>,
    gzip_fallback: Option<(usize, &'a ColumnDescriptor)>,
    zscale: Option<usize>,
    zzero: Option<usize>,
    zblank: Option<usize>,
}

impl<'a> TableColumns<'a> {
    fn from(columns: &'a [ColumnDescriptor]) -> Result<Self> {
        let compressed = bintable::find_column(columns, COMPRESSED_DATA)
            .ok_or(Error::Layout("table has no COMPRESSED_DATA column"))?;
        if matches!(compressed.1.kind, ColumnKind::Fixed(_)) {
            return Err(Error::Layout("COMPRESSED_DATA column is not variable-length"));
        }
        let fixed_f64 = |name: &str| -> Result<Option<usize>> {
            match bintable::find_column(columns, name) {
                None => Ok(None),
                Some((i, c)) if c.kind == ColumnKind::Fixed(ElementType::Double) => Ok(Some(i)),
                Some(_) => Err(Error::Layout("scale column is not a double column")),
            }
        };
        Ok(TableColumns {
            offsets: bintable::column_offsets(columns),
            compressed,
            uncompressed: bintable::find_column(columns, UNCOMPRESSED_DATA),
            gzip_fallback: bintable::find_column(columns, GZIP_COMPRESSED_DATA),
            zscale: fixed_f64("ZSCALE")?,
            zzero: fixed_f64("ZZERO")?,
            zblank: bintable::find_column(columns, "ZBLANK").map(|(i, _)| i),
        })
    }
}

/// Decode a full tile-compressed image from a binary table buffer.
///
/// `buf` holds the table's row data immediately followed by its heap;
/// `header` supplies the table and tiling keywords. Decoding is
/// all-or-nothing: the first failing tile aborts with an error naming it,
/// and no partial image is returned.
pub fn decompress_image(buf: &[u8], header: &Header) -> Result<ImageData> {
    let columns = bintable::columns_from_header(header)?;
    let config = TileConfig::resolve(header)?;
    let layout = HeapLayout::compute(header, &columns, buf.len())?;
    decode_tiles(buf, &layout, &columns, &config)
}

/// Decode every tile of an already-resolved table.
pub fn decode_tiles(
    buf: &[u8],
    layout: &HeapLayout,
    columns: &[ColumnDescriptor],
    config: &TileConfig,
) -> Result<ImageData> {
    let ntiles = config.tile_count();
    if layout.rows != ntiles {
        return Err(Error::Layout("table row count does not match the tile count"));
    }
    let cols = TableColumns::from(columns)?;

    let mut out = ImageData::zeroed(config.pixel, config.total_pixels());
    for tile in 0..ntiles {
        decode_one_tile(buf, layout, &cols, config, tile, &mut out)?;
    }
    Ok(out)
}

fn tile_scale_zero(
    buf: &[u8],
    layout: &HeapLayout,
    cols: &TableColumns<'_>,
    config: &TileConfig,
    tile: usize,
) -> Result<(f64, f64)> {
    match config.scale_mode {
        ScaleMode::PerTile => {
            let si = cols.zscale.ok_or(Error::Layout("per-tile scaling without a ZSCALE column"))?;
            let zi = cols.zzero.ok_or(Error::Layout("per-tile scaling without a ZZERO column"))?;
            let scale = read_f64_be(layout.fixed_cell(buf, tile, cols.offsets[si], 8)?);
            let zero = read_f64_be(layout.fixed_cell(buf, tile, cols.offsets[zi], 8)?);
            Ok((scale, zero))
        }
        ScaleMode::PerImage { scale, zero } => Ok((scale, zero)),
        ScaleMode::None => Ok((1.0, 0.0)),
    }
}

fn tile_blank(
    buf: &[u8],
    layout: &HeapLayout,
    cols: &TableColumns<'_>,
    config: &TileConfig,
    tile: usize,
) -> Result<Option<i64>> {
    match config.blank_mode {
        BlankMode::PerTile => {
            let bi = cols.zblank.ok_or(Error::Layout("per-tile blanks without a ZBLANK column"))?;
            let cell = layout.fixed_cell(buf, tile, cols.offsets[bi], 4)?;
            Ok(Some(read_i32_be(cell) as i64))
        }
        BlankMode::Value(v) => Ok(Some(v)),
        BlankMode::None => Ok(None),
    }
}

fn decode_one_tile(
    buf: &[u8],
    layout: &HeapLayout,
    cols: &TableColumns<'_>,
    config: &TileConfig,
    tile: usize,
    out: &mut ImageData,
) -> Result<()> {
    let region = config.tile_region(tile);
    let npix = region.len();
    let (scale, zero) = tile_scale_zero(buf, layout, cols, config, tile)?;
    let blank = tile_blank(buf, layout, cols, config, tile)?;

    let (count, bytes) = layout.descriptor(buf, tile, cols.compressed.1, cols.offsets[cols.compressed.0])?;
    if count == 0 {
        return decode_fallback_tile(buf, layout, cols, config, tile, &region, out);
    }

    // Floating-point samples can only pass through the integer codecs
    // after quantization.
    let float_pixels = config.pixel.is_float();
    if float_pixels && config.scale_mode == ScaleMode::None {
        match config.compression {
            Compression::Rice { .. } | Compression::HCompress { .. } | Compression::Plio => {
                return Err(Error::UnsupportedAlgorithm(
                    "floating-point tiles without quantization require GZIP_1",
                ));
            }
            _ => {}
        }
    }

    match config.compression {
        Compression::Rice { blocksize, bytepix } => {
            let ints = rice::decode(bytes, npix, blocksize, bytepix)
                .map_err(|reason| Error::Codec { tile, reason })?;
            place_int_samples(out, config, &region, &ints, scale, zero, blank, tile)
        }
        Compression::Plio => {
            let words = bytes_to_u16(bytes);
            let ints = plio::decode(&words, npix).map_err(|reason| Error::Codec { tile, reason })?;
            place_int_samples(out, config, &region, &ints, scale, zero, blank, tile)
        }
        Compression::HCompress { smooth, .. } => {
            let (ints, _, _) = hcomp::decode(bytes, smooth, npix)
                .map_err(|reason| Error::Codec { tile, reason })?;
            place_int_samples(out, config, &region, &ints, scale, zero, blank, tile)
        }
        Compression::Gzip => {
            let raw = gzip::decode(bytes).map_err(|reason| Error::Codec { tile, reason })?;
            if float_pixels && config.scale_mode != ScaleMode::None {
                let ints = bytes_to_i32(&raw);
                if ints.len() < npix {
                    return Err(Error::Codec { tile, reason: "tile holds too few samples" });
                }
                place_int_samples(out, config, &region, &ints[..npix], scale, zero, blank, tile)
            } else {
                place_raw_samples(out, config, &region, &raw, tile)
            }
        }
        Compression::None => {
            if float_pixels && config.scale_mode != ScaleMode::None {
                let ints = bytes_to_i32(bytes);
                if ints.len() < npix {
                    return Err(Error::Codec { tile, reason: "tile holds too few samples" });
                }
                place_int_samples(out, config, &region, &ints[..npix], scale, zero, blank, tile)
            } else {
                place_raw_samples(out, config, &region, bytes, tile)
            }
        }
    }
}

/// A tile with no compressed data: try the verbatim column, then the
/// gzip fallback column, then give up.
fn decode_fallback_tile(
    buf: &[u8],
    layout: &HeapLayout,
    cols: &TableColumns<'_>,
    config: &TileConfig,
    tile: usize,
    region: &TileRegion,
    out: &mut ImageData,
) -> Result<()> {
    if let Some((i, col)) = cols.uncompressed {
        if !matches!(col.kind, ColumnKind::Fixed(_)) {
            let (count, bytes) = layout.descriptor(buf, tile, col, cols.offsets[i])?;
            if count > 0 {
                return place_raw_samples(out, config, region, bytes, tile);
            }
        }
    }
    if let Some((i, col)) = cols.gzip_fallback {
        if !matches!(col.kind, ColumnKind::Fixed(_)) {
            let (count, bytes) = layout.descriptor(buf, tile, col, cols.offsets[i])?;
            if count > 0 {
                let raw = gzip::decode(bytes).map_err(|reason| Error::Codec { tile, reason })?;
                return place_raw_samples(out, config, region, &raw, tile);
            }
        }
    }
    Err(Error::NoCompressedTile(tile))
}

/// Reconstruct integer codec output and scatter it into the image.
///
/// Blank substitution happens before the affine scale/zero step, so a
/// sentinel pixel becomes NaN regardless of the scaling in effect.
#[allow(clippy::too_many_arguments)]
fn place_int_samples(
    out: &mut ImageData,
    config: &TileConfig,
    region: &TileRegion,
    ints: &[i32],
    scale: f64,
    zero: f64,
    blank: Option<i64>,
    tile: usize,
) -> Result<()> {
    let npix = region.len();
    if ints.len() < npix {
        return Err(Error::Codec { tile, reason: "tile holds too few samples" });
    }
    let ints = &ints[..npix];
    let identity = scale == 1.0 && zero == 0.0;
    let shape = &config.image_shape;

    match out {
        ImageData::F32(v) => {
            let vals: Vec<f32> = ints
                .iter()
                .map(|&s| {
                    if blank == Some(s as i64) {
                        f32::NAN
                    } else {
                        (zero + scale * s as f64) as f32
                    }
                })
                .collect();
            scatter(v, shape, region, &vals);
        }
        ImageData::F64(v) => {
            let vals: Vec<f64> = ints
                .iter()
                .map(|&s| {
                    if blank == Some(s as i64) {
                        f64::NAN
                    } else {
                        zero + scale * s as f64
                    }
                })
                .collect();
            scatter(v, shape, region, &vals);
        }
        ImageData::U8(v) => {
            let vals: Vec<u8> = if identity {
                ints.iter().map(|&s| s as u8).collect()
            } else {
                ints.iter()
                    .map(|&s| libm::floor(zero + scale * s as f64 + 0.5) as u8)
                    .collect()
            };
            scatter(v, shape, region, &vals);
        }
        ImageData::I16(v) => {
            let vals: Vec<i16> = if identity {
                ints.iter().map(|&s| s as i16).collect()
            } else {
                ints.iter()
                    .map(|&s| libm::floor(zero + scale * s as f64 + 0.5) as i16)
                    .collect()
            };
            scatter(v, shape, region, &vals);
        }
        ImageData::I32(v) => {
            let vals: Vec<i32> = if identity {
                ints.to_vec()
            } else {
                ints.iter()
                    .map(|&s| libm::floor(zero + scale * s as f64 + 0.5) as i32)
                    .collect()
            };
            scatter(v, shape, region, &vals);
        }
        ImageData::I64(v) => {
            let vals: Vec<i64> = if identity {
                ints.iter().map(|&s| s as i64).collect()
            } else {
                ints.iter()
                    .map(|&s| libm::floor(zero + scale * s as f64 + 0.5) as i64)
                    .collect()
            };
            scatter(v, shape, region, &vals);
        }
    }
    Ok(())
}

/// Scatter raw big-endian samples of the image's own type.
fn place_raw_samples(
    out: &mut ImageData,
    config: &TileConfig,
    region: &TileRegion,
    raw: &[u8],
    tile: usize,
) -> Result<()> {
    let npix = region.len();
    let short = Error::Codec { tile, reason: "tile holds too few samples" };
    let shape = &config.image_shape;
    match out {
        ImageData::U8(v) => {
            // Some producers store byte tiles widened to 32-bit values.
            if raw.len() == npix * 4 {
                let vals: Vec<u8> = bytes_to_i32(raw).iter().map(|&s| s as u8).collect();
                scatter(v, shape, region, &vals);
            } else {
                if raw.len() < npix {
                    return Err(short);
                }
                scatter(v, shape, region, &raw[..npix]);
            }
        }
        ImageData::I16(v) => {
            if raw.len() == npix * 4 {
                let vals: Vec<i16> = bytes_to_i32(raw).iter().map(|&s| s as i16).collect();
                scatter(v, shape, region, &vals);
            } else {
                let vals = bytes_to_i16(raw);
                if vals.len() < npix {
                    return Err(short);
                }
                scatter(v, shape, region, &vals[..npix]);
            }
        }
        ImageData::I32(v) => {
            let vals = bytes_to_i32(raw);
            if vals.len() < npix {
                return Err(short);
            }
            scatter(v, shape, region, &vals[..npix]);
        }
        ImageData::I64(v) => {
            let vals = bytes_to_i64(raw);
            if vals.len() < npix {
                return Err(short);
            }
            scatter(v, shape, region, &vals[..npix]);
        }
        ImageData::F32(v) => {
            let vals = bytes_to_f32(raw);
            if vals.len() < npix {
                return Err(short);
            }
            scatter(v, shape, region, &vals[..npix]);
        }
        ImageData::F64(v) => {
            let vals = bytes_to_f64(raw);
            if vals.len() < npix {
                return Err(short);
            }
            scatter(v, shape, region, &vals[..npix]);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// One tile's encoded form: either compressed bytes for the
/// COMPRESSED_DATA column or verbatim bytes for the fallback column.
struct EncodedTile {
    compressed: Vec<u8>,
    fallback: Vec<u8>,
    scale: f64,
    zero: f64,
}

/// Convert integer tile samples to the i32 stream the codecs consume.
fn tile_int_samples(
    image: &ImageData,
    image_shape: &[usize],
    region: &TileRegion,
) -> Result<Vec<i32>> {
    match image {
        ImageData::U8(v) => Ok(gather(v, image_shape, region).iter().map(|&s| s as i32).collect()),
        ImageData::I16(v) => Ok(gather(v, image_shape, region).iter().map(|&s| s as i32).collect()),
        ImageData::I32(v) => Ok(gather(v, image_shape, region)),
        ImageData::I64(v) => gather(v, image_shape, region)
            .iter()
            .map(|&s| {
                i32::try_from(s).map_err(|_| {
                    Error::UnsupportedAlgorithm("64-bit samples exceed the integer codec range")
                })
            })
            .collect(),
        ImageData::F32(_) | ImageData::F64(_) => {
            Err(Error::UnsupportedAlgorithm("floating-point tiles must be quantized"))
        }
    }
}

/// Run the configured codec over one tile's i32 samples.
fn encode_int_tile(
    config: &TileConfig,
    region: &TileRegion,
    ints: &[i32],
    tile: usize,
) -> Result<Vec<u8>> {
    match config.compression {
        Compression::Rice { blocksize, bytepix } => {
            rice::encode(ints, blocksize, bytepix).map_err(|reason| Error::Codec { tile, reason })
        }
        Compression::Plio => {
            let words = plio::encode(ints).map_err(|reason| Error::Codec { tile, reason })?;
            let mut bytes = vec![0u8; words.len() * 2];
            for (chunk, &w) in bytes.chunks_exact_mut(2).zip(&words) {
                write_u16_be(chunk, w);
            }
            Ok(bytes)
        }
        Compression::HCompress { scale, .. } => {
            let ny = region.shape[0];
            let nx = region.len() / ny;
            hcomp::encode(ints, nx, ny, scale).map_err(|reason| Error::Codec { tile, reason })
        }
        Compression::Gzip | Compression::None => {
            Err(Error::UnsupportedAlgorithm("not an integer codec"))
        }
    }
}

fn tile_f64_samples(image: &ImageData, image_shape: &[usize], region: &TileRegion) -> Vec<f64> {
    match image {
        ImageData::F32(v) => gather(v, image_shape, region).iter().map(|&s| s as f64).collect(),
        ImageData::F64(v) => gather(v, image_shape, region),
        _ => Vec::new(),
    }
}

/// Compress a full image into a binary table (header + row/heap buffer).
///
/// The returned header carries every keyword [`decompress_image`] needs,
/// so `decompress_image(&buf, &header)` inverts this function. Floating
/// point images are quantized per tile when the configured algorithm is
/// an integer codec; tiles that cannot be quantized, or that would grow
/// under compression, are stored verbatim in the fallback column.
pub fn compress_image(image: &ImageData, config: &TileConfig) -> Result<(Header, Vec<u8>)> {
    if image.pixel_type() != config.pixel {
        return Err(Error::Layout("image data type does not match the configuration"));
    }
    if image.len() != config.total_pixels() {
        return Err(Error::Layout("image size does not match the configuration"));
    }

    let ntiles = config.tile_count();
    let quantizing = config.pixel.is_float()
        && matches!(
            config.compression,
            Compression::Rice { .. } | Compression::HCompress { .. } | Compression::Plio
        );

    let mut tiles: Vec<EncodedTile> = Vec::with_capacity(ntiles);
    let mut any_fallback = false;
    let mut any_blank = false;

    for tile in 0..ntiles {
        let region = config.tile_region(tile);
        let raw = tile_raw_bytes(image, &config.image_shape, &region);

        let mut encoded = EncodedTile {
            compressed: Vec::new(),
            fallback: Vec::new(),
            scale: 1.0,
            zero: 0.0,
        };

        match config.compression {
            Compression::None => {
                encoded.compressed = raw;
            }
            Compression::Gzip => {
                let packed = gzip::encode(&raw);
                if packed.len() < raw.len() {
                    encoded.compressed = packed;
                } else {
                    encoded.fallback = raw;
                }
            }
            _ if quantizing => {
                let vals = tile_f64_samples(image, &config.image_shape, &region);
                match quantize::quantize(&vals, config.quantize_level) {
                    Some(q) => {
                        any_blank |= q.has_blank;
                        let packed = encode_int_tile(config, &region, &q.ints, tile)?;
                        if packed.len() < raw.len() {
                            encoded.compressed = packed;
                            encoded.scale = q.scale;
                            encoded.zero = q.zero;
                        } else {
                            encoded.fallback = raw;
                        }
                    }
                    None => {
                        encoded.fallback = raw;
                    }
                }
            }
            _ => {
                let ints = tile_int_samples(image, &config.image_shape, &region)?;
                let packed = encode_int_tile(config, &region, &ints, tile)?;
                if packed.len() < raw.len() {
                    encoded.compressed = packed;
                } else {
                    encoded.fallback = raw;
                }
            }
        }

        any_fallback |= !encoded.fallback.is_empty();
        tiles.push(encoded);
    }

    build_table(config, &tiles, quantizing, any_fallback, any_blank)
}

fn fallback_element_letter(pixel: PixelType) -> char {
    match pixel {
        PixelType::U8 => 'B',
        PixelType::I16 => 'I',
        PixelType::I32 => 'J',
        PixelType::I64 => 'K',
        PixelType::F32 => 'E',
        PixelType::F64 => 'D',
    }
}

fn build_table(
    config: &TileConfig,
    tiles: &[EncodedTile],
    quantizing: bool,
    any_fallback: bool,
    any_blank: bool,
) -> Result<(Header, Vec<u8>)> {
    // The compressed column's element size decides how descriptor counts
    // map to bytes: PLIO_1 line lists are 16-bit words, everything else
    // plain bytes.
    let (comp_letter, comp_elem) = match config.compression {
        Compression::Plio => ('I', 2usize),
        _ => ('B', 1usize),
    };
    let fb_letter = fallback_element_letter(config.pixel);
    let fb_elem = config.pixel.byte_size();

    let max_comp = tiles.iter().map(|t| t.compressed.len()).max().unwrap_or(0) / comp_elem;
    let max_fb = tiles.iter().map(|t| t.fallback.len()).max().unwrap_or(0) / fb_elem;

    // Column layout: COMPRESSED_DATA, then the quantization pair, then
    // the fallback column when any tile needed it.
    let mut ttypes: Vec<String> = vec![String::from(COMPRESSED_DATA)];
    let mut tforms: Vec<String> = vec![alloc::format!("1P{comp_letter}({max_comp})")];
    let mut row_len = 8usize;
    let mut zscale_off = None;
    let mut zzero_off = None;
    let mut fallback_off = None;
    if quantizing {
        zscale_off = Some(row_len);
        ttypes.push(String::from("ZSCALE"));
        tforms.push(String::from("1D"));
        row_len += 8;
        zzero_off = Some(row_len);
        ttypes.push(String::from("ZZERO"));
        tforms.push(String::from("1D"));
        row_len += 8;
    }
    if any_fallback {
        fallback_off = Some(row_len);
        ttypes.push(String::from(UNCOMPRESSED_DATA));
        tforms.push(alloc::format!("1P{fb_letter}({max_fb})"));
        row_len += 8;
    }

    let mut buf = vec![0u8; row_len * tiles.len()];
    let mut heap: Vec<u8> = Vec::new();
    for (row, tile) in tiles.iter().enumerate() {
        let base = row * row_len;
        let count = tile.compressed.len() / comp_elem;
        write_i32_be(&mut buf[base..], count as i32);
        write_i32_be(&mut buf[base + 4..], heap.len() as i32);
        heap.extend_from_slice(&tile.compressed);
        if let Some(off) = zscale_off {
            write_f64_be(&mut buf[base + off..], tile.scale);
        }
        if let Some(off) = zzero_off {
            write_f64_be(&mut buf[base + off..], tile.zero);
        }
        if let Some(off) = fallback_off {
            let count = tile.fallback.len() / fb_elem;
            write_i32_be(&mut buf[base + off..], count as i32);
            write_i32_be(&mut buf[base + off + 4..], heap.len() as i32);
            heap.extend_from_slice(&tile.fallback);
        }
    }
    let pcount = heap.len();
    buf.extend_from_slice(&heap);

    let mut header = Header::new();
    header.set_logical("ZIMAGE", true);
    header.set_integer("TFIELDS", ttypes.len() as i64);
    for (i, (name, form)) in ttypes.iter().zip(&tforms).enumerate() {
        header.set_string(&alloc::format!("TTYPE{}", i + 1), name);
        header.set_string(&alloc::format!("TFORM{}", i + 1), form);
    }
    header.set_integer("NAXIS1", row_len as i64);
    header.set_integer("NAXIS2", tiles.len() as i64);
    header.set_integer("PCOUNT", pcount as i64);
    header.set_integer("ZBITPIX", config.pixel.zbitpix());
    header.set_integer("ZNAXIS", config.image_shape.len() as i64);
    for (axis, (&extent, &tile)) in config.image_shape.iter().zip(&config.tile_shape).enumerate() {
        header.set_integer(&alloc::format!("ZNAXIS{}", axis + 1), extent as i64);
        header.set_integer(&alloc::format!("ZTILE{}", axis + 1), tile as i64);
    }
    header.set_string("ZCMPTYPE", config.compression.tag());
    match config.compression {
        Compression::Rice { blocksize, bytepix } => {
            header.set_integer("ZVAL1", blocksize as i64);
            header.set_integer("ZVAL2", bytepix as i64);
        }
        Compression::HCompress { scale, smooth } => {
            header.set_integer("ZVAL1", scale as i64);
            header.set_integer("ZVAL2", smooth as i64);
        }
        _ => {}
    }
    if quantizing {
        header.set_real("ZQLEVEL", config.quantize_level);
    }
    if any_blank {
        header.set_integer("ZBLANK", NULL_VALUE as i64);
    }
    Ok((header, buf))
}
