//! Round-trip integration tests for fitstile.
//!
//! All tests work on in-memory table buffers only; building and parsing
//! FITS files is out of scope for this crate.

use fitstile::bintable::{column_offsets, columns_from_header, find_column};
use fitstile::endian::write_i32_be;
use fitstile::heap::HeapLayout;
use fitstile::{
    compress_image, decompress_image, Compression, Error, Header, ImageData, PixelType, TileConfig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Deterministic pseudo-random sequence for fixtures.
struct Lcg(u32);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1664525).wrapping_add(1013904223);
        self.0
    }
}

/// A smooth i16 image with mild noise: compresses under every codec.
fn smooth_i16(len: usize) -> Vec<i16> {
    let mut rng = Lcg(0x1234_5678);
    (0..len)
        .map(|i| (100 + (i % 37) as i32 * 3 + (rng.next() % 5) as i32) as i16)
        .collect()
}

fn roundtrip(image: &ImageData, config: &TileConfig) -> ImageData {
    let (header, buf) = compress_image(image, config).unwrap();
    decompress_image(&buf, &header).unwrap()
}

// ===========================================================================
// Integer round-trips per algorithm, with a ragged trailing tile
// ===========================================================================

#[test]
fn roundtrip_i16_rice() {
    let config = TileConfig::new(
        PixelType::I16,
        &[21, 9],
        &[8, 4],
        Compression::Rice { blocksize: 32, bytepix: 2 },
    )
    .unwrap();
    let image = ImageData::I16(smooth_i16(21 * 9));
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_i16_gzip() {
    let config = TileConfig::new(PixelType::I16, &[21, 9], &[8, 4], Compression::Gzip).unwrap();
    let image = ImageData::I16(smooth_i16(21 * 9));
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_i16_hcompress() {
    let config = TileConfig::new(
        PixelType::I16,
        &[21, 10],
        &[21, 5],
        Compression::HCompress { scale: 0, smooth: false },
    )
    .unwrap();
    let image = ImageData::I16(smooth_i16(21 * 10));
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_i16_plio() {
    // PLIO wants non-negative values with long runs.
    let config = TileConfig::new(PixelType::I16, &[19, 7], &[8, 3], Compression::Plio).unwrap();
    let pixels: Vec<i16> = (0..19 * 7).map(|i| if (i / 13) % 3 == 0 { 7 } else { 0 }).collect();
    let image = ImageData::I16(pixels);
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_i16_stored_uncompressed() {
    let config = TileConfig::new(PixelType::I16, &[21, 9], &[8, 4], Compression::None).unwrap();
    let image = ImageData::I16(smooth_i16(21 * 9));
    let (header, buf) = compress_image(&image, &config).unwrap();
    assert_eq!(header.string_or("ZCMPTYPE", ""), "NOCOMPRESS");
    assert_eq!(decompress_image(&buf, &header).unwrap(), image);
}

// ===========================================================================
// Other pixel types
// ===========================================================================

#[test]
fn roundtrip_u8_rice() {
    let config = TileConfig::new(
        PixelType::U8,
        &[33, 5],
        &[16, 2],
        Compression::Rice { blocksize: 32, bytepix: 1 },
    )
    .unwrap();
    let mut rng = Lcg(7);
    let image = ImageData::U8((0..33 * 5).map(|i| (i % 200) as u8 + (rng.next() % 3) as u8).collect());
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_i32_rice() {
    let config = TileConfig::new(
        PixelType::I32,
        &[15, 11],
        &[6, 6],
        Compression::Rice { blocksize: 16, bytepix: 4 },
    )
    .unwrap();
    let image = ImageData::I32((0..15 * 11).map(|i| -70_000 + (i as i32) * 931).collect());
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_i64_gzip() {
    let config = TileConfig::new(PixelType::I64, &[9, 9], &[4, 4], Compression::Gzip).unwrap();
    let image = ImageData::I64((0..81).map(|i| (i as i64) * 3_000_000_007 - 12).collect());
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_three_dimensional_gzip() {
    let config =
        TileConfig::new(PixelType::I32, &[7, 5, 4], &[4, 3, 2], Compression::Gzip).unwrap();
    assert_eq!(config.tile_count(), 2 * 2 * 2);
    let image = ImageData::I32((0..7 * 5 * 4).map(|i| i as i32 * 17 - 300).collect());
    assert_eq!(roundtrip(&image, &config), image);
}

// ===========================================================================
// Floating point
// ===========================================================================

#[test]
fn roundtrip_f32_gzip_is_lossless() {
    let config = TileConfig::new(PixelType::F32, &[14, 6], &[5, 4], Compression::Gzip).unwrap();
    let image = ImageData::F32((0..14 * 6).map(|i| 1.5e-3 * i as f32 - 0.25).collect());
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn roundtrip_f64_stored_uncompressed_is_lossless() {
    let config = TileConfig::new(PixelType::F64, &[6, 6], &[6, 2], Compression::None).unwrap();
    let image = ImageData::F64((0..36).map(|i| (i as f64).sqrt() * 7.75).collect());
    assert_eq!(roundtrip(&image, &config), image);
}

#[test]
fn quantized_f32_rice_stays_within_half_a_step() {
    let mut config = TileConfig::new(
        PixelType::F32,
        &[32, 8],
        &[32, 4],
        Compression::Rice { blocksize: 32, bytepix: 4 },
    )
    .unwrap();
    // Negative level requests an absolute quantization step.
    config.quantize_level = -0.25;

    let mut pixels: Vec<f32> = (0..32 * 8)
        .map(|i| 50.0 + (i % 32) as f32 * 0.5 + (i / 32) as f32 * 0.25)
        .collect();
    pixels[40] = f32::NAN;
    pixels[200] = f32::NAN;
    let image = ImageData::F32(pixels.clone());

    let (header, buf) = compress_image(&image, &config).unwrap();
    assert_eq!(header.string_or("TTYPE2", ""), "ZSCALE");
    let decoded = match decompress_image(&buf, &header).unwrap() {
        ImageData::F32(v) => v,
        other => panic!("wrong output type: {other:?}"),
    };

    for (i, (&got, &want)) in decoded.iter().zip(&pixels).enumerate() {
        if want.is_nan() {
            assert!(got.is_nan(), "pixel {i} lost its blank marker");
        } else {
            assert!((got - want).abs() <= 0.125 + 1e-6, "pixel {i}: {got} vs {want}");
        }
    }
}

#[test]
fn per_image_scale_reconstructs_exactly_and_blanks_win() {
    // A producer storing one quantized tile with whole-image ZSCALE/ZZERO
    // keywords instead of per-tile columns.
    let mut header = Header::new();
    header.set_integer("ZBITPIX", -32);
    header.set_integer("ZNAXIS", 1);
    header.set_integer("ZNAXIS1", 6);
    header.set_real("ZSCALE", 0.5);
    header.set_real("ZZERO", 100.0);
    header.set_integer("ZBLANK", -9999);
    header.set_integer("TFIELDS", 1);
    header.set_string("TTYPE1", "COMPRESSED_DATA");
    header.set_string("TFORM1", "1PJ(6)");
    header.set_integer("NAXIS1", 8);
    header.set_integer("NAXIS2", 1);
    header.set_integer("PCOUNT", 24);

    let stored: [i32; 6] = [0, 2, -4, -9999, 10, 7];
    let mut buf = vec![0u8; 8];
    write_i32_be(&mut buf[0..], 6);
    write_i32_be(&mut buf[4..], 0);
    for &s in &stored {
        buf.extend_from_slice(&s.to_be_bytes());
    }

    let decoded = match decompress_image(&buf, &header).unwrap() {
        ImageData::F32(v) => v,
        other => panic!("wrong output type: {other:?}"),
    };
    // stored * scale + zero, exactly; the sentinel becomes NaN even though
    // -9999 * 0.5 + 100.0 would be a perfectly ordinary value.
    assert_eq!(decoded[..3], [100.0, 101.0, 98.0]);
    assert!(decoded[3].is_nan());
    assert_eq!(decoded[4..], [105.0, 103.5]);
}

// ===========================================================================
// Fallback storage and failure modes
// ===========================================================================

#[test]
fn incompressible_tiles_are_stored_verbatim() {
    let config = TileConfig::new(
        PixelType::I16,
        &[40, 4],
        &[20, 2],
        Compression::Rice { blocksize: 32, bytepix: 2 },
    )
    .unwrap();
    // Alternating extremes defeat difference coding in every block, so
    // the compressed form can never be smaller than the raw tile.
    let image =
        ImageData::I16((0..160).map(|i| if i % 2 == 0 { 16384 } else { -16384 }).collect());
    let (header, buf) = compress_image(&image, &config).unwrap();

    let columns = columns_from_header(&header).unwrap();
    let offsets = column_offsets(&columns);
    let layout = HeapLayout::compute(&header, &columns, buf.len()).unwrap();

    let (ci, ccol) = find_column(&columns, "COMPRESSED_DATA").unwrap();
    let (ui, ucol) = find_column(&columns, "UNCOMPRESSED_DATA").expect("fallback column");
    for row in 0..layout.rows {
        let (ccount, _) = layout.descriptor(&buf, row, ccol, offsets[ci]).unwrap();
        let (ucount, ubytes) = layout.descriptor(&buf, row, ucol, offsets[ui]).unwrap();
        assert_eq!(ccount, 0, "tile {row} should not be compressed");
        // Raw storage is exactly the tile's uncompressed size.
        assert_eq!(ucount, 20 * 2);
        assert_eq!(ubytes.len(), 20 * 2 * 2);
    }

    assert_eq!(decompress_image(&buf, &header).unwrap(), image);
}

#[test]
fn oversized_heap_is_a_layout_error() {
    let config = TileConfig::new(PixelType::I16, &[12, 4], &[6, 2], Compression::Gzip).unwrap();
    let image = ImageData::I16(smooth_i16(48));
    let (mut header, buf) = compress_image(&image, &config).unwrap();
    header.set_integer("PCOUNT", buf.len() as i64 + 1);
    assert!(matches!(
        decompress_image(&buf, &header),
        Err(Error::Layout(_))
    ));
}

#[test]
fn unknown_compression_tag_decodes_as_stored_tiles() {
    let config = TileConfig::new(PixelType::I16, &[10, 4], &[5, 2], Compression::None).unwrap();
    let image = ImageData::I16(smooth_i16(40));
    let (mut header, buf) = compress_image(&image, &config).unwrap();
    // A producer writing an unrecognized tag must still decode, by
    // falling back to the stored-tile convention.
    header.set_string("ZCMPTYPE", "FUTURE_9");
    assert_eq!(decompress_image(&buf, &header).unwrap(), image);
}
