#![cfg_attr(not(feature = "std"), no_std)]

//! Decoder and encoder for FITS tile-compressed images.
//!
//! An n-dimensional image is partitioned into rectangular tiles, each
//! tile compressed independently, and the byte streams stored as
//! variable-length rows of a binary table. This crate resolves the
//! table's header keywords into column and tiling descriptors, addresses
//! each tile inside the table heap, runs the per-tile codec, and
//! reconstructs scaled/typed pixels into a contiguous image buffer --
//! plus the symmetric encoder. Reading FITS files themselves (cards,
//! blocks, HDU structure) belongs to the surrounding layer.

extern crate alloc;

pub mod bintable;
pub mod endian;
pub mod error;
pub mod gzip;
pub mod hcomp;
pub mod header;
pub mod heap;
pub mod plio;
pub mod quantize;
pub mod rice;
pub mod tiled;
pub mod tiling;

pub use error::{Error, Result};
pub use header::{Header, Value};
pub use heap::HeapLayout;
pub use tiled::{compress_image, decompress_image, ImageData};
pub use tiling::{BlankMode, Compression, PixelType, ScaleMode, TileConfig};
