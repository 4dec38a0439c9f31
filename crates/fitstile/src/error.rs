use alloc::string::String;

/// All errors that can occur while resolving or decoding a tiled image.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// Unrecognized TFORM type code or malformed format string.
    FormatParse(String),
    /// Table or heap geometry inconsistent with the supplied buffer.
    Layout(&'static str),
    /// A recognized configuration this implementation cannot process.
    UnsupportedAlgorithm(&'static str),
    /// A tile has neither compressed nor fallback uncompressed data.
    NoCompressedTile(usize),
    /// A codec backend failed while processing the given tile.
    Codec {
        tile: usize,
        reason: &'static str,
    },
    /// A computed offset or count falls outside an owned buffer.
    Bounds(&'static str),
    /// Unrecognized ZBITPIX value.
    InvalidPixelType(i64),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::FormatParse(s) => write!(f, "malformed column format: {s:?}"),
            Error::Layout(msg) => write!(f, "table layout error: {msg}"),
            Error::UnsupportedAlgorithm(msg) => write!(f, "unsupported compression: {msg}"),
            Error::NoCompressedTile(tile) => {
                write!(f, "no compressed or uncompressed data for tile {tile}")
            }
            Error::Codec { tile, reason } => write!(f, "codec error in tile {tile}: {reason}"),
            Error::Bounds(msg) => write!(f, "out of bounds: {msg}"),
            Error::InvalidPixelType(v) => write!(f, "invalid ZBITPIX value: {v}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display_format_parse() {
        let e = Error::FormatParse("1Z".to_string());
        assert_eq!(e.to_string(), "malformed column format: \"1Z\"");
    }

    #[test]
    fn display_no_compressed_tile() {
        let e = Error::NoCompressedTile(7);
        assert_eq!(e.to_string(), "no compressed or uncompressed data for tile 7");
    }

    #[test]
    fn display_codec() {
        let e = Error::Codec {
            tile: 3,
            reason: "truncated stream",
        };
        assert_eq!(e.to_string(), "codec error in tile 3: truncated stream");
    }

    #[test]
    fn display_layout() {
        let e = Error::Layout("heap extends past buffer");
        assert_eq!(e.to_string(), "table layout error: heap extends past buffer");
    }

    #[test]
    fn display_invalid_pixel_type() {
        let e = Error::InvalidPixelType(-99);
        assert_eq!(e.to_string(), "invalid ZBITPIX value: -99");
    }

    #[test]
    fn result_type_alias() {
        let ok: Result<u32> = Ok(42);
        assert!(ok.is_ok());

        let err: Result<u32> = Err(Error::Bounds("descriptor"));
        assert!(err.is_err());
    }
}
