//! Block compression codec.
//!
//! A small closed set — `none`, `gzip`, `deflate` — each exposing pure
//! `compress`/`decompress` over an opaque byte block. The codec is
//! chosen once, at [`crate::sstable::SstableBuilder`] construction, and
//! is not recorded in the block itself; decoding with the wrong codec
//! surfaces as [`CodecError::Mismatch`], which the caller treats as
//! corruption.

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error during (de)compression: {0}")]
    Io(#[from] std::io::Error),

    /// A block failed to decompress under the configured codec — most
    /// likely it was written with a different one.
    #[error("codec mismatch: block did not decompress under the configured codec")]
    Mismatch,
}

/// The closed set of supported block codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Gzip,
    Deflate,
}

impl Codec {
    pub fn as_u8(self) -> u8 {
        match self {
            Codec::None => 0,
            Codec::Gzip => 1,
            Codec::Deflate => 2,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Codec::None),
            1 => Some(Codec::Gzip),
            2 => Some(Codec::Deflate),
            _ => None,
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Codec::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map_err(|_| CodecError::Mismatch)?;
                Ok(out)
            }
            Codec::Deflate => {
                let mut decoder = DeflateDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out).map_err(|_| CodecError::Mismatch)?;
                Ok(out)
            }
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Gzip
    }
}
