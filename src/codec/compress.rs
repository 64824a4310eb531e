//! Gzip helpers shared by frame bodies and map payloads.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, RobovacError};

/// Compress data with gzip
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress gzip data, refusing to inflate beyond `limit` bytes
pub fn gunzip(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut decoder = GzDecoder::new(data).take(limit as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RobovacError::Decode(format!("Gzip decompression failed: {e}")))?;

    if out.len() > limit {
        return Err(RobovacError::Decode(format!(
            "Decompressed size exceeds limit of {limit} bytes"
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_roundtrip() {
        let data = br#"{"state":8,"battery":100,"clean_area":0}"#.repeat(20);
        let packed = gzip(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(gunzip(&packed, 1 << 20).unwrap(), data);
    }

    #[test]
    fn test_gunzip_limit() {
        let packed = gzip(&[0u8; 4096]).unwrap();
        assert!(gunzip(&packed, 4096).is_ok());
        assert!(matches!(
            gunzip(&packed, 4095),
            Err(RobovacError::Decode(_))
        ));
    }

    #[test]
    fn test_gunzip_garbage() {
        assert!(gunzip(b"not gzip at all", 1024).is_err());
    }
}
