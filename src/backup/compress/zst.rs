//! Decoding of `.sqlite3.zst` snapshots left by earlier releases. Nothing is
//! written in this format anymore.

use crate::backup::result_error::result::Result;
use std::io::{Read, Write};
use zstd::stream::read::Decoder;

pub fn decompress<R: Read, W: Write>(reader: R, writer: &mut W) -> Result<u64> {
    let mut decoder = Decoder::new(reader)?;
    Ok(std::io::copy(&mut decoder, writer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_decompress() {
        let payload = b"SQLite format 3\0".repeat(64);
        let compressed = zstd::encode_all(Cursor::new(&payload), 3).unwrap();

        let mut restored = Vec::new();
        let read = decompress(Cursor::new(compressed), &mut restored).unwrap();
        assert_eq!(read as usize, payload.len());
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let mut restored = Vec::new();
        assert!(decompress(Cursor::new(b"not zstd at all".to_vec()), &mut restored).is_err());
    }
}
