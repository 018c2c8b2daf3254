//! Local file verification against catalog-declared size and digest.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use md5::{Digest, Md5};

/// Read granularity for incremental hashing.
const CHUNK_SIZE: usize = 8 * 1024;

/// Whether `path` already holds exactly the expected contents.
///
/// The size comparison runs first and short-circuits: a file of the wrong
/// length is never hashed, which keeps re-runs over large trees cheap and
/// guarantees a truncated partial write can never pass. Only when the size
/// matches is the file streamed through MD5 and the digest compared
/// byte-for-byte.
pub fn is_valid(path: &Path, expected_size: u64, expected_md5: &[u8; 16]) -> io::Result<bool> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if !meta.is_file() || meta.len() != expected_size {
        return Ok(false);
    }
    Ok(md5_of(path)? == *expected_md5)
}

/// Stream a file through MD5 in fixed-size chunks.
pub fn md5_of(path: &Path) -> io::Result<[u8; 16]> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Md5::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().into())
}
