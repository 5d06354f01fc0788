//! Content fingerprints.
//!
//! Size and modification time only decide whether content needs to be
//! compared. The digest computed here is what actually decides equality, and
//! it is computed the same way for local and remote files.

use crate::remote::RemoteFs;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUFFER: usize = 64 * 1024;

/// Stream `reader` to the end and return its MD5 digest as lowercase hex
pub fn fingerprint<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn fingerprint_local(path: &Path) -> io::Result<String> {
    fingerprint(File::open(path)?)
}

pub fn fingerprint_remote(fs: &dyn RemoteFs, path: &str) -> io::Result<String> {
    fingerprint(fs.open_read(path)?)
}
