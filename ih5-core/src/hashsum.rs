//! Qualified content hashsums (`alg:hex`).
//!
//! Hashsums are always stored together with the algorithm name so that the
//! algorithm can be migrated later without invalidating existing files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};

/// Supported hashsum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlg {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlg::Sha256 => "sha256",
            HashAlg::Sha512 => "sha512",
        }
    }

    pub fn parse(s: &str) -> Result<HashAlg> {
        match s {
            "sha256" => Ok(HashAlg::Sha256),
            "sha512" => Ok(HashAlg::Sha512),
            other => Err(Error::UnsupportedHashAlg(other.to_string())),
        }
    }
}

impl core::fmt::Display for HashAlg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the qualified hashsum of a byte stream.
pub fn hashsum<R: Read>(mut data: R, alg: HashAlg) -> Result<String> {
    fn digest_stream<D: Digest, R: Read>(data: &mut R) -> std::io::Result<Vec<u8>> {
        let mut hasher = D::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let n = data.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
        }
        Ok(hasher.finalize().to_vec())
    }

    let digest = match alg {
        HashAlg::Sha256 => digest_stream::<Sha256, R>(&mut data)?,
        HashAlg::Sha512 => digest_stream::<Sha512, R>(&mut data)?,
    };
    Ok(format!("{}:{}", alg.as_str(), hex::encode(digest)))
}

/// Compute the qualified hashsum of in-memory bytes.
pub fn bytes_hashsum(data: &[u8], alg: HashAlg) -> Result<String> {
    hashsum(data, alg)
}

/// Compute the qualified hashsum of a file, ignoring the first `skip_bytes`.
pub fn file_hashsum(path: impl AsRef<Path>, alg: HashAlg, skip_bytes: u64) -> Result<String> {
    let mut f = File::open(path.as_ref())?;
    f.seek(SeekFrom::Start(skip_bytes))?;
    hashsum(f, alg)
}

/// Split a qualified hashsum into its algorithm and hex digest.
pub fn split_qualified(sum: &str) -> Result<(HashAlg, &str)> {
    match sum.split_once(':') {
        Some((alg, hexpart)) => Ok((HashAlg::parse(alg)?, hexpart)),
        None => Err(Error::UnsupportedHashAlg(sum.to_string())),
    }
}

/// Recompute a file hashsum with the algorithm named in `stored` and return
/// the computed qualified sum for comparison.
pub fn recompute_like(
    stored: &str,
    path: impl AsRef<Path>,
    skip_bytes: u64,
) -> Result<String> {
    let (alg, _) = split_qualified(stored)?;
    file_hashsum(path, alg, skip_bytes)
}
