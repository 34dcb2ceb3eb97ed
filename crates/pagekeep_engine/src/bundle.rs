//! Compressed single-blob bundles of an archive directory.
//!
//! Container: `[u64 LE uncompressed length][zstd frame]`. The length prefix
//! exists so the decoder can size its buffer exactly before decompressing.
//!
//! Uncompressed payload:
//!
//! ```text
//! b"PKBN" | version: u8 | count: u32 LE | count x (path_len: u32 LE | path | data_len: u64 LE | data)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pagekeep_logging::{keep_debug, keep_warn};
use thiserror::Error;

use crate::persist::AtomicFileWriter;

/// Relative path (`/`-separated) -> file bytes.
pub type BundleEntries = BTreeMap<String, Vec<u8>>;

pub const DEFAULT_MAX_BUNDLE_BYTES: u64 = 4096 * 1024 * 1024;

const MAGIC: &[u8; 4] = b"PKBN";
const FORMAT_VERSION: u8 = 1;
const LENGTH_PREFIX: usize = 8;
const COMPRESSION_LEVEL: i32 = 3;
const COMPRESSION_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleLimits {
    /// Largest uncompressed payload accepted when packing or unpacking.
    pub max_uncompressed_bytes: u64,
}

impl Default for BundleLimits {
    fn default() -> Self {
        Self {
            max_uncompressed_bytes: DEFAULT_MAX_BUNDLE_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("no files to bundle under {0:?}")]
    Empty(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bundle shorter than its length prefix")]
    Truncated,
    #[error("declared length {declared} is outside the accepted range (max {max})")]
    BadLength { declared: u64, max: u64 },
    #[error("payload could not be compressed")]
    Compression,
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("decompressed {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
    #[error("unsafe entry path {0:?}")]
    UnsafePath(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackReport {
    pub written: Vec<String>,
    pub failed: Vec<String>,
}

/// Bundle every non-hidden file below `dir`.
pub fn pack_directory(dir: &Path, limits: BundleLimits) -> Result<Vec<u8>, BundleError> {
    let mut entries = BundleEntries::new();
    collect_files(dir, "", &mut entries)?;
    if entries.is_empty() {
        return Err(BundleError::Empty(dir.to_path_buf()));
    }
    keep_debug!("Packing {} files from {:?}", entries.len(), dir);
    encode_entries(&entries, limits)
}

/// Bundle a single file under its own file name.
pub fn pack_file(path: &Path, limits: BundleLimits) -> Result<Vec<u8>, BundleError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| BundleError::UnsafePath(path.display().to_string()))?;
    let mut entries = BundleEntries::new();
    entries.insert(name.to_string(), fs::read(path)?);
    encode_entries(&entries, limits)
}

/// Restore a bundle below `dir`.
///
/// The whole bundle is validated before anything is written; after that,
/// a file that fails to write is recorded and the rest are still restored.
pub fn unpack(bytes: &[u8], dir: &Path, limits: BundleLimits) -> Result<UnpackReport, BundleError> {
    let entries = decode_entries(bytes, limits)?;
    let writer = AtomicFileWriter::new(dir.to_path_buf());
    let mut report = UnpackReport::default();
    for (path, data) in entries {
        match writer.write(&path, &data) {
            Ok(_) => report.written.push(path),
            Err(err) => {
                keep_warn!("Restoring {} into {:?} failed: {}", path, dir, err);
                report.failed.push(path);
            }
        }
    }
    Ok(report)
}

pub fn encode_entries(entries: &BundleEntries, limits: BundleLimits) -> Result<Vec<u8>, BundleError> {
    let payload = serialize(entries)?;
    let declared = payload.len() as u64;
    if declared > limits.max_uncompressed_bytes {
        return Err(BundleError::BadLength {
            declared,
            max: limits.max_uncompressed_bytes,
        });
    }
    let compressed = compress(&payload)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX + compressed.len());
    out.extend_from_slice(&declared.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

pub fn decode_entries(bytes: &[u8], limits: BundleLimits) -> Result<BundleEntries, BundleError> {
    let prefix: [u8; LENGTH_PREFIX] = bytes
        .get(..LENGTH_PREFIX)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or(BundleError::Truncated)?;
    let declared = u64::from_le_bytes(prefix);
    let bad_length = BundleError::BadLength {
        declared,
        max: limits.max_uncompressed_bytes,
    };
    if declared == 0 || declared > limits.max_uncompressed_bytes {
        return Err(bad_length);
    }
    let expected = usize::try_from(declared).map_err(|_| bad_length)?;

    let mut payload = vec![0u8; expected];
    let actual = zstd::bulk::decompress_to_buffer(&bytes[LENGTH_PREFIX..], &mut payload)
        .map_err(|err| BundleError::Decompression(err.to_string()))?;
    if actual != expected {
        return Err(BundleError::SizeMismatch { expected, actual });
    }
    deserialize(&payload)
}

/// zstd can exceed an estimate-sized buffer on incompressible input, so the
/// destination grows until it reaches the worst-case bound.
fn compress(payload: &[u8]) -> Result<Vec<u8>, BundleError> {
    let bound = zstd::zstd_safe::compress_bound(payload.len());
    let mut capacity = (payload.len() / 2 + 64).min(bound);
    for attempt in 1..=COMPRESSION_ATTEMPTS {
        let mut buffer = vec![0u8; capacity];
        match zstd::bulk::compress_to_buffer(payload, &mut buffer, COMPRESSION_LEVEL) {
            Ok(written) => {
                buffer.truncate(written);
                return Ok(buffer);
            }
            Err(err) => {
                keep_debug!(
                    "Compression attempt {} with {} byte buffer failed: {}",
                    attempt,
                    capacity,
                    err
                );
                if capacity >= bound {
                    break;
                }
                capacity = if attempt + 1 == COMPRESSION_ATTEMPTS {
                    bound
                } else {
                    capacity.saturating_mul(2).min(bound)
                };
            }
        }
    }
    Err(BundleError::Compression)
}

fn serialize(entries: &BundleEntries) -> Result<Vec<u8>, BundleError> {
    let count = u32::try_from(entries.len()).map_err(|_| BundleError::Malformed("too many entries"))?;
    let body: usize = entries.iter().map(|(path, data)| 12 + path.len() + data.len()).sum();
    let mut out = Vec::with_capacity(MAGIC.len() + 5 + body);
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&count.to_le_bytes());
    for (path, data) in entries {
        validate_entry_path(path)?;
        let path_len =
            u32::try_from(path.len()).map_err(|_| BundleError::UnsafePath(path.clone()))?;
        out.extend_from_slice(&path_len.to_le_bytes());
        out.extend_from_slice(path.as_bytes());
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(data);
    }
    Ok(out)
}

fn deserialize(payload: &[u8]) -> Result<BundleEntries, BundleError> {
    let mut cursor = Cursor::new(payload);
    if cursor.take(MAGIC.len())? != MAGIC {
        return Err(BundleError::Malformed("bad magic"));
    }
    if cursor.take(1)?[0] != FORMAT_VERSION {
        return Err(BundleError::Malformed("unsupported version"));
    }
    let count = cursor.u32()?;
    let mut entries = BundleEntries::new();
    for _ in 0..count {
        let path_len = cursor.u32()? as usize;
        let path = std::str::from_utf8(cursor.take(path_len)?)
            .map_err(|_| BundleError::Malformed("entry path is not utf-8"))?
            .to_string();
        validate_entry_path(&path)?;
        let data_len =
            usize::try_from(cursor.u64()?).map_err(|_| BundleError::Malformed("entry too large"))?;
        let data = cursor.take(data_len)?.to_vec();
        if entries.insert(path, data).is_some() {
            return Err(BundleError::Malformed("duplicate entry path"));
        }
    }
    if !cursor.is_empty() {
        return Err(BundleError::Malformed("trailing bytes"));
    }
    Ok(entries)
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BundleError> {
        if len > self.bytes.len() {
            return Err(BundleError::Malformed("truncated entry"));
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, BundleError> {
        let raw: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| BundleError::Malformed("truncated entry"))?;
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, BundleError> {
        let raw: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| BundleError::Malformed("truncated entry"))?;
        Ok(u64::from_le_bytes(raw))
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Entry paths must stay inside the extraction directory.
fn validate_entry_path(path: &str) -> Result<(), BundleError> {
    let unsafe_path = || BundleError::UnsafePath(path.to_string());
    if path.is_empty() || path.contains(['\\', ':', '\0']) {
        return Err(unsafe_path());
    }
    if path
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(unsafe_path());
    }
    Ok(())
}

fn collect_files(dir: &Path, prefix: &str, out: &mut BundleEntries) -> Result<(), BundleError> {
    let mut children: Vec<_> = fs::read_dir(dir)?.filter_map(|entry| entry.ok()).collect();
    children.sort_by_key(|entry| entry.file_name());
    for entry in children {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            keep_warn!("Skipping non UTF-8 file name in {:?}", dir);
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), &relative, out)?;
        } else if file_type.is_file() {
            out.insert(relative, fs::read(entry.path())?);
        }
    }
    Ok(())
}
