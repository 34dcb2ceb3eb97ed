use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use url::Url;

/// Normalized asset URL -> local file name, filled in as assets are discovered.
pub type AssetMap = BTreeMap<String, String>;

/// Number of digest bytes kept in a content-hash file name.
const HASH_BYTES: usize = 16;
const MAX_EXTENSION_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Stylesheet,
    Image,
    Icon,
    Other,
}

impl AssetKind {
    /// Extension used when the URL path does not carry a usable one.
    pub fn default_extension(self) -> &'static str {
        match self {
            AssetKind::Stylesheet => "css",
            AssetKind::Image => "img",
            AssetKind::Icon => "ico",
            AssetKind::Other => "bin",
        }
    }
}

/// A crawl work item. Identity is the normalized URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub url: Url,
    pub kind: AssetKind,
}

impl AssetDescriptor {
    pub fn new(url: Url, kind: AssetKind) -> Self {
        Self {
            url: normalize_url(&url),
            kind,
        }
    }

    pub fn key(&self) -> &str {
        self.url.as_str()
    }

    pub fn file_name(&self) -> String {
        asset_file_name(&self.url, self.kind)
    }
}

/// Resolve a raw reference against `base`, returning a normalized absolute URL.
///
/// Fragment-only references and non-network schemes (`data:`, `javascript:`,
/// `about:`, `blob:`, `mailto:`) yield `None`.
pub fn resolve_reference(raw: &str, base: &Url) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    const ILLEGAL: &[&str] = &["data:", "javascript:", "about:", "blob:", "mailto:"];
    if ILLEGAL.iter().any(|scheme| lower.starts_with(scheme)) {
        return None;
    }
    let mut url = base.join(trimmed).ok()?;
    url.set_fragment(None);
    Some(url)
}

pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized
}

/// Only http(s) assets are downloaded.
pub fn is_fetchable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Guess the kind of an unlabelled reference from its path extension.
pub fn classify_url(url: &Url) -> AssetKind {
    match path_extension(url).as_deref() {
        Some("css") => AssetKind::Stylesheet,
        Some("ico") => AssetKind::Icon,
        Some("png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "bmp") => AssetKind::Image,
        _ => AssetKind::Other,
    }
}

/// Deterministic local file name: `{hex(sha256(normalized url))[..32]}.{ext}`.
pub fn asset_file_name(url: &Url, kind: AssetKind) -> String {
    let normalized = normalize_url(url);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut name = String::with_capacity(HASH_BYTES * 2 + 1 + MAX_EXTENSION_LEN);
    for byte in digest.iter().take(HASH_BYTES) {
        use std::fmt::Write;
        let _ = write!(&mut name, "{byte:02x}");
    }
    let extension =
        path_extension(&normalized).unwrap_or_else(|| kind.default_extension().to_string());
    name.push('.');
    name.push_str(&extension);
    name
}

fn path_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Split a `srcset` value into `(url, descriptor)` candidates.
///
/// The descriptor is everything after the first run of whitespace, kept verbatim.
pub fn parse_srcset(value: &str) -> Vec<(&str, &str)> {
    value
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| match candidate.find(char::is_whitespace) {
            Some(idx) => (&candidate[..idx], candidate[idx..].trim_start()),
            None => (candidate, ""),
        })
        .collect()
}
