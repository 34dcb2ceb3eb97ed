//! Reference rewriting for captured HTML and stylesheets.
//!
//! Rewriting is textual: only the attribute values and CSS references that
//! resolve to a mapped asset are touched, the rest of the document is emitted
//! byte-for-byte.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use crate::asset::{parse_srcset, resolve_reference, AssetKind, AssetMap};

static LINK_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:^|\s)(?:src|href)\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("link attribute regex")
});

static SRCSET_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)((?:^|\s)srcset\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("srcset attribute regex")
});

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).expect("css url regex")
});

static CSS_IMPORT_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(@import\s+)(?:"([^"]*)"|'([^']*)')"#).expect("css import regex")
});

static CSS_IMPORT_ANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)@import\s+(?:url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)|"([^"]*)"|'([^']*)')"#,
    )
    .expect("css import target regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Double,
    Single,
    Bare,
}

impl Quote {
    fn wrap(self, value: &str) -> String {
        match self {
            Quote::Double => format!("\"{value}\""),
            Quote::Single => format!("'{value}'"),
            Quote::Bare => value.to_string(),
        }
    }
}

const QUOTED_OR_BARE: [(usize, Quote); 3] =
    [(1, Quote::Double), (2, Quote::Single), (3, Quote::Bare)];
const ATTR_VALUE: [(usize, Quote); 3] =
    [(2, Quote::Double), (3, Quote::Single), (4, Quote::Bare)];
const QUOTED_ONLY: [(usize, Quote); 2] = [(2, Quote::Double), (3, Quote::Single)];

/// Pick the first participating capture group, with its quoting style.
fn quoted_value<'h>(caps: &Captures<'h>, groups: &[(usize, Quote)]) -> Option<(&'h str, Quote)> {
    groups
        .iter()
        .find_map(|&(idx, quote)| caps.get(idx).map(|m| (m.as_str(), quote)))
}

fn decode_attribute(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#38;", "&")
        .replace("&amp;", "&")
}

fn local_path(raw: &str, base: &Url, assets: &AssetMap, prefix: &str) -> Option<String> {
    let url = resolve_reference(raw, base)?;
    assets
        .get(url.as_str())
        .map(|file_name| format!("{prefix}{file_name}"))
}

/// Rewrite `src`, `href` and `srcset` attribute values that map to local assets.
///
/// Only standalone attribute names match; `data-src`, `data-srcset` and
/// `xlink:href` are left alone.
///
/// `prefix` is the asset directory relative to the document, e.g. `assets/`.
pub fn rewrite_html(html: &str, base: &Url, assets: &AssetMap, prefix: &str) -> String {
    let pass = LINK_ATTR.replace_all(html, |caps: &Captures| {
        let whole = caps[0].to_string();
        let Some((raw, quote)) = quoted_value(caps, &ATTR_VALUE) else {
            return whole;
        };
        match local_path(&decode_attribute(raw), base, assets, prefix) {
            Some(local) => format!("{}{}", &caps[1], quote.wrap(&local)),
            None => whole,
        }
    });

    SRCSET_ATTR
        .replace_all(&pass, |caps: &Captures| {
            let whole = caps[0].to_string();
            let Some((raw, quote)) = quoted_value(caps, &QUOTED_ONLY) else {
                return whole;
            };
            match rewrite_srcset(&decode_attribute(raw), base, assets, prefix) {
                Some(rewritten) => format!("{}{}", &caps[1], quote.wrap(&rewritten)),
                None => whole,
            }
        })
        .into_owned()
}

/// Returns `None` when no candidate maps to a local asset.
fn rewrite_srcset(value: &str, base: &Url, assets: &AssetMap, prefix: &str) -> Option<String> {
    let mut changed = false;
    let candidates: Vec<String> = parse_srcset(value)
        .into_iter()
        .map(|(url, descriptor)| {
            let url = match local_path(url, base, assets, prefix) {
                Some(local) => {
                    changed = true;
                    local
                }
                None => url.to_string(),
            };
            if descriptor.is_empty() {
                url
            } else {
                format!("{url} {descriptor}")
            }
        })
        .collect();
    changed.then(|| candidates.join(", "))
}

/// Rewrite `url(...)` and `@import "..."` references in a stylesheet.
///
/// `base` must be the stylesheet's own URL so nested imports resolve relative
/// to their location.
pub fn rewrite_css(css: &str, base: &Url, assets: &AssetMap, prefix: &str) -> String {
    let pass = CSS_URL.replace_all(css, |caps: &Captures| {
        let whole = caps[0].to_string();
        let Some((raw, quote)) = quoted_value(caps, &QUOTED_OR_BARE) else {
            return whole;
        };
        match local_path(raw, base, assets, prefix) {
            Some(local) => format!("url({})", quote.wrap(&local)),
            None => whole,
        }
    });

    CSS_IMPORT_STRING
        .replace_all(&pass, |caps: &Captures| {
            let whole = caps[0].to_string();
            let Some((raw, quote)) = quoted_value(caps, &QUOTED_ONLY) else {
                return whole;
            };
            match local_path(raw, base, assets, prefix) {
                Some(local) => format!("{}{}", &caps[1], quote.wrap(&local)),
                None => whole,
            }
        })
        .into_owned()
}

/// Discover the references of a stylesheet: `@import` targets first (as
/// stylesheets), then every `url(...)` target (as other assets).
pub fn scan_css(css: &str, base: &Url) -> Vec<(Url, AssetKind)> {
    let imports = CSS_IMPORT_ANY.captures_iter(css).filter_map(|caps| {
        (1..=5)
            .find_map(|idx| caps.get(idx))
            .and_then(|m| resolve_reference(m.as_str(), base))
            .map(|url| (url, AssetKind::Stylesheet))
    });
    let urls = CSS_URL.captures_iter(css).filter_map(|caps| {
        quoted_value(&caps, &QUOTED_OR_BARE)
            .and_then(|(raw, _)| resolve_reference(raw, base))
            .map(|url| (url, AssetKind::Other))
    });
    imports.chain(urls).collect()
}
