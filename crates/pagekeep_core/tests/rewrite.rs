use pagekeep_core::{asset_file_name, rewrite_css, rewrite_html, scan_css, AssetKind, AssetMap};
use pretty_assertions::assert_eq;
use url::Url;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn map(entries: &[(&str, &str)]) -> AssetMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn src_and_href_are_rewritten_when_mapped() {
    let base = url("https://example.com/post/");
    let assets = map(&[
        ("https://example.com/img/a.png", "aaa.png"),
        ("https://example.com/site.css", "bbb.css"),
    ]);
    let html = r#"<link rel="stylesheet" href='/site.css'><img src="../img/a.png#x"><a href="/other">x</a>"#;

    let out = rewrite_html(html, &base, &assets, "assets/");

    assert_eq!(
        out,
        r#"<link rel="stylesheet" href='assets/bbb.css'><img src="assets/aaa.png"><a href="/other">x</a>"#
    );
}

#[test]
fn unquoted_and_entity_encoded_values_resolve() {
    let base = url("https://example.com/");
    let assets = map(&[("https://example.com/pic?w=1&h=2", "ccc.img")]);
    let html = r#"<img src=/pic?w=1&amp;h=2><img SRC = "pic?w=1&amp;h=2">"#;

    let out = rewrite_html(html, &base, &assets, "assets/");

    assert_eq!(out, r#"<img src=assets/ccc.img><img SRC = "assets/ccc.img">"#);
}

#[test]
fn srcset_candidates_keep_descriptors() {
    let base = url("https://example.com/");
    let assets = map(&[
        ("https://example.com/a.png", "a1.png"),
        ("https://example.com/b.png", "b1.png"),
    ]);
    let html = r#"<img srcset="a.png 1x,  b.png   2x, https://cdn.example/c.png 3x">"#;

    let out = rewrite_html(html, &base, &assets, "assets/");

    assert_eq!(
        out,
        r#"<img srcset="assets/a1.png 1x, assets/b1.png 2x, https://cdn.example/c.png 3x">"#
    );
}

#[test]
fn srcset_without_mapped_candidates_is_untouched() {
    let base = url("https://example.com/");
    let html = r#"<img srcset="a.png 1x,b.png 2x">"#;
    assert_eq!(rewrite_html(html, &base, &AssetMap::new(), "assets/"), html);
}

#[test]
fn css_urls_and_imports_rewrite_relative_to_stylesheet() {
    let sheet = url("https://example.com/css/nested/theme.css");
    let assets = map(&[
        ("https://example.com/css/nested/bg.png", "bg1.png"),
        ("https://example.com/css/base.css", "base1.css"),
        ("https://example.com/fonts/f.woff2", "f1.woff2"),
    ]);
    let css = "@import \"../base.css\";\nbody { background: url(bg.png) }\n@font-face { src: url('/fonts/f.woff2') format('woff2') }\n.x { background: url(data:image/png;base64,AA) }";

    let out = rewrite_css(css, &sheet, &assets, "");

    assert_eq!(
        out,
        "@import \"base1.css\";\nbody { background: url(bg1.png) }\n@font-face { src: url('f1.woff2') format('woff2') }\n.x { background: url(data:image/png;base64,AA) }"
    );
}

#[test]
fn scan_lists_imports_before_urls() {
    let sheet = url("https://example.com/css/main.css");
    let css = "a { background: url(\"img/x.png\") }\n@import url(other.css);\n@import 'print.css' print;";

    let found = scan_css(css, &sheet);

    assert_eq!(
        found,
        vec![
            (url("https://example.com/css/other.css"), AssetKind::Stylesheet),
            (url("https://example.com/css/print.css"), AssetKind::Stylesheet),
            (url("https://example.com/css/img/x.png"), AssetKind::Other),
            (url("https://example.com/css/other.css"), AssetKind::Other),
        ]
    );
}

#[test]
fn asset_file_names_are_stable_and_distinct() {
    let a = url("https://example.com/a.png");
    let b = url("https://example.com/b.png");
    assert_eq!(
        asset_file_name(&a, AssetKind::Image),
        asset_file_name(&a, AssetKind::Image)
    );
    assert_ne!(
        asset_file_name(&a, AssetKind::Image),
        asset_file_name(&b, AssetKind::Image)
    );
    assert_eq!(asset_file_name(&a, AssetKind::Image).len(), 32 + ".png".len());
}

#[test]
fn prefixed_attribute_names_are_left_alone() {
    let base = url("https://example.com/");
    let assets = map(&[("https://example.com/a.png", "a1.png")]);
    let html = r#"<img data-src="/a.png" data-srcset="/a.png 2x" src="/a.png"><svg><use xlink:href="/a.png"/></svg>"#;

    let out = rewrite_html(html, &base, &assets, "assets/");

    assert_eq!(
        out,
        r#"<img data-src="/a.png" data-srcset="/a.png 2x" src="assets/a1.png"><svg><use xlink:href="/a.png"/></svg>"#
    );
}
