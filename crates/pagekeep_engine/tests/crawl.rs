use std::fs;

use pagekeep_core::{asset_file_name, ArchiveStatus, AssetKind, CapturedPage};
use pagekeep_engine::{AssetCrawler, FetchSettings, ReqwestFetcher, SessionCookies};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> ReqwestFetcher {
    ReqwestFetcher::new(FetchSettings::default()).unwrap()
}

fn at(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

async fn serve(server: &MockServer, route: &str, body: &str, mime: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), mime))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn shared_image_is_fetched_once_and_every_reference_rewritten() {
    let server = MockServer::start().await;
    serve(&server, "/img/a.png", "png-bytes", "image/png").await;

    let html = r#"<img src="/img/a.png" srcset="/img/a.png 1x, /img/a.png 2x"><picture><source srcset="img/a.png#top 3x"></picture><img src="img/a.png">"#;
    let mut page = CapturedPage::bare(html, at(&server, "/article"));
    page.images = vec!["/img/a.png".into(), "img/a.png".into()];
    page.image_srcsets = vec!["/img/a.png 1x, /img/a.png 2x".into(), "img/a.png#top 3x".into()];

    let dir = TempDir::new().unwrap();
    let fetcher = fetcher();
    let cookies = SessionCookies::none();
    let report = AssetCrawler::new(&fetcher, &cookies)
        .crawl(&page, dir.path())
        .await;

    let name = asset_file_name(&at(&server, "/img/a.png"), AssetKind::Image);
    assert_eq!(report.status(), ArchiveStatus::Full);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.asset_file_names, vec![name.clone()]);
    assert_eq!(
        fs::read(dir.path().join("assets").join(&name)).unwrap(),
        b"png-bytes"
    );
    let written = fs::read_to_string(dir.path().join("page.html")).unwrap();
    assert_eq!(
        written,
        format!(
            r#"<img src="assets/{name}" srcset="assets/{name} 1x, assets/{name} 2x"><picture><source srcset="assets/{name} 3x"></picture><img src="assets/{name}">"#
        )
    );
}

#[tokio::test]
async fn nested_stylesheets_are_followed_and_rewritten() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/css/page.css",
        "@import url(other.css);\nbody { color: red; }",
        "text/css",
    )
    .await;
    serve(
        &server,
        "/css/other.css",
        r#"body { background: url("../img/bg.png"); }"#,
        "text/css",
    )
    .await;
    serve(&server, "/img/bg.png", "bg", "image/png").await;

    let html = r#"<link rel="stylesheet" href="/css/page.css">"#;
    let mut page = CapturedPage::bare(html, at(&server, "/article"));
    page.stylesheets = vec!["/css/page.css".into()];

    let dir = TempDir::new().unwrap();
    let fetcher = fetcher();
    let cookies = SessionCookies::none();
    let report = AssetCrawler::new(&fetcher, &cookies)
        .crawl(&page, dir.path())
        .await;

    let page_css = asset_file_name(&at(&server, "/css/page.css"), AssetKind::Stylesheet);
    let other_css = asset_file_name(&at(&server, "/css/other.css"), AssetKind::Stylesheet);
    let bg = asset_file_name(&at(&server, "/img/bg.png"), AssetKind::Other);
    assert_eq!(
        report.asset_file_names,
        vec![page_css.clone(), other_css.clone(), bg.clone()]
    );
    assert_eq!(report.status(), ArchiveStatus::Full);

    let assets = dir.path().join("assets");
    assert_eq!(
        fs::read_to_string(assets.join(&page_css)).unwrap(),
        format!("@import url({other_css});\nbody {{ color: red; }}")
    );
    assert_eq!(
        fs::read_to_string(assets.join(&other_css)).unwrap(),
        format!(r#"body {{ background: url("{bg}"); }}"#)
    );
    assert_eq!(fs::read(assets.join(&bg)).unwrap(), b"bg");
    assert_eq!(
        fs::read_to_string(dir.path().join("page.html")).unwrap(),
        format!(r#"<link rel="stylesheet" href="assets/{page_css}">"#)
    );
}

#[tokio::test]
async fn failed_assets_make_a_partial_archive() {
    let server = MockServer::start().await;
    for n in [1, 3, 5] {
        serve(&server, &format!("/i/{n}.png"), "ok", "image/png").await;
    }
    for n in [2, 4] {
        Mock::given(method("GET"))
            .and(path(format!("/i/{n}.png")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
    }

    let images: Vec<String> = (1..=5).map(|n| format!("/i/{n}.png")).collect();
    let html: String = images
        .iter()
        .map(|src| format!(r#"<img src="{src}">"#))
        .collect();
    let mut page = CapturedPage::bare(html, at(&server, "/"));
    page.images = images;

    let dir = TempDir::new().unwrap();
    let fetcher = fetcher();
    let cookies = SessionCookies::none();
    let report = AssetCrawler::new(&fetcher, &cookies)
        .crawl(&page, dir.path())
        .await;

    assert_eq!(report.status(), ArchiveStatus::Partial);
    assert_eq!(report.attempted, 5);
    assert_eq!(report.failures, 2);
    assert_eq!(report.asset_file_names.len(), 3);
    let written = fs::read_to_string(dir.path().join("page.html")).unwrap();
    assert!(written.contains(r#"<img src="/i/2.png">"#));
    assert!(written.contains(r#"<img src="/i/4.png">"#));
    assert!(!written.contains(r#"<img src="/i/1.png">"#));
}

#[tokio::test]
async fn empty_asset_body_counts_as_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blank.png"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut page = CapturedPage::bare(r#"<img src="/blank.png">"#, at(&server, "/"));
    page.images = vec!["/blank.png".into()];

    let dir = TempDir::new().unwrap();
    let fetcher = fetcher();
    let cookies = SessionCookies::none();
    let report = AssetCrawler::new(&fetcher, &cookies)
        .crawl(&page, dir.path())
        .await;

    assert_eq!(report.failures, 1);
    assert!(report.asset_file_names.is_empty());
    assert_eq!(report.status(), ArchiveStatus::Partial);
}

#[tokio::test]
async fn reader_view_is_rewritten_and_unfetchable_sources_are_ignored() {
    let server = MockServer::start().await;
    serve(&server, "/img/r.png", "reader", "image/png").await;

    let mut page = CapturedPage::bare(
        r#"<video src="ftp://media.example/clip.mp4"></video><img src="/img/r.png">"#,
        at(&server, "/story"),
    );
    page.reader_html = Some(r#"<p><img src="/img/r.png"></p>"#.into());
    page.images = vec!["/img/r.png".into()];
    page.sources = vec!["ftp://media.example/clip.mp4".into()];

    let dir = TempDir::new().unwrap();
    let fetcher = fetcher();
    let cookies = SessionCookies::none();
    let report = AssetCrawler::new(&fetcher, &cookies)
        .crawl(&page, dir.path())
        .await;

    let name = asset_file_name(&at(&server, "/img/r.png"), AssetKind::Image);
    assert!(report.html_written);
    assert!(report.reader_written);
    assert_eq!(report.status(), ArchiveStatus::Full);
    assert_eq!(report.attempted, 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("reader.html")).unwrap(),
        format!(r#"<p><img src="assets/{name}"></p>"#)
    );
    let written = fs::read_to_string(dir.path().join("page.html")).unwrap();
    assert!(written.contains("ftp://media.example/clip.mp4"));
}

#[tokio::test]
async fn asset_write_failure_counts_as_a_failure() {
    let server = MockServer::start().await;
    serve(&server, "/blocked.png", "blocked", "image/png").await;
    serve(&server, "/fine.png", "fine", "image/png").await;

    let mut page = CapturedPage::bare(
        r#"<img src="/blocked.png"><img src="/fine.png">"#,
        at(&server, "/"),
    );
    page.images = vec!["/blocked.png".into(), "/fine.png".into()];

    let dir = TempDir::new().unwrap();
    let blocked = asset_file_name(&at(&server, "/blocked.png"), AssetKind::Image);
    let fine = asset_file_name(&at(&server, "/fine.png"), AssetKind::Image);
    // A directory squatting on the asset's file name makes the write fail.
    fs::create_dir_all(dir.path().join("assets").join(&blocked)).unwrap();

    let fetcher = fetcher();
    let cookies = SessionCookies::none();
    let report = AssetCrawler::new(&fetcher, &cookies)
        .crawl(&page, dir.path())
        .await;

    assert_eq!(report.attempted, 2);
    assert_eq!(report.failures, 1);
    assert_eq!(report.status(), ArchiveStatus::Partial);
    assert_eq!(report.asset_file_names, vec![fine.clone()]);
    assert_eq!(
        fs::read_to_string(dir.path().join("page.html")).unwrap(),
        format!(r#"<img src="/blocked.png"><img src="assets/{fine}">"#)
    );
}
