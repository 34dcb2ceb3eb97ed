use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pagekeep_core::{is_safe_item_id, ArchiveBadge, Item};
use pagekeep_engine::{
    pack_directory, pack_file, unpack, Archiver, ArchiverConfig, AtomicFileWriter, BundleLimits,
    CaptureSource, FetchSettings, ItemStore, JobReport, NoRenderer, ReqwestFetcher, SessionCookie,
    StorageResolver,
};
use pagekeep_logging::keep_info;
use serde_json::json;
use url::Url;

use crate::records::FileItemStore;
use crate::{ArchiveArgs, Cli, Command};

const DOCUMENTS_DIR: &str = "documents";

pub(crate) async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Add { id, url } => add(cli, id, url),
        Command::Archive(args) => archive(cli, args).await,
        Command::Document { id, file } => attach_document(cli, id, file),
        Command::Resolve { id, force_extract } => resolve(cli, id, *force_extract),
        Command::Cleanup { id } => cleanup(cli, id),
        Command::List => list(cli),
        Command::Pack { dir, out } => {
            let bundle = pack_directory(dir, BundleLimits::default())
                .with_context(|| format!("bundling {}", dir.display()))?;
            fs::write(out, &bundle).with_context(|| format!("writing {}", out.display()))?;
            println!("{} bytes -> {}", bundle.len(), out.display());
            Ok(())
        }
        Command::Unpack { bundle, dir } => {
            let bytes = fs::read(bundle).with_context(|| format!("reading {}", bundle.display()))?;
            let report = unpack(&bytes, dir, BundleLimits::default())
                .with_context(|| format!("restoring {}", bundle.display()))?;
            println!(
                "{}",
                json!({ "written": report.written, "failed": report.failed })
            );
            Ok(())
        }
    }
}

fn open_store(cli: &Cli) -> Result<FileItemStore> {
    FileItemStore::open(&cli.state_dir)
}

fn resolver(cli: &Cli) -> StorageResolver {
    StorageResolver::new(
        cli.archive_root.clone(),
        cli.cache_root.clone(),
        BundleLimits::default(),
    )
}

fn load_item(store: &FileItemStore, id: &str) -> Result<Item> {
    match store.get(id)? {
        Some(item) => Ok(item),
        None => bail!("unknown item {id:?}"),
    }
}

fn add(cli: &Cli, id: &str, url: &str) -> Result<()> {
    if !is_safe_item_id(id) {
        bail!("item id {id:?} must be a single path component");
    }
    Url::parse(url).with_context(|| format!("invalid url {url:?}"))?;
    let store = open_store(cli)?;
    store.insert(Item::new(id, url))?;
    keep_info!("Registered item {} for {}", id, url);
    Ok(())
}

async fn archive(cli: &Cli, args: &ArchiveArgs) -> Result<()> {
    let store = Arc::new(open_store(cli)?);
    let fetcher = ReqwestFetcher::new(FetchSettings {
        request_timeout: Some(args.request_timeout()),
        ..FetchSettings::default()
    })?;
    let mut config = ArchiverConfig::with_roots(cli.archive_root.clone(), cli.cache_root.clone());
    config.render_timeout = args.render_timeout();
    let archiver = Archiver::new(config, Arc::new(NoRenderer), Arc::new(fetcher), store.clone());

    let report = match &args.payload {
        Some(path) => {
            let payload_json = fs::read_to_string(path)
                .with_context(|| format!("reading payload {}", path.display()))?;
            let cookies = match &args.cookies {
                Some(path) => read_cookies(path)?,
                None => Vec::new(),
            };
            archiver
                .archive(
                    &args.id,
                    CaptureSource::PreCaptured {
                        payload_json,
                        cookies,
                    },
                )
                .await
        }
        None => archiver.archive_item(&args.id).await,
    };

    let outcome = match report {
        JobReport::Completed(outcome) => outcome,
        JobReport::Skipped => bail!("item {:?} is already being archived", args.id),
        JobReport::ItemNotFound => bail!("unknown item {:?}", args.id),
    };
    println!(
        "{}",
        json!({
            "item": args.id,
            "status": outcome.archive_status.as_str(),
            "page": outcome.html_relative_path,
            "title": outcome.metadata.title,
            "author": outcome.metadata.author,
            "published": outcome.metadata.published_date,
            "assets": outcome.asset_file_names.len(),
            "bundle_bytes": outcome.bundle_data.as_ref().map(Vec::len),
        })
    );
    Ok(())
}

fn read_cookies(path: &Path) -> Result<Vec<SessionCookie>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading cookies {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing cookies {}", path.display()))
}

/// Copy the document into the primary tier and keep a fallback bundle on the record.
fn attach_document(cli: &Cli, id: &str, file: &Path) -> Result<()> {
    let store = open_store(cli)?;
    load_item(&store, id)?;
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} has no usable file name", file.display()))?;
    let relative = format!("{DOCUMENTS_DIR}/{id}/{name}");

    let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    AtomicFileWriter::new(cli.archive_root.clone()).write(&relative, &bytes)?;
    let bundle = pack_file(file, BundleLimits::default())?;

    store.perform(id, &mut |item: &mut Item| {
        item.document_relative_path = Some(relative.clone());
        item.document_zip_data = Some(bundle.clone());
    })?;
    println!("{relative}");
    Ok(())
}

fn resolve(cli: &Cli, id: &str, force_extract: bool) -> Result<()> {
    let store = open_store(cli)?;
    let item = load_item(&store, id)?;
    let resolver = resolver(cli);

    let archive = resolver.resolve(&item, force_extract);
    let document = resolver.resolve_document(&item, force_extract);
    if archive.is_none() && document.is_none() {
        bail!("item {id:?} has no readable copy");
    }
    println!(
        "{}",
        json!({
            "item": id,
            "archive": archive.map(|found| json!({
                "tier": format!("{:?}", found.tier).to_lowercase(),
                "page": found.page,
                "reader": found.reader,
                "assets": found.assets_dir,
            })),
            "document": document.map(|found| json!({
                "tier": format!("{:?}", found.tier).to_lowercase(),
                "path": found.path,
            })),
        })
    );
    Ok(())
}

fn cleanup(cli: &Cli, id: &str) -> Result<()> {
    let store = open_store(cli)?;
    let mut item = load_item(&store, id)?;
    let resolver = resolver(cli);
    let archive = resolver.cleanup_if_primary_synced(&mut item)?;
    let document = resolver.cleanup_document_if_primary_synced(&mut item)?;
    if archive || document {
        store.insert(item)?;
    }
    println!("{}", json!({ "item": id, "archive": archive, "document": document }));
    Ok(())
}

fn list(cli: &Cli) -> Result<()> {
    let store = open_store(cli)?;
    for item in store.items() {
        let badge = ArchiveBadge::for_item(&item);
        println!(
            "{}\t{}\t{}",
            item.id,
            badge.label(),
            item.link_title.as_deref().unwrap_or(&item.link_url)
        );
    }
    Ok(())
}
