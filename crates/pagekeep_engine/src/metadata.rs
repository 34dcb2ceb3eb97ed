use chrono::{DateTime, Utc};
use pagekeep_core::ArchiveMetadata;
use scraper::{Html, Selector};

/// Pull title, author and publication date out of captured HTML.
///
/// Title prefers `og:title` over `<title>`; author reads `meta[name=author]`
/// then `article:author`; the date reads `article:published_time`,
/// `meta[name=date]`, then the first `<time datetime>`.
pub fn extract_metadata(html: &str) -> ArchiveMetadata {
    let doc = Html::parse_document(html);

    let title = meta_content(&doc, r#"meta[property="og:title"]"#).or_else(|| {
        select_first(&doc, "title")
            .map(|title| collapse_whitespace(&title.text().collect::<String>()))
            .filter(|title| !title.is_empty())
    });

    let author = meta_content(&doc, r#"meta[name="author"]"#)
        .or_else(|| meta_content(&doc, r#"meta[property="article:author"]"#));

    let published_date = meta_content(&doc, r#"meta[property="article:published_time"]"#)
        .or_else(|| meta_content(&doc, r#"meta[name="date"]"#))
        .or_else(|| {
            select_first(&doc, "time[datetime]")
                .and_then(|time| time.value().attr("datetime"))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
        .map(|raw| normalize_date(&raw));

    ArchiveMetadata {
        title,
        author,
        published_date,
    }
}

fn select_first<'a>(doc: &'a Html, selector: &str) -> Option<scraper::ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector).next()
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    select_first(doc, selector)
        .and_then(|meta| meta.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|content| !content.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// RFC 3339 dates are normalized to UTC; anything else is kept verbatim.
fn normalize_date(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc).to_rfc3339())
        .unwrap_or_else(|_| raw.to_string())
}
