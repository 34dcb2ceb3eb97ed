use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed capture payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("capture payload has invalid baseURI: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// Wire shape produced by the renderer script. Field names are a stable contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPayload {
    pub html: String,
    #[serde(rename = "readerHTML", default)]
    pub reader_html: Option<String>,
    #[serde(rename = "baseURI")]
    pub base_uri: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(rename = "imageSrcsets", default)]
    pub image_srcsets: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub stylesheets: Vec<String>,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// A rendered page with its raw candidate asset references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPage {
    pub html: String,
    pub reader_html: Option<String>,
    pub base_url: Url,
    pub images: Vec<String>,
    /// Raw `srcset` attribute values.
    pub image_srcsets: Vec<String>,
    pub sources: Vec<String>,
    pub stylesheets: Vec<String>,
    pub icons: Vec<String>,
}

impl CapturedPage {
    /// A page with no discovered assets.
    pub fn bare(html: impl Into<String>, base_url: Url) -> Self {
        Self {
            html: html.into(),
            reader_html: None,
            base_url,
            images: Vec::new(),
            image_srcsets: Vec::new(),
            sources: Vec::new(),
            stylesheets: Vec::new(),
            icons: Vec::new(),
        }
    }

    pub fn from_payload_json(json: &str) -> Result<Self, PayloadError> {
        let payload: CapturedPayload = serde_json::from_str(json)?;
        Self::try_from(payload)
    }
}

impl TryFrom<CapturedPayload> for CapturedPage {
    type Error = PayloadError;

    fn try_from(payload: CapturedPayload) -> Result<Self, Self::Error> {
        Ok(Self {
            html: payload.html,
            reader_html: payload.reader_html.filter(|html| !html.trim().is_empty()),
            base_url: Url::parse(&payload.base_uri)?,
            images: payload.images,
            image_srcsets: payload.image_srcsets,
            sources: payload.sources,
            stylesheets: payload.stylesheets,
            icons: payload.icons,
        })
    }
}
