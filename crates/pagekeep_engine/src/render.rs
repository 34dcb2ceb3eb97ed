use std::time::Duration;

use pagekeep_core::{CapturedPage, PayloadError};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("render failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// The rendering engine: loads a URL and returns the DOM plus candidate asset URLs.
#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &Url) -> Result<CapturedPage, RenderError>;
}

/// Stand-in for hosts without a rendering engine; every capture takes the raw-fetch path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRenderer;

#[async_trait::async_trait]
impl PageRenderer for NoRenderer {
    async fn render(&self, _url: &Url) -> Result<CapturedPage, RenderError> {
        Err(RenderError::Failed("no renderer configured".into()))
    }
}
