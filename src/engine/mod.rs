//! Rendering engine abstraction: markup in, PDF bytes out.
//!
//! An engine is launched at most once per request and the resulting
//! [`EngineSession`] is reused for every chunk, then closed on every exit
//! path. Production uses [`chrome::ChromeEngine`]; tests plug in fakes.

#[cfg(feature = "chrome")]
pub mod chrome;

use crate::config::PageSetup;
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("print failed: {0}")]
    Print(String),
    #[error("close failed: {0}")]
    Close(String),
}

/// Starts rendering sessions. Shared between requests.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Start a session. Called once per request, after the sheet has been
    /// read and found non-empty.
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "engine"
    }
}

/// A live engine instance owned by exactly one request.
#[async_trait]
pub trait EngineSession: Send {
    /// Load `markup` and print it to a paginated PDF.
    async fn print_pdf(&mut self, markup: &str, page: &PageSetup) -> Result<Vec<u8>, EngineError>;

    /// Release the engine. Consumes the session so it cannot be reused.
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}
