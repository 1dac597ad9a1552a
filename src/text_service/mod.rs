//! Text-generation service seam.
//!
//! The runner only sees `TextService` (one prompt in, one `AskResponse` out)
//! and `ServiceConnector` (builds a fresh session after a cooldown). The
//! HTTP implementation lives in `client`; tests substitute scripted fakes.

pub mod client;

use std::future::Future;
use std::pin::Pin;

use crate::config::ServiceSettings;
use crate::error::AppError;

pub use client::HttpTextService;

// ─────────────────────────────────────────────────────────────────────────────
// AskResponse
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one prompt.
///
/// `ask` never returns an error: transport and service failures are folded
/// into `success = false` so the runner can decide what a failure means for
/// the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskResponse {
    pub success: bool,
    /// Generated text; empty on failure.
    pub response: String,
    /// Operator-safe failure description.
    pub error_message: Option<String>,
}

impl AskResponse {
    pub fn answered(text: impl Into<String>) -> Self {
        Self {
            success: true,
            response: text.into(),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            response: String::new(),
            error_message: Some(message.into()),
        }
    }
}

impl From<Result<String, AppError>> for AskResponse {
    fn from(result: Result<String, AppError>) -> Self {
        match result {
            Ok(text) => AskResponse::answered(text),
            Err(e) => AskResponse::failed(e.to_presentation().message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// A session with the text-generation service.
pub trait TextService: Send + Sync {
    /// Sends one prompt and waits for the reply.
    fn ask<'a>(&'a self, prompt: &'a str) -> Pin<Box<dyn Future<Output = AskResponse> + Send + 'a>>;
}

/// Builds text service sessions. Called once at startup and again after
/// every capacity-exhaustion cooldown.
pub trait ServiceConnector: Send + Sync {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TextService>, AppError>> + Send + '_>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpConnector
// ─────────────────────────────────────────────────────────────────────────────

/// Connects `HttpTextService` sessions from fixed settings.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    settings: ServiceSettings,
}

impl HttpConnector {
    pub fn new(settings: ServiceSettings) -> Self {
        Self { settings }
    }
}

impl ServiceConnector for HttpConnector {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TextService>, AppError>> + Send + '_>> {
        Box::pin(async move {
            let service = HttpTextService::new(&self.settings)?;
            Ok(Box::new(service) as Box<dyn TextService>)
        })
    }
}
