use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::utils::{backoff_delay, with_jitter};

// Error surfaced to a boundary: what went wrong, plus the HTTP status when
// it came from an API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UiError {
    pub message: String,
    pub status: Option<u16>,
}

impl UiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::classify(self.status, &self.message)
    }
}

impl From<anyhow::Error> for UiError {
    fn from(err: anyhow::Error) -> Self {
        UiError::new(format!("{:#}", err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Validation,
    Timeout,
    RateLimit,
    NotFound,
    Server,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    RedirectToLogin,
    GoBack,
    Reload,
}

impl ErrorCategory {
    // Status code wins; otherwise look for well-known words in the message.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        if let Some(status) = status {
            match status {
                401 | 403 => return ErrorCategory::Authentication,
                400 | 422 => return ErrorCategory::Validation,
                404 => return ErrorCategory::NotFound,
                408 | 504 => return ErrorCategory::Timeout,
                429 => return ErrorCategory::RateLimit,
                500..=599 => return ErrorCategory::Server,
                _ => {}
            }
        }

        let message = message.to_ascii_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| message.contains(w));

        if mentions(&["timeout", "timed out"]) {
            ErrorCategory::Timeout
        } else if mentions(&["rate limit", "too many requests"]) {
            ErrorCategory::RateLimit
        } else if mentions(&["unauthorized", "forbidden", "token expired", "not authenticated"]) {
            ErrorCategory::Authentication
        } else if mentions(&["network", "fetch", "connection", "offline"]) {
            ErrorCategory::Network
        } else if mentions(&["invalid", "validation", "required"]) {
            ErrorCategory::Validation
        } else if mentions(&["not found"]) {
            ErrorCategory::NotFound
        } else {
            ErrorCategory::Unknown
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Connection problem",
            ErrorCategory::Authentication => "Session expired",
            ErrorCategory::Validation => "Invalid input",
            ErrorCategory::Timeout => "Request timed out",
            ErrorCategory::RateLimit => "Too many requests",
            ErrorCategory::NotFound => "Not found",
            ErrorCategory::Server => "Server error",
            ErrorCategory::Unknown => "Something went wrong",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => {
                "Unable to reach the server. Check your connection and try again."
            }
            ErrorCategory::Authentication => "Your session has expired. Please sign in again.",
            ErrorCategory::Validation => "Some of the information provided is not valid.",
            ErrorCategory::Timeout => "The server took too long to respond. Please try again.",
            ErrorCategory::RateLimit => {
                "You are sending requests too quickly. Please wait a moment."
            }
            ErrorCategory::NotFound => "The requested resource could not be found.",
            ErrorCategory::Server => "The server ran into a problem. Our team has been notified.",
            ErrorCategory::Unknown => "An unexpected error occurred.",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "wifi-off",
            ErrorCategory::Authentication => "lock",
            ErrorCategory::Validation => "alert-circle",
            ErrorCategory::Timeout => "clock",
            ErrorCategory::RateLimit => "hourglass",
            ErrorCategory::NotFound => "search",
            ErrorCategory::Server => "server",
            ErrorCategory::Unknown => "alert-triangle",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::Server
        )
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, ErrorCategory::Server | ErrorCategory::Unknown)
    }

    pub fn recovery(&self) -> RecoveryAction {
        match self {
            ErrorCategory::Authentication => RecoveryAction::RedirectToLogin,
            ErrorCategory::Validation | ErrorCategory::NotFound => RecoveryAction::GoBack,
            ErrorCategory::Unknown => RecoveryAction::Reload,
            _ => RecoveryAction::Retry,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryKind {
    Global,
    Section(String),
    Data,
    Auth,
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryKind::Global => write!(f, "global"),
            BoundaryKind::Section(name) => write!(f, "section:{}", name),
            BoundaryKind::Data => write!(f, "data"),
            BoundaryKind::Auth => write!(f, "auth"),
        }
    }
}

// What the UI shows in place of the failed content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fallback {
    pub boundary: String,
    pub category: ErrorCategory,
    pub title: String,
    pub message: String,
    pub icon: &'static str,
    pub action: RecoveryAction,
    pub attempts: u32,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rendered<C> {
    Content(C),
    Fallback(Fallback),
}

impl<C> Rendered<C> {
    pub fn is_content(&self) -> bool {
        matches!(self, Rendered::Content(_))
    }

    pub fn content(self) -> Option<C> {
        match self {
            Rendered::Content(c) => Some(c),
            Rendered::Fallback(_) => None,
        }
    }

    pub fn fallback(&self) -> Option<&Fallback> {
        match self {
            Rendered::Content(_) => None,
            Rendered::Fallback(f) => Some(f),
        }
    }
}

// Monitoring hook for critical failures.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, boundary: &BoundaryKind, category: ErrorCategory, error: &UiError);
}

#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, boundary: &BoundaryKind, category: ErrorCategory, error: &UiError) {
        error!(
            boundary = %boundary,
            category = ?category,
            status = ?error.status,
            "Critical UI error: {}",
            error.message
        );
    }
}

pub struct ErrorBoundary {
    kind: BoundaryKind,
    retry: RetryConfig,
    reporter: Arc<dyn ErrorReporter>,
    on_reset: Option<Box<dyn Fn() + Send + Sync>>,
    show_details: bool,
}

impl ErrorBoundary {
    pub fn new(kind: BoundaryKind) -> Self {
        Self {
            kind,
            retry: RetryConfig::default(),
            reporter: Arc::new(TracingReporter),
            on_reset: None,
            show_details: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn on_reset<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_reset = Some(Box::new(callback));
        self
    }

    // Include the raw error text in fallbacks (development builds).
    pub fn show_details(mut self, show: bool) -> Self {
        self.show_details = show;
        self
    }

    pub fn kind(&self) -> &BoundaryKind {
        &self.kind
    }

    // Runs `render` and turns a failure into a fallback. Retryable failures
    // are retried up to max_retries times with a capped exponential delay.
    // Auth boundaries never retry on their own.
    pub async fn render<C, F, Fut>(&self, mut render: F) -> Rendered<C>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<C, UiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match render().await {
                Ok(content) => return Rendered::Content(content),
                Err(err) => err,
            };

            let category = err.category();
            let may_retry = category.is_retryable()
                && self.kind != BoundaryKind::Auth
                && attempt < self.retry.max_retries;

            if !may_retry {
                return Rendered::Fallback(self.fallback_for(&err, attempt + 1));
            }

            let delay = with_jitter(
                backoff_delay(attempt, self.retry.base_delay(), self.retry.max_delay()),
                0.1,
            );
            warn!(
                "{} boundary caught {:?} error (attempt {}), retrying in {:?}: {}",
                self.kind,
                category,
                attempt + 1,
                delay,
                err
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn fallback_for(&self, err: &UiError, attempts: u32) -> Fallback {
        let category = err.category();
        if self.kind == BoundaryKind::Global || category.is_critical() {
            self.reporter.report(&self.kind, category, err);
        } else {
            debug!("{} boundary showing fallback for {:?}: {}", self.kind, category, err);
        }

        let action = match (&self.kind, category) {
            (_, ErrorCategory::Authentication) => RecoveryAction::RedirectToLogin,
            (BoundaryKind::Global, _) => RecoveryAction::Reload,
            _ => category.recovery(),
        };

        let title = match &self.kind {
            BoundaryKind::Section(name) => format!("{}: {}", name, category.title()),
            BoundaryKind::Data if category == ErrorCategory::NotFound => {
                "No data available".to_string()
            }
            _ => category.title().to_string(),
        };

        Fallback {
            boundary: self.kind.to_string(),
            category,
            title,
            message: category.user_message().to_string(),
            icon: category.icon(),
            action,
            attempts,
            detail: self.show_details.then(|| err.message.clone()),
        }
    }

    // Recovery hook: the owner calls this when the user asks to try again.
    pub fn reset(&self) {
        debug!("{} boundary reset", self.kind);
        if let Some(callback) = &self.on_reset {
            callback();
        }
    }
}
