//! Backend capability interface for UI-automation drivers.
//!
//! The engine is generic over `UiDriver`; a concrete browser binding
//! (Playwright, WebDriver, CDP, ...) lives in an embedding crate and
//! implements this trait. Each engine instance exclusively owns one driver
//! session -- session pooling, if any, is the embedder's responsibility.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Element states
// ---------------------------------------------------------------------------

/// Element readiness states an element wait can target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    Attached,
    #[default]
    Visible,
    Hidden,
    Detached,
}

impl ElementState {
    /// Parse a state name as written in step params.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "attached" => Some(Self::Attached),
            "visible" => Some(Self::Visible),
            "hidden" => Some(Self::Hidden),
            "detached" => Some(Self::Detached),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Auth issues
// ---------------------------------------------------------------------------

/// Out-of-band evidence that the backend session is broken, typically an
/// intercepted HTTP response observed by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIssue {
    /// HTTP status that revealed the problem, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// DriverError
// ---------------------------------------------------------------------------

/// Errors surfaced by a driver backend.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A single backend operation failed.
    #[error("backend operation failed: {0}")]
    Operation(String),

    /// The backend session is gone (browser crashed, connection dropped).
    #[error("backend session lost: {0}")]
    SessionLost(String),
}

// ---------------------------------------------------------------------------
// UiDriver
// ---------------------------------------------------------------------------

/// Capability interface implemented by the browser-automation adapter.
///
/// Operations return `Ok(false)` when the backend performed the call but the
/// target did not match/settle within `timeout`; `Err` is reserved for
/// backend-level failures.
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Navigate to a URL, waiting up to `timeout` for the load to settle.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<bool, DriverError>;

    /// Wait for a selector to reach `state`.
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Duration,
    ) -> Result<bool, DriverError>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError>;

    /// Fill the first element matching `selector` with `text`.
    async fn fill(&self, selector: &str, text: &str, timeout: Duration)
    -> Result<bool, DriverError>;

    /// Capture a screenshot to `path`.
    async fn screenshot(
        &self,
        path: &Path,
        timeout: Duration,
        full_page: bool,
    ) -> Result<bool, DriverError>;

    /// Read an attribute of the first element matching `selector`.
    ///
    /// `Ok(None)` means the element or attribute was absent within `timeout`.
    async fn attribute_value(
        &self,
        selector: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<String>, DriverError>;

    /// The page URL the session currently points at.
    async fn current_url(&self) -> Result<String, DriverError>;

    /// Out-of-band signal that the session's authentication is broken.
    fn auth_issue(&self) -> Option<AuthIssue>;

    /// Hot-reload refreshed credentials into the session, if any changed.
    /// Returns `true` when the session was repaired.
    async fn refresh_auth_if_changed(&self) -> Result<bool, DriverError>;
}

// ---------------------------------------------------------------------------
// DryRunDriver
// ---------------------------------------------------------------------------

/// Driver that logs every operation and reports success without touching a
/// browser. Used by `uipilot run` for workflow debugging and by embedders as
/// a smoke-test double.
///
/// Attribute reads answer `None`, so `wait_for` steps carrying an attribute
/// condition will report the condition as unmatched.
#[derive(Debug, Default)]
pub struct DryRunDriver {
    current_url: RwLock<String>,
}

impl DryRunDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UiDriver for DryRunDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<bool, DriverError> {
        tracing::info!(url, "dry-run: navigate");
        *self.current_url.write() = url.to_string();
        Ok(true)
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        _timeout: Duration,
    ) -> Result<bool, DriverError> {
        tracing::info!(selector, state = ?state, "dry-run: wait_for_selector");
        Ok(true)
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<bool, DriverError> {
        tracing::info!(selector, "dry-run: click");
        Ok(true)
    }

    async fn fill(
        &self,
        selector: &str,
        text: &str,
        _timeout: Duration,
    ) -> Result<bool, DriverError> {
        tracing::info!(selector, chars = text.len(), "dry-run: fill");
        Ok(true)
    }

    async fn screenshot(
        &self,
        path: &Path,
        _timeout: Duration,
        full_page: bool,
    ) -> Result<bool, DriverError> {
        tracing::info!(path = %path.display(), full_page, "dry-run: screenshot");
        Ok(true)
    }

    async fn attribute_value(
        &self,
        selector: &str,
        name: &str,
        _timeout: Duration,
    ) -> Result<Option<String>, DriverError> {
        tracing::info!(selector, attribute = name, "dry-run: attribute_value");
        Ok(None)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.current_url.read().clone())
    }

    fn auth_issue(&self) -> Option<AuthIssue> {
        None
    }

    async fn refresh_auth_if_changed(&self) -> Result<bool, DriverError> {
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
