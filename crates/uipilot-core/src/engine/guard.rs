//! Pre-action auth/interrupt check.
//!
//! Invoked before every atomic action. If the driver already knows the
//! session is broken (e.g. an intercepted 401), the guard raises *before*
//! the action attempts a long element wait, converting a full-timeout hang
//! into an immediate, diagnosable failure. One best-effort credential
//! hot-reload is attempted first; only if that fails does the guard raise.

use uipilot_types::error::ActionError;

use crate::driver::UiDriver;

/// Stateless pre-flight check. Same pattern as the other handler structs:
/// no internal state, all logic in associated functions.
pub struct InterruptGuard;

impl InterruptGuard {
    /// Raise `AuthExpired` when the session is known-broken and cannot be
    /// repaired by a credential refresh.
    pub async fn check(driver: &dyn UiDriver) -> Result<(), ActionError> {
        let Some(issue) = driver.auth_issue() else {
            return Ok(());
        };

        tracing::warn!(
            status = issue.status,
            message = issue.message.as_str(),
            "session auth issue detected before action"
        );

        match driver.refresh_auth_if_changed().await {
            Ok(true) => {
                tracing::info!("refreshed credentials repaired the session");
                Ok(())
            }
            Ok(false) => Err(ActionError::AuthExpired(issue.message)),
            Err(e) => Err(ActionError::AuthExpired(format!(
                "{} (refresh failed: {e})",
                issue.message
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AuthIssue, DriverError, ElementState, UiDriver};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Driver double that only models the auth surface.
    struct AuthProbe {
        issue: Option<AuthIssue>,
        refresh_repairs: bool,
        refresh_calls: AtomicUsize,
    }

    impl AuthProbe {
        fn new(issue: Option<AuthIssue>, refresh_repairs: bool) -> Self {
            Self {
                issue,
                refresh_repairs,
                refresh_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UiDriver for AuthProbe {
        async fn navigate(&self, _: &str, _: Duration) -> Result<bool, DriverError> {
            Ok(true)
        }
        async fn wait_for_selector(
            &self,
            _: &str,
            _: ElementState,
            _: Duration,
        ) -> Result<bool, DriverError> {
            Ok(true)
        }
        async fn click(&self, _: &str, _: Duration) -> Result<bool, DriverError> {
            Ok(true)
        }
        async fn fill(&self, _: &str, _: &str, _: Duration) -> Result<bool, DriverError> {
            Ok(true)
        }
        async fn screenshot(&self, _: &Path, _: Duration, _: bool) -> Result<bool, DriverError> {
            Ok(true)
        }
        async fn attribute_value(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> Result<Option<String>, DriverError> {
            Ok(None)
        }
        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(String::new())
        }
        fn auth_issue(&self) -> Option<AuthIssue> {
            self.issue.clone()
        }
        async fn refresh_auth_if_changed(&self) -> Result<bool, DriverError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.refresh_repairs)
        }
    }

    fn issue() -> AuthIssue {
        AuthIssue {
            status: Some(401),
            message: "session cookie rejected".to_string(),
        }
    }

    #[tokio::test]
    async fn test_healthy_session_passes_without_refresh() {
        let driver = AuthProbe::new(None, false);
        InterruptGuard::check(&driver).await.unwrap();
        assert_eq!(driver.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_refresh_recovers() {
        let driver = AuthProbe::new(Some(issue()), true);
        InterruptGuard::check(&driver).await.unwrap();
        assert_eq!(driver.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_raises_auth_expired() {
        let driver = AuthProbe::new(Some(issue()), false);
        let err = InterruptGuard::check(&driver).await.unwrap_err();
        assert!(matches!(err, ActionError::AuthExpired(_)));
        assert!(err.to_string().contains("session cookie rejected"));
        assert_eq!(driver.refresh_calls.load(Ordering::SeqCst), 1);
    }
}
