//! Process-level context for review operations.
//!
//! User identity, signing key, and submit strategy are configuration, not
//! state: an explicit [`Context`] value is threaded through the lifecycle
//! operations instead of being read from process globals, which keeps the
//! library usable as a component and keeps tests hermetic. The only ambient
//! inputs honored are `GIT_AUTHOR_DATE` / `GIT_COMMITTER_DATE` as timestamp
//! overrides, matching what commit-writing tooling already respects.

use chrono::DateTime;

use crate::errors::ReviewError;
use crate::repo::{Repo, SubmitStrategy};
use crate::utils::normalize_timestamp;

/// Explicit operation context: who is acting, whether to sign, how to submit.
#[derive(Debug, Clone)]
pub struct Context {
    /// The acting identity (email).
    pub user_email: String,
    /// Signing key id, when the repository configures one.
    pub signing_key: Option<String>,
    /// Whether lifecycle operations should sign the records they write.
    pub sign: bool,
    /// How `submit` lands the review on the target.
    pub submit_strategy: SubmitStrategy,
    /// Fixed clock for tests; `None` uses the wall clock (or the env
    /// overrides).
    fixed_timestamp: Option<u64>,
}

impl Context {
    /// Build a context from a repository's configuration.
    pub fn from_repo(repo: &dyn Repo) -> Result<Context, ReviewError> {
        Ok(Context {
            user_email: repo.user_email()?,
            signing_key: repo.signing_key()?,
            sign: false,
            submit_strategy: repo.submit_strategy()?,
            fixed_timestamp: None,
        })
    }

    /// A context for the given identity with everything else defaulted.
    pub fn for_user(email: &str) -> Context {
        Context {
            user_email: email.to_string(),
            signing_key: None,
            sign: false,
            submit_strategy: SubmitStrategy::default(),
            fixed_timestamp: None,
        }
    }

    /// Request record signing; requires a signing key to be configured
    /// before an operation actually signs.
    pub fn with_signing(mut self, sign: bool) -> Context {
        self.sign = sign;
        self
    }

    /// Pin the clock, for deterministic tests.
    pub fn with_fixed_timestamp(mut self, secs: u64) -> Context {
        self.fixed_timestamp = Some(secs);
        self
    }

    /// Current epoch seconds, honoring the fixed clock and the
    /// `GIT_AUTHOR_DATE` / `GIT_COMMITTER_DATE` overrides.
    pub fn now_secs(&self) -> u64 {
        if let Some(fixed) = self.fixed_timestamp {
            return fixed;
        }
        for var in ["GIT_AUTHOR_DATE", "GIT_COMMITTER_DATE"] {
            if let Ok(value) = std::env::var(var)
                && let Some(secs) = parse_date_override(&value)
            {
                return secs;
            }
        }
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// The normalized (zero-padded) timestamp string for new records.
    pub fn timestamp(&self) -> String {
        normalize_timestamp(&self.now_secs().to_string())
    }
}

/// Parse the date formats git accepts in its date environment variables:
/// raw epoch seconds, `@<epoch>`, `<epoch> <tz>`, and RFC 3339.
fn parse_date_override(value: &str) -> Option<u64> {
    let value = value.trim();
    let head = value.strip_prefix('@').unwrap_or(value);
    let head = head.split_whitespace().next()?;
    if let Ok(secs) = head.parse::<u64>() {
        return Some(secs);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp().max(0) as u64)
}
