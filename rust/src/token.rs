//! Bearer token resolution: where a token comes from and in which order
//! the sources are tried.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{anyhow, Result};
use std::fmt;

/// Environment variable holding a pre-generated token; takes precedence
/// over everything else.
pub const TOKEN_ENV: &str = "DNF_PLUGIN_AZURE_AUTH_TOKEN";

/// Set by sudo to the name of the user who invoked it.
pub const SUDO_USER_ENV: &str = "SUDO_USER";

/// Audience of tokens accepted by Azure Storage.
pub const STORAGE_RESOURCE: &str = "https://storage.azure.com";

/// Where a [`ResolvedToken`] came from. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSourceKind {
    /// [`TOKEN_ENV`] was set.
    EnvironmentOverride,
    /// `az` was run as the user who invoked sudo.
    AzureCliAsInvokingUser,
    /// `az` was run as the identity of this process (typically root under sudo).
    AzureCliAsSudoTargetUser,
}

impl fmt::Display for TokenSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenSourceKind::EnvironmentOverride => "environment override",
            TokenSourceKind::AzureCliAsInvokingUser => "az cli (invoking user)",
            TokenSourceKind::AzureCliAsSudoTargetUser => "az cli (current identity)",
        };
        f.write_str(s)
    }
}

/// A bearer token and its provenance.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedToken {
    pub value: String,
    pub source: TokenSourceKind,
}

// Keep the secret out of logs.
impl fmt::Debug for ResolvedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedToken")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// One way of running the identity CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// Drop privileges to the named user first.
    AsInvokingUser(String),
    /// Run as whatever identity this process has.
    AsCurrentIdentity,
}

impl Attempt {
    /// The user to run as, if any.
    pub fn as_user(&self) -> Option<&str> {
        match self {
            Attempt::AsInvokingUser(u) => Some(u.as_str()),
            Attempt::AsCurrentIdentity => None,
        }
    }

    fn source_kind(&self) -> TokenSourceKind {
        match self {
            Attempt::AsInvokingUser(_) => TokenSourceKind::AzureCliAsInvokingUser,
            Attempt::AsCurrentIdentity => TokenSourceKind::AzureCliAsSudoTargetUser,
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::AsInvokingUser(u) => write!(f, "as invoking user {u}"),
            Attempt::AsCurrentIdentity => f.write_str("as current identity"),
        }
    }
}

/// Decide in which order to try the identity CLI.
///
/// When elevated, cached credentials usually live in the invoking user's home
/// directory rather than root's, so that user is tried first. Never returns
/// more than two attempts.
pub fn select_attempt_order(is_elevated: bool, invoking_user: Option<&str>) -> Vec<Attempt> {
    let invoking_user = invoking_user
        .map(str::trim)
        .filter(|u| !u.is_empty() && *u != "root");
    match invoking_user {
        Some(u) if is_elevated => vec![
            Attempt::AsInvokingUser(u.to_string()),
            Attempt::AsCurrentIdentity,
        ],
        _ => vec![Attempt::AsCurrentIdentity],
    }
}

/// Something that can produce a bearer token for an audience, optionally
/// acting as another user.
pub trait TokenSource {
    /// Acquire a token for `audience`. If `as_user` is set, the acquisition
    /// must be performed as that user.
    fn resolve(&self, audience: &str, as_user: Option<&str>) -> Result<String>;
}

impl<T: TokenSource + ?Sized> TokenSource for &T {
    fn resolve(&self, audience: &str, as_user: Option<&str>) -> Result<String> {
        (**self).resolve(audience, as_user)
    }
}

/// The bits of process state that influence token resolution. Captured once
/// so tests can substitute their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// Value of [`TOKEN_ENV`], if set and non-empty.
    pub override_token: Option<String>,
    /// Value of [`SUDO_USER_ENV`], if set.
    pub invoking_user: Option<String>,
    /// Whether we run with an effective uid of 0.
    pub is_elevated: bool,
}

impl Environment {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            override_token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            invoking_user: std::env::var(SUDO_USER_ENV).ok(),
            is_elevated: crate::utils::am_privileged(),
        }
    }
}

/// Resolve a token, trying the sources in order; the first success wins.
///
/// On failure the error lists every strategy that was attempted.
pub fn resolve_token(env: &Environment, source: &dyn TokenSource) -> Result<ResolvedToken> {
    if let Some(value) = env.override_token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(ResolvedToken {
            value: value.to_string(),
            source: TokenSourceKind::EnvironmentOverride,
        });
    }

    fail::fail_point!("azure-auth::acquire", |_| {
        Err(anyhow!("Failpoint azure-auth::acquire"))
    });

    let mut failures = Vec::new();
    for attempt in select_attempt_order(env.is_elevated, env.invoking_user.as_deref()) {
        tracing::debug!("Acquiring token via az cli {attempt}");
        match source.resolve(STORAGE_RESOURCE, attempt.as_user()) {
            Ok(value) => {
                return Ok(ResolvedToken {
                    value,
                    source: attempt.source_kind(),
                })
            }
            Err(e) => {
                tracing::debug!("Token acquisition {attempt} failed: {e:#}");
                failures.push(format!("{attempt}: {e:#}"));
            }
        }
    }
    Err(anyhow!(
        "Failed to get Azure AD token ({})",
        failures.join("; ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_attempt_order() {
        let invoking = |u: &str| Attempt::AsInvokingUser(u.to_string());
        assert_eq!(
            select_attempt_order(true, Some("alice")),
            vec![invoking("alice"), Attempt::AsCurrentIdentity]
        );
        assert_eq!(
            select_attempt_order(false, Some("alice")),
            vec![Attempt::AsCurrentIdentity]
        );
        assert_eq!(
            select_attempt_order(true, None),
            vec![Attempt::AsCurrentIdentity]
        );
        for odd in ["", "  ", "root"] {
            assert_eq!(
                select_attempt_order(true, Some(odd)),
                vec![Attempt::AsCurrentIdentity]
            );
        }
    }

    /// Returns scripted results in order and records who it ran as.
    struct Scripted {
        results: RefCell<Vec<Result<String>>>,
        calls: RefCell<Vec<Option<String>>>,
    }

    impl Scripted {
        fn new(results: Vec<Result<String>>) -> Self {
            Self {
                results: RefCell::new(results),
                calls: Default::default(),
            }
        }
    }

    impl TokenSource for Scripted {
        fn resolve(&self, audience: &str, as_user: Option<&str>) -> Result<String> {
            assert_eq!(audience, STORAGE_RESOURCE);
            self.calls.borrow_mut().push(as_user.map(ToOwned::to_owned));
            self.results.borrow_mut().remove(0)
        }
    }

    #[test]
    fn test_override_wins() -> Result<()> {
        let env = Environment {
            override_token: Some("zzz999".into()),
            invoking_user: Some("alice".into()),
            is_elevated: true,
        };
        let source = Scripted::new(vec![]);
        let t = resolve_token(&env, &source)?;
        assert_eq!(t.value, "zzz999");
        assert_eq!(t.source, TokenSourceKind::EnvironmentOverride);
        assert!(source.calls.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_override_ignored() -> Result<()> {
        let env = Environment {
            override_token: Some(String::new()),
            ..Default::default()
        };
        let source = Scripted::new(vec![Ok("abc123".into())]);
        let t = resolve_token(&env, &source)?;
        assert_eq!(t.value, "abc123");
        assert_eq!(t.source, TokenSourceKind::AzureCliAsSudoTargetUser);
        assert_eq!(*source.calls.borrow(), vec![None]);
        Ok(())
    }

    #[test]
    fn test_invoking_user_first() -> Result<()> {
        let env = Environment {
            invoking_user: Some("alice".into()),
            is_elevated: true,
            ..Default::default()
        };
        let source = Scripted::new(vec![Ok("tok-alice".into())]);
        let t = resolve_token(&env, &source)?;
        assert_eq!(t.value, "tok-alice");
        assert_eq!(t.source, TokenSourceKind::AzureCliAsInvokingUser);
        assert_eq!(*source.calls.borrow(), vec![Some("alice".to_string())]);
        Ok(())
    }

    #[test]
    fn test_fallback_and_exhaustion() {
        let env = Environment {
            invoking_user: Some("alice".into()),
            is_elevated: true,
            ..Default::default()
        };
        let source = Scripted::new(vec![
            Err(anyhow!("no session for alice")),
            Err(anyhow!("no session for root")),
        ]);
        let e = resolve_token(&env, &source).unwrap_err().to_string();
        assert_eq!(
            *source.calls.borrow(),
            vec![Some("alice".to_string()), None]
        );
        assert!(e.contains("as invoking user alice: no session for alice"), "{e}");
        assert!(e.contains("as current identity: no session for root"), "{e}");
    }

    #[test]
    fn test_debug_redacts() {
        let t = ResolvedToken {
            value: "sekrit".into(),
            source: TokenSourceKind::EnvironmentOverride,
        };
        let s = format!("{t:?}");
        assert!(!s.contains("sekrit"));
        assert!(s.contains("EnvironmentOverride"));
    }
}
