//! The per-request hook: decide whether a repository request needs a
//! bearer token and attach it.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use crate::config::PluginConfiguration;
use crate::token::{resolve_token, Environment, TokenSource, TokenSourceKind};

/// Azure Storage REST API version sent with every authenticated request.
/// Bearer authentication requires at least 2017-11-09.
pub const STORAGE_API_VERSION: &str = "2022-11-02";

/// Name of the API version header.
pub const MS_VERSION_HEADER: &str = "x-ms-version";

/// Hosts served by Azure Blob Storage.
const BLOB_HOST_SUFFIX: &str = ".blob.core.windows.net";

/// An outbound repository request as seen by the hook.
#[derive(Debug, Clone)]
pub struct RepositoryRequestContext {
    pub repository_id: String,
    pub url: String,
    pub headers: HeaderMap,
}

impl RepositoryRequestContext {
    pub fn new(repository_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }
}

/// What the hook did with a request.
#[derive(Debug)]
pub enum InjectionOutcome {
    /// The plugin is globally disabled.
    Disabled,
    /// The repository has no section in the configuration.
    Unmanaged,
    /// Headers were attached.
    Injected(TokenSourceKind),
    /// No token could be obtained; the request was left untouched.
    Failed(anyhow::Error),
}

impl InjectionOutcome {
    pub fn is_injected(&self) -> bool {
        matches!(self, InjectionOutcome::Injected(_))
    }
}

/// Adds Azure AD authentication headers to requests for configured repositories.
#[derive(Debug)]
pub struct AzureAuthPlugin<S> {
    config: PluginConfiguration,
    env: Environment,
    source: S,
}

impl<S: TokenSource> AzureAuthPlugin<S> {
    pub fn new(config: PluginConfiguration, env: Environment, source: S) -> Self {
        Self {
            config,
            env,
            source,
        }
    }

    /// Run the hook for one request. This never fails: problems are logged
    /// and the request proceeds without our headers.
    pub fn on_request(&self, req: &mut RepositoryRequestContext) -> InjectionOutcome {
        if !self.config.enabled() {
            return InjectionOutcome::Disabled;
        }
        let repo = req.repository_id.as_str();
        if !self.config.manages(repo) {
            return InjectionOutcome::Unmanaged;
        }
        if !is_blob_storage_url(&req.url) {
            tracing::debug!("Repo {repo}: {} is not an Azure Blob Storage URL", req.url);
        }

        let token = match resolve_token(&self.env, &self.source) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Failed to get Azure AD token for repo: {repo}: {e:#}");
                return InjectionOutcome::Failed(e);
            }
        };
        let auth = match HeaderValue::from_str(&format!("Bearer {}", token.value)) {
            Ok(mut v) => {
                v.set_sensitive(true);
                v
            }
            Err(e) => {
                let e = anyhow::Error::new(e).context("Token is not a valid header value");
                tracing::warn!("Failed to get Azure AD token for repo: {repo}: {e:#}");
                return InjectionOutcome::Failed(e);
            }
        };
        tracing::debug!(
            "Setting Azure AD auth headers for repo: {repo} (token from {})",
            token.source
        );
        req.headers.insert(
            HeaderName::from_static(MS_VERSION_HEADER),
            HeaderValue::from_static(STORAGE_API_VERSION),
        );
        req.headers.insert(AUTHORIZATION, auth);
        InjectionOutcome::Injected(token.source)
    }
}

fn is_blob_storage_url(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with(BLOB_HOST_SUFFIX)))
        .unwrap_or(false)
}
