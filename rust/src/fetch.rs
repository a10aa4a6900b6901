//! Download a single file from a managed repository, with the same headers
//! dnf would send. Mostly useful for bootstrapping (e.g. fetching the
//! repository GPG key) and for debugging RBAC assignments.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{Context, Result};
use fn_error_context::context;
use std::io::Write;
use std::path::Path;

use crate::plugin::{AzureAuthPlugin, InjectionOutcome, RepositoryRequestContext};
use crate::token::TokenSource;

const USER_AGENT: &str = concat!("dnf-azure-auth/", env!("CARGO_PKG_VERSION"));

/// Join a repository base URL and a path relative to it.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// GET `url` on behalf of `repo_id`, writing the body to `out`.
/// Returns the hook outcome so callers can report it.
#[context("Fetching {}", url)]
pub fn fetch<S: TokenSource>(
    plugin: &AzureAuthPlugin<S>,
    repo_id: &str,
    url: &str,
    out: &mut dyn Write,
) -> Result<InjectionOutcome> {
    let mut req = RepositoryRequestContext::new(repo_id, url);
    let outcome = plugin.on_request(&mut req);
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()?;
    let mut resp = client.get(url).headers(req.headers).send()?;
    let status = resp.status();
    if !status.is_success() {
        // 401/403 from the storage account ends up here; the plugin itself
        // never gates access.
        anyhow::bail!("Server returned {status} (injection: {outcome:?})");
    }
    std::io::copy(&mut resp, out).context("Reading response body")?;
    Ok(outcome)
}

/// Like [`fetch`], but atomically replace the file at `dest`.
#[context("Writing {}", dest.display())]
pub fn fetch_to_file<S: TokenSource>(
    plugin: &AzureAuthPlugin<S>,
    repo_id: &str,
    url: &str,
    dest: &Path,
) -> Result<InjectionOutcome> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let outcome = fetch(plugin, repo_id, url, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest)?;
    Ok(outcome)
}
