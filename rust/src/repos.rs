//! Minimal reader for dnf repository definitions.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{Context, Result};
use fn_error_context::context;
use std::fs;
use std::path::Path;

use ini::Ini;

use crate::config::is_true;
use crate::utils;

/// Location for DNF repositories configuration
pub const YUM_REPOS_D: &str = "/etc/yum.repos.d";

/// Repository configuration
/// Not exhaustive and only includes the options needed to reach the repo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub id: String,
    /// dnf defaults `enabled` to true when omitted.
    pub enabled: bool,
    base_url: Option<String>,
}

/// Read all repository configuration files from `reposdir`.
/// Unparsable files are reported and skipped.
pub fn all(reposdir: impl AsRef<Path>) -> Result<Vec<Repo>> {
    let reposdir = reposdir.as_ref();
    let configs = fs::read_dir(reposdir)
        .with_context(|| format!("Could not list files in: {}", reposdir.display()))?;
    let mut repos = Vec::new();
    for c in configs {
        let path = c?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("repo") {
            continue;
        }
        match parse_repo_file(&path) {
            Err(e) => tracing::warn!("{e:#}"),
            Ok(mut r) => repos.append(&mut r),
        }
    }
    repos.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(repos)
}

/// Find a repository by id in `reposdir`.
pub fn find(reposdir: impl AsRef<Path>, id: &str) -> Result<Option<Repo>> {
    Ok(all(reposdir)?.into_iter().find(|r| r.id == id))
}

/// Read repository configuration from a file
#[context("Parsing repo file {:?}", path)]
fn parse_repo_file(path: &Path) -> Result<Vec<Repo>> {
    let i = Ini::load_from_file(path)?;
    Ok(parse_repos(&i))
}

fn parse_repos(i: &Ini) -> Vec<Repo> {
    let mut repos = Vec::new();
    for (sec, prop) in i.iter() {
        let Some(id) = sec else {
            continue;
        };
        let mut repo = Repo {
            id: id.to_string(),
            enabled: true,
            base_url: None,
        };
        for (k, v) in prop.iter() {
            match k {
                "enabled" => repo.enabled = is_true(v.trim()),
                // Only the first mirror is used.
                "baseurl" => {
                    repo.base_url = v
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .find(|s| !s.is_empty())
                        .map(ToOwned::to_owned)
                }
                _ => {}
            }
        }
        repos.push(repo);
    }
    repos
}

impl Repo {
    /// Get the base URL for the repo with variables replaced.
    /// `$releasever` is only replaced if a value is provided.
    pub fn baseurl(&self, releasever: Option<&str>) -> Option<String> {
        let url = self
            .base_url
            .as_deref()?
            .replace("$basearch", &utils::get_rpm_basearch());
        Some(match releasever {
            Some(v) => url.replace("$releasever", v),
            None => url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const REPO: &str = indoc! {r#"
        [azure-rpm-repo]
        name=Azure RPM repo
        baseurl=https://example.blob.core.windows.net/rpms/$releasever/
        enabled=1
        gpgcheck=1

        [azure-rpm-repo-debug]
        name=Azure RPM repo (debug)
        baseurl=https://a.blob.core.windows.net/debug/$basearch https://b.blob.core.windows.net/debug/$basearch
        enabled=0

        [no-baseurl]
        metalink=https://mirrors.example.invalid/metalink
    "#};

    #[test]
    fn test_parse_repos() -> Result<()> {
        let repos = parse_repos(&Ini::load_from_str(REPO)?);
        assert_eq!(repos.len(), 3);
        let r = &repos[0];
        assert_eq!(r.id, "azure-rpm-repo");
        assert!(r.enabled);
        assert_eq!(
            r.baseurl(Some("9")).as_deref(),
            Some("https://example.blob.core.windows.net/rpms/9/")
        );
        assert_eq!(
            r.baseurl(None).as_deref(),
            Some("https://example.blob.core.windows.net/rpms/$releasever/")
        );
        let r = &repos[1];
        assert!(!r.enabled);
        assert_eq!(
            r.baseurl(None).unwrap(),
            format!(
                "https://a.blob.core.windows.net/debug/{}",
                utils::get_rpm_basearch()
            )
        );
        let r = &repos[2];
        assert!(r.enabled);
        assert_eq!(r.baseurl(None), None);
        Ok(())
    }

    #[test]
    fn test_all() -> Result<()> {
        let d = tempfile::tempdir()?;
        fs::write(d.path().join("azure.repo"), REPO)?;
        fs::write(d.path().join("other.repo"), "[fedora]\nenabled=1\n")?;
        fs::write(d.path().join("README"), "[not-a-repo]\n")?;
        let ids: Vec<_> = all(d.path())?.into_iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec!["azure-rpm-repo", "azure-rpm-repo-debug", "fedora", "no-baseurl"]
        );
        assert!(find(d.path(), "fedora")?.is_some());
        assert!(find(d.path(), "missing")?.is_none());
        assert!(all(d.path().join("nope")).is_err());
        Ok(())
    }
}
