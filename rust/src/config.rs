//! Parsing of the plugin configuration file.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::Result;
use fn_error_context::context;
use ini::Ini;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Default location of the plugin configuration, following the dnf
/// plugin configuration directory convention.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dnf/plugins/azure_auth.conf";

/// The section holding global plugin options; every other section is a repo id.
const MAIN_SECTION: &str = "main";

/// Upper bound on a single `az` invocation.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(15);

/// From https://github.com/rpm-software-management/libdnf/blob/45981d5f53980dac362900df65bcb2652aa8d7c7/libdnf/conf/OptionBool.hpp#L30-L31
pub(crate) fn is_true(string: &str) -> bool {
    string == "1" || string == "yes" || string == "true" || string == "on"
}

/// Plugin configuration, loaded once at startup and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfiguration {
    enabled: bool,
    managed_repository_ids: BTreeSet<String>,
    token_timeout: Duration,
}

impl Default for PluginConfiguration {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PluginConfiguration {
    /// A configuration under which the plugin does nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            managed_repository_ids: BTreeSet::new(),
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    /// Parse configuration from a file.
    #[context("Loading plugin configuration from {}", path.display())]
    pub fn load(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path)?;
        Ok(Self::from_ini(&ini))
    }

    /// Parse configuration from in-memory INI text.
    pub fn parse(content: &str) -> Result<Self> {
        let ini = Ini::load_from_str(content)?;
        Ok(Self::from_ini(&ini))
    }

    /// Load configuration, degrading to [`PluginConfiguration::disabled`] if the
    /// file is missing or malformed. This never fails; the host operation must
    /// not be aborted because of us.
    pub fn load_or_disabled(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("azure_auth disabled: {e:#}");
                Self::disabled()
            }
        }
    }

    fn from_ini(ini: &Ini) -> Self {
        let mut config = Self::disabled();
        for (sec, props) in ini.iter() {
            // Properties before any section header; ignored.
            let Some(sec) = sec else {
                continue;
            };
            if sec != MAIN_SECTION {
                // Presence of the section is all that matters.
                config.managed_repository_ids.insert(sec.to_string());
                continue;
            }
            for (k, v) in props.iter() {
                match k {
                    "enabled" => config.enabled = is_true(v.trim()),
                    "timeout" => match v.trim().parse::<u64>() {
                        Ok(secs) if secs > 0 => {
                            config.token_timeout = Duration::from_secs(secs)
                        }
                        _ => tracing::warn!(
                            "Ignoring invalid timeout {v:?}; using {}s",
                            DEFAULT_TOKEN_TIMEOUT.as_secs()
                        ),
                    },
                    _ => {}
                }
            }
        }
        config
    }

    /// Global on/off switch from `[main] enabled`.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Repository identifiers for which injection is active.
    pub fn managed_repository_ids(&self) -> &BTreeSet<String> {
        &self.managed_repository_ids
    }

    /// Returns true if `repo_id` has its own section.
    pub fn manages(&self, repo_id: &str) -> bool {
        self.managed_repository_ids.contains(repo_id)
    }

    /// Timeout applied to each identity CLI invocation.
    pub fn token_timeout(&self) -> Duration {
        self.token_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_is_true() {
        for v in ["1", "yes", "true", "on"] {
            assert!(is_true(v), "{v}");
        }
        for v in ["0", "no", "false", "off", "", "TRUE", "2"] {
            assert!(!is_true(v), "{v}");
        }
    }

    #[test]
    fn test_parse() -> Result<()> {
        let c = PluginConfiguration::parse(indoc! {r#"
            [main]
            enabled=1

            [azure-rpm-repo]
            [other-repo]
            # Keys in repo sections are ignored
            baseurl=https://example.invalid
        "#})?;
        assert!(c.enabled());
        similar_asserts::assert_eq!(
            c.managed_repository_ids()
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
            vec!["azure-rpm-repo", "other-repo"]
        );
        assert!(c.manages("azure-rpm-repo"));
        assert!(!c.manages("main"));
        assert!(!c.manages("fedora"));
        assert_eq!(c.token_timeout(), DEFAULT_TOKEN_TIMEOUT);
        Ok(())
    }

    #[test]
    fn test_parse_disabled() -> Result<()> {
        let c = PluginConfiguration::parse(indoc! {r#"
            [main]
            enabled=0
            [azure-rpm-repo]
        "#})?;
        assert!(!c.enabled());
        assert!(c.manages("azure-rpm-repo"));

        // No [main] at all
        let c = PluginConfiguration::parse("[azure-rpm-repo]\n")?;
        assert!(!c.enabled());
        Ok(())
    }

    #[test]
    fn test_timeout() -> Result<()> {
        let c = PluginConfiguration::parse("[main]\nenabled=yes\ntimeout=3\n")?;
        assert_eq!(c.token_timeout(), Duration::from_secs(3));
        for bad in ["0", "-1", "soon"] {
            let c = PluginConfiguration::parse(&format!("[main]\ntimeout={bad}\n"))?;
            assert_eq!(c.token_timeout(), DEFAULT_TOKEN_TIMEOUT);
        }
        Ok(())
    }

    #[test]
    fn test_load_missing() {
        let d = tempfile::tempdir().unwrap();
        let path = d.path().join("azure_auth.conf");
        assert!(PluginConfiguration::load(&path).is_err());
        let c = PluginConfiguration::load_or_disabled(&path);
        assert_eq!(c, PluginConfiguration::disabled());
    }

    #[test]
    fn test_load_file() -> Result<()> {
        let d = tempfile::tempdir()?;
        let path = d.path().join("azure_auth.conf");
        std::fs::write(&path, "[main]\nenabled=true\n\n[azure-rpm-repo]\n")?;
        let c = PluginConfiguration::load_or_disabled(&path);
        assert!(c.enabled());
        assert!(c.manages("azure-rpm-repo"));
        Ok(())
    }
}
