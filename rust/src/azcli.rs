//! Token acquisition via the Azure CLI (`az`).
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;

use crate::cmdutils::CommandRunExt;
use crate::config::DEFAULT_TOKEN_TIMEOUT;
use crate::token::TokenSource;

/// The subset of `az account get-access-token --output json` we use.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessToken {
    access_token: String,
}

/// Runs `az account get-access-token`, optionally via `runuser` so that the
/// invoking user's `az login` session is used instead of root's.
#[derive(Debug, Clone)]
pub struct AzureCli {
    program: String,
    runuser: String,
    timeout: Duration,
}

impl Default for AzureCli {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TIMEOUT)
    }
}

impl AzureCli {
    /// Use `az` and `runuser` from `$PATH`, bounding each invocation by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "az".into(),
            runuser: "runuser".into(),
            timeout,
        }
    }

    /// Override the path to the `az` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, audience: &str, as_user: Option<&str>) -> Result<Command> {
        let mut cmd = match as_user {
            Some(user) => {
                // Catch typos in SUDO_USER without spawning anything.
                nix::unistd::User::from_name(user)
                    .with_context(|| format!("Looking up user {user}"))?
                    .ok_or_else(|| anyhow!("Unknown user {user}"))?;
                let mut cmd = Command::new(&self.runuser);
                cmd.args(["-u", user, "--"]).arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.args([
            "account",
            "get-access-token",
            "--output",
            "json",
            "--resource",
            audience,
        ]);
        Ok(cmd)
    }
}

/// Returns true if the error chain bottoms out in a missing executable.
fn is_not_found(e: &anyhow::Error) -> bool {
    e.chain()
        .filter_map(|e| e.downcast_ref::<std::io::Error>())
        .any(|e| e.kind() == std::io::ErrorKind::NotFound)
}

impl TokenSource for AzureCli {
    fn resolve(&self, audience: &str, as_user: Option<&str>) -> Result<String> {
        let token: AccessToken = match self
            .command(audience, as_user)?
            .lifecycle_bind()
            .log_debug()
            .run_and_parse_json(self.timeout)
        {
            Ok(t) => t,
            Err(e) if is_not_found(&e) => {
                return Err(e.context(format!(
                    "{} not found; please install the azure-cli package",
                    self.program
                )))
            }
            Err(e) => return Err(e.context("Running az account get-access-token")),
        };
        let token = token.access_token.trim();
        if token.is_empty() {
            anyhow::bail!("az returned an empty access token");
        }
        Ok(token.to_string())
    }
}
