//! Helpers intended for [`tokio::process::Command`], driven synchronously
//! from the single-threaded host.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

/// Helpers intended for [`tokio::process::Command`].
pub(crate) trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Ensure the child does not outlive the parent.
    fn lifecycle_bind(&mut self) -> &mut Self;

    /// Execute the child process in its own process group, waiting at most `timeout`,
    /// and return its stdout. An error is returned if the child exits abnormally or
    /// the timeout elapses. Once this returns, the whole process group has been
    /// killed, including anything the child forked (e.g. `runuser` forks the real
    /// command).
    fn run_get_output(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Execute the child process, parsing its stdout as JSON. This uses `run_get_output`
    /// internally.
    fn run_and_parse_json<T: serde::de::DeserializeOwned>(&mut self, timeout: Duration)
        -> Result<T>;
}

/// Return the last chunk (e.g. 1024 bytes) of the provided buffer as lossy UTF-8.
fn last_utf8_content(buf: &[u8]) -> String {
    // Truncate to just the trailing bytes here to avoid pathological error messages
    const MAX_STDERR_BYTES: usize = 1024;
    let start = buf.len().saturating_sub(MAX_STDERR_BYTES);
    String::from_utf8_lossy(&buf[start..]).into_owned()
}

/// Sends `SIGKILL` to a process group when dropped.
struct ProcessGroupGuard(Option<Pid>);

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.0 else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            // Everything already exited
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!("Failed to kill process group {pgid}: {e}"),
        }
    }
}

/// If the exit status signals it was not successful, return an error.
/// Note that we intentionally *don't* include the command string
/// in the output; we leave it to the caller to add that if they want,
/// as it may be verbose.
fn check_status(status: std::process::ExitStatus, stderr: &[u8]) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let stderr_buf = last_utf8_content(stderr);
    anyhow::bail!(format!("Subprocess failed: {status:?}\n{stderr_buf}"))
}

impl CommandRunExt for Command {
    /// Output a debug-level log message with this command.
    fn log_debug(&mut self) -> &mut Self {
        // We unconditionally log at trace level, so avoid double logging
        if !tracing::enabled!(tracing::Level::TRACE) {
            tracing::debug!("exec: {self:?}");
        }
        self
    }

    #[allow(unsafe_code)]
    fn lifecycle_bind(&mut self) -> &mut Self {
        // Only the direct child gets the signal; wrappers like runuser forward
        // SIGTERM to the command they run.
        // SAFETY: prctl() is async-signal-safe and thus fine in a forked child.
        unsafe {
            self.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGTERM)
                    .map_err(Into::into)
            })
        }
    }

    fn run_get_output(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        self.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        tracing::trace!("exec: {self:?}");
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Creating runtime")?;
        let output = rt.block_on(async {
            let child = self.spawn()?;
            // The child leads its own group, so its pid is the pgid.
            let _group = ProcessGroupGuard(
                child
                    .id()
                    .and_then(|p| i32::try_from(p).ok())
                    .map(Pid::from_raw),
            );
            // On timeout the child is dropped (and killed), then the guard
            // takes down the rest of the group.
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(r) => Ok(r?),
                Err(_) => anyhow::bail!("Subprocess timed out after {}s", timeout.as_secs_f32()),
            }
        })?;
        check_status(output.status, &output.stderr)?;
        Ok(output.stdout)
    }

    fn run_and_parse_json<T: serde::de::DeserializeOwned>(
        &mut self,
        timeout: Duration,
    ) -> Result<T> {
        let stdout = self.run_get_output(timeout)?;
        serde_json::from_slice(&stdout).context("Parsing JSON output")
    }
}
