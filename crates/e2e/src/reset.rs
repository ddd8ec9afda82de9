//! Test data reset hook
//!
//! Runs the configured flush-and-reseed command to completion before a
//! scenario starts. The command is destructive, so it only runs against a
//! target that is explicitly declared isolated and that matches none of the
//! forbidden patterns.

use std::process::Stdio;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ResetConfig;
use crate::error::{E2eError, E2eResult};

const STDERR_TAIL_BYTES: usize = 2048;

/// Outcome of a successful reset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResetReport {
    pub elapsed: Duration,
}

pub struct ResetHook {
    config: ResetConfig,
    guards: Vec<Regex>,
}

impl ResetHook {
    pub fn new(config: ResetConfig) -> E2eResult<Self> {
        let guards = config
            .forbidden_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, guards })
    }

    pub fn command_line(&self) -> String {
        self.config.command_line()
    }

    /// Refuse targets that are not declared disposable or look like a shared
    /// or production store.
    pub fn check_target(&self) -> E2eResult<()> {
        if !self.config.isolated {
            return Err(E2eError::ResetRefused(
                "reset.isolated is not set; the reset command deletes all data and only runs \
                 against a store declared as a disposable test instance"
                    .into(),
            ));
        }

        let mut haystacks = vec![self.command_line()];
        if let Some(dir) = &self.config.working_dir {
            haystacks.push(dir.display().to_string());
        }
        haystacks.extend(self.config.env.iter().map(|(k, v)| format!("{k}={v}")));

        for guard in &self.guards {
            if let Some(hit) = haystacks.iter().find(|h| guard.is_match(h)) {
                return Err(E2eError::ResetRefused(format!(
                    "forbidden pattern `{}` matches `{}`",
                    guard.as_str(),
                    hit
                )));
            }
        }
        Ok(())
    }

    /// Run the reset command and wait for it to exit.
    pub async fn run(&self) -> E2eResult<ResetReport> {
        self.check_target()?;

        let command = self.command_line();
        info!("Resetting test data: {}", command);

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        // Background jobs the command leaves behind share its group.
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| E2eError::ResetFailed {
            command: command.clone(),
            status: format!("spawn error ({e})"),
            elapsed: start.elapsed(),
            stderr_tail: String::new(),
        })?;
        let group = child.id();

        let mut stdout = tokio::spawn(read_tail(child.stdout.take()));
        let mut stderr = tokio::spawn(read_tail(child.stderr.take()));

        // The pipes stay open as long as anything the command started holds
        // them, so the drains share the deadline with the exit.
        let finished = timeout(self.config.timeout(), async {
            let status = child.wait().await?;
            let stdout = (&mut stdout).await.unwrap_or_default();
            let stderr = (&mut stderr).await.unwrap_or_default();
            Ok::<_, E2eError>((status, stdout, stderr))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(finished) => finished?,
            Err(_) => {
                let elapsed = start.elapsed();
                warn!("Reset command timed out after {:?}; terminating", elapsed);
                terminate(&mut child, group).await;
                stdout.abort();
                stderr.abort();
                return Err(E2eError::ResetTimeout { command, elapsed });
            }
        };
        let elapsed = start.elapsed();

        if !stdout.is_empty() {
            debug!("reset stdout: {}", stdout.trim_end());
        }

        if !status.success() {
            return Err(E2eError::ResetFailed {
                command,
                status: status.to_string(),
                elapsed,
                stderr_tail: stderr.trim_end().to_string(),
            });
        }

        info!("Test data reset in {} ms", elapsed.as_millis());
        Ok(ResetReport { elapsed })
    }
}

/// Read a pipe to the end, keeping only the last few kilobytes.
async fn read_tail<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!("reset output read error: {}", e);
    }
    let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).into_owned()
}

/// SIGTERM the command's process group first, then kill whatever is left.
async fn terminate(child: &mut Child, group: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = group {
            let pgid = Pid::from_raw(pgid as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok()
                && timeout(Duration::from_millis(500), child.wait()).await.is_ok()
            {
                // the leader is gone, stragglers in the group may not be
                let _ = killpg(pgid, Signal::SIGKILL);
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = group;

    if let Err(e) = child.kill().await {
        warn!("Failed to kill reset command: {}", e);
    }
}
