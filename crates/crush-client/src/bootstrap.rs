//! Detached-server bootstrap: when no server listens at the expected
//! endpoint, the client forks the current executable as a background
//! `server` process and waits for it to come up.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::Client;

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);
const STARTUP_ATTEMPTS: u32 = 20;

/// Returns a client whose server is confirmed reachable, spawning a detached
/// server process first if necessary.
pub async fn ensure_server(host: &str) -> Result<Client> {
    let client = Client::new(host)?;
    if client.health().await.is_ok() {
        return Ok(client);
    }

    spawn_detached_server(host)?;

    for _ in 0..STARTUP_ATTEMPTS {
        tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        if client.health().await.is_ok() {
            return Ok(client);
        }
    }
    anyhow::bail!("server at {host} did not come up within 1s")
}

fn spawn_detached_server(host: &str) -> Result<()> {
    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let log_dir = cache_dir().join("crush");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let stdout = std::fs::File::create(log_dir.join("server.out.log"))?;
    let stderr = std::fs::File::create(log_dir.join("server.err.log"))?;

    let mut cmd = Command::new(&exe);
    cmd.args(["server", "--host", host])
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    // Detach into its own session so it outlives this invocation.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Safety: pre_exec runs in the forked child before exec; setsid has
        // no failure mode that matters here.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn detached server from {}", exe.display()))?;
    info!(pid = child.id(), host, "spawned detached server");
    debug!(logs = %log_dir.display(), "server output redirected");
    Ok(())
}

fn cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_CACHE_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(".cache"),
        _ => std::env::temp_dir(),
    }
}
