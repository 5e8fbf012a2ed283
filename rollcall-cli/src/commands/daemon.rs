//! `rollcall serve|stop|status`: daemon lifecycle.

use anyhow::{Context, Result};

use rollcall_daemon::paths::socket_path;
use rollcall_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::{home, print_json};

pub fn serve() -> Result<()> {
    let home = home()?;
    start_blocking(&home).context("daemon exited with error")
}

pub fn stop() -> Result<()> {
    let home = home()?;
    match request_stop(&home) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

pub fn status() -> Result<()> {
    let home = home()?;
    match request_status(&home) {
        Ok(status) => print_json(&status),
        Err(DaemonError::DaemonNotRunning { .. }) => print_json(&serde_json::json!({
            "running": false,
            "socket": socket_path(&home).display().to_string(),
        })),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}
