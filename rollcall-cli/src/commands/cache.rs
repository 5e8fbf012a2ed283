//! `rollcall publish|flush`: cache control on the running daemon.

use anyhow::{Context, Result};
use clap::Args;

use rollcall_daemon::{request_flush, request_publish};

use super::{home, print_json};

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Table title, e.g. `Sigma` or `Rush Index`.
    pub table: String,
}

impl PublishArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let data = request_publish(&home, &self.table)
            .with_context(|| format!("failed to publish refresh for '{}'", self.table))?;
        print_json(&data)
    }
}

pub fn flush() -> Result<()> {
    let home = home()?;
    let data = request_flush(&home).context("failed to flush daemon cache")?;
    print_json(&data)
}
