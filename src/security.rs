//! Startup guards.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to run as root. The bot hands user-supplied URLs to an external
/// tool, so it is expected to run under an unprivileged account.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::effective().is_root() {
        bail!("{process} must not be run as root; start it from an unprivileged account");
    }
    Ok(())
}
