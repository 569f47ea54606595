//! Local network link management
//!
//! Creates the WireGuard link, binds its mesh address, brings it up, and
//! installs routes for the extra ranges steered through the tunnel. Every
//! operation treats "already there" as satisfied, so the join flow can be
//! re-run safely after a partial failure.

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tokio::process::Command;
use tracing::debug;

use wgmesh_common::{Error, Result};

/// Link operations needed by the join flow.
///
/// Implementations must be idempotent: a link, address, or route that
/// already exists is success, not an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkManager: Send + Sync {
    /// Create the WireGuard link if absent.
    async fn ensure_link(&self, name: &str) -> Result<()>;

    /// Bind `address` to the link if not already bound.
    async fn ensure_address(&self, name: &str, address: &IpNetwork) -> Result<()>;

    /// Transition the link to the up state. Failure here is fatal: mesh
    /// traffic cannot flow over a down link.
    async fn set_up(&self, name: &str) -> Result<()>;

    /// Install a route for `destination` through the link if absent.
    async fn ensure_route(&self, name: &str, destination: &IpNetwork) -> Result<()>;
}

/// `ip(8)`-backed link manager.
pub struct IpCommand;

/// Whether a netlink stderr diagnostic means the object already exists.
fn already_exists(stderr: &str) -> bool {
    stderr.contains("File exists")
}

impl IpCommand {
    async fn run(&self, args: &[&str], tolerate_exists: bool) -> Result<()> {
        let output = Command::new("ip")
            .args(args)
            .output()
            .await
            .map_err(|e| Error::command("ip", e.to_string()))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if tolerate_exists && already_exists(&stderr) {
            debug!(args = ?args, "already in place");
            return Ok(());
        }

        Err(Error::command(
            "ip",
            format!("`ip {}`: {}", args.join(" "), stderr.trim()),
        ))
    }
}

#[async_trait]
impl LinkManager for IpCommand {
    async fn ensure_link(&self, name: &str) -> Result<()> {
        self.run(&["link", "add", "dev", name, "type", "wireguard"], true)
            .await
    }

    async fn ensure_address(&self, name: &str, address: &IpNetwork) -> Result<()> {
        self.run(&["addr", "add", &address.to_string(), "dev", name], true)
            .await
    }

    async fn set_up(&self, name: &str) -> Result<()> {
        self.run(&["link", "set", "dev", name, "up"], false).await
    }

    async fn ensure_route(&self, name: &str, destination: &IpNetwork) -> Result<()> {
        self.run(&["route", "add", &destination.to_string(), "dev", name], true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_diagnostics_are_benign() {
        assert!(already_exists("RTNETLINK answers: File exists"));
        assert!(already_exists("Error: File exists.\n"));
        assert!(!already_exists("RTNETLINK answers: Operation not permitted"));
        assert!(!already_exists("Cannot find device \"wg0\""));
    }
}
