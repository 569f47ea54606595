//! WireGuard device state and reconciliation
//!
//! The device read path goes through `wg show <name> dump`; the write path
//! goes through `wg setconf`, which replaces the device's entire
//! configuration. That replace-only semantic is the central contract here:
//! adding one peer means reading the current set, merging, and writing the
//! union back.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tokio::process::Command;
use tracing::{debug, info};

use wgmesh_common::{Error, Result};

use crate::keys::{decode_key, Keypair};

/// A single entry in a device's peer table, keyed by public key.
///
/// Public keys must not repeat within one device's peer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgPeer {
    /// Base64 public key identifying the peer
    pub public_key: String,
    /// Destination ranges this peer may route through the tunnel
    pub allowed_ips: Vec<IpNetwork>,
    /// Remote address, when known
    pub endpoint: Option<SocketAddr>,
}

/// Live device state as read from the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WgDeviceState {
    /// `None` until the device has been given an identity
    pub private_key: Option<String>,
    /// Public key derived by the kernel, when an identity exists
    pub public_key: Option<String>,
    /// Bound UDP port, when set
    pub listen_port: Option<u16>,
    /// Current peer table
    pub peers: Vec<WgPeer>,
}

/// Full configuration payload for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgDeviceConfig {
    /// Base64 private key
    pub private_key: String,
    /// UDP port the device listens on
    pub listen_port: u16,
    /// The complete peer set the device will hold after apply
    pub peers: Vec<WgPeer>,
}

/// Access to a WireGuard device.
///
/// `apply` replaces the device's entire peer set with `config.peers`.
/// Callers adding a peer must read the current set, merge, and write the
/// union back; an incremental patch path does not exist.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WgControl: Send + Sync {
    /// Read current device state; `Ok(None)` when the device does not exist.
    async fn device(&self, name: &str) -> Result<Option<WgDeviceState>>;

    /// Apply `config`, replacing the device's full configuration.
    async fn apply(&self, name: &str, config: &WgDeviceConfig) -> Result<()>;
}

/// `wg(8)`-backed device control.
pub struct WgCommand;

#[async_trait]
impl WgControl for WgCommand {
    async fn device(&self, name: &str) -> Result<Option<WgDeviceState>> {
        let output = Command::new("wg")
            .args(["show", name, "dump"])
            .output()
            .await
            .map_err(|e| Error::command("wg", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such device") {
                return Ok(None);
            }
            return Err(Error::command(
                "wg",
                format!("`wg show {name} dump`: {}", stderr.trim()),
            ));
        }

        parse_dump(&String::from_utf8_lossy(&output.stdout)).map(Some)
    }

    async fn apply(&self, name: &str, config: &WgDeviceConfig) -> Result<()> {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(render_setconf(config).as_bytes())?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        let output = Command::new("wg")
            .args(["setconf", name, &path])
            .output()
            .await
            .map_err(|e| Error::command("wg", e.to_string()))?;

        if !output.status.success() {
            return Err(Error::command(
                "wg",
                format!(
                    "`wg setconf {name}`: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}

/// Interpret a key field from `wg show dump`.
///
/// `(none)` and the all-zero key both mean "no identity"; the explicit
/// `None` representation keeps magic-value comparisons out of the callers.
fn normalize_key(field: &str) -> Option<String> {
    if field == "(none)" {
        return None;
    }
    match decode_key(field) {
        Ok(bytes) if bytes.iter().all(|b| *b == 0) => None,
        _ => Some(field.to_string()),
    }
}

/// Parse `wg show <name> dump` output.
///
/// The first line describes the interface (private key, public key, listen
/// port, fwmark); each further line is one peer (public key, preshared key,
/// endpoint, allowed-ips, handshake, rx, tx, keepalive), all tab-separated.
fn parse_dump(dump: &str) -> Result<WgDeviceState> {
    let mut lines = dump.lines();
    let header = lines
        .next()
        .ok_or_else(|| Error::command("wg", "empty dump output"))?;

    let fields: Vec<&str> = header.split('\t').collect();
    if fields.len() < 3 {
        return Err(Error::command(
            "wg",
            format!("malformed dump header: {header:?}"),
        ));
    }

    let listen_port = match fields[2].parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    };

    let mut state = WgDeviceState {
        private_key: normalize_key(fields[0]),
        public_key: normalize_key(fields[1]),
        listen_port,
        peers: Vec::new(),
    };

    for line in lines.filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            return Err(Error::command(
                "wg",
                format!("malformed dump peer line: {line:?}"),
            ));
        }

        let endpoint = match fields[2] {
            "(none)" => None,
            raw => Some(raw.parse::<SocketAddr>().map_err(|e| {
                Error::command("wg", format!("bad peer endpoint {raw:?}: {e}"))
            })?),
        };

        let allowed_ips = match fields[3] {
            "(none)" => Vec::new(),
            raw => raw
                .split(',')
                .map(|cidr| {
                    cidr.trim()
                        .parse::<IpNetwork>()
                        .map_err(|e| Error::invalid_cidr(cidr.trim(), e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?,
        };

        state.peers.push(WgPeer {
            public_key: fields[0].to_string(),
            allowed_ips,
            endpoint,
        });
    }

    Ok(state)
}

/// Render a `wg setconf` configuration body.
fn render_setconf(config: &WgDeviceConfig) -> String {
    let mut out = String::new();
    out.push_str("[Interface]\n");
    out.push_str(&format!("PrivateKey = {}\n", config.private_key));
    out.push_str(&format!("ListenPort = {}\n", config.listen_port));

    for peer in &config.peers {
        out.push('\n');
        out.push_str("[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", peer.public_key));
        if !peer.allowed_ips.is_empty() {
            let ips = peer
                .allowed_ips
                .iter()
                .map(|net| net.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("AllowedIPs = {ips}\n"));
        }
        if let Some(endpoint) = peer.endpoint {
            out.push_str(&format!("Endpoint = {endpoint}\n"));
        }
    }
    out
}

/// What the mesh server looks like from the joining device's side.
#[derive(Debug, Clone)]
pub struct ServerPeerSpec {
    /// Server public key from the artifact annotation
    pub public_key: String,
    /// Externally reachable UDP endpoint
    pub endpoint: SocketAddr,
    /// Ranges routed to the server: the client's own mesh address plus any
    /// caller-supplied extra destinations
    pub allowed_ips: Vec<IpNetwork>,
}

impl ServerPeerSpec {
    fn to_peer(&self) -> WgPeer {
        WgPeer {
            public_key: self.public_key.clone(),
            allowed_ips: self.allowed_ips.clone(),
            endpoint: Some(self.endpoint),
        }
    }
}

/// Drives the local device toward "initialized, with the server as a peer".
///
/// Presence of the server's public key in the peer table is the sole
/// "already joined" criterion; allowed-IP or endpoint drift on an existing
/// server entry is not corrected.
pub struct DeviceReconciler {
    wg: Arc<dyn WgControl>,
    interface: String,
    listen_port: u16,
}

impl DeviceReconciler {
    /// Create a reconciler for the named interface.
    pub fn new(wg: Arc<dyn WgControl>, interface: impl Into<String>, listen_port: u16) -> Self {
        Self {
            wg,
            interface: interface.into(),
            listen_port,
        }
    }

    /// Ensure the device has an identity and the server in its peer table.
    ///
    /// Returns the device's public key for server-side registration.
    pub async fn ensure_server_peer(&self, server: &ServerPeerSpec) -> Result<String> {
        let current = self.wg.device(&self.interface).await?;

        let (private, public, listen_port, peers) = match current {
            Some(WgDeviceState {
                private_key: Some(private),
                public_key: public,
                listen_port,
                peers,
            }) => (private, public, listen_port, peers),
            // absent, or present without an identity
            _ => return self.initialize(server).await,
        };

        let public = match public {
            Some(key) => key,
            None => Keypair::from_private(&private)?.public,
        };

        if peers.iter().any(|p| p.public_key == server.public_key) {
            debug!(interface = %self.interface, "server already present in peer table");
            return Ok(public);
        }

        info!(
            interface = %self.interface,
            server = %server.public_key,
            "server not found as peer, adding"
        );

        // setconf replaces the whole peer set, so every existing peer must
        // round-trip unchanged alongside the new server entry
        let mut merged = peers;
        merged.push(server.to_peer());
        let config = WgDeviceConfig {
            private_key: private,
            listen_port: listen_port.unwrap_or(self.listen_port),
            peers: merged,
        };
        self.wg.apply(&self.interface, &config).await?;

        Ok(public)
    }

    async fn initialize(&self, server: &ServerPeerSpec) -> Result<String> {
        info!(interface = %self.interface, "device not initialized, setting up for first time");

        let keys = Keypair::generate();
        let config = WgDeviceConfig {
            private_key: keys.private,
            listen_port: self.listen_port,
            peers: vec![server.to_peer()],
        };
        self.wg.apply(&self.interface, &config).await?;

        Ok(keys.public)
    }
}
