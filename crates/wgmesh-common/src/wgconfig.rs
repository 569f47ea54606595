//! Server configuration artifact text model
//!
//! The server's WireGuard configuration lives in the cluster store as an
//! opaque INI-style text blob: one `[Interface]` stanza followed by zero or
//! more `[Peer]` stanzas. Registration appends stanzas; existing content is
//! never rewritten, removed, or reordered.

use ipnetwork::IpNetwork;

/// The server configuration artifact as fetched from the cluster store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerArtifact {
    /// Full configuration text
    pub content: String,
    /// Server public key carried in the artifact's annotation
    pub server_public_key: String,
    /// resourceVersion observed at fetch; carried into conditional writes
    /// so a concurrent writer surfaces as a conflict rather than a silently
    /// lost update
    pub resource_version: Option<String>,
}

impl ServerArtifact {
    /// Whether `public_key` is already registered anywhere in the content.
    ///
    /// A plain substring test is the whole check: the registry tolerates the
    /// artifact having been updated by a prior run or another client, and a
    /// public key uniquely identifies a peer. Allowed-IP differences on an
    /// existing entry are deliberately not inspected.
    pub fn contains_peer(&self, public_key: &str) -> bool {
        self.content.contains(public_key)
    }

    /// Append a `[Peer]` stanza for `public_key` scoped to `allowed_ips`.
    pub fn append_peer(&mut self, public_key: &str, allowed_ips: &[IpNetwork]) {
        let ips = allowed_ips
            .iter()
            .map(|net| net.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.content.push('\n');
        self.content.push_str("[Peer]\n");
        self.content.push_str(&format!("PublicKey = {public_key}\n"));
        self.content.push_str(&format!("AllowedIPs = {ips}\n"));
    }
}
