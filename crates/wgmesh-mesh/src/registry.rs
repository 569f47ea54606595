//! Server-side peer registration
//!
//! Appends the joining client to the server's declarative peer list and
//! signals the server workload to restart only when the list actually
//! changed. The server has no dynamic reload path; recreating the
//! pod is the only way it re-reads its configuration.

use std::sync::Arc;

use chrono::Utc;
use ipnetwork::IpNetwork;
use tracing::{info, warn};

use wgmesh_common::Result;

use crate::store::MeshStore;

/// Write attempts against concurrent artifact writers before giving up.
const MAX_CONFLICT_ATTEMPTS: u32 = 3;

/// Registers peers in the server's configuration artifact.
pub struct PeerRegistry {
    store: Arc<dyn MeshStore>,
}

impl PeerRegistry {
    /// Create a registry over the given store.
    pub fn new(store: Arc<dyn MeshStore>) -> Self {
        Self { store }
    }

    /// Ensure `public_key` appears in the server's peer list.
    ///
    /// Returns `false`, performing no write, when the artifact already
    /// carries the key, regardless of allowed-IP differences. Otherwise a
    /// `[Peer]` stanza is appended and the artifact written back in full,
    /// conditional on the resourceVersion observed at fetch. A conflicting
    /// concurrent writer triggers a refetch and retry; if the interleaved
    /// writer was a prior run of this same client, the retry resolves to a
    /// `false` no-op.
    pub async fn ensure_peer_registered(
        &self,
        public_key: &str,
        allowed_ips: &[IpNetwork],
    ) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut artifact = self.store.server_artifact().await?;

            if artifact.contains_peer(public_key) {
                info!(peer = %public_key, "server already configured with peer, skipping");
                return Ok(false);
            }

            artifact.append_peer(public_key, allowed_ips);
            match self.store.update_server_artifact(&artifact).await {
                Ok(()) => {
                    info!(peer = %public_key, "registered peer in server configuration");
                    return Ok(true);
                }
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_ATTEMPTS => {
                    warn!(attempt, "artifact changed under us, refetching");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write the restart signal iff the registry changed the artifact.
    pub async fn trigger_rollout_if_changed(&self, changed: bool) -> Result<()> {
        if !changed {
            return Ok(());
        }
        let stamp = Utc::now().to_rfc3339();
        info!(%stamp, "signaling server workload to reload configuration");
        self.store.trigger_rollout(&stamp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockMeshStore;
    use kube::core::ErrorResponse;
    use std::sync::Mutex;
    use wgmesh_common::wgconfig::ServerArtifact;
    use wgmesh_common::Error;

    fn artifact(content: &str) -> ServerArtifact {
        ServerArtifact {
            content: content.to_string(),
            server_public_key: "SRV_PUB".to_string(),
            resource_version: Some("7".to_string()),
        }
    }

    fn conflict() -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    fn nets(cidr: &str) -> Vec<IpNetwork> {
        vec![cidr.parse().unwrap()]
    }

    /// Story: a key already present means no write and no rollout, even when
    /// the recorded allowed-IPs differ from what this run would write
    #[tokio::test]
    async fn story_present_key_is_a_no_op() {
        let mut store = MockMeshStore::new();
        store.expect_server_artifact().times(1).returning(|| {
            Ok(artifact(
                "[Interface]\n\n[Peer]\nPublicKey = CLIENT_PUB\nAllowedIPs = 10.9.9.9/32\n",
            ))
        });
        store.expect_update_server_artifact().never();
        store.expect_trigger_rollout().never();

        let registry = PeerRegistry::new(Arc::new(store));
        let changed = registry
            .ensure_peer_registered("CLIENT_PUB", &nets("100.120.220.2/24"))
            .await
            .unwrap();
        assert!(!changed);

        registry.trigger_rollout_if_changed(changed).await.unwrap();
    }

    /// Story: a new key is appended after the existing content and the
    /// rollout signal fires exactly once
    #[tokio::test]
    async fn story_new_key_is_appended_and_rollout_fires() {
        let written: Arc<Mutex<Option<ServerArtifact>>> = Arc::new(Mutex::new(None));
        let sink = written.clone();

        let mut store = MockMeshStore::new();
        store
            .expect_server_artifact()
            .times(1)
            .returning(|| Ok(artifact("[Interface]\nPrivateKey = X\n")));
        store
            .expect_update_server_artifact()
            .times(1)
            .returning(move |artifact| {
                sink.lock().unwrap().replace(artifact.clone());
                Ok(())
            });
        store.expect_trigger_rollout().times(1).returning(|_| Ok(()));

        let registry = PeerRegistry::new(Arc::new(store));
        let changed = registry
            .ensure_peer_registered("CLIENT_PUB", &nets("100.120.220.2/24"))
            .await
            .unwrap();
        assert!(changed);

        let artifact = written.lock().unwrap().take().unwrap();
        assert!(artifact.content.starts_with("[Interface]\nPrivateKey = X\n"));
        assert!(artifact
            .content
            .contains("[Peer]\nPublicKey = CLIENT_PUB\nAllowedIPs = 100.120.220.2/24\n"));

        registry.trigger_rollout_if_changed(changed).await.unwrap();
    }

    /// Story: losing the optimistic-concurrency race refetches; when the
    /// interleaved writer already registered this key, the retry is a no-op
    #[tokio::test]
    async fn story_conflict_resolves_on_refetch() {
        let mut store = MockMeshStore::new();
        let mut fetches = 0;
        store.expect_server_artifact().times(2).returning(move || {
            fetches += 1;
            if fetches == 1 {
                Ok(artifact("[Interface]\n"))
            } else {
                // another writer got there first, with our key
                Ok(artifact("[Interface]\n\n[Peer]\nPublicKey = CLIENT_PUB\nAllowedIPs = 100.120.220.2/24\n"))
            }
        });
        store
            .expect_update_server_artifact()
            .times(1)
            .returning(|_| Err(conflict()));

        let registry = PeerRegistry::new(Arc::new(store));
        let changed = registry
            .ensure_peer_registered("CLIENT_PUB", &nets("100.120.220.2/24"))
            .await
            .unwrap();
        assert!(!changed);
    }

    /// Story: conflicts are bounded; a persistently racing writer surfaces
    /// as the conflict error instead of looping forever
    #[tokio::test]
    async fn story_conflict_retries_are_bounded() {
        let mut store = MockMeshStore::new();
        store
            .expect_server_artifact()
            .times(3)
            .returning(|| Ok(artifact("[Interface]\n")));
        store
            .expect_update_server_artifact()
            .times(3)
            .returning(|_| Err(conflict()));

        let registry = PeerRegistry::new(Arc::new(store));
        let err = registry
            .ensure_peer_registered("CLIENT_PUB", &nets("100.120.220.2/24"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    /// Story: non-conflict transport failures are fatal immediately; a
    /// blind retry could compound a lost interleaved update
    #[tokio::test]
    async fn story_transport_failures_are_not_retried() {
        let mut store = MockMeshStore::new();
        store
            .expect_server_artifact()
            .times(1)
            .returning(|| Ok(artifact("[Interface]\n")));
        store
            .expect_update_server_artifact()
            .times(1)
            .returning(|_| {
                Err(Error::from(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: "boom".to_string(),
                    reason: "InternalError".to_string(),
                    code: 500,
                })))
            });

        let registry = PeerRegistry::new(Arc::new(store));
        assert!(registry
            .ensure_peer_registered("CLIENT_PUB", &nets("100.120.220.2/24"))
            .await
            .is_err());
    }
}
