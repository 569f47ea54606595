//! The join workflow
//!
//! Sequences local link setup, device reconciliation, and server-side
//! registration in strict order. Every stage is independently idempotent
//! and no stage rolls back on failure: re-running the whole join is the
//! recovery mechanism for a partial run.

use std::sync::Arc;

use ipnetwork::IpNetwork;
use tracing::info;

use wgmesh_common::Result;

use crate::device::LinkManager;
use crate::registry::PeerRegistry;
use crate::store::MeshStore;
use crate::wireguard::{DeviceReconciler, ServerPeerSpec, WgControl};

/// Explicit configuration for one join invocation.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    /// Local WireGuard interface name
    pub interface: String,
    /// This client's address inside the mesh space
    pub wireguard_ip: IpNetwork,
    /// Extra destination ranges steered through the tunnel
    pub allowed_ips: Vec<IpNetwork>,
    /// UDP port the local device listens on
    pub listen_port: u16,
}

/// Orchestrates one join run.
pub struct MeshJoin {
    store: Arc<dyn MeshStore>,
    links: Arc<dyn LinkManager>,
    reconciler: DeviceReconciler,
    registry: PeerRegistry,
    config: JoinConfig,
}

impl MeshJoin {
    /// Wire up the join flow from its three collaborators.
    pub fn new(
        store: Arc<dyn MeshStore>,
        links: Arc<dyn LinkManager>,
        wg: Arc<dyn WgControl>,
        config: JoinConfig,
    ) -> Self {
        let reconciler = DeviceReconciler::new(wg, config.interface.clone(), config.listen_port);
        let registry = PeerRegistry::new(store.clone());
        Self {
            store,
            links,
            reconciler,
            registry,
            config,
        }
    }

    /// Run the join workflow to completion.
    ///
    /// Rendezvous state is read first so precondition failures (no artifact,
    /// no reachable endpoint) surface before anything on the host is
    /// touched. After that: link, device, registry, each aborting the run
    /// on its first fatal error.
    pub async fn run(&self) -> Result<()> {
        let endpoint = self.store.server_endpoint().await?;
        let artifact = self.store.server_artifact().await?;

        self.ensure_local_link().await?;

        let mut allowed_ips = vec![self.config.wireguard_ip];
        allowed_ips.extend(self.config.allowed_ips.iter().copied());
        let server = ServerPeerSpec {
            public_key: artifact.server_public_key,
            endpoint,
            allowed_ips,
        };
        let public_key = self.reconciler.ensure_server_peer(&server).await?;
        info!(device = %self.config.interface, %public_key, "local device ready");

        // the server routes only the client's own mesh address back to it;
        // extra allowed-ips are a client-side routing concern
        let changed = self
            .registry
            .ensure_peer_registered(&public_key, &[self.config.wireguard_ip])
            .await?;
        self.registry.trigger_rollout_if_changed(changed).await?;

        info!("join complete");
        Ok(())
    }

    async fn ensure_local_link(&self) -> Result<()> {
        let name = &self.config.interface;
        self.links.ensure_link(name).await?;
        self.links
            .ensure_address(name, &self.config.wireguard_ip)
            .await?;
        self.links.set_up(name).await?;
        for destination in &self.config.allowed_ips {
            self.links.ensure_route(name, destination).await?;
        }
        Ok(())
    }
}
