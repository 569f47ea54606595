//! `wgmesh join` - join this host as a peer of the cluster's server
//!
//! Sets up the local WireGuard link (wg0), configures the device to peer
//! with the server, and registers this client in the server's peer list.
//! Pass the cluster's pod and service CIDRs in --allowed-ips for direct
//! access to cluster resources over the tunnel.

use std::path::Path;
use std::sync::Arc;

use clap::Args;
use ipnetwork::IpNetwork;

use wgmesh_common::{kube_utils, DEFAULT_CLIENT_ADDRESS, MESH_INTERFACE, MESH_PORT};
use wgmesh_mesh::{IpCommand, JoinConfig, KubeMeshStore, MeshJoin, WgCommand};

use crate::Result;

/// Join this host as a peer of the cluster's WireGuard server
#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Additional IP ranges to send through the tunnel
    /// (e.g. 192.168.0.0/16,10.244.1.0/24)
    #[arg(long = "allowed-ips", value_delimiter = ',')]
    pub allowed_ips: Vec<IpNetwork>,

    /// Address used for this peer inside the WireGuard space
    #[arg(long = "wireguard-ip", default_value = DEFAULT_CLIENT_ADDRESS)]
    pub wireguard_ip: IpNetwork,
}

/// Run the join command.
pub async fn run(args: JoinArgs, kubeconfig: Option<&Path>) -> Result<()> {
    let client = kube_utils::client_for(kubeconfig).await?;

    let join = MeshJoin::new(
        Arc::new(KubeMeshStore::new(client)),
        Arc::new(IpCommand),
        Arc::new(WgCommand),
        JoinConfig {
            interface: MESH_INTERFACE.to_string(),
            wireguard_ip: args.wireguard_ip,
            allowed_ips: args.allowed_ips,
            listen_port: MESH_PORT,
        },
    );
    join.run().await?;
    Ok(())
}
