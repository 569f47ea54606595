//! `wgmesh deploy` - provision the WireGuard server in the cluster
//!
//! Creates the server's config Secret (generating its identity), the server
//! Deployment, and the LoadBalancer Service exposing UDP 51820 so peers can
//! connect externally. Every piece is create-if-absent; re-running deploy
//! against a provisioned cluster does nothing.

use std::path::Path;

use clap::Args;
use tracing::info;

use wgmesh_common::kube_utils;
use wgmesh_mesh::ServerProvisioner;

use crate::Result;

/// Deploy the WireGuard server to the cluster
#[derive(Args, Debug)]
pub struct DeployArgs {}

/// Run the deploy command.
pub async fn run(_args: DeployArgs, kubeconfig: Option<&Path>) -> Result<()> {
    let client = kube_utils::client_for(kubeconfig).await?;
    ServerProvisioner::new(client).deploy().await?;
    info!("server deployed; peers can join once the service has an external IP");
    Ok(())
}
