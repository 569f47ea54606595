//! wgmesh CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// wgmesh - Kubernetes WireGuard toolkit
///
/// Deploys a WireGuard server into a Kubernetes cluster and configures
/// peers on it. The server acts as a subnet router into the cluster, so
/// peers can reach pods and services directly; the only public piece is the
/// server's LoadBalancer service on UDP 51820, and traffic from anything
/// but a registered peer is dropped.
#[derive(Parser, Debug)]
#[command(name = "wgmesh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the kubeconfig for the cluster (defaults to the inferred
    /// configuration)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the WireGuard server to the cluster
    Deploy(commands::deploy::DeployArgs),
    /// Join this host as a peer of the cluster's WireGuard server
    Join(commands::join::JoinArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Deploy(args) => commands::deploy::run(args, self.kubeconfig.as_deref()).await,
            Commands::Join(args) => commands::join::run(args, self.kubeconfig.as_deref()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_join_flags_parse() {
        let cli = Cli::try_parse_from([
            "wgmesh",
            "join",
            "--allowed-ips",
            "192.168.0.0/16,10.244.1.0/24",
            "--wireguard-ip",
            "100.120.220.5/24",
        ])
        .unwrap();

        match cli.command {
            Commands::Join(args) => {
                assert_eq!(args.allowed_ips.len(), 2);
                assert_eq!(args.wireguard_ip.to_string(), "100.120.220.5/24");
            }
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn test_join_defaults() {
        let cli = Cli::try_parse_from(["wgmesh", "join"]).unwrap();
        match cli.command {
            Commands::Join(args) => {
                assert!(args.allowed_ips.is_empty());
                assert_eq!(args.wireguard_ip.to_string(), "100.120.220.2/24");
            }
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn test_bad_cidr_is_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["wgmesh", "join", "--wireguard-ip", "not-a-cidr"]).is_err());
    }

    #[test]
    fn test_global_kubeconfig_flag() {
        let cli =
            Cli::try_parse_from(["wgmesh", "deploy", "--kubeconfig", "/tmp/kc.yaml"]).unwrap();
        assert_eq!(
            cli.kubeconfig.as_deref(),
            Some(std::path::Path::new("/tmp/kc.yaml"))
        );
    }
}
