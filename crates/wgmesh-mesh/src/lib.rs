//! Mesh membership for wgmesh
//!
//! Brings three independently-mutable state surfaces into agreement: the
//! local network interface, the live peer table of the local WireGuard
//! device, and the server's declarative peer list in the cluster store.
//! Every stage detects "already satisfied" vs "needs action" on its own,
//! so a failed join is recovered by simply running the join again.
//!
//! # Modules
//!
//! - [`device`] - local link creation, addressing, routes
//! - [`join`] - the join orchestrator
//! - [`keys`] - x25519 key material
//! - [`provision`] - create-if-absent server bring-up
//! - [`registry`] - server-side peer registration and restart signaling
//! - [`store`] - the cluster-store rendezvous surface
//! - [`wireguard`] - device state, full-replace configuration, reconciler

pub mod device;
pub mod join;
pub mod keys;
pub mod provision;
pub mod registry;
pub mod store;
pub mod wireguard;

pub use device::{IpCommand, LinkManager};
pub use join::{JoinConfig, MeshJoin};
pub use keys::Keypair;
pub use provision::ServerProvisioner;
pub use registry::PeerRegistry;
pub use store::{KubeMeshStore, MeshStore};
pub use wireguard::{
    DeviceReconciler, ServerPeerSpec, WgCommand, WgControl, WgDeviceConfig, WgDeviceState, WgPeer,
};
