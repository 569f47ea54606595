//! Common types for wgmesh: errors, constants, and Kubernetes utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod wgconfig;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding every server-side mesh object
pub const MESH_NAMESPACE: &str = "kube-system";

/// Shared name of the server Secret, Deployment, and Service
pub const MESH_OBJECT_NAME: &str = "wireguard";

/// Secret data key holding the server configuration template
pub const SERVER_CONFIG_KEY: &str = "wg0.conf.template";

/// Name of the local WireGuard interface; at most one exists per host
pub const MESH_INTERFACE: &str = "wg0";

/// Well-known UDP port of the mesh
pub const MESH_PORT: u16 = 51820;

/// Secret annotation carrying the server's public key
pub const SERVER_PUBLIC_KEY_ANNOTATION: &str = "wgmesh.io/public-key";

/// Pod-template annotation whose change signals the server workload to
/// restart and re-read its configuration
pub const ROLLOUT_ANNOTATION: &str = "restart.at/time";

/// The server's own address inside the mesh space
pub const SERVER_MESH_ADDRESS: &str = "100.120.220.1/24";

/// Default address assigned to a joining client
pub const DEFAULT_CLIENT_ADDRESS: &str = "100.120.220.2/24";
