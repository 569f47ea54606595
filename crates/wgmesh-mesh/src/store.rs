//! Cluster store access
//!
//! The Kubernetes control plane is the only rendezvous channel between
//! clients and the server: a Secret carries the server's declarative
//! configuration, a Service exposes its external endpoint, and a Deployment
//! pod-template annotation is the restart signal. Nothing here creates
//! objects; a missing rendezvous object is a precondition failure pointing
//! the user at `wgmesh deploy`.

use std::net::SocketAddr;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use wgmesh_common::wgconfig::ServerArtifact;
use wgmesh_common::{
    Error, Result, MESH_NAMESPACE, MESH_OBJECT_NAME, ROLLOUT_ANNOTATION, SERVER_CONFIG_KEY,
    SERVER_PUBLIC_KEY_ANNOTATION,
};

/// The cluster-store surface consumed by the join flow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeshStore: Send + Sync {
    /// Fetch the server configuration artifact.
    async fn server_artifact(&self) -> Result<ServerArtifact>;

    /// Write the artifact content back in full.
    ///
    /// The write is conditional on the resourceVersion the artifact was
    /// fetched with; a concurrent writer surfaces as a 409 conflict.
    async fn update_server_artifact(&self, artifact: &ServerArtifact) -> Result<()>;

    /// Resolve the server's externally reachable UDP endpoint.
    async fn server_endpoint(&self) -> Result<SocketAddr>;

    /// Set the restart-signal annotation on the server workload.
    async fn trigger_rollout(&self, timestamp: &str) -> Result<()>;
}

/// kube-rs backed store.
pub struct KubeMeshStore {
    client: Client,
}

impl KubeMeshStore {
    /// Wrap a Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), MESH_NAMESPACE)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), MESH_NAMESPACE)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), MESH_NAMESPACE)
    }
}

#[async_trait]
impl MeshStore for KubeMeshStore {
    async fn server_artifact(&self) -> Result<ServerArtifact> {
        let secret = match self.secrets().get(MESH_OBJECT_NAME).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(Error::precondition(format!(
                    "server config {MESH_NAMESPACE}/{MESH_OBJECT_NAME} not found; run `wgmesh deploy` first"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        artifact_from_secret(secret)
    }

    async fn update_server_artifact(&self, artifact: &ServerArtifact) -> Result<()> {
        // a merge patch carrying the fetched resourceVersion makes the API
        // server reject interleaved writers with 409 instead of silently
        // dropping their peer additions
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": artifact.resource_version },
            "stringData": { SERVER_CONFIG_KEY: artifact.content },
        });
        self.secrets()
            .patch(MESH_OBJECT_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!("updated server configuration artifact");
        Ok(())
    }

    async fn server_endpoint(&self) -> Result<SocketAddr> {
        let service = match self.services().get(MESH_OBJECT_NAME).await {
            Ok(service) => service,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(Error::precondition(format!(
                    "service {MESH_NAMESPACE}/{MESH_OBJECT_NAME} not found; run `wgmesh deploy` first"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        endpoint_from_service(&service)
    }

    async fn trigger_rollout(&self, timestamp: &str) -> Result<()> {
        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": {
                ROLLOUT_ANNOTATION: timestamp,
            } } } }
        });
        match self
            .deployments()
            .patch(MESH_OBJECT_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::precondition(format!(
                "deployment {MESH_NAMESPACE}/{MESH_OBJECT_NAME} not found; run `wgmesh deploy` first"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Extract the artifact from the fetched Secret.
fn artifact_from_secret(secret: Secret) -> Result<ServerArtifact> {
    let server_public_key = secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SERVER_PUBLIC_KEY_ANNOTATION))
        .cloned()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            Error::precondition(format!(
                "public key annotation {SERVER_PUBLIC_KEY_ANNOTATION} missing from secret {MESH_NAMESPACE}/{MESH_OBJECT_NAME}"
            ))
        })?;

    let content = secret
        .data
        .as_ref()
        .and_then(|data| data.get(SERVER_CONFIG_KEY))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| {
            Error::precondition(format!(
                "secret {MESH_NAMESPACE}/{MESH_OBJECT_NAME} carries no {SERVER_CONFIG_KEY} data"
            ))
        })?;

    Ok(ServerArtifact {
        content,
        server_public_key,
        resource_version: secret.metadata.resource_version,
    })
}

/// Extract the reachable endpoint from the server Service.
fn endpoint_from_service(service: &Service) -> Result<SocketAddr> {
    let ip = service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|entry| entry.ip.as_deref())
        .ok_or_else(|| {
            Error::precondition(
                "no external IPs found on wireguard service, cannot join as a peer",
            )
        })?;

    let port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|port| port.port)
        .ok_or_else(|| Error::precondition("wireguard service exposes no ports"))?;

    let ip = ip
        .parse()
        .map_err(|e| Error::precondition(format!("bad service ingress IP {ip:?}: {e}")))?;
    let port = u16::try_from(port)
        .map_err(|_| Error::precondition(format!("bad service port {port}")))?;

    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServicePort, ServiceSpec, ServiceStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(annotation: Option<&str>, content: Option<&str>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(MESH_OBJECT_NAME.to_string()),
                namespace: Some(MESH_NAMESPACE.to_string()),
                annotations: annotation.map(|key| {
                    BTreeMap::from([(SERVER_PUBLIC_KEY_ANNOTATION.to_string(), key.to_string())])
                }),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            data: content.map(|c| {
                BTreeMap::from([(SERVER_CONFIG_KEY.to_string(), ByteString(c.as_bytes().to_vec()))])
            }),
            ..Default::default()
        }
    }

    fn service(ingress_ip: Option<&str>, port: Option<i32>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                ports: port.map(|p| {
                    vec![ServicePort {
                        port: p,
                        protocol: Some("UDP".to_string()),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: ingress_ip.map(|ip| {
                        vec![LoadBalancerIngress {
                            ip: Some(ip.to_string()),
                            ..Default::default()
                        }]
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_artifact_extraction() {
        let art = artifact_from_secret(secret(Some("SRV_PUB"), Some("[Interface]\n"))).unwrap();
        assert_eq!(art.server_public_key, "SRV_PUB");
        assert_eq!(art.content, "[Interface]\n");
        assert_eq!(art.resource_version.as_deref(), Some("7"));
    }

    #[test]
    fn test_missing_annotation_is_a_precondition_failure() {
        let err = artifact_from_secret(secret(None, Some("[Interface]\n"))).unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains(SERVER_PUBLIC_KEY_ANNOTATION));
    }

    #[test]
    fn test_missing_template_data_is_a_precondition_failure() {
        let err = artifact_from_secret(secret(Some("SRV_PUB"), None)).unwrap_err();
        assert!(err.is_precondition());

        let err = artifact_from_secret(secret(Some("SRV_PUB"), Some(""))).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_endpoint_extraction() {
        let endpoint = endpoint_from_service(&service(Some("1.2.3.4"), Some(51820))).unwrap();
        assert_eq!(endpoint, "1.2.3.4:51820".parse().unwrap());
    }

    #[test]
    fn test_pending_load_balancer_is_a_precondition_failure() {
        let err = endpoint_from_service(&service(None, Some(51820))).unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("no external IPs"));
    }
}
