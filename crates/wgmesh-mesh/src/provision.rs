//! Server-side provisioning
//!
//! Three create-if-absent operations consumed once by `wgmesh deploy`: the
//! config Secret (with a freshly generated server identity), the server
//! Deployment, and the externally reachable LoadBalancer Service. Each is a
//! no-op when the target already exists; none reconciles drift afterwards.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use tracing::info;

use wgmesh_common::{
    Error, Result, MESH_NAMESPACE, MESH_OBJECT_NAME, MESH_PORT, SERVER_CONFIG_KEY,
    SERVER_PUBLIC_KEY_ANNOTATION,
};

use crate::keys::Keypair;

/// Server `[Interface]` template. `{PRIVATE_KEY}` is filled at secret
/// creation; `ENI` is rewritten by the pod's init container to the node's
/// real egress interface so the forward/masquerade rules attach correctly.
const SERVER_CONFIG_TEMPLATE: &str = r#"[Interface]
Address = 100.120.220.1/24
ListenPort = 51820
PrivateKey = {PRIVATE_KEY}
PostUp = iptables -A FORWARD -i ENI -j ACCEPT; iptables -A FORWARD -o ENI -j ACCEPT; iptables -t nat -A POSTROUTING -o ENI -j MASQUERADE
PostUp = sysctl -w -q net.ipv4.ip_forward=1
PostDown = iptables -D FORWARD -i ENI -j ACCEPT; iptables -D FORWARD -o ENI -j ACCEPT; iptables -t nat -D POSTROUTING -o ENI -j MASQUERADE
PostDown = sysctl -w -q net.ipv4.ip_forward=0
"#;

/// Server workload manifest. The rendered wg0.conf lands in an emptyDir so
/// the secret-mounted template itself stays read-only.
const SERVER_DEPLOYMENT_MANIFEST: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: wireguard
spec:
  selector:
    matchLabels:
      name: wireguard
  template:
    metadata:
      labels:
        name: wireguard
    spec:
      initContainers:
        - name: config-render
          image: busybox
          command:
            - sh
            - -c
            - >-
              ENI=$(ip route get 8.8.8.8 | grep 8.8.8.8 | awk '{print $5}');
              sed "s/ENI/$ENI/g" /etc/wireguard-secret/wg0.conf.template > /etc/wireguard/wg0.conf;
              chmod 400 /etc/wireguard/wg0.conf
          volumeMounts:
            - name: wireguard-config
              mountPath: /etc/wireguard/
            - name: wireguard-secret
              mountPath: /etc/wireguard-secret/
      containers:
        - name: wireguard
          image: linuxserver/wireguard:latest
          ports:
            - containerPort: 51820
              protocol: UDP
          env:
            - name: TZ
              value: UTC
            - name: PEERS
              value: "1"
          volumeMounts:
            - name: wireguard-config
              mountPath: /etc/wireguard/
              readOnly: true
          securityContext:
            privileged: true
            capabilities:
              add:
                - NET_ADMIN
      volumes:
        - name: wireguard-config
          emptyDir: {}
        - name: wireguard-secret
          secret:
            secretName: wireguard
"#;

/// Replica count for the server workload
const SERVER_REPLICAS: i32 = 2;

/// Provisions the server-side mesh objects.
pub struct ServerProvisioner {
    client: Client,
}

impl ServerProvisioner {
    /// Wrap a Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Bring up the server: config secret, workload, service.
    pub async fn deploy(&self) -> Result<()> {
        self.ensure_config_secret().await?;
        self.ensure_deployment().await?;
        self.ensure_service().await?;
        Ok(())
    }

    async fn ensure_config_secret(&self) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), MESH_NAMESPACE);
        if !absent(&api, MESH_OBJECT_NAME).await? {
            return Ok(());
        }

        let keys = Keypair::generate();
        let secret = server_secret(&keys);
        api.create(&PostParams::default(), &secret).await?;
        info!(public_key = %keys.public, "created server configuration secret");
        Ok(())
    }

    async fn ensure_deployment(&self) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), MESH_NAMESPACE);
        if !absent(&api, MESH_OBJECT_NAME).await? {
            return Ok(());
        }

        let deployment = server_deployment()?;
        api.create(&PostParams::default(), &deployment).await?;
        info!("created server deployment");
        Ok(())
    }

    async fn ensure_service(&self) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), MESH_NAMESPACE);
        if !absent(&api, MESH_OBJECT_NAME).await? {
            return Ok(());
        }

        let service = server_service();
        api.create(&PostParams::default(), &service).await?;
        info!("created server service");
        Ok(())
    }
}

/// Whether `name` is absent (404). Any other fetch failure is fatal.
async fn absent<K>(api: &Api<K>, name: &str) -> Result<bool>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(_) => Ok(false),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Build the config Secret around a fresh server identity.
fn server_secret(keys: &Keypair) -> Secret {
    let content = SERVER_CONFIG_TEMPLATE.replace("{PRIVATE_KEY}", &keys.private);
    Secret {
        metadata: ObjectMeta {
            name: Some(MESH_OBJECT_NAME.to_string()),
            namespace: Some(MESH_NAMESPACE.to_string()),
            annotations: Some(BTreeMap::from([(
                SERVER_PUBLIC_KEY_ANNOTATION.to_string(),
                keys.public.clone(),
            )])),
            ..Default::default()
        },
        string_data: Some(BTreeMap::from([(
            SERVER_CONFIG_KEY.to_string(),
            content,
        )])),
        ..Default::default()
    }
}

/// Decode the embedded workload manifest and pin name/namespace/replicas.
fn server_deployment() -> Result<Deployment> {
    let mut deployment: Deployment = serde_yaml::from_str(SERVER_DEPLOYMENT_MANIFEST)
        .map_err(|e| Error::serialization(format!("server deployment manifest: {e}")))?;
    deployment.metadata.name = Some(MESH_OBJECT_NAME.to_string());
    deployment.metadata.namespace = Some(MESH_NAMESPACE.to_string());
    if let Some(spec) = deployment.spec.as_mut() {
        spec.replicas = Some(SERVER_REPLICAS);
    }
    Ok(deployment)
}

/// Build the externally reachable LoadBalancer Service.
fn server_service() -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(MESH_OBJECT_NAME.to_string()),
            namespace: Some(MESH_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            selector: Some(BTreeMap::from([(
                "name".to_string(),
                MESH_OBJECT_NAME.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                protocol: Some("UDP".to_string()),
                port: i32::from(MESH_PORT),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
