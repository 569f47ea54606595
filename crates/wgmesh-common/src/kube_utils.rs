//! Kubernetes client construction shared by every command

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::{Error, Result};

/// Default connection timeout for kube clients
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a Kubernetes client for the given kubeconfig path.
///
/// With an explicit path the kubeconfig is read from disk; otherwise the
/// configuration is inferred (in-cluster service account, `KUBECONFIG`, or
/// the default kubeconfig location). The explicit flag is passed through
/// from the CLI rather than held in shared process state.
pub async fn client_for(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            debug!(kubeconfig = %path.display(), "using explicit kubeconfig");
            let kc = Kubeconfig::read_from(path).map_err(|e| {
                Error::precondition(format!(
                    "failed to read kubeconfig {}: {e}",
                    path.display()
                ))
            })?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::precondition(format!(
                        "failed to build client config from {}: {e}",
                        path.display()
                    ))
                })?
        }
        None => Config::infer().await.map_err(kube::Error::InferConfig)?,
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Ok(Client::try_from(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_kubeconfig_path_is_a_precondition_error() {
        let err = client_for(Some(Path::new("/nonexistent/kubeconfig")))
            .await
            .err()
            .unwrap();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("/nonexistent/kubeconfig"));
    }
}
