use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

/// Docker auth file structure consumed by the copy tool.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    pub auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DockerAuthEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

/// Supplies the docker auth configuration derived from a Pod's
/// imagePullSecrets. Failures are never fatal: a secret that cannot be read
/// degrades to an anonymous pull.
#[async_trait]
pub trait PullSecretsProvider: Send + Sync {
    /// Merged auth config JSON for the given secrets, or `None` when nothing
    /// resolves.
    async fn auth_config(&self, namespace: &str, secret_names: &[String]) -> Option<String>;
}

pub struct KubePullSecrets {
    client: Client,
}

impl KubePullSecrets {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PullSecretsProvider for KubePullSecrets {
    async fn auth_config(&self, namespace: &str, secret_names: &[String]) -> Option<String> {
        if secret_names.is_empty() {
            return None;
        }
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let mut merged = DockerConfig::default();
        for name in secret_names {
            let secret = match secrets.get(name).await {
                Ok(secret) => secret,
                Err(e) => {
                    warn!(namespace, secret = name, error = %e, "Unable to read imagePullSecret, skipping");
                    continue;
                }
            };
            let Some(payload) = secret.data.as_ref().and_then(|data| data.get(DOCKER_CONFIG_KEY))
            else {
                debug!(namespace, secret = name, "Secret carries no docker config, skipping");
                continue;
            };
            match serde_json::from_slice::<DockerConfig>(&payload.0) {
                Ok(config) => merged.auths.extend(config.auths),
                Err(e) => {
                    warn!(namespace, secret = name, error = %e, "Malformed docker config in secret, skipping");
                }
            }
        }
        if merged.auths.is_empty() {
            return None;
        }
        serde_json::to_string(&merged).ok()
    }
}
