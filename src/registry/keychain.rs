//! Kubernetes-backed registry keychain.
//!
//! Collects docker credentials from the Pod's `imagePullSecrets` followed by the
//! `imagePullSecrets` of its service account. When two secrets carry credentials
//! for the same registry, the earlier one wins.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::{Api, Client};
use tracing::{debug, warn};

use super::docker_config::{DOCKER_CFG_KEY, DOCKER_CONFIG_JSON_KEY, parse_docker_config};
use super::{CredentialError, CredentialProvider, RegistryAuthContext};

/// Reads pull secrets and service accounts through the Kubernetes API
#[derive(Clone)]
pub struct KubeKeychain {
    client: Client,
}

impl KubeKeychain {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn service_account_secrets(
        &self,
        namespace: &str,
        service_account: &str,
    ) -> Result<Vec<String>, CredentialError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(service_account).await? {
            Some(sa) => Ok(sa
                .image_pull_secrets
                .unwrap_or_default()
                .into_iter()
                .map(|r| r.name)
                .filter(|name| !name.is_empty())
                .collect()),
            None => {
                warn!(
                    namespace = %namespace,
                    service_account = %service_account,
                    "Service account not found, continuing without its pull secrets"
                );
                Ok(Vec::new())
            }
        }
    }
}

/// Merge one pull secret's docker config into `ctx`.
///
/// `.dockerconfigjson` is preferred over the legacy `.dockercfg` key.
pub fn add_secret_credentials(
    ctx: &mut RegistryAuthContext,
    secret_name: &str,
    secret: &Secret,
) -> Result<usize, CredentialError> {
    let Some(data) = secret.data.as_ref() else {
        return Ok(0);
    };

    let (bytes, legacy) = match (data.get(DOCKER_CONFIG_JSON_KEY), data.get(DOCKER_CFG_KEY)) {
        (Some(json), _) => (&json.0, false),
        (None, Some(cfg)) => (&cfg.0, true),
        (None, None) => {
            debug!(secret = %secret_name, "Secret holds no docker config");
            return Ok(0);
        }
    };

    let pairs = parse_docker_config(bytes, legacy).map_err(|detail| {
        CredentialError::InvalidDockerConfig {
            secret: secret_name.to_string(),
            detail,
        }
    })?;

    Ok(pairs
        .into_iter()
        .filter(|(registry, credential)| ctx.insert(registry, credential.clone()))
        .count())
}

#[async_trait]
impl CredentialProvider for KubeKeychain {
    async fn build(
        &self,
        namespace: &str,
        service_account: &str,
        pull_secrets: &[String],
    ) -> Result<RegistryAuthContext, CredentialError> {
        let mut names: Vec<String> = pull_secrets.to_vec();
        for name in self
            .service_account_secrets(namespace, service_account)
            .await?
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let mut ctx = RegistryAuthContext::anonymous();
        for name in &names {
            match secrets.get_opt(name).await? {
                Some(secret) => {
                    let added = add_secret_credentials(&mut ctx, name, &secret)?;
                    debug!(secret = %name, registries = added, "Loaded pull secret");
                }
                None => {
                    warn!(
                        namespace = %namespace,
                        secret = %name,
                        "Image pull secret not found, skipping"
                    );
                }
            }
        }

        debug!(
            namespace = %namespace,
            service_account = %service_account,
            registries = ctx.len(),
            "Built registry keychain"
        );
        Ok(ctx)
    }
}
