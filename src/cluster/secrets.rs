//! Secret store on the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use crate::verification::{LookupError, SecretStore};

/// Reads Secret values through `Api<Secret>`
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Extract `key` from a fetched secret.
///
/// Missing keys and empty values are `None`; values that are not UTF-8 are
/// reported as invalid so that a corrupt key is not mistaken for "unset".
pub fn secret_value(secret: &Secret, name: &str, key: &str) -> Result<Option<String>, LookupError> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|value| value.clone().into_bytes())
        });

    let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
        return Ok(None);
    };

    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| LookupError::InvalidValue {
            secret: name.to_string(),
            key: key.to_string(),
        })
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(
        &self,
        namespace: &str,
        secret: &str,
        key: &str,
    ) -> Result<Option<String>, LookupError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(secret).await? {
            Some(found) => secret_value(&found, secret, key),
            None => Ok(None),
        }
    }
}
