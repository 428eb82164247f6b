//! YAML manifests for seeding the in-memory stores

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::error::StoreResult;
use super::memory::{MemoryResourceStore, MemorySecretStore};
use crate::resource::{ControlSpec, ObjectKey};

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
}

impl ManifestMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

/// A resource as written by a user: identity plus desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub metadata: ManifestMeta,
    pub spec: ControlSpec,
}

/// A secret with plain-text field values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretManifest {
    pub metadata: ManifestMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

pub fn parse_resources(content: &str) -> StoreResult<Vec<ResourceManifest>> {
    Ok(serde_yaml::from_str(content)?)
}

pub fn parse_secrets(content: &str) -> StoreResult<Vec<SecretManifest>> {
    Ok(serde_yaml::from_str(content)?)
}

pub async fn load_resources(path: &Path) -> StoreResult<Vec<ResourceManifest>> {
    let content = tokio::fs::read_to_string(path).await?;
    let resources = parse_resources(&content)?;
    debug!(path = %path.display(), count = resources.len(), "Loaded resource manifests");
    Ok(resources)
}

pub async fn load_secrets(path: &Path) -> StoreResult<Vec<SecretManifest>> {
    let content = tokio::fs::read_to_string(path).await?;
    let secrets = parse_secrets(&content)?;
    debug!(path = %path.display(), count = secrets.len(), "Loaded secret manifests");
    Ok(secrets)
}

/// Apply every manifest, returning the keys in manifest order
pub async fn apply_resources(store: &MemoryResourceStore, manifests: Vec<ResourceManifest>) -> Vec<ObjectKey> {
    let mut keys = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let key = manifest.metadata.key();
        store.apply(key.clone(), manifest.spec).await;
        keys.push(key);
    }
    keys
}

pub async fn seed_secrets(store: &MemorySecretStore, manifests: Vec<SecretManifest>) {
    for manifest in manifests {
        for (field, value) in manifest.data {
            store
                .insert(&manifest.metadata.namespace, &manifest.metadata.name, field, value)
                .await;
        }
    }
}
