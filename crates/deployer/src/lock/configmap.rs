//! Lock document stored in a single `ConfigMap`.
//!
//! Each data key is `<project>-<phase>`; writes carry the `resourceVersion`
//! that was read, so the API server rejects lost updates with 409.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, info};

use super::store::{LockSnapshot, LockStore};
use crate::error::StoreError;

pub struct ConfigMapLockStore {
    configmaps: Api<ConfigMap>,
    name: String,
    namespace: String,
}

impl ConfigMapLockStore {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            configmaps: Api::namespaced(client, namespace),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn document(&self, snapshot: LockSnapshot) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: snapshot.version,
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    "deployer".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(snapshot.entries),
            ..Default::default()
        }
    }
}

fn backend(e: kube::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl LockStore for ConfigMapLockStore {
    async fn load(&self) -> Result<LockSnapshot, StoreError> {
        match self.configmaps.get(&self.name).await {
            Ok(cm) => Ok(LockSnapshot {
                version: cm.metadata.resource_version,
                entries: cm.data.unwrap_or_default(),
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(configmap = %self.name, "Lock ConfigMap not found, starting empty");
                Ok(LockSnapshot::default())
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn save(&self, snapshot: LockSnapshot) -> Result<(), StoreError> {
        let create = snapshot.version.is_none();
        let document = self.document(snapshot);

        let result = if create {
            self.configmaps
                .create(&PostParams::default(), &document)
                .await
                .map(|_| info!(configmap = %self.name, "Created lock ConfigMap"))
        } else {
            self.configmaps
                .replace(&self.name, &PostParams::default(), &document)
                .await
                .map(|_| ())
        };

        match result {
            Ok(()) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::Conflict),
            Err(e) => Err(backend(e)),
        }
    }
}
