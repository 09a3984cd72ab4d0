//! Kubernetes ConfigMap lock store.
//!
//! The record lives as JSON in the `control-plane.alpha.kubernetes.io/leader`
//! annotation of a ConfigMap, and the object's `resourceVersion` is the
//! optimistic-concurrency token. Updates are JSON merge patches carrying
//! `metadata.resourceVersion`, which the API server treats as a precondition,
//! so the rest of the ConfigMap is left alone.

use crate::{
    error::StoreError,
    record::LockRecord,
    store::{LockKey, LockStore, Observed, StoreResult, Version},
    Error, Result,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

pub const LEADER_ANNOTATION: &str = "control-plane.alpha.kubernetes.io/leader";

/// Data key holding the identity of the candidate that last started leading.
pub const LEADER_MARKER_KEY: &str = "lock";

#[derive(Clone)]
pub struct ConfigMapStore {
    client: Client,
}

impl ConfigMapStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the in-cluster service account, falling back to
    /// the kubeconfig file at `kubeconfig`.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = match kube::Config::incluster() {
            Ok(config) => config,
            Err(in_cluster) => {
                debug!(error = %in_cluster, "no in-cluster config, using kubeconfig");
                let path = kubeconfig.ok_or_else(|| {
                    Error::ConfigInvalid("not running in a cluster and no kubeconfig given".to_string())
                })?;
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::ConfigInvalid(format!("failed to read kubeconfig {}: {e}", path.display()))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::ConfigInvalid(format!("invalid kubeconfig: {e}")))?
            }
        };

        let client = Client::try_from(config)
            .map_err(|e| Error::ConfigInvalid(format!("failed to build client: {e}")))?;
        Ok(Self::new(client))
    }

    /// Stamps `identity` into the ConfigMap's `data.lock`, so the current
    /// leader is visible with plain `kubectl get configmap`.
    ///
    /// A merge patch only touches that key; the leader annotation is left alone.
    pub async fn mark_leader(&self, key: &LockKey, identity: &str) -> StoreResult<()> {
        self.api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&leader_marker_patch(identity)))
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl fmt::Debug for ConfigMapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigMapStore").finish_non_exhaustive()
    }
}

fn map_error(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict,
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound,
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn resource_version(configmap: &ConfigMap) -> StoreResult<Version> {
    configmap
        .metadata
        .resource_version
        .clone()
        .map(Version)
        .ok_or_else(|| StoreError::Unavailable("configmap has no resourceVersion".to_string()))
}

fn leader_marker_patch(identity: &str) -> serde_json::Value {
    serde_json::json!({ "data": { LEADER_MARKER_KEY: identity } })
}

fn annotation_patch(version: &Version, payload: &str) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": version.0,
            "annotations": { LEADER_ANNOTATION: payload }
        }
    })
}

#[async_trait]
impl LockStore for ConfigMapStore {
    async fn get(&self, key: &LockKey) -> StoreResult<Option<Observed>> {
        let configmap = match self.api(&key.namespace).get(&key.name).await {
            Ok(configmap) => configmap,
            Err(kube::Error::Api(response)) if response.code == 404 => return Ok(None),
            Err(e) => return Err(map_error(e)),
        };

        let version = resource_version(&configmap)?;
        let payload = configmap
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(LEADER_ANNOTATION));

        Ok(Some(match payload {
            Some(payload) => Observed::decode(key, version, payload),
            // The ConfigMap exists but was never used as a lock.
            None => Observed {
                version,
                record: None,
            },
        }))
    }

    async fn create_or_update(
        &self,
        key: &LockKey,
        record: &LockRecord,
        expected: Option<&Version>,
    ) -> StoreResult<Version> {
        let payload = record
            .to_json()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let api = self.api(&key.namespace);

        let written = match expected {
            None => {
                let configmap = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(key.name.clone()),
                        namespace: Some(key.namespace.clone()),
                        annotations: Some(BTreeMap::from([(LEADER_ANNOTATION.to_string(), payload)])),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                api.create(&PostParams::default(), &configmap).await
            }
            Some(version) => {
                let patch = annotation_patch(version, &payload);
                api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
            }
        }
        .map_err(map_error)?;

        resource_version(&written)
    }
}
