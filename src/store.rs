//! Resource store boundary
//!
//! Everything the convergence engine knows about the outside world goes
//! through the [`Store`] trait: get/create/update/delete for the three
//! resource kinds it touches. The trait keeps the engine testable against
//! an in-memory fake or a mock, while [`KubeStore`] talks to a real API
//! server in production.
//!
//! Gets return `Ok(None)` for missing resources so callers can distinguish
//! "absent" (a normal state for this controller) from actual store errors.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::BlueGreenDeployment;
use crate::{Error, Result};

/// Store operations used by the convergence engine
///
/// Updates are full replacements carrying the object's resourceVersion, so
/// a concurrent write surfaces as a 409 conflict that
/// [`crate::retry::retry_on_conflict`] can retry. The engine only ever
/// writes spec-level fields; status fields of ReplicaSets are owned by the
/// cluster's own controllers and are read-only here.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a BlueGreenDeployment, or None if it does not exist
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BlueGreenDeployment>>;

    /// Replace a BlueGreenDeployment's spec/metadata
    async fn update_deployment(&self, bgd: &BlueGreenDeployment) -> Result<BlueGreenDeployment>;

    /// Replace a BlueGreenDeployment's status subresource
    async fn update_deployment_status(
        &self,
        bgd: &BlueGreenDeployment,
    ) -> Result<BlueGreenDeployment>;

    /// Fetch a ReplicaSet, or None if it does not exist
    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<Option<ReplicaSet>>;

    /// Create a ReplicaSet
    async fn create_replica_set(&self, rs: &ReplicaSet) -> Result<ReplicaSet>;

    /// Replace a ReplicaSet
    async fn update_replica_set(&self, rs: &ReplicaSet) -> Result<ReplicaSet>;

    /// Delete a ReplicaSet; deleting an absent one is not an error
    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()>;

    /// Fetch a Service, or None if it does not exist
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Create a Service
    async fn create_service(&self, svc: &Service) -> Result<Service>;

    /// Replace a Service
    async fn update_service(&self, svc: &Service) -> Result<Service>;
}

/// Real store implementation over the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<BlueGreenDeployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn replica_sets(&self, namespace: &str) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a get result into Option, folding 404 into None
fn absent_as_none<T>(result: kube::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn namespace_of<K: kube::ResourceExt>(obj: &K) -> Result<String> {
    obj.namespace()
        .ok_or_else(|| Error::serialization(format!("{} has no namespace", obj.name_any())))
}

#[async_trait]
impl Store for KubeStore {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BlueGreenDeployment>> {
        absent_as_none(self.deployments(namespace).get(name).await)
    }

    async fn update_deployment(&self, bgd: &BlueGreenDeployment) -> Result<BlueGreenDeployment> {
        let namespace = namespace_of(bgd)?;
        let name = kube::ResourceExt::name_any(bgd);
        Ok(self
            .deployments(&namespace)
            .replace(&name, &PostParams::default(), bgd)
            .await?)
    }

    async fn update_deployment_status(
        &self,
        bgd: &BlueGreenDeployment,
    ) -> Result<BlueGreenDeployment> {
        let namespace = namespace_of(bgd)?;
        let name = kube::ResourceExt::name_any(bgd);
        let data = serde_json::to_vec(bgd)
            .map_err(|e| Error::serialization(format!("failed to encode status: {e}")))?;
        Ok(self
            .deployments(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await?)
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<Option<ReplicaSet>> {
        absent_as_none(self.replica_sets(namespace).get(name).await)
    }

    async fn create_replica_set(&self, rs: &ReplicaSet) -> Result<ReplicaSet> {
        let namespace = namespace_of(rs)?;
        Ok(self
            .replica_sets(&namespace)
            .create(&PostParams::default(), rs)
            .await?)
    }

    async fn update_replica_set(&self, rs: &ReplicaSet) -> Result<ReplicaSet> {
        let namespace = namespace_of(rs)?;
        let name = kube::ResourceExt::name_any(rs);
        Ok(self
            .replica_sets(&namespace)
            .replace(&name, &PostParams::default(), rs)
            .await?)
    }

    async fn delete_replica_set(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .replica_sets(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        absent_as_none(self.services(namespace).get(name).await)
    }

    async fn create_service(&self, svc: &Service) -> Result<Service> {
        let namespace = namespace_of(svc)?;
        Ok(self
            .services(&namespace)
            .create(&PostParams::default(), svc)
            .await?)
    }

    async fn update_service(&self, svc: &Service) -> Result<Service> {
        let namespace = namespace_of(svc)?;
        let name = kube::ResourceExt::name_any(svc);
        Ok(self
            .services(&namespace)
            .replace(&name, &PostParams::default(), svc)
            .await?)
    }
}
