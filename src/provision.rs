//! Get-or-create provisioning for ReplicaSets and the traffic Service
//!
//! Provisioning is a one-time bootstrap: each resource is fetched by its
//! well-known name and created only if absent. An existing resource is
//! returned untouched, even if it has drifted; drift correction is the
//! reconciler's job, not the provisioner's.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use crate::crd::{BlueGreenDeployment, Color};
use crate::store::Store;
use crate::wait::{await_replica_set_available, WaitConfig};
use crate::{Result, COLOR_LABEL_KEY, SERVICE_NAME};

/// Build the ReplicaSet for a color from the deployment's desired state.
///
/// The inactive color is built at zero replicas; only the color recorded as
/// active gets the desired replica count. The pod template is the desired
/// pod spec verbatim, labeled with the color so the Service selector can
/// target it. An owner reference ties the ReplicaSet's lifetime to the
/// deployment.
pub fn new_replica_set(bgd: &BlueGreenDeployment, color: Color) -> ReplicaSet {
    let replicas = if bgd.active_color() == color {
        bgd.spec.replicas
    } else {
        0
    };

    let color_labels = BTreeMap::from([(COLOR_LABEL_KEY.to_string(), color.as_str().to_string())]);

    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(color.replica_set_name().to_string()),
            namespace: bgd.namespace(),
            owner_references: bgd.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(color_labels.clone()),
                ..Default::default()
            },
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(color_labels),
                    ..Default::default()
                }),
                spec: Some(bgd.spec.pod_spec.clone()),
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the traffic Service, initially pointing at the blue ReplicaSet.
///
/// The color selector is the only field the reconciler ever rewrites after
/// creation; everything else is fixed at bootstrap.
pub fn new_service(bgd: &BlueGreenDeployment) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(SERVICE_NAME.to_string()),
            namespace: bgd.namespace(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                COLOR_LABEL_KEY.to_string(),
                Color::Blue.as_str().to_string(),
            )])),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port: 80,
                target_port: Some(IntOrString::Int(443)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Ensure the ReplicaSet for a color exists, creating it if absent.
///
/// On creation this waits best-effort for all replicas to become available.
/// When replicas never come up within the timeout (for example an invalid
/// image name) the failure is logged and provisioning continues: the broken
/// color will be scaled down or replaced later in the sync, and blocking
/// here would wedge the cutover permanently since there is no rollback.
pub async fn ensure_replica_set(
    store: &dyn Store,
    wait: &WaitConfig,
    bgd: &BlueGreenDeployment,
    color: Color,
) -> Result<ReplicaSet> {
    let namespace = bgd.namespace().unwrap_or_default();
    let name = color.replica_set_name();

    if let Some(existing) = store.get_replica_set(&namespace, name).await? {
        return Ok(existing);
    }

    info!(replica_set = %name, %color, "creating replica set");
    let created = store.create_replica_set(&new_replica_set(bgd, color)).await?;

    let desired_replicas = created
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let generation = created.metadata.generation.unwrap_or(0);
    if let Err(e) = await_replica_set_available(
        store,
        wait,
        &namespace,
        name,
        generation,
        desired_replicas,
    )
    .await
    {
        warn!(
            replica_set = %name,
            error = %e,
            "some pods failed to become available after creation"
        );
    }

    Ok(created)
}

/// Ensure the traffic Service exists, creating it if absent.
pub async fn ensure_service(store: &dyn Store, bgd: &BlueGreenDeployment) -> Result<Service> {
    let namespace = bgd.namespace().unwrap_or_default();

    if let Some(existing) = store.get_service(&namespace, SERVICE_NAME).await? {
        return Ok(existing);
    }

    info!(service = SERVICE_NAME, "creating traffic service");
    store.create_service(&new_service(bgd)).await
}
