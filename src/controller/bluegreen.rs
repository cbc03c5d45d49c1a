//! BlueGreenDeployment reconciliation
//!
//! This module implements the convergence engine. Each invocation re-derives
//! the world from the store: it fetches the desired deployment, ensures both
//! ReplicaSets and the traffic Service exist, fingerprints the desired pod
//! spec against both live templates, and picks exactly one of three actions:
//!
//! - the active ReplicaSet already matches the desired spec: converged, no-op;
//! - the inactive one matches: **switch** traffic over to it;
//! - neither matches: **replace** the inactive one, then switch.
//!
//! The active-color record is always committed before traffic moves and the
//! previously active color is always scaled down last, so a crash at any
//! point leaves a state that re-enters the correct branch on the next
//! invocation with at least one color still serving.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{PodSecurityContext, PodSpec, Service};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::{BlueGreenDeployment, Color};
use crate::fingerprint::fingerprint;
use crate::provision::{ensure_replica_set, ensure_service};
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::store::{KubeStore, Store};
use crate::wait::{await_replica_set_absent, await_replica_set_available, WaitConfig};
use crate::{Error, Result, COLOR_LABEL_KEY, SERVICE_NAME};

/// Shared controller context
pub struct Context {
    /// Resource store the engine reads from and writes to
    pub store: Arc<dyn Store>,
    /// Conflict-retry budget for optimistic updates
    pub retry: RetryConfig,
    /// Poll cadence and deadline for convergence waits
    pub wait: WaitConfig,
}

impl Context {
    /// Create a builder for a production context backed by the given client
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder {
            store: Arc::new(KubeStore::new(client)),
            retry: RetryConfig::default(),
            wait: WaitConfig::default(),
        }
    }

    /// Create a context over an arbitrary store (primarily for testing)
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    store: Arc<dyn Store>,
    retry: RetryConfig,
    wait: WaitConfig,
}

impl ContextBuilder {
    /// Override the store (primarily for testing)
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    /// Override the conflict-retry configuration
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the convergence-wait configuration
    pub fn wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            store: self.store,
            retry: self.retry,
            wait: self.wait,
        }
    }
}

/// Reconcile a BlueGreenDeployment resource
///
/// Re-fetches the deployment from the store rather than trusting the watch
/// cache, normalizes its pod spec, records the initial active color on first
/// sync, and then runs the convergence decision. A deployment that vanished
/// mid-cycle is nothing to do, not an error.
#[instrument(skip(bgd, ctx), fields(deployment = %bgd.name_any()))]
pub async fn reconcile(bgd: Arc<BlueGreenDeployment>, ctx: Arc<Context>) -> Result<Action> {
    let name = bgd.name_any();
    let Some(namespace) = bgd.namespace() else {
        warn!("deployment has no namespace, skipping");
        return Ok(Action::await_change());
    };

    if ctx.store.get_deployment(&namespace, &name).await?.is_none() {
        debug!("deployment is gone, nothing to do");
        return Ok(Action::await_change());
    }

    info!("reconciling blue-green deployment");

    let bgd = fill_pod_spec_defaults(&ctx, &namespace, &name).await?;

    // Record the bootstrap color before anything observes it
    let bgd = if bgd.active_color_unset() {
        info!(color = %Color::Blue, "first sync, recording initial active color");
        set_active_color(&ctx, &namespace, &name, Color::Blue).await?
    } else {
        bgd
    };

    sync(&ctx, &bgd).await
}

/// Error policy for the controller
///
/// Every failed reconciliation is retried after a short delay; the engine
/// is resumable from re-derived state, so a later retry picks up wherever
/// the last successful step left off.
pub fn error_policy(bgd: Arc<BlueGreenDeployment>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        deployment = %bgd.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

/// The convergence decision and its execution
///
/// Provisions missing resources, then evaluates the transition table in
/// order (first match wins): converged, switch, or replace.
async fn sync(ctx: &Context, bgd: &BlueGreenDeployment) -> Result<Action> {
    let store = ctx.store.as_ref();

    let blue = ensure_replica_set(store, &ctx.wait, bgd, Color::Blue).await?;
    let green = ensure_replica_set(store, &ctx.wait, bgd, Color::Green).await?;
    ensure_service(store, bgd).await?;

    let active_color = bgd.active_color();
    let (active, inactive) = match active_color {
        Color::Blue => (blue, green),
        Color::Green => (green, blue),
    };

    let desired_fp = fingerprint(&bgd.spec.pod_spec)?;
    let active_fp = template_fingerprint(&active)?;
    let inactive_fp = template_fingerprint(&inactive)?;

    if active_fp == desired_fp {
        debug!(active = %active_color, "active replica set matches desired spec, converged");
        return Ok(Action::requeue(Duration::from_secs(60)));
    }

    let target = active_color.other();
    if inactive_fp == desired_fp {
        info!(
            from = %active_color,
            to = %target,
            "inactive replica set matches desired spec, switching traffic"
        );
        switch_to_inactive(ctx, bgd, &active, &inactive, target).await?;
    } else {
        info!(
            from = %active_color,
            to = %target,
            "no replica set matches desired spec, replacing inactive one"
        );
        replace_inactive(ctx, bgd, &active, &inactive, target).await?;
    }

    Ok(Action::requeue(Duration::from_secs(5)))
}

/// Switch: the idle color already runs the desired spec, so scale it up,
/// record it as active, move traffic, and retire the old color.
///
/// Scaling down the previous active is the last step: until then at least
/// one color keeps serving at full capacity.
async fn switch_to_inactive(
    ctx: &Context,
    bgd: &BlueGreenDeployment,
    active: &ReplicaSet,
    inactive: &ReplicaSet,
    target: Color,
) -> Result<()> {
    let namespace = bgd.namespace().unwrap_or_default();
    let name = bgd.name_any();

    scale_replica_set(ctx, bgd.spec.replicas, inactive).await?;
    set_active_color(ctx, &namespace, &name, target).await?;
    move_service_selector(ctx, &namespace, target).await?;
    scale_replica_set(ctx, 0, active).await?;
    Ok(())
}

/// Replace: neither color runs the desired spec, so rebuild the idle one.
///
/// The active-color record is committed *before* any workload mutation: if
/// the process crashes mid-replace, the next invocation derives its branch
/// against the recreated (or recreatable) set instead of re-entering
/// replace against a half-deleted one.
async fn replace_inactive(
    ctx: &Context,
    bgd: &BlueGreenDeployment,
    active: &ReplicaSet,
    inactive: &ReplicaSet,
    target: Color,
) -> Result<()> {
    let store = ctx.store.as_ref();
    let namespace = bgd.namespace().unwrap_or_default();
    let name = bgd.name_any();
    let inactive_name = inactive.name_any();

    let bgd = set_active_color(ctx, &namespace, &name, target).await?;

    store.delete_replica_set(&namespace, &inactive_name).await?;
    await_replica_set_absent(store, &ctx.wait, &namespace, &inactive_name).await?;

    // Recreated under the same identity; target is now the recorded active
    // color, so it comes up at the full desired replica count.
    ensure_replica_set(store, &ctx.wait, &bgd, target).await?;

    move_service_selector(ctx, &namespace, target).await?;
    scale_replica_set(ctx, 0, active).await?;
    Ok(())
}

/// Fingerprint of a ReplicaSet's live pod template
fn template_fingerprint(rs: &ReplicaSet) -> Result<u64> {
    match rs
        .spec
        .as_ref()
        .and_then(|s| s.template.as_ref())
        .and_then(|t| t.spec.as_ref())
    {
        Some(spec) => fingerprint(spec),
        None => fingerprint(&PodSpec::default()),
    }
}

/// Scale a ReplicaSet to the given replica count and wait best-effort for
/// the new count to become available.
async fn scale_replica_set(ctx: &Context, replicas: i32, rs: &ReplicaSet) -> Result<()> {
    let namespace = rs.namespace().unwrap_or_default();
    let name = rs.name_any();

    info!(replica_set = %name, replicas, "scaling replica set");
    let updated = update_replica_set(ctx, &namespace, &name, |rs| {
        rs.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
    })
    .await?;

    let generation = updated.metadata.generation.unwrap_or(0);
    if let Err(e) = await_replica_set_available(
        ctx.store.as_ref(),
        &ctx.wait,
        &namespace,
        &name,
        generation,
        replicas,
    )
    .await
    {
        warn!(
            replica_set = %name,
            error = %e,
            "some pods failed to become available after scaling"
        );
    }
    Ok(())
}

/// Persist the active-color record on the deployment's status
async fn set_active_color(
    ctx: &Context,
    namespace: &str,
    name: &str,
    color: Color,
) -> Result<BlueGreenDeployment> {
    update_deployment_status(ctx, namespace, name, |bgd| {
        bgd.status
            .get_or_insert_with(Default::default)
            .active_replica_set_color = Some(color);
    })
    .await
}

/// Point the traffic Service at the given color
async fn move_service_selector(ctx: &Context, namespace: &str, color: Color) -> Result<Service> {
    info!(service = SERVICE_NAME, %color, "moving traffic selector");
    update_service(ctx, namespace, SERVICE_NAME, |svc| {
        svc.spec
            .get_or_insert_with(Default::default)
            .selector
            .get_or_insert_with(Default::default)
            .insert(COLOR_LABEL_KEY.to_string(), color.as_str().to_string());
    })
    .await
}

/// Fill unset optional pod spec fields with fixed defaults.
///
/// One-time normalization so that fingerprint comparison against live
/// templates (which the API server defaults the same way) is stable. Values
/// the user supplied are never overwritten. There is no validation: an
/// invalid value flows through and produces an unready ReplicaSet, which
/// the cutover tolerates.
async fn fill_pod_spec_defaults(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<BlueGreenDeployment> {
    update_deployment(ctx, namespace, name, |bgd| {
        let pod = &mut bgd.spec.pod_spec;
        if let Some(container) = pod.containers.first_mut() {
            if container.termination_message_path.is_none() {
                container.termination_message_path = Some("/dev/termination-log".to_string());
            }
            if container.termination_message_policy.is_none() {
                container.termination_message_policy = Some("File".to_string());
            }
            if container.image_pull_policy.is_none() {
                container.image_pull_policy = Some("IfNotPresent".to_string());
            }
        }
        if pod.restart_policy.is_none() {
            pod.restart_policy = Some("Always".to_string());
        }
        if pod.termination_grace_period_seconds.is_none() {
            pod.termination_grace_period_seconds = Some(0);
        }
        if pod.dns_policy.is_none() {
            pod.dns_policy = Some("ClusterFirst".to_string());
        }
        if pod.security_context.is_none() {
            pod.security_context = Some(PodSecurityContext::default());
        }
        if pod.scheduler_name.is_none() {
            pod.scheduler_name = Some("default-scheduler".to_string());
        }
    })
    .await
}

// =============================================================================
// Optimistic Updaters
// =============================================================================
// Each updater runs the full fetch-mutate-write cycle under conflict retry,
// so the mutation always applies to the freshest copy. A mutation that
// changes nothing skips the write entirely, keeping converged
// reconciliations free of spurious updates.

async fn update_deployment<F>(
    ctx: &Context,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<BlueGreenDeployment>
where
    F: Fn(&mut BlueGreenDeployment),
{
    let store = ctx.store.as_ref();
    retry_on_conflict(&ctx.retry, name, || {
        let mutate = &mutate;
        async move {
            let current = store
                .get_deployment(namespace, name)
                .await?
                .ok_or_else(|| Error::not_found(name))?;
            let mut desired = current.clone();
            mutate(&mut desired);
            if desired == current {
                return Ok(current);
            }
            store.update_deployment(&desired).await
        }
    })
    .await
}

async fn update_deployment_status<F>(
    ctx: &Context,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<BlueGreenDeployment>
where
    F: Fn(&mut BlueGreenDeployment),
{
    let store = ctx.store.as_ref();
    retry_on_conflict(&ctx.retry, name, || {
        let mutate = &mutate;
        async move {
            let current = store
                .get_deployment(namespace, name)
                .await?
                .ok_or_else(|| Error::not_found(name))?;
            let mut desired = current.clone();
            mutate(&mut desired);
            if desired == current {
                return Ok(current);
            }
            store.update_deployment_status(&desired).await
        }
    })
    .await
}

async fn update_replica_set<F>(
    ctx: &Context,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<ReplicaSet>
where
    F: Fn(&mut ReplicaSet),
{
    let store = ctx.store.as_ref();
    retry_on_conflict(&ctx.retry, name, || {
        let mutate = &mutate;
        async move {
            let current = store
                .get_replica_set(namespace, name)
                .await?
                .ok_or_else(|| Error::not_found(name))?;
            let mut desired = current.clone();
            mutate(&mut desired);
            if desired == current {
                return Ok(current);
            }
            store.update_replica_set(&desired).await
        }
    })
    .await
}

async fn update_service<F>(
    ctx: &Context,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Service>
where
    F: Fn(&mut Service),
{
    let store = ctx.store.as_ref();
    retry_on_conflict(&ctx.retry, name, || {
        let mutate = &mutate;
        async move {
            let current = store
                .get_service(namespace, name)
                .await?
                .ok_or_else(|| Error::not_found(name))?;
            let mut desired = current.clone();
            mutate(&mut desired);
            if desired == current {
                return Ok(current);
            }
            store.update_service(&desired).await
        }
    })
    .await
}
