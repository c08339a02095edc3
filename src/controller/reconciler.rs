//! Reconciliation logic for PostgresCluster resources
//!
//! Synthesizes the full object set for a cluster and applies it with
//! server-side apply. Drift correction relies on watching the owned kinds
//! rather than diffing in the controller.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::crd::{PostgresCluster, PostgresClusterStatus};
use crate::resources::{synthesize, FIELD_MANAGER};

/// Interval between periodic reconciliations of a healthy cluster
const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<PostgresCluster>, ctx: Arc<Context>) -> Result<Action> {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    // Owner references handle garbage collection; nothing to do on delete.
    if cluster.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    info!("Reconciling PostgresCluster");

    let manifests = synthesize(&ctx.client, &cluster, &ctx.config, &ctx.events).await?;

    if let Some(statefulset) = &manifests.statefulset {
        apply_resource(&ctx, &ns, statefulset).await?;
    }
    for service in &manifests.services {
        apply_resource(&ctx, &ns, service).await?;
    }
    for pdb in &manifests.pod_disruption_budgets {
        apply_resource(&ctx, &ns, pdb).await?;
    }
    if let Some(job) = &manifests.logical_backup_job {
        apply_resource(&ctx, &ns, job).await?;
    }

    update_status(&cluster, &ctx, &ns).await?;

    debug!("Reconciled {}", name);
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(cluster: Arc<PostgresCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = cluster.name_any();
    let backoff = BackoffConfig::default();
    let delay = backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {:?}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

async fn update_status(cluster: &PostgresCluster, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<PostgresCluster> = Api::namespaced(ctx.client.clone(), ns);
    let status = PostgresClusterStatus {
        observed_generation: cluster.metadata.generation,
        message: None,
    };
    let patch = serde_json::json!({
        "apiVersion": crate::resources::API_VERSION,
        "kind": crate::resources::KIND,
        "status": status,
    });
    api.patch_status(
        &cluster.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Apply a Kubernetes resource using server-side apply
async fn apply_resource<T>(ctx: &Context, ns: &str, resource: &T) -> Result<()>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + serde::Serialize
        + DeserializeOwned
        + Clone
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(ctx.client.clone(), ns);
    let name = resource.name_any();

    let patch = Patch::Apply(resource);
    let params = PatchParams::apply(FIELD_MANAGER).force();

    api.patch(&name, &params, &patch).await?;
    debug!("Applied resource: {}", name);

    Ok(())
}
