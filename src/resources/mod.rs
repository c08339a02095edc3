//! Manifest synthesis
//!
//! Pure generators mapping a cluster manifest and the operator configuration
//! to the Kubernetes objects the operator owns. Only environment composition
//! touches the API server (to read referenced ConfigMaps and Secrets); the
//! rest is deterministic.

pub mod backup;
pub mod common;
pub mod env;
pub mod pdb;
pub mod quantity;
pub mod requirements;
pub mod service;
pub mod sidecars;
pub mod statefulset;
pub mod volumes;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use thiserror::Error;
use tracing::warn;

use crate::config::OperatorConfig;
use crate::crd::PostgresCluster;
use crate::events::EventSink;

pub use common::{API_VERSION, FIELD_MANAGER, KIND};
pub use env::EnvSourceClient;

/// Errors produced while generating manifests.
#[derive(Error, Debug)]
pub enum GenerateError {
    /// Operator configuration or cluster manifest is internally inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A resource quantity string could not be parsed
    #[error("could not parse resource quantity {0:?}")]
    UnparsableQuantity(String),

    /// A referenced external object could not be read
    #[error("{0}")]
    ExternalSource(String),
}

/// The complete set of objects synthesized for one cluster.
#[derive(Debug)]
pub struct ManifestSet {
    pub statefulset: Option<StatefulSet>,
    pub services: Vec<Service>,
    pub pod_disruption_budgets: Vec<PodDisruptionBudget>,
    pub logical_backup_job: Option<CronJob>,
}

/// Synthesize every object for a cluster.
///
/// A failure to read a referenced external source aborts the whole set.
/// Configuration errors stay local to the object they break: a failing
/// workload spec drops only the StatefulSet and a failing backup job drops
/// only the CronJob, so the cluster's other objects keep converging.
pub async fn synthesize<S: EnvSourceClient>(
    source: &S,
    cluster: &PostgresCluster,
    config: &OperatorConfig,
    events: &dyn EventSink,
) -> Result<ManifestSet, GenerateError> {
    let env = env::generate_pod_env_vars(source, cluster, config).await?;
    let statefulset = match statefulset::generate_statefulset(cluster, config, env, events) {
        Ok(sts) => Some(sts),
        Err(err) => {
            warn!(
                cluster = %cluster.name_any(),
                error = %err,
                "skipping workload spec"
            );
            events.warning("StatefulSet", &err.to_string());
            None
        }
    };

    let services = vec![
        service::generate_service(service::PostgresRole::Primary, cluster, config),
        service::generate_service(service::PostgresRole::Replica, cluster, config),
    ];

    let pod_disruption_budgets = vec![
        pdb::generate_primary_pod_disruption_budget(cluster, config),
        pdb::generate_critical_op_pod_disruption_budget(cluster, config),
    ];

    let logical_backup_job = if cluster.spec.enable_logical_backup {
        match backup::generate_logical_backup_job(cluster, config, events) {
            Ok(job) => Some(job),
            Err(err) => {
                warn!(
                    cluster = %cluster.name_any(),
                    error = %err,
                    "skipping logical backup job"
                );
                events.warning("LogicalBackup", &err.to_string());
                None
            }
        }
    } else {
        None
    };

    Ok(ManifestSet {
        statefulset,
        services,
        pod_disruption_budgets,
        logical_backup_job,
    })
}
