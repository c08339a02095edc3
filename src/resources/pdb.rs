//! PodDisruptionBudget generation
//!
//! Two budgets per cluster. The primary budget keeps the leader pod from
//! being evicted, and the critical-operation budget freezes the whole
//! cluster while a pod carries the critical-operation label.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

use crate::config::OperatorConfig;
use crate::crd::PostgresCluster;
use crate::resources::common::{cluster_labels, owner_references, trim_name};

/// Pod label set while a long-running critical operation is in flight.
const CRITICAL_OPERATION_LABEL: &str = "critical-operation";

/// Generate the budget protecting the leader pod.
///
/// With disruption budgets disabled, or with a cluster scaled to zero, the
/// budget is still created but relaxed to `minAvailable: 0` so that an
/// existing strict budget never lingers.
pub fn generate_primary_pod_disruption_budget(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
) -> PodDisruptionBudget {
    let min_available = if pdb_enabled(config) && cluster.spec.number_of_instances > 0 {
        1
    } else {
        0
    };

    let mut match_labels = BTreeMap::from([(
        config.cluster_name_label.clone(),
        cluster.name_any(),
    )]);
    if config.pdb_master_label_selector.unwrap_or(true) {
        match_labels.insert(config.pod_role_label.clone(), "master".to_string());
    }

    build_pdb(
        cluster,
        config,
        primary_pdb_name(cluster, config),
        min_available,
        match_labels,
    )
}

/// Generate the budget blocking all evictions during critical operations.
///
/// It selects only pods carrying the critical-operation label and demands
/// the full instance count, so it has no effect while the label is absent.
pub fn generate_critical_op_pod_disruption_budget(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
) -> PodDisruptionBudget {
    let min_available = if pdb_enabled(config) {
        cluster.spec.number_of_instances
    } else {
        0
    };

    let match_labels = BTreeMap::from([
        (config.cluster_name_label.clone(), cluster.name_any()),
        (CRITICAL_OPERATION_LABEL.to_string(), "true".to_string()),
    ]);

    build_pdb(
        cluster,
        config,
        critical_op_pdb_name(cluster, config),
        min_available,
        match_labels,
    )
}

fn pdb_enabled(config: &OperatorConfig) -> bool {
    config.enable_pod_disruption_budget.unwrap_or(true)
}

fn primary_pdb_name(cluster: &PostgresCluster, config: &OperatorConfig) -> String {
    trim_name(&config.pdb_name_format.replace("{cluster}", &cluster.name_any()))
}

fn critical_op_pdb_name(cluster: &PostgresCluster, config: &OperatorConfig) -> String {
    let base = format!("{}-critical-op", cluster.name_any());
    trim_name(&config.pdb_name_format.replace("{cluster}", &base))
}

fn build_pdb(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
    name: String,
    min_available: i32,
    match_labels: BTreeMap<String, String>,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster, config)),
            owner_references: owner_references(cluster, config),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(min_available)),
            selector: Some(LabelSelector {
                match_labels: Some(match_labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
