//! Common utilities for Kubernetes resource generation
//!
//! Shared naming, labeling, and ownership helpers used by every generator so
//! the emitted objects agree on identity.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::crd::PostgresCluster;

/// API version for the PostgresCluster CRD
pub const API_VERSION: &str = "kubepg.io/v1alpha1";

/// Kind for the PostgresCluster CRD
pub const KIND: &str = "PostgresCluster";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "kubepg-operator";

/// Name of the main database container in every generated pod
pub const POSTGRES_CONTAINER_NAME: &str = "postgres";

/// Kubernetes object names are DNS labels, capped at 63 characters
pub const MAX_NAME_LENGTH: usize = 63;

/// Generate owner references for a PostgresCluster, gated by configuration.
///
/// When disabled, generated objects carry no back-pointer and survive
/// deletion of the cluster manifest.
pub fn owner_references(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
) -> Option<Vec<OwnerReference>> {
    if !config.enable_owner_references {
        return None;
    }
    Some(vec![OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }])
}

/// Labels attached to every object generated for a cluster.
///
/// The configured cluster-name label always carries the cluster name and
/// cannot be overridden by the static label set.
pub fn cluster_labels(cluster: &PostgresCluster, config: &OperatorConfig) -> BTreeMap<String, String> {
    let mut labels = config.cluster_labels.clone();
    labels.insert(config.cluster_name_label.clone(), cluster.name_any());
    labels
}

/// Selector matching pods of the cluster that carry a given role label value.
pub fn role_selector(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
    role_value: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (config.cluster_name_label.clone(), cluster.name_any()),
        (config.pod_role_label.clone(), role_value.to_string()),
    ])
}

/// Name of the secret carrying the cluster's database credentials.
pub fn credentials_secret_name(cluster: &PostgresCluster) -> String {
    format!("{}-credentials", cluster.name_any())
}

/// Project configured label keys from the cluster manifest onto a generated
/// object. Keys absent from the manifest are skipped.
pub fn inherited_labels(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
) -> BTreeMap<String, String> {
    project_keys(cluster.labels(), &config.inherited_labels)
}

/// Project configured annotation keys from the cluster manifest onto a
/// generated object.
pub fn inherited_annotations(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
) -> BTreeMap<String, String> {
    project_keys(cluster.annotations(), &config.inherited_annotations)
}

fn project_keys(source: &BTreeMap<String, String>, keys: &[String]) -> BTreeMap<String, String> {
    keys.iter()
        .filter_map(|key| source.get(key).map(|value| (key.clone(), value.clone())))
        .collect()
}

/// Cut a generated name down to the platform limit, keeping it a valid DNS
/// label (no trailing dash after the cut).
pub fn trim_name(name: &str) -> String {
    let mut trimmed: String = name.chars().take(MAX_NAME_LENGTH).collect();
    while trimmed.ends_with('-') {
        trimmed.pop();
    }
    trimmed
}

/// Test fixtures shared by the generator test modules.
#[cfg(test)]
pub(crate) mod fixtures {
    use kube::core::ObjectMeta;

    use crate::crd::{PostgresCluster, PostgresClusterSpec, VolumeSpec};

    pub(crate) fn test_cluster(name: &str) -> PostgresCluster {
        PostgresCluster {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1234".to_string()),
                ..Default::default()
            },
            spec: PostgresClusterSpec {
                number_of_instances: 2,
                volume: VolumeSpec {
                    size: "10Gi".to_string(),
                    storage_class: None,
                    selector: None,
                    sub_path: None,
                    is_sub_path_expr: None,
                },
                docker_image: None,
                resources: None,
                env: Vec::new(),
                sidecars: Vec::new(),
                additional_volumes: Vec::new(),
                tls: None,
                clone: None,
                standby: None,
                node_affinity: None,
                enable_shm_volume: None,
                enable_master_load_balancer: None,
                enable_replica_load_balancer: None,
                allowed_source_ranges: Vec::new(),
                enable_logical_backup: false,
                logical_backup_schedule: None,
                logical_backup_retention: None,
            },
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::test_cluster;
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_cluster_labels_carry_name() {
        let cluster = test_cluster("acid-test");
        let config = OperatorConfig::default();
        let labels = cluster_labels(&cluster, &config);
        assert_eq!(labels.get("cluster-name"), Some(&"acid-test".to_string()));
        assert_eq!(labels.get("application"), Some(&"spilo".to_string()));
    }

    #[test]
    fn test_owner_references_gated() {
        let cluster = test_cluster("acid-test");
        let mut config = OperatorConfig::default();
        assert!(owner_references(&cluster, &config).is_none());

        config.enable_owner_references = true;
        let refs = owner_references(&cluster, &config).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "acid-test");
        assert_eq!(refs[0].uid, "uid-1234");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn test_inherited_keys_projection() {
        let mut cluster = test_cluster("acid-test");
        cluster.metadata.labels = Some(BTreeMap::from([
            ("team".to_string(), "acid".to_string()),
            ("unrelated".to_string(), "x".to_string()),
        ]));
        let mut config = OperatorConfig::default();
        config.inherited_labels = vec!["team".to_string(), "absent".to_string()];

        let labels = inherited_labels(&cluster, &config);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("team"), Some(&"acid".to_string()));
    }

    #[test]
    fn test_trim_name_limit_and_trailing_dash() {
        let long = format!("logical-backup-{}", "a".repeat(80));
        let trimmed = trim_name(&long);
        assert_eq!(trimmed.len(), MAX_NAME_LENGTH);

        let dash_at_cut = format!("{}-{}", "a".repeat(62), "b".repeat(10));
        let trimmed = trim_name(&dash_at_cut);
        assert_eq!(trimmed.len(), 62);
        assert!(!trimmed.ends_with('-'));
    }
}
