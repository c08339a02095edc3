//! Per-role Service generation
//!
//! Each cluster gets a primary and a replica service. Traffic routing relies
//! on the role label that the HA agent maintains on the pods, so a failover
//! never requires a service update.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::crd::PostgresCluster;
use crate::resources::common::{cluster_labels, owner_references, role_selector};

/// Connection role a service routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostgresRole {
    Primary,
    Replica,
}

impl PostgresRole {
    /// Pod label value the HA agent maintains for this role.
    pub fn label_value(self) -> &'static str {
        match self {
            PostgresRole::Primary => "master",
            PostgresRole::Replica => "replica",
        }
    }

    /// Service name for this role. The primary service carries the bare
    /// cluster name so it doubles as the connection endpoint.
    pub fn service_name(self, cluster: &PostgresCluster) -> String {
        match self {
            PostgresRole::Primary => cluster.name_any(),
            PostgresRole::Replica => format!("{}-repl", cluster.name_any()),
        }
    }

    fn load_balancer_enabled(self, cluster: &PostgresCluster, config: &OperatorConfig) -> bool {
        match self {
            PostgresRole::Primary => cluster
                .spec
                .enable_master_load_balancer
                .unwrap_or(config.enable_master_load_balancer),
            PostgresRole::Replica => cluster
                .spec
                .enable_replica_load_balancer
                .unwrap_or(config.enable_replica_load_balancer),
        }
    }
}

/// Generate the service for one connection role.
pub fn generate_service(
    role: PostgresRole,
    cluster: &PostgresCluster,
    config: &OperatorConfig,
) -> Service {
    let mut spec = ServiceSpec {
        selector: Some(role_selector(cluster, config, role.label_value())),
        ports: Some(vec![ServicePort {
            port: 5432,
            target_port: Some(IntOrString::Int(5432)),
            name: Some("postgresql".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        type_: Some("ClusterIP".to_string()),
        ..Default::default()
    };

    if role.load_balancer_enabled(cluster, config) {
        spec.type_ = Some("LoadBalancer".to_string());
        spec.external_traffic_policy = Some(config.external_traffic_policy.clone());
        if !cluster.spec.allowed_source_ranges.is_empty() {
            spec.load_balancer_source_ranges = Some(cluster.spec.allowed_source_ranges.clone());
        }
    }

    Service {
        metadata: ObjectMeta {
            name: Some(role.service_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(cluster_labels(cluster, config)),
            owner_references: owner_references(cluster, config),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::common::fixtures::test_cluster;
    use std::collections::BTreeMap;

    fn selector_of(service: &Service) -> &BTreeMap<String, String> {
        service
            .spec
            .as_ref()
            .unwrap()
            .selector
            .as_ref()
            .unwrap()
    }

    #[test]
    fn test_primary_service_defaults() {
        let cluster = test_cluster("acid-test");
        let config = OperatorConfig::default();

        let svc = generate_service(PostgresRole::Primary, &cluster, &config);
        assert_eq!(svc.metadata.name.as_deref(), Some("acid-test"));

        let spec = svc.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert!(spec.external_traffic_policy.is_none());
        assert_eq!(
            selector_of(&svc).get("spilo-role"),
            Some(&"master".to_string())
        );
        assert_eq!(
            selector_of(&svc).get("cluster-name"),
            Some(&"acid-test".to_string())
        );
    }

    #[test]
    fn test_replica_service_name_and_selector() {
        let cluster = test_cluster("acid-test");
        let config = OperatorConfig::default();

        let svc = generate_service(PostgresRole::Replica, &cluster, &config);
        assert_eq!(svc.metadata.name.as_deref(), Some("acid-test-repl"));
        assert_eq!(
            selector_of(&svc).get("spilo-role"),
            Some(&"replica".to_string())
        );
    }

    #[test]
    fn test_manifest_toggle_overrides_operator_default() {
        let mut cluster = test_cluster("acid-test");
        cluster.spec.enable_master_load_balancer = Some(false);
        cluster.spec.allowed_source_ranges = vec!["10.0.0.0/8".to_string()];

        let mut config = OperatorConfig::default();
        config.enable_master_load_balancer = true;

        let svc = generate_service(PostgresRole::Primary, &cluster, &config);
        assert_eq!(svc.spec.as_ref().unwrap().type_.as_deref(), Some("ClusterIP"));
        assert!(svc
            .spec
            .as_ref()
            .unwrap()
            .load_balancer_source_ranges
            .is_none());
    }

    #[test]
    fn test_load_balancer_service() {
        let mut cluster = test_cluster("acid-test");
        cluster.spec.enable_replica_load_balancer = Some(true);
        cluster.spec.allowed_source_ranges = vec!["10.0.0.0/8".to_string()];

        let mut config = OperatorConfig::default();
        config.external_traffic_policy = "Local".to_string();

        let svc = generate_service(PostgresRole::Replica, &cluster, &config);
        let spec = svc.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.external_traffic_policy.as_deref(), Some("Local"));
        assert_eq!(
            spec.load_balancer_source_ranges.as_ref().unwrap(),
            &vec!["10.0.0.0/8".to_string()]
        );
    }
}
