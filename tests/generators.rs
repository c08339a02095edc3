//! End-to-end synthesis tests against the public API

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use kubepg_operator::config::OperatorConfig;
use kubepg_operator::crd::{PostgresCluster, PostgresClusterSpec, VolumeSpec};
use kubepg_operator::events::EventSink;
use kubepg_operator::resources::{synthesize, EnvSourceClient};

#[derive(Default)]
struct StubSource {
    config_maps: BTreeMap<String, BTreeMap<String, String>>,
    secrets: BTreeMap<String, Vec<String>>,
}

impl EnvSourceClient for StubSource {
    fn get_config_map(
        &self,
        _namespace: &str,
        name: &str,
    ) -> impl Future<Output = kube::Result<Option<BTreeMap<String, String>>>> + Send {
        let result = Ok(self.config_maps.get(name).cloned());
        async move { result }
    }

    fn get_secret_keys(
        &self,
        _namespace: &str,
        name: &str,
    ) -> impl Future<Output = kube::Result<Option<Vec<String>>>> + Send {
        let result = Ok(self.secrets.get(name).cloned());
        async move { result }
    }
}

#[derive(Default)]
struct RecordingSink {
    warnings: Mutex<Vec<(String, String)>>,
}

impl EventSink for RecordingSink {
    fn warning(&self, reason: &str, message: &str) {
        self.warnings
            .lock()
            .unwrap()
            .push((reason.to_string(), message.to_string()));
    }
}

fn test_cluster(name: &str) -> PostgresCluster {
    let mut cluster = PostgresCluster::new(
        name,
        PostgresClusterSpec {
            number_of_instances: 3,
            volume: VolumeSpec {
                size: "20Gi".to_string(),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    cluster.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        uid: Some("uid-e2e".to_string()),
        ..Default::default()
    };
    cluster
}

fn min_available(pdb: &k8s_openapi::api::policy::v1::PodDisruptionBudget) -> i32 {
    match pdb.spec.as_ref().unwrap().min_available.as_ref().unwrap() {
        IntOrString::Int(n) => *n,
        IntOrString::String(_) => panic!("expected integer minAvailable"),
    }
}

#[tokio::test]
async fn synthesizes_full_object_set() {
    let cluster = test_cluster("orders-db");
    let config = OperatorConfig::default();
    let source = StubSource::default();
    let sink = RecordingSink::default();

    let set = synthesize(&source, &cluster, &config, &sink).await.unwrap();

    let statefulset = set.statefulset.as_ref().unwrap();
    assert_eq!(statefulset.metadata.name.as_deref(), Some("orders-db"));
    assert_eq!(statefulset.spec.as_ref().unwrap().replicas, Some(3));

    let service_names: Vec<_> = set
        .services
        .iter()
        .map(|s| s.metadata.name.as_deref().unwrap())
        .collect();
    assert_eq!(service_names, vec!["orders-db", "orders-db-repl"]);

    assert_eq!(set.pod_disruption_budgets.len(), 2);
    assert_eq!(min_available(&set.pod_disruption_budgets[0]), 1);
    assert_eq!(min_available(&set.pod_disruption_budgets[1]), 3);

    // Logical backups are opt-in per cluster.
    assert!(set.logical_backup_job.is_none());
    assert!(sink.warnings.lock().unwrap().is_empty());
}

#[tokio::test]
async fn environment_sources_flow_into_the_workload() {
    let cluster = test_cluster("orders-db");
    let mut config = OperatorConfig::default();
    config.pod_environment_config_map = Some("pod-config".to_string());
    config.pod_environment_secret = Some("pod-secrets".to_string());

    let mut source = StubSource::default();
    source.config_maps.insert(
        "pod-config".to_string(),
        BTreeMap::from([("EXTRA_SETTING".to_string(), "on".to_string())]),
    );
    source
        .secrets
        .insert("pod-secrets".to_string(), vec!["API_TOKEN".to_string()]);

    let sink = RecordingSink::default();
    let set = synthesize(&source, &cluster, &config, &sink).await.unwrap();

    let statefulset = set.statefulset.as_ref().unwrap();
    let env = statefulset.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers
        [0]
    .env
    .as_ref()
    .unwrap();

    let extra = env.iter().find(|v| v.name == "EXTRA_SETTING").unwrap();
    assert_eq!(extra.value.as_deref(), Some("on"));

    let token = env.iter().find(|v| v.name == "API_TOKEN").unwrap();
    assert_eq!(
        token
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap()
            .name,
        "pod-secrets"
    );
}

#[tokio::test]
async fn missing_configmap_fails_the_whole_set() {
    let cluster = test_cluster("orders-db");
    let mut config = OperatorConfig::default();
    config.pod_environment_config_map = Some("missing".to_string());

    let source = StubSource::default();
    let sink = RecordingSink::default();

    let err = synthesize(&source, &cluster, &config, &sink)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[tokio::test]
async fn invalid_capability_config_only_drops_the_workload() {
    let cluster = test_cluster("orders-db");
    let mut config = OperatorConfig::default();
    config.additional_pod_capabilities = Some(Vec::new());

    let source = StubSource::default();
    let sink = RecordingSink::default();

    let set = synthesize(&source, &cluster, &config, &sink).await.unwrap();
    assert!(set.statefulset.is_none());
    assert_eq!(set.services.len(), 2);
    assert_eq!(set.pod_disruption_budgets.len(), 2);

    let warnings = sink.warnings.lock().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].0, "StatefulSet");
}

#[tokio::test]
async fn broken_backup_config_only_drops_the_job() {
    let mut cluster = test_cluster("orders-db");
    cluster.spec.enable_logical_backup = true;

    let mut config = OperatorConfig::default();
    config.logical_backup.schedule = String::new();

    let source = StubSource::default();
    let sink = RecordingSink::default();

    let set = synthesize(&source, &cluster, &config, &sink).await.unwrap();
    assert!(set.logical_backup_job.is_none());
    assert_eq!(set.services.len(), 2);

    let warnings = sink.warnings.lock().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].0, "LogicalBackup");
}

#[tokio::test]
async fn backup_job_generated_when_enabled() {
    let mut cluster = test_cluster("orders-db");
    cluster.spec.enable_logical_backup = true;

    let config = OperatorConfig::default();
    let source = StubSource::default();
    let sink = RecordingSink::default();

    let set = synthesize(&source, &cluster, &config, &sink).await.unwrap();
    let job = set.logical_backup_job.unwrap();
    assert_eq!(
        job.metadata.name.as_deref(),
        Some("logical-backup-orders-db")
    );
    assert_eq!(job.spec.unwrap().schedule, "30 00 * * *");
}
