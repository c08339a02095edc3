use k8s_openapi::api::core::v1::{EnvVar, NodeAffinity, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Schema for fields that embed upstream Kubernetes API types. Their shapes
/// are validated by the API server, so the CRD schema keeps them open.
fn preserve_unknown_fields(
    _generator: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject::default();
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schema)
}

/// PostgresCluster is the Schema for the postgresclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kubepg.io",
    version = "v1alpha1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    shortname = "pgc",
    namespaced,
    status = "PostgresClusterStatus",
    printcolumn = r#"{"name":"Instances", "type":"integer", "jsonPath":".spec.numberOfInstances"}"#,
    printcolumn = r#"{"name":"Volume", "type":"string", "jsonPath":".spec.volume.size"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// Desired number of database pods, subject to the operator's
    /// instance bounds
    #[serde(default = "default_number_of_instances")]
    pub number_of_instances: i32,

    /// Persistent data volume for the database
    pub volume: VolumeSpec,

    /// Database image, overriding the operator-wide default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,

    /// Resource overrides for the database container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    /// Environment overrides for the database container. These shadow
    /// everything except the operator's fixed identity variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub env: Vec<EnvVar>,

    /// Cluster-specific sidecar containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Sidecar>,

    /// Extra volumes mounted into selected containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_volumes: Vec<AdditionalVolume>,

    /// TLS material mounted into the database container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    /// Bootstrap this cluster as a copy of another one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone: Option<CloneDescription>,

    /// Run this cluster as a standby following a remote primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby: Option<StandbyDescription>,

    /// Node affinity passed through to the pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub node_affinity: Option<NodeAffinity>,

    /// Override the operator-wide shared-memory volume setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_shm_volume: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_master_load_balancer: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_replica_load_balancer: Option<bool>,

    /// CIDR ranges admitted by load-balanced services
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_source_ranges: Vec<String>,

    /// Schedule a periodic logical backup job
    #[serde(default)]
    pub enable_logical_backup: bool,

    /// Cron schedule overriding the operator default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_backup_schedule: Option<String>,

    /// Backup retention overriding the operator default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_backup_retention: Option<String>,
}

fn default_number_of_instances() -> i32 {
    1
}

impl Default for PostgresClusterSpec {
    fn default() -> Self {
        Self {
            number_of_instances: default_number_of_instances(),
            volume: VolumeSpec::default(),
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
        }
    }
}

/// Persistent data volume configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Size of the persistent volume (e.g., "10Gi", "100Gi")
    pub size: String,

    /// Storage class name (uses the platform default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Label selector constraining eligible persistent volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub selector: Option<LabelSelector>,

    /// Mount only this path of the data volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Treat subPath as an expanded expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sub_path_expr: Option<bool>,
}

/// Resource overrides for a container
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceDescription>,
}

/// Quantities for a single requests or limits block
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct ResourceDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, rename = "hugepages-2Mi", skip_serializing_if = "Option::is_none")]
    pub hugepages_2mi: Option<String>,

    #[serde(default, rename = "hugepages-1Gi", skip_serializing_if = "Option::is_none")]
    pub hugepages_1gi: Option<String>,
}

/// Cluster-specific sidecar container. A sidecar with the same name as a
/// globally configured one replaces it entirely.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    pub name: String,

    pub docker_image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

/// Extra volume with an explicit target-container list. An absent or empty
/// list targets only the database container; the single entry "all" targets
/// every container.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalVolume {
    pub name: String,

    pub mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sub_path_expr: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_containers: Option<Vec<String>>,

    /// Volume source definition; its name is replaced by this volume's name
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub volume_source: Volume,
}

/// TLS material reference
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Secret carrying the certificate, key, and optional CA bundle
    pub secret_name: String,

    /// Certificate file name within the secret, defaults to tls.crt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_file: Option<String>,

    /// Private key file name within the secret, defaults to tls.key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<String>,

    /// CA file name within the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
}

/// Source description for cloning an existing cluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloneDescription {
    /// Name of the source cluster
    pub cluster: String,

    /// UID of the source cluster, scoping its WAL archive location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Point-in-time recovery target; absent means clone from the live
    /// cluster via basebackup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Explicit WAL archive location, preferred over the derived one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_wal_path: Option<String>,
}

/// Source description for a standby cluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandbyDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_wal_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gs_wal_path: Option<String>,

    /// Remote primary host, preferred over WAL-based replication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby_port: Option<String>,
}

/// Status of the PostgresCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterStatus {
    /// Generation last acted upon by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable summary of the last synthesis attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
