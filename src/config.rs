//! Operator-wide configuration
//!
//! The configuration is loaded once at startup and shared read-only across
//! every cluster the controller manages. Generators receive it by reference
//! and never mutate it; per-cluster overrides live in the PostgresCluster
//! spec instead.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use k8s_openapi::api::core::v1::Container;
use serde::Deserialize;
use thiserror::Error;

/// Default Spilo image (Zalando's production-ready PostgreSQL + Patroni image)
pub const DEFAULT_SPILO_IMAGE: &str = "ghcr.io/zalando/spilo-16:3.3-p1";

const DEFAULT_LOGICAL_BACKUP_IMAGE: &str = "ghcr.io/zalando/postgres-operator/logical-backup:v1.13.0";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Cluster-independent defaults and policy knobs.
///
/// Resource defaults and bounds are plain quantity strings ("250m", "1Gi");
/// an empty string or "0" disables the corresponding default or bound, the
/// same as leaving it out of the config file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperatorConfig {
    /// Image for the main database container unless the manifest overrides it
    pub docker_image: String,
    /// Superuser name baked into the credentials secret
    pub super_username: String,
    /// Label key carrying the cluster name on every generated object
    pub cluster_name_label: String,
    /// Label key Patroni maintains with the pod's current role
    pub pod_role_label: String,
    /// Extra labels attached to every generated object
    pub cluster_labels: BTreeMap<String, String>,
    /// Cluster-manifest label keys copied onto generated objects
    pub inherited_labels: Vec<String>,
    /// Cluster-manifest annotation keys copied onto generated objects
    pub inherited_annotations: Vec<String>,
    /// Attach owner references pointing back at the cluster manifest
    pub enable_owner_references: bool,

    /// Lower bound on instances, -1 disables the bound
    pub min_instances: i32,
    /// Upper bound on instances, -1 disables the bound
    pub max_instances: i32,
    /// Annotation key that, with value "true", exempts a cluster from the
    /// instance bounds
    pub ignore_instance_limits_annotation_key: Option<String>,

    pub default_cpu_request: Option<String>,
    pub default_cpu_limit: Option<String>,
    pub default_memory_request: Option<String>,
    pub default_memory_limit: Option<String>,
    pub min_cpu_limit: Option<String>,
    pub min_memory_limit: Option<String>,
    pub max_cpu_request: Option<String>,
    pub max_memory_request: Option<String>,
    /// Overwrite each container's memory request with its memory limit
    pub set_memory_request_to_limit: bool,

    /// Deprecated name-to-image sidecar map, superseded by sidecar_containers
    pub sidecar_images: BTreeMap<String, String>,
    /// Full container templates attached to every cluster pod
    pub sidecar_containers: Vec<Container>,
    /// Built-in monitoring agent, attached when configured
    pub monitoring: Option<MonitoringConfig>,

    /// ConfigMap whose entries become literal pod environment variables
    pub pod_environment_config_map: Option<String>,
    /// Secret whose keys become referenced pod environment variables
    pub pod_environment_secret: Option<String>,
    /// Interval between attempts to read the pod environment secret
    pub resource_check_interval_secs: u64,
    /// Total budget for reading the pod environment secret
    pub resource_check_timeout_secs: u64,

    /// Mount a memory-backed /dev/shm volume into the database container
    pub enable_shm_volume: bool,
    /// Share the PostgreSQL socket directory with sidecar containers
    pub share_pgsocket_with_sidecars: bool,
    /// Extra Linux capabilities for the database container
    pub additional_pod_capabilities: Option<Vec<String>>,

    /// WAL archive destination, omitted to disable archiving
    pub wal_archive: Option<WalArchive>,
    /// Keep pre-bucket-scoping WAL paths readable
    pub enable_wal_path_compat: bool,

    pub connection_pooler_mode: String,
    pub connection_pooler_port: i32,

    pub enable_master_load_balancer: bool,
    pub enable_replica_load_balancer: bool,
    pub external_traffic_policy: String,

    /// None behaves as enabled; Some(false) neutralizes budget protection
    /// without removing the objects
    pub enable_pod_disruption_budget: Option<bool>,
    /// Template for budget names, "{cluster}" is replaced with the cluster name
    pub pdb_name_format: String,
    /// Restrict the primary budget selector to the master pod
    pub pdb_master_label_selector: Option<bool>,

    pub logical_backup: LogicalBackupConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            docker_image: DEFAULT_SPILO_IMAGE.to_string(),
            super_username: "postgres".to_string(),
            cluster_name_label: "cluster-name".to_string(),
            pod_role_label: "spilo-role".to_string(),
            cluster_labels: BTreeMap::from([("application".to_string(), "spilo".to_string())]),
            inherited_labels: Vec::new(),
            inherited_annotations: Vec::new(),
            enable_owner_references: false,
            min_instances: -1,
            max_instances: -1,
            ignore_instance_limits_annotation_key: None,
            default_cpu_request: Some("100m".to_string()),
            default_cpu_limit: Some("1".to_string()),
            default_memory_request: Some("100Mi".to_string()),
            default_memory_limit: Some("500Mi".to_string()),
            min_cpu_limit: None,
            min_memory_limit: None,
            max_cpu_request: None,
            max_memory_request: None,
            set_memory_request_to_limit: false,
            sidecar_images: BTreeMap::new(),
            sidecar_containers: Vec::new(),
            monitoring: None,
            pod_environment_config_map: None,
            pod_environment_secret: None,
            resource_check_interval_secs: 3,
            resource_check_timeout_secs: 600,
            enable_shm_volume: true,
            share_pgsocket_with_sidecars: false,
            additional_pod_capabilities: None,
            wal_archive: None,
            enable_wal_path_compat: false,
            connection_pooler_mode: "transaction".to_string(),
            connection_pooler_port: 5432,
            enable_master_load_balancer: false,
            enable_replica_load_balancer: false,
            external_traffic_policy: "Cluster".to_string(),
            enable_pod_disruption_budget: None,
            pdb_name_format: "postgres-{cluster}-pdb".to_string(),
            pdb_master_label_selector: None,
            logical_backup: LogicalBackupConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Built-in monitoring sidecar settings.
#[derive(Clone, Debug, Deserialize)]
pub struct MonitoringConfig {
    pub image: String,
    pub server_host: String,
}

/// WAL archive destination, discriminated by storage provider.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum WalArchive {
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
    Gcs {
        bucket: String,
        #[serde(default)]
        credentials_path: Option<String>,
    },
    Az {
        storage_account: String,
    },
}

/// Defaults for the scheduled logical backup job.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogicalBackupConfig {
    pub image: String,
    /// Cron schedule used when the manifest does not declare one
    pub schedule: String,
    /// Prefix concatenated with the cluster name to form the job name
    pub job_prefix: String,
    pub storage: BackupStorage,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

impl Default for LogicalBackupConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_LOGICAL_BACKUP_IMAGE.to_string(),
            schedule: "30 00 * * *".to_string(),
            job_prefix: "logical-backup-".to_string(),
            storage: BackupStorage::default(),
            cpu_request: None,
            cpu_limit: None,
            memory_request: None,
            memory_limit: None,
        }
    }
}

/// Logical backup destination, discriminated by storage provider.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum BackupStorage {
    S3 {
        #[serde(default)]
        bucket: String,
        #[serde(default)]
        bucket_prefix: Option<String>,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        sse: Option<String>,
        #[serde(default)]
        retention_time: Option<String>,
    },
    Gcs {
        #[serde(default)]
        credentials_path: Option<String>,
    },
    Az {
        account_name: String,
        container: String,
        #[serde(default)]
        account_key: Option<String>,
    },
}

impl Default for BackupStorage {
    fn default() -> Self {
        BackupStorage::S3 {
            bucket: String::new(),
            bucket_prefix: None,
            region: None,
            endpoint: None,
            sse: None,
            retention_time: None,
        }
    }
}

impl BackupStorage {
    /// Provider discriminator as consumed by the backup image.
    pub fn provider(&self) -> &'static str {
        match self {
            BackupStorage::S3 { .. } => "s3",
            BackupStorage::Gcs { .. } => "gcs",
            BackupStorage::Az { .. } => "az",
        }
    }
}
