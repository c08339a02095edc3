//! Environment variable composition for generated containers
//!
//! The database container environment is assembled from ordered precedence
//! blocks, highest first, with first-write-wins deduplication by name:
//! fixed identity variables, manifest overrides, feature-derived blocks
//! (WAL archiving, clone, standby, TLS), then the pod environment Secret
//! and ConfigMap referenced in the operator configuration. Appending from
//! highest to lowest precedence means an earlier block can never be
//! shadowed by a later one.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    ConfigMap, EnvVar, EnvVarSource, ObjectFieldSelector, Secret, SecretKeySelector,
};
use kube::{Api, Client, ResourceExt};

use crate::config::{OperatorConfig, WalArchive};
use crate::crd::{CloneDescription, PostgresCluster, StandbyDescription, TlsConfig};
use crate::resources::common::credentials_secret_name;
use crate::resources::volumes::TLS_VOLUME_MOUNT_PATH;
use crate::resources::GenerateError;

/// Key under which the database password is stored in the credentials secret
pub const PASSWORD_SECRET_KEY: &str = "password";

/// Read access to the external sources referenced by the operator
/// configuration. `Ok(None)` means the object does not exist, which is
/// handled differently from an API failure.
pub trait EnvSourceClient: Sync {
    fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = kube::Result<Option<BTreeMap<String, String>>>> + Send;

    /// Only the key names are needed; secret values never enter generated
    /// manifests directly.
    fn get_secret_keys(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = kube::Result<Option<Vec<String>>>> + Send;
}

impl EnvSourceClient for Client {
    fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = kube::Result<Option<BTreeMap<String, String>>>> + Send {
        let api: Api<ConfigMap> = Api::namespaced(self.clone(), namespace);
        async move { Ok(api.get_opt(name).await?.and_then(|cm| cm.data)) }
    }

    fn get_secret_keys(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = kube::Result<Option<Vec<String>>>> + Send {
        let api: Api<Secret> = Api::namespaced(self.clone(), namespace);
        async move {
            Ok(api
                .get_opt(name)
                .await?
                .map(|secret| secret.data.unwrap_or_default().into_keys().collect()))
        }
    }
}

/// Append variables to a list, silently dropping any whose name is already
/// present. First write wins.
pub fn append_env_vars(env: &mut Vec<EnvVar>, extra: impl IntoIterator<Item = EnvVar>) {
    for var in extra {
        if !env.iter().any(|existing| existing.name == var.name) {
            env.push(var);
        }
    }
}

pub(crate) fn literal(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

pub(crate) fn field_ref(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn secret_ref(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Compose the full environment for the database container.
pub async fn generate_pod_env_vars<S: EnvSourceClient>(
    source: &S,
    cluster: &PostgresCluster,
    config: &OperatorConfig,
) -> Result<Vec<EnvVar>, GenerateError> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let uid = cluster.metadata.uid.clone().unwrap_or_default();

    let mut env = identity_env_vars(cluster, config);

    append_env_vars(&mut env, cluster.spec.env.iter().cloned());

    if config.enable_wal_path_compat {
        append_env_vars(&mut env, [literal("ENABLE_WAL_PATH_COMPAT", "true")]);
    }
    if let Some(wal) = &config.wal_archive {
        append_env_vars(&mut env, wal_archive_env_vars(wal, &uid));
    }
    if let Some(clone) = &cluster.spec.clone {
        if !clone.cluster.is_empty() {
            append_env_vars(&mut env, clone_env_vars(clone, &namespace, config));
        }
    }
    if let Some(standby) = &cluster.spec.standby {
        append_env_vars(&mut env, standby_env_vars(standby));
    }
    if let Some(tls) = &cluster.spec.tls {
        append_env_vars(&mut env, tls_env_vars(tls));
    }

    if let Some(name) = &config.pod_environment_secret {
        let interval = Duration::from_secs(config.resource_check_interval_secs);
        let timeout = Duration::from_secs(config.resource_check_timeout_secs);
        let vars = pod_environment_secret_vars(source, &namespace, name, interval, timeout).await?;
        append_env_vars(&mut env, vars);
    }
    if let Some(name) = &config.pod_environment_config_map {
        let vars = pod_environment_configmap_vars(source, &namespace, name).await?;
        append_env_vars(&mut env, vars);
    }

    Ok(env)
}

/// Fixed identity and connection variables. These head the list and can
/// never be shadowed.
fn identity_env_vars(cluster: &PostgresCluster, config: &OperatorConfig) -> Vec<EnvVar> {
    let name = cluster.name_any();
    let credentials = credentials_secret_name(cluster);
    vec![
        literal("SCOPE", &name),
        literal("PGHOST", "/var/run/postgresql"),
        literal("PGPORT", "5432"),
        literal("PGUSER", &config.super_username),
        literal("PGSCHEMA", "public"),
        secret_ref("PGPASSWORD", &credentials, PASSWORD_SECRET_KEY),
        literal("CONNECTION_POOLER_MODE", &config.connection_pooler_mode),
        literal(
            "CONNECTION_POOLER_PORT",
            config.connection_pooler_port.to_string(),
        ),
        field_ref("POD_NAMESPACE", "metadata.namespace"),
        literal("KUBERNETES_SCOPE_LABEL", &config.cluster_name_label),
        literal("KUBERNETES_ROLE_LABEL", &config.pod_role_label),
    ]
}

/// Default variables appended to every sidecar container, after the
/// sidecar's own declarations.
pub fn sidecar_env_vars(cluster: &PostgresCluster, config: &OperatorConfig) -> Vec<EnvVar> {
    let credentials = credentials_secret_name(cluster);
    vec![
        field_ref("POD_NAME", "metadata.name"),
        field_ref("POD_NAMESPACE", "metadata.namespace"),
        literal("POSTGRES_USER", &config.super_username),
        secret_ref("POSTGRES_PASSWORD", &credentials, PASSWORD_SECRET_KEY),
    ]
}

/// WAL archive variables for the configured storage provider. The archive
/// location is scoped by the cluster UID so a recreated cluster of the same
/// name cannot overwrite an older archive.
fn wal_archive_env_vars(wal: &WalArchive, uid: &str) -> Vec<EnvVar> {
    let mut env = match wal {
        WalArchive::S3 {
            bucket,
            region,
            endpoint,
        } => {
            let mut env = vec![literal("WAL_S3_BUCKET", bucket)];
            if let Some(region) = region {
                env.push(literal("AWS_REGION", region));
            }
            if let Some(endpoint) = endpoint {
                env.push(literal("AWS_ENDPOINT", endpoint));
            }
            env
        }
        WalArchive::Gcs {
            bucket,
            credentials_path,
        } => {
            let mut env = vec![literal("WAL_GS_BUCKET", bucket)];
            if let Some(path) = credentials_path {
                env.push(literal("GOOGLE_APPLICATION_CREDENTIALS", path));
            }
            env
        }
        WalArchive::Az { storage_account } => {
            vec![literal("AZURE_STORAGE_ACCOUNT", storage_account)]
        }
    };
    env.push(literal("WAL_BUCKET_SCOPE_SUFFIX", format!("/{}", uid)));
    env.push(literal("WAL_BUCKET_SCOPE_PREFIX", ""));
    env
}

/// Clone-source variables. Without a recovery timestamp the clone streams
/// from the live source cluster; with one it restores from the source's WAL
/// archive, preferring an explicitly declared archive path over the one
/// derived from the configured provider and source cluster identity.
fn clone_env_vars(
    clone: &CloneDescription,
    namespace: &str,
    config: &OperatorConfig,
) -> Vec<EnvVar> {
    let mut env = vec![literal("CLONE_SCOPE", &clone.cluster)];

    match &clone.timestamp {
        None => {
            env.push(literal("CLONE_METHOD", "CLONE_WITH_BASEBACKUP"));
            env.push(literal("CLONE_HOST", format!("{}.{}", clone.cluster, namespace)));
            env.push(literal("CLONE_PORT", "5432"));
        }
        Some(timestamp) => {
            env.push(literal("CLONE_METHOD", "CLONE_WITH_WALE"));
            match clone.s3_wal_path.as_deref().filter(|p| !p.is_empty()) {
                Some(path) => {
                    env.push(literal("CLONE_WALE_S3_PREFIX", path));
                }
                None => match &config.wal_archive {
                    Some(WalArchive::S3 { bucket, .. }) => {
                        env.push(literal("CLONE_WAL_S3_BUCKET", bucket));
                    }
                    Some(WalArchive::Gcs { bucket, .. }) => {
                        env.push(literal("CLONE_WAL_GS_BUCKET", bucket));
                    }
                    Some(WalArchive::Az { storage_account }) => {
                        env.push(literal("CLONE_AZURE_STORAGE_ACCOUNT", storage_account));
                    }
                    None => {}
                },
            }
            env.push(literal(
                "CLONE_WAL_BUCKET_SCOPE_SUFFIX",
                format!("/{}", clone.uid.as_deref().unwrap_or_default()),
            ));
            env.push(literal("CLONE_WAL_BUCKET_SCOPE_PREFIX", ""));
            env.push(literal("CLONE_TARGET_TIME", timestamp));
        }
    }

    env
}

/// Standby-source variables. A remote host takes precedence over WAL-based
/// replication; within WAL paths, S3 over GCS.
fn standby_env_vars(standby: &StandbyDescription) -> Vec<EnvVar> {
    if let Some(host) = standby.standby_host.as_deref().filter(|h| !h.is_empty()) {
        let mut env = vec![literal("STANDBY_HOST", host)];
        if let Some(port) = standby.standby_port.as_deref().filter(|p| !p.is_empty()) {
            env.push(literal("STANDBY_PORT", port));
        }
        return env;
    }

    let mut env = vec![literal("STANDBY_METHOD", "STANDBY_WITH_WALE")];
    if let Some(path) = standby.s3_wal_path.as_deref().filter(|p| !p.is_empty()) {
        env.push(literal("STANDBY_WALE_S3_PREFIX", path));
    } else if let Some(path) = standby.gs_wal_path.as_deref().filter(|p| !p.is_empty()) {
        env.push(literal("STANDBY_WALE_GS_PREFIX", path));
    }
    env
}

fn tls_env_vars(tls: &TlsConfig) -> Vec<EnvVar> {
    let certificate = tls.certificate_file.as_deref().unwrap_or("tls.crt");
    let private_key = tls.private_key_file.as_deref().unwrap_or("tls.key");
    let mut env = vec![
        literal(
            "SSL_CERTIFICATE_FILE",
            format!("{}/{}", TLS_VOLUME_MOUNT_PATH, certificate),
        ),
        literal(
            "SSL_PRIVATE_KEY_FILE",
            format!("{}/{}", TLS_VOLUME_MOUNT_PATH, private_key),
        ),
    ];
    if let Some(ca) = &tls.ca_file {
        env.push(literal(
            "SSL_CA_FILE",
            format!("{}/{}", TLS_VOLUME_MOUNT_PATH, ca),
        ));
    }
    env
}

/// Turn the referenced ConfigMap's entries into literal variables, sorted by
/// key. A missing ConfigMap and an API failure both abort composition, with
/// distinguishable messages.
pub async fn pod_environment_configmap_vars<S: EnvSourceClient>(
    source: &S,
    namespace: &str,
    name: &str,
) -> Result<Vec<EnvVar>, GenerateError> {
    match source.get_config_map(namespace, name).await {
        Ok(Some(data)) => Ok(data
            .into_iter()
            .map(|(key, value)| literal(&key, value))
            .collect()),
        Ok(None) => Err(GenerateError::ExternalSource(format!(
            "pod environment ConfigMap {}/{} does not exist",
            namespace, name
        ))),
        Err(err) => Err(GenerateError::ExternalSource(format!(
            "could not read pod environment ConfigMap {}/{}: {}",
            namespace, name, err
        ))),
    }
}

/// Turn the referenced Secret's keys into secret-key references, sorted by
/// key. A missing Secret is retried on a fixed interval until the attempt
/// budget of floor(timeout / interval) is spent; an API failure aborts
/// immediately.
pub async fn pod_environment_secret_vars<S: EnvSourceClient>(
    source: &S,
    namespace: &str,
    name: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<Vec<EnvVar>, GenerateError> {
    let attempts = (timeout.as_secs() / interval.as_secs().max(1)).max(1);

    for attempt in 1..=attempts {
        match source.get_secret_keys(namespace, name).await {
            Ok(Some(mut keys)) => {
                keys.sort();
                return Ok(keys
                    .iter()
                    .map(|key| secret_ref(key, name, key))
                    .collect());
            }
            Ok(None) => {
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
            Err(err) => {
                return Err(GenerateError::ExternalSource(format!(
                    "could not read pod environment Secret {}/{}: {}",
                    namespace, name, err
                )));
            }
        }
    }

    Err(GenerateError::ExternalSource(format!(
        "getting pod environment Secret {}/{} still failing after {} retries",
        namespace, name, attempts
    )))
}
