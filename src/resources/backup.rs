//! Logical backup CronJob generation
//!
//! Logical backups run as a scheduled dump job separate from the cluster
//! pods. The job image connects to the primary service and ships the dump
//! to the configured storage backend.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use kube::core::ObjectMeta;
use kube::ResourceExt;

use crate::config::{BackupStorage, OperatorConfig};
use crate::crd::{PostgresCluster, ResourceDescription, Resources};
use crate::events::EventSink;
use crate::resources::common::{
    cluster_labels, credentials_secret_name, inherited_annotations, inherited_labels,
    owner_references, trim_name,
};
use crate::resources::env::{field_ref, literal, secret_ref, PASSWORD_SECRET_KEY};
use crate::resources::requirements::{generate_resource_requirements, ContainerKind};
use crate::resources::GenerateError;

const BACKUP_CONTAINER_NAME: &str = "logical-backup";

/// Name of the backup job, derived from the configured prefix and truncated
/// to a valid object name.
pub fn logical_backup_job_name(cluster: &PostgresCluster, config: &OperatorConfig) -> String {
    trim_name(&format!(
        "{}{}",
        config.logical_backup.job_prefix,
        cluster.name_any()
    ))
}

/// Generate the scheduled dump job for a cluster with logical backups
/// enabled.
pub fn generate_logical_backup_job(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
    events: &dyn EventSink,
) -> Result<CronJob, GenerateError> {
    let schedule = cluster
        .spec
        .logical_backup_schedule
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(&config.logical_backup.schedule)
        .to_string();
    if schedule.is_empty() {
        return Err(GenerateError::InvalidConfig(
            "logical backup schedule is empty".to_string(),
        ));
    }

    let resources = generate_resource_requirements(
        BACKUP_CONTAINER_NAME,
        backup_resources(config).as_ref(),
        config,
        ContainerKind::Sidecar,
        events,
    )?;

    let labels = cluster_labels(cluster, config);
    let mut metadata_labels = labels.clone();
    metadata_labels.extend(inherited_labels(cluster, config));
    let annotations = inherited_annotations(cluster, config);

    let container = Container {
        name: BACKUP_CONTAINER_NAME.to_string(),
        image: Some(config.logical_backup.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(backup_env_vars(cluster, config)),
        resources: Some(resources),
        ..Default::default()
    };

    Ok(CronJob {
        metadata: ObjectMeta {
            name: Some(logical_backup_job_name(cluster, config)),
            namespace: cluster.namespace(),
            labels: Some(metadata_labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: owner_references(cluster, config),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule,
            concurrency_policy: Some("Forbid".to_string()),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            containers: vec![container],
                            restart_policy: Some("Never".to_string()),
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn backup_resources(config: &OperatorConfig) -> Option<Resources> {
    let backup = &config.logical_backup;
    if backup.cpu_request.is_none()
        && backup.memory_request.is_none()
        && backup.cpu_limit.is_none()
        && backup.memory_limit.is_none()
    {
        return None;
    }
    Some(Resources {
        requests: Some(ResourceDescription {
            cpu: backup.cpu_request.clone(),
            memory: backup.memory_request.clone(),
            hugepages_2mi: None,
            hugepages_1gi: None,
        }),
        limits: Some(ResourceDescription {
            cpu: backup.cpu_limit.clone(),
            memory: backup.memory_limit.clone(),
            hugepages_2mi: None,
            hugepages_1gi: None,
        }),
    })
}

fn backup_env_vars(cluster: &PostgresCluster, config: &OperatorConfig) -> Vec<EnvVar> {
    let name = cluster.name_any();
    let uid = cluster
        .metadata
        .uid
        .clone()
        .unwrap_or_default();
    let storage = &config.logical_backup.storage;

    let mut env = vec![
        literal("SCOPE", &name),
        literal("CLUSTER_NAME_LABEL", &config.cluster_name_label),
        field_ref("POD_NAMESPACE", "metadata.namespace"),
        literal("LOGICAL_BACKUP_PROVIDER", storage.provider()),
        literal("PGHOST", &name),
        literal("PGPORT", "5432"),
        literal("PGUSER", &config.super_username),
        secret_ref(
            "PGPASSWORD",
            &credentials_secret_name(cluster),
            PASSWORD_SECRET_KEY,
        ),
        literal("PGDATABASE", "postgres"),
    ];

    match storage {
        BackupStorage::S3 {
            bucket,
            bucket_prefix,
            region,
            endpoint,
            sse,
            retention_time,
        } => {
            env.push(literal("LOGICAL_BACKUP_S3_BUCKET", bucket));
            if let Some(prefix) = bucket_prefix {
                env.push(literal("LOGICAL_BACKUP_S3_BUCKET_PREFIX", prefix));
            }
            env.push(literal(
                "LOGICAL_BACKUP_S3_BUCKET_SCOPE_SUFFIX",
                &format!("/{uid}"),
            ));
            if let Some(region) = region {
                env.push(literal("LOGICAL_BACKUP_S3_REGION", region));
            }
            if let Some(endpoint) = endpoint {
                env.push(literal("LOGICAL_BACKUP_S3_ENDPOINT", endpoint));
            }
            if let Some(sse) = sse {
                env.push(literal("LOGICAL_BACKUP_S3_SSE", sse));
            }
            // Per-cluster retention overrides the configured default.
            let retention = cluster
                .spec
                .logical_backup_retention
                .as_deref()
                .or(retention_time.as_deref());
            if let Some(retention) = retention {
                env.push(literal("LOGICAL_BACKUP_S3_RETENTION_TIME", retention));
            }
        }
        BackupStorage::Gcs { credentials_path } => {
            if let Some(path) = credentials_path {
                env.push(literal("LOGICAL_BACKUP_GOOGLE_APPLICATION_CREDENTIALS", path));
            }
        }
        BackupStorage::Az {
            account_name,
            container,
            account_key,
        } => {
            env.push(literal(
                "LOGICAL_BACKUP_AZURE_STORAGE_ACCOUNT_NAME",
                account_name,
            ));
            env.push(literal(
                "LOGICAL_BACKUP_AZURE_STORAGE_CONTAINER",
                container,
            ));
            if let Some(key) = account_key {
                env.push(literal("LOGICAL_BACKUP_AZURE_STORAGE_ACCOUNT_KEY", key));
            }
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingEventSink;
    use crate::resources::common::fixtures::test_cluster;

    fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
        env.iter()
            .find(|var| var.name == name)
            .and_then(|var| var.value.as_deref())
    }

    fn job_env(job: &CronJob) -> Vec<EnvVar> {
        job.spec
            .as_ref()
            .unwrap()
            .job_template
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
            .env
            .clone()
            .unwrap()
    }

    #[test]
    fn test_backup_job_defaults() {
        let cluster = test_cluster("acid-test");
        let config = OperatorConfig::default();
        let sink = RecordingEventSink::default();

        let job = generate_logical_backup_job(&cluster, &config, &sink).unwrap();
        assert_eq!(
            job.metadata.name.as_deref(),
            Some("logical-backup-acid-test")
        );

        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.schedule, "30 00 * * *");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));

        let env = job_env(&job);
        assert_eq!(env_value(&env, "SCOPE"), Some("acid-test"));
        assert_eq!(env_value(&env, "PGHOST"), Some("acid-test"));
        assert_eq!(env_value(&env, "LOGICAL_BACKUP_PROVIDER"), Some("s3"));
        assert_eq!(
            env_value(&env, "LOGICAL_BACKUP_S3_BUCKET_SCOPE_SUFFIX"),
            Some("/uid-1234")
        );
    }

    #[test]
    fn test_cluster_schedule_and_retention_override() {
        let mut cluster = test_cluster("acid-test");
        cluster.spec.logical_backup_schedule = Some("0 3 * * 0".to_string());
        cluster.spec.logical_backup_retention = Some("2 weeks".to_string());

        let mut config = OperatorConfig::default();
        if let BackupStorage::S3 { retention_time, .. } = &mut config.logical_backup.storage {
            *retention_time = Some("1 month".to_string());
        }

        let sink = RecordingEventSink::default();
        let job = generate_logical_backup_job(&cluster, &config, &sink).unwrap();
        assert_eq!(job.spec.as_ref().unwrap().schedule, "0 3 * * 0");
        assert_eq!(
            env_value(&job_env(&job), "LOGICAL_BACKUP_S3_RETENTION_TIME"),
            Some("2 weeks")
        );
    }

    #[test]
    fn test_empty_schedule_rejected() {
        let cluster = test_cluster("acid-test");
        let mut config = OperatorConfig::default();
        config.logical_backup.schedule = String::new();

        let sink = RecordingEventSink::default();
        let err = generate_logical_backup_job(&cluster, &config, &sink).unwrap_err();
        assert!(matches!(err, GenerateError::InvalidConfig(_)));
    }

    #[test]
    fn test_azure_storage_env() {
        let cluster = test_cluster("acid-test");
        let mut config = OperatorConfig::default();
        config.logical_backup.storage = BackupStorage::Az {
            account_name: "acct".to_string(),
            container: "dumps".to_string(),
            account_key: Some("key".to_string()),
        };

        let sink = RecordingEventSink::default();
        let job = generate_logical_backup_job(&cluster, &config, &sink).unwrap();
        let env = job_env(&job);
        assert_eq!(env_value(&env, "LOGICAL_BACKUP_PROVIDER"), Some("az"));
        assert_eq!(
            env_value(&env, "LOGICAL_BACKUP_AZURE_STORAGE_CONTAINER"),
            Some("dumps")
        );
        assert!(env_value(&env, "LOGICAL_BACKUP_S3_BUCKET").is_none());
    }

    #[test]
    fn test_long_cluster_name_truncated() {
        let long = "a".repeat(70);
        let cluster = test_cluster(&long);
        let config = OperatorConfig::default();
        let sink = RecordingEventSink::default();

        let job = generate_logical_backup_job(&cluster, &config, &sink).unwrap();
        let name = job.metadata.name.unwrap();
        assert_eq!(name.len(), 63);
        assert!(!name.ends_with('-'));
    }
}
