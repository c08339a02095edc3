//! Volume and mount composition for the cluster pod
//!
//! Reserved volumes (data, shared memory, socket directory, TLS) are added
//! idempotently under fixed names; additional manifest-declared volumes
//! carry an explicit target-container list.

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};
use tracing::warn;

use crate::crd::{AdditionalVolume, TlsConfig, VolumeSpec};
use crate::resources::common::POSTGRES_CONTAINER_NAME;
use crate::resources::GenerateError;

pub const DATA_VOLUME_NAME: &str = "pgdata";
pub const DATA_VOLUME_MOUNT_PATH: &str = "/home/postgres/pgdata";

pub const SHM_VOLUME_NAME: &str = "dshm";
pub const SHM_VOLUME_MOUNT_PATH: &str = "/dev/shm";

pub const RUN_VOLUME_NAME: &str = "postgres-run";
pub const RUN_VOLUME_MOUNT_PATH: &str = "/var/run/postgresql";

pub const TLS_VOLUME_NAME: &str = "tls-secret";
pub const TLS_VOLUME_MOUNT_PATH: &str = "/tls";

/// Wildcard entry in a target-container list
const ALL_CONTAINERS: &str = "all";

const RESERVED_VOLUME_NAMES: [&str; 4] = [
    DATA_VOLUME_NAME,
    SHM_VOLUME_NAME,
    RUN_VOLUME_NAME,
    TLS_VOLUME_NAME,
];

/// Mount for the persistent data volume, honoring the manifest's subPath.
pub fn data_volume_mount(volume: &VolumeSpec) -> VolumeMount {
    let mut mount = VolumeMount {
        name: DATA_VOLUME_NAME.to_string(),
        mount_path: DATA_VOLUME_MOUNT_PATH.to_string(),
        ..Default::default()
    };
    if let Some(sub_path) = &volume.sub_path {
        if volume.is_sub_path_expr == Some(true) {
            mount.sub_path_expr = Some(sub_path.clone());
        } else {
            mount.sub_path = Some(sub_path.clone());
        }
    }
    mount
}

/// Add the memory-backed shared-memory volume and mount it into the database
/// container. Skipped entirely if a volume of that name already exists.
pub fn add_shm_volume(pod_spec: &mut PodSpec) {
    if !add_volume(
        pod_spec,
        Volume {
            name: SHM_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ) {
        return;
    }
    mount_into_containers(pod_spec, &[POSTGRES_CONTAINER_NAME], simple_mount(SHM_VOLUME_NAME, SHM_VOLUME_MOUNT_PATH));
}

/// Add the socket directory volume shared between the database container and
/// every sidecar.
pub fn add_run_volume(pod_spec: &mut PodSpec) {
    if !add_volume(
        pod_spec,
        Volume {
            name: RUN_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ) {
        return;
    }
    mount_into_all(pod_spec, simple_mount(RUN_VOLUME_NAME, RUN_VOLUME_MOUNT_PATH));
}

/// Mount the referenced TLS secret read-only into the database container.
pub fn add_tls_volume(pod_spec: &mut PodSpec, tls: &TlsConfig) {
    if !add_volume(
        pod_spec,
        Volume {
            name: TLS_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls.secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ) {
        return;
    }
    let mount = VolumeMount {
        name: TLS_VOLUME_NAME.to_string(),
        mount_path: TLS_VOLUME_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    };
    mount_into_containers(pod_spec, &[POSTGRES_CONTAINER_NAME], mount);
}

/// Add manifest-declared volumes with their target-container filtering. An
/// absent or empty target list mounts only into the database container; a
/// wildcard entry mounts into every container.
pub fn add_additional_volumes(
    pod_spec: &mut PodSpec,
    volumes: &[AdditionalVolume],
) -> Result<(), GenerateError> {
    for additional in volumes {
        if RESERVED_VOLUME_NAMES.contains(&additional.name.as_str()) {
            return Err(GenerateError::InvalidConfig(format!(
                "additional volume {} collides with a reserved volume name",
                additional.name
            )));
        }

        let mut volume = additional.volume_source.clone();
        volume.name = additional.name.clone();
        if !add_volume(pod_spec, volume) {
            warn!(
                volume = %additional.name,
                "skipping additional volume, name already in use"
            );
            continue;
        }

        let mut mount = VolumeMount {
            name: additional.name.clone(),
            mount_path: additional.mount_path.clone(),
            ..Default::default()
        };
        if let Some(sub_path) = &additional.sub_path {
            if additional.is_sub_path_expr == Some(true) {
                mount.sub_path_expr = Some(sub_path.clone());
            } else {
                mount.sub_path = Some(sub_path.clone());
            }
        }

        match &additional.target_containers {
            None => mount_into_containers(pod_spec, &[POSTGRES_CONTAINER_NAME], mount),
            Some(targets) if targets.is_empty() => {
                mount_into_containers(pod_spec, &[POSTGRES_CONTAINER_NAME], mount)
            }
            Some(targets) if targets.iter().any(|t| t == ALL_CONTAINERS) => {
                mount_into_all(pod_spec, mount)
            }
            Some(targets) => {
                let names: Vec<&str> = targets.iter().map(String::as_str).collect();
                mount_into_containers(pod_spec, &names, mount);
            }
        }
    }
    Ok(())
}

/// Returns false when a volume of the same name is already present.
fn add_volume(pod_spec: &mut PodSpec, volume: Volume) -> bool {
    let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
    if volumes.iter().any(|existing| existing.name == volume.name) {
        return false;
    }
    volumes.push(volume);
    true
}

fn mount_into_all(pod_spec: &mut PodSpec, mount: VolumeMount) {
    for container in &mut pod_spec.containers {
        mount_into(container, mount.clone());
    }
}

fn mount_into_containers(pod_spec: &mut PodSpec, names: &[&str], mount: VolumeMount) {
    for container in &mut pod_spec.containers {
        if names.contains(&container.name.as_str()) {
            mount_into(container, mount.clone());
        }
    }
}

fn mount_into(container: &mut Container, mount: VolumeMount) {
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    if !mounts.iter().any(|existing| existing.name == mount.name) {
        mounts.push(mount);
    }
}

fn simple_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}
