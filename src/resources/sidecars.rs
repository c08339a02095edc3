//! Sidecar container composition
//!
//! Sidecars come from three places, later ones overriding earlier ones by
//! container name: the deprecated name-to-image map, globally configured
//! container templates, and cluster-specific declarations (with the built-in
//! monitoring agent slotted between the global and cluster-specific sources).
//! A name collision is a full replace at the position of the replacing
//! declaration, not a field merge.

use k8s_openapi::api::core::v1::{Container, VolumeMount};

use crate::config::OperatorConfig;
use crate::crd::PostgresCluster;
use crate::events::EventSink;
use crate::resources::common::credentials_secret_name;
use crate::resources::env::{append_env_vars, literal, secret_ref, sidecar_env_vars};
use crate::resources::requirements::{generate_resource_requirements, ContainerKind};
use crate::resources::GenerateError;

/// Name of the built-in monitoring sidecar
pub const MONITORING_CONTAINER_NAME: &str = "monitoring-agent";

/// Key under which the monitoring API key is stored in the credentials secret
const MONITORING_API_KEY_SECRET_KEY: &str = "monitoring-api-key";

enum SidecarSource {
    /// Globally configured container template, passed through as declared
    Template,
    /// Operator-owned container that receives resolved resources and a pull
    /// policy
    Owned,
}

/// Produce the decorated sidecar list attached to the cluster pod, in
/// addition to the database container.
pub fn generate_sidecar_containers(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
    shared_mounts: &[VolumeMount],
    events: &dyn EventSink,
) -> Result<Vec<Container>, GenerateError> {
    let mut candidates: Vec<(Container, SidecarSource)> = Vec::new();

    // Deprecated image map; BTreeMap order keeps the result deterministic.
    for (name, image) in &config.sidecar_images {
        candidates.push((
            Container {
                name: name.clone(),
                image: Some(image.clone()),
                ..Default::default()
            },
            SidecarSource::Owned,
        ));
    }

    for template in &config.sidecar_containers {
        candidates.push((template.clone(), SidecarSource::Template));
    }

    if let Some(monitoring) = &config.monitoring {
        candidates.push((
            Container {
                name: MONITORING_CONTAINER_NAME.to_string(),
                image: Some(monitoring.image.clone()),
                ..Default::default()
            },
            SidecarSource::Owned,
        ));
    }

    for sidecar in &cluster.spec.sidecars {
        candidates.push((
            Container {
                name: sidecar.name.clone(),
                image: Some(sidecar.docker_image.clone()),
                command: if sidecar.command.is_empty() {
                    None
                } else {
                    Some(sidecar.command.clone())
                },
                env: if sidecar.env.is_empty() {
                    None
                } else {
                    Some(sidecar.env.clone())
                },
                ..Default::default()
            },
            SidecarSource::Owned,
        ));
    }

    // Later declarations replace earlier ones wholesale and keep the
    // replacing declaration's slot.
    candidates.reverse();
    let mut deduped: Vec<(Container, SidecarSource)> = Vec::new();
    for (container, source) in candidates {
        if !deduped.iter().any(|(kept, _)| kept.name == container.name) {
            deduped.push((container, source));
        }
    }
    deduped.reverse();

    let mut sidecars = Vec::with_capacity(deduped.len());
    for (container, source) in deduped {
        sidecars.push(decorate_sidecar(container, source, cluster, config, shared_mounts, events)?);
    }
    Ok(sidecars)
}

fn decorate_sidecar(
    mut container: Container,
    source: SidecarSource,
    cluster: &PostgresCluster,
    config: &OperatorConfig,
    shared_mounts: &[VolumeMount],
    events: &dyn EventSink,
) -> Result<Container, GenerateError> {
    let mut env = container.env.take().unwrap_or_default();
    if container.name == MONITORING_CONTAINER_NAME {
        if let Some(monitoring) = &config.monitoring {
            append_env_vars(
                &mut env,
                [
                    secret_ref(
                        "MONITORING_API_KEY",
                        &credentials_secret_name(cluster),
                        MONITORING_API_KEY_SECRET_KEY,
                    ),
                    literal("MONITORING_SERVER_HOST", &monitoring.server_host),
                ],
            );
        }
    }
    append_env_vars(&mut env, sidecar_env_vars(cluster, config));
    container.env = Some(env);

    let mut mounts = container.volume_mounts.take().unwrap_or_default();
    for mount in shared_mounts {
        if !mounts.iter().any(|existing| existing.name == mount.name) {
            mounts.push(mount.clone());
        }
    }
    if !mounts.is_empty() {
        container.volume_mounts = Some(mounts);
    }

    if let SidecarSource::Owned = source {
        let declared = cluster
            .spec
            .sidecars
            .iter()
            .find(|sidecar| sidecar.name == container.name)
            .and_then(|sidecar| sidecar.resources.as_ref());
        container.resources = Some(generate_resource_requirements(
            &container.name,
            declared,
            config,
            ContainerKind::Sidecar,
            events,
        )?);
        container.image_pull_policy = Some("IfNotPresent".to_string());
    }

    Ok(container)
}
