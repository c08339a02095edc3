//! StatefulSet generation for the database workload
//!
//! Assembles the resolved resources, composed environment, sidecars, and
//! volumes into the stateful workload spec. The environment list is composed
//! by the caller because it may involve reading external sources.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, ContainerPort, EnvVar, HTTPGetAction,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, SeccompProfile, SecurityContext,
    VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use kube::ResourceExt;
use tracing::warn;

use crate::config::OperatorConfig;
use crate::crd::PostgresCluster;
use crate::events::EventSink;
use crate::resources::common::{
    cluster_labels, inherited_annotations, inherited_labels, owner_references,
    POSTGRES_CONTAINER_NAME,
};
use crate::resources::requirements::{generate_resource_requirements, ContainerKind};
use crate::resources::sidecars::generate_sidecar_containers;
use crate::resources::volumes::{
    add_additional_volumes, add_run_volume, add_shm_volume, add_tls_volume, data_volume_mount,
    DATA_VOLUME_NAME,
};
use crate::resources::GenerateError;

/// Desired instance count after applying the operator's bounds.
///
/// A cluster annotated with the configured exemption key set to "true" skips
/// the bounds entirely for this pass.
pub fn get_number_of_instances(cluster: &PostgresCluster, config: &OperatorConfig) -> i32 {
    let desired = cluster.spec.number_of_instances;

    if let Some(key) = &config.ignore_instance_limits_annotation_key {
        if cluster.annotations().get(key).map(String::as_str) == Some("true") {
            return desired;
        }
    }

    let mut instances = desired;
    if config.max_instances >= 0 && instances > config.max_instances {
        instances = config.max_instances;
        warn!(
            cluster = %cluster.name_any(),
            desired,
            provided = instances,
            "capping instance count to the configured maximum"
        );
    }
    if config.min_instances >= 0 && instances < config.min_instances {
        instances = config.min_instances;
        warn!(
            cluster = %cluster.name_any(),
            desired,
            provided = instances,
            "raising instance count to the configured minimum"
        );
    }
    instances
}

/// Additional Linux capabilities for the database container. An explicitly
/// configured empty list is a configuration error; an absent list means no
/// capability block at all.
pub fn generate_capabilities(
    additional: Option<&[String]>,
) -> Result<Option<Capabilities>, GenerateError> {
    match additional {
        None => Ok(None),
        Some([]) => Err(GenerateError::InvalidConfig(
            "additional pod capabilities are configured but empty".to_string(),
        )),
        Some(capabilities) => Ok(Some(Capabilities {
            add: Some(capabilities.to_vec()),
            ..Default::default()
        })),
    }
}

/// Generate the stateful workload spec for a cluster.
pub fn generate_statefulset(
    cluster: &PostgresCluster,
    config: &OperatorConfig,
    env: Vec<EnvVar>,
    events: &dyn EventSink,
) -> Result<StatefulSet, GenerateError> {
    let name = cluster.name_any();
    let namespace = cluster.namespace();
    let labels = cluster_labels(cluster, config);

    let resources = generate_resource_requirements(
        POSTGRES_CONTAINER_NAME,
        cluster.spec.resources.as_ref(),
        config,
        ContainerKind::Postgres,
        events,
    )?;
    let capabilities = generate_capabilities(config.additional_pod_capabilities.as_deref())?;

    let data_mount = data_volume_mount(&cluster.spec.volume);
    let image = cluster
        .spec
        .docker_image
        .clone()
        .unwrap_or_else(|| config.docker_image.clone());

    let postgres = Container {
        name: POSTGRES_CONTAINER_NAME.to_string(),
        image: Some(image),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(vec![
            ContainerPort {
                container_port: 5432,
                name: Some("postgresql".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: 8008,
                name: Some("patroni".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env: Some(env),
        volume_mounts: Some(vec![data_mount.clone()]),
        resources: Some(resources),
        readiness_probe: Some(http_probe("/readiness", 5, 3)),
        liveness_probe: Some(http_probe("/liveness", 30, 6)),
        security_context: Some(SecurityContext {
            run_as_user: Some(101),
            run_as_group: Some(103),
            allow_privilege_escalation: Some(capabilities.is_some()),
            capabilities,
            ..Default::default()
        }),
        ..Default::default()
    };

    let sidecars = generate_sidecar_containers(cluster, config, &[data_mount], events)?;

    let mut containers = Vec::with_capacity(1 + sidecars.len());
    containers.push(postgres);
    containers.extend(sidecars);

    let mut pod_spec = PodSpec {
        containers,
        termination_grace_period_seconds: Some(30),
        affinity: Some(generate_affinity(cluster, config)),
        security_context: Some(PodSecurityContext {
            fs_group: Some(103),
            run_as_user: Some(101),
            run_as_group: Some(103),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    if cluster
        .spec
        .enable_shm_volume
        .unwrap_or(config.enable_shm_volume)
    {
        add_shm_volume(&mut pod_spec);
    }
    if config.share_pgsocket_with_sidecars {
        add_run_volume(&mut pod_spec);
    }
    if let Some(tls) = &cluster.spec.tls {
        add_tls_volume(&mut pod_spec, tls);
    }
    add_additional_volumes(&mut pod_spec, &cluster.spec.additional_volumes)?;

    let mut metadata_labels = labels.clone();
    metadata_labels.extend(inherited_labels(cluster, config));
    let annotations = inherited_annotations(cluster, config);

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace,
            labels: Some(metadata_labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: owner_references(cluster, config),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: name,
            replicas: Some(get_number_of_instances(cluster, config)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    max_unavailable: Some(IntOrString::Int(1)),
                    partition: Some(0),
                }),
            }),
            pod_management_policy: Some("OrderedReady".to_string()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates: Some(vec![generate_volume_claim_template(cluster)]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn http_probe(path: &str, initial_delay: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(8008),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

/// Preferred anti-affinity spreads the cluster's pods over hosts and zones;
/// a manifest-declared node affinity passes through alongside it.
fn generate_affinity(cluster: &PostgresCluster, config: &OperatorConfig) -> Affinity {
    let selector = LabelSelector {
        match_labels: Some(BTreeMap::from([(
            config.cluster_name_label.clone(),
            cluster.name_any(),
        )])),
        ..Default::default()
    };

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(selector.clone()),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
                WeightedPodAffinityTerm {
                    weight: 50,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(selector),
                        topology_key: "topology.kubernetes.io/zone".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        node_affinity: cluster.spec.node_affinity.clone(),
        ..Default::default()
    }
}

fn generate_volume_claim_template(cluster: &PostgresCluster) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cluster.spec.volume.storage_class.clone(),
            selector: cluster.spec.volume.selector.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(cluster.spec.volume.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
