//! Resource requirement resolution for generated containers
//!
//! Combines per-container overrides from the cluster manifest with the
//! operator's defaults and bounds into a fully resolved requests/limits
//! pair. Bound enforcement corrects values silently in the output and
//! surfaces each correction as a warning event.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::config::OperatorConfig;
use crate::crd::{ResourceDescription, Resources};
use crate::events::EventSink;
use crate::resources::quantity::parse_quantity;
use crate::resources::GenerateError;

/// Kind of container being resolved. Sidecars share the defaulting rules but
/// are exempt from the minimum-limit floor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Postgres,
    Sidecar,
}

/// Resolve requests and limits for one container.
///
/// Unset requests and limits fall back to the configured defaults; hugepages
/// are never defaulted and pass through only when declared. A resource with
/// neither an override nor a default stays absent from the output. After
/// defaulting, configured bounds are enforced and finally every limit is
/// raised to its request if the request ended up higher. Requests are never
/// lowered to fit a limit.
pub fn generate_resource_requirements(
    container: &str,
    spec: Option<&Resources>,
    config: &OperatorConfig,
    kind: ContainerKind,
    events: &dyn EventSink,
) -> Result<ResourceRequirements, GenerateError> {
    let spec_requests = spec.and_then(|r| r.requests.as_ref());
    let spec_limits = spec.and_then(|r| r.limits.as_ref());

    let mut requests = resolve_block(
        spec_requests,
        configured(&config.default_cpu_request),
        configured(&config.default_memory_request),
    );
    let mut limits = resolve_block(
        spec_limits,
        configured(&config.default_cpu_limit),
        configured(&config.default_memory_limit),
    );

    if kind == ContainerKind::Postgres {
        enforce_min_limit(&mut limits, "cpu", &config.min_cpu_limit, container, events)?;
        enforce_min_limit(&mut limits, "memory", &config.min_memory_limit, container, events)?;
    }

    enforce_max_request(&mut requests, "cpu", &config.max_cpu_request, container, events)?;
    enforce_max_request(&mut requests, "memory", &config.max_memory_request, container, events)?;

    if config.set_memory_request_to_limit {
        if let Some(limit) = limits.get("memory").cloned() {
            requests.insert("memory".to_string(), limit);
            enforce_max_request(&mut requests, "memory", &config.max_memory_request, container, events)?;
        }
    }

    // The invariant is request <= limit; a request above its limit raises the
    // limit instead of lowering the request.
    for (resource, request) in &requests {
        if let Some(limit) = limits.get(resource) {
            if parse_quantity(request)? > parse_quantity(limit)? {
                limits.insert(resource.clone(), request.clone());
            }
        }
    }

    Ok(ResourceRequirements {
        requests: to_quantities(requests),
        limits: to_quantities(limits),
        ..Default::default()
    })
}

/// Treat an absent, empty, or "0" configured value as no default at all.
fn configured(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() && *v != "0")
}

fn resolve_block(
    spec: Option<&ResourceDescription>,
    default_cpu: Option<&str>,
    default_memory: Option<&str>,
) -> BTreeMap<String, String> {
    let mut block = BTreeMap::new();

    let cpu = spec
        .and_then(|d| d.cpu.as_deref())
        .or(default_cpu);
    if let Some(cpu) = cpu {
        block.insert("cpu".to_string(), cpu.to_string());
    }

    let memory = spec
        .and_then(|d| d.memory.as_deref())
        .or(default_memory);
    if let Some(memory) = memory {
        block.insert("memory".to_string(), memory.to_string());
    }

    // Hugepages are only ever taken from the manifest.
    if let Some(hugepages) = spec.and_then(|d| d.hugepages_2mi.as_deref()) {
        block.insert("hugepages-2Mi".to_string(), hugepages.to_string());
    }
    if let Some(hugepages) = spec.and_then(|d| d.hugepages_1gi.as_deref()) {
        block.insert("hugepages-1Gi".to_string(), hugepages.to_string());
    }

    block
}

fn enforce_min_limit(
    limits: &mut BTreeMap<String, String>,
    resource: &str,
    min: &Option<String>,
    container: &str,
    events: &dyn EventSink,
) -> Result<(), GenerateError> {
    let Some(min) = configured(min) else {
        return Ok(());
    };
    if let Some(current) = limits.get(resource) {
        if parse_quantity(current)? < parse_quantity(min)? {
            events.warning(
                "ResourceLimit",
                &format!(
                    "{} limit of {} container is below the configured minimum, raising it from {} to {}",
                    resource, container, current, min
                ),
            );
            limits.insert(resource.to_string(), min.to_string());
        }
    }
    Ok(())
}

fn enforce_max_request(
    requests: &mut BTreeMap<String, String>,
    resource: &str,
    max: &Option<String>,
    container: &str,
    events: &dyn EventSink,
) -> Result<(), GenerateError> {
    let Some(max) = configured(max) else {
        return Ok(());
    };
    if let Some(current) = requests.get(resource) {
        if parse_quantity(current)? > parse_quantity(max)? {
            events.warning(
                "ResourceRequest",
                &format!(
                    "{} request of {} container exceeds the configured maximum, capping it from {} to {}",
                    resource, container, current, max
                ),
            );
            requests.insert(resource.to_string(), max.to_string());
        }
    }
    Ok(())
}

fn to_quantities(block: BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if block.is_empty() {
        return None;
    }
    Some(block.into_iter().map(|(k, v)| (k, Quantity(v))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingEventSink;

    fn quantity_str(map: &Option<BTreeMap<String, Quantity>>, key: &str) -> Option<String> {
        map.as_ref().and_then(|m| m.get(key)).map(|q| q.0.clone())
    }

    fn spec(requests: Option<ResourceDescription>, limits: Option<ResourceDescription>) -> Resources {
        Resources { requests, limits }
    }

    fn description(cpu: Option<&str>, memory: Option<&str>) -> ResourceDescription {
        ResourceDescription {
            cpu: cpu.map(str::to_string),
            memory: memory.map(str::to_string),
            hugepages_2mi: None,
            hugepages_1gi: None,
        }
    }

    #[test]
    fn test_defaults_applied_when_spec_absent() {
        let config = OperatorConfig::default();
        let sink = RecordingEventSink::default();
        let resolved = generate_resource_requirements(
            "postgres",
            None,
            &config,
            ContainerKind::Postgres,
            &sink,
        )
        .unwrap();

        assert_eq!(quantity_str(&resolved.requests, "cpu").as_deref(), Some("100m"));
        assert_eq!(quantity_str(&resolved.requests, "memory").as_deref(), Some("100Mi"));
        assert_eq!(quantity_str(&resolved.limits, "cpu").as_deref(), Some("1"));
        assert_eq!(quantity_str(&resolved.limits, "memory").as_deref(), Some("500Mi"));
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unset_default_leaves_resource_absent() {
        let mut config = OperatorConfig::default();
        config.default_cpu_request = Some("0".to_string());
        config.default_cpu_limit = None;
        config.default_memory_request = Some(String::new());
        config.default_memory_limit = None;
        let sink = RecordingEventSink::default();

        let resolved = generate_resource_requirements(
            "postgres",
            None,
            &config,
            ContainerKind::Postgres,
            &sink,
        )
        .unwrap();

        assert!(resolved.requests.is_none());
        assert!(resolved.limits.is_none());
    }

    #[test]
    fn test_min_limit_raised_with_event() {
        let mut config = OperatorConfig::default();
        config.min_cpu_limit = Some("500m".to_string());
        config.min_memory_limit = Some("1Gi".to_string());
        let sink = RecordingEventSink::default();

        let manifest = spec(None, Some(description(Some("200m"), Some("256Mi"))));
        let resolved = generate_resource_requirements(
            "postgres",
            Some(&manifest),
            &config,
            ContainerKind::Postgres,
            &sink,
        )
        .unwrap();

        assert_eq!(quantity_str(&resolved.limits, "cpu").as_deref(), Some("500m"));
        assert_eq!(quantity_str(&resolved.limits, "memory").as_deref(), Some("1Gi"));
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(reason, _)| reason == "ResourceLimit"));
    }

    #[test]
    fn test_sidecars_exempt_from_min_limit() {
        let mut config = OperatorConfig::default();
        config.min_cpu_limit = Some("500m".to_string());
        let sink = RecordingEventSink::default();

        let manifest = spec(None, Some(description(Some("200m"), None)));
        let resolved = generate_resource_requirements(
            "scraper",
            Some(&manifest),
            &config,
            ContainerKind::Sidecar,
            &sink,
        )
        .unwrap();

        assert_eq!(quantity_str(&resolved.limits, "cpu").as_deref(), Some("200m"));
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_max_request_capped_with_event() {
        let mut config = OperatorConfig::default();
        config.max_cpu_request = Some("1".to_string());
        let sink = RecordingEventSink::default();

        let manifest = spec(Some(description(Some("2"), None)), None);
        let resolved = generate_resource_requirements(
            "postgres",
            Some(&manifest),
            &config,
            ContainerKind::Postgres,
            &sink,
        )
        .unwrap();

        assert_eq!(quantity_str(&resolved.requests, "cpu").as_deref(), Some("1"));
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "ResourceRequest");
    }

    #[test]
    fn test_set_memory_request_to_limit_respects_max() {
        let mut config = OperatorConfig::default();
        config.set_memory_request_to_limit = true;
        config.max_memory_request = Some("1Gi".to_string());
        let sink = RecordingEventSink::default();

        let manifest = spec(
            Some(description(None, Some("100Mi"))),
            Some(description(None, Some("2Gi"))),
        );
        let resolved = generate_resource_requirements(
            "postgres",
            Some(&manifest),
            &config,
            ContainerKind::Postgres,
            &sink,
        )
        .unwrap();

        // Overwritten to the limit, then capped by the max request bound.
        assert_eq!(quantity_str(&resolved.requests, "memory").as_deref(), Some("1Gi"));
        assert_eq!(quantity_str(&resolved.limits, "memory").as_deref(), Some("2Gi"));
    }

    #[test]
    fn test_request_never_exceeds_limit() {
        let config = OperatorConfig::default();
        let sink = RecordingEventSink::default();

        let manifest = spec(
            Some(description(Some("2"), Some("2Gi"))),
            Some(description(Some("500m"), Some("1Gi"))),
        );
        let resolved = generate_resource_requirements(
            "postgres",
            Some(&manifest),
            &config,
            ContainerKind::Postgres,
            &sink,
        )
        .unwrap();

        for (resource, request) in resolved.requests.as_ref().unwrap() {
            let limit = resolved.limits.as_ref().unwrap().get(resource).unwrap();
            assert!(
                parse_quantity(&request.0).unwrap() <= parse_quantity(&limit.0).unwrap(),
                "{} request {} exceeds limit {}",
                resource,
                request.0,
                limit.0
            );
        }
        // Limits were raised to the requests, not the other way around.
        assert_eq!(quantity_str(&resolved.limits, "cpu").as_deref(), Some("2"));
        assert_eq!(quantity_str(&resolved.limits, "memory").as_deref(), Some("2Gi"));
    }

    #[test]
    fn test_hugepages_pass_through_without_defaulting() {
        let config = OperatorConfig::default();
        let sink = RecordingEventSink::default();

        let manifest = spec(
            Some(ResourceDescription {
                cpu: None,
                memory: None,
                hugepages_2mi: Some("128Mi".to_string()),
                hugepages_1gi: None,
            }),
            Some(ResourceDescription {
                cpu: None,
                memory: None,
                hugepages_2mi: Some("128Mi".to_string()),
                hugepages_1gi: None,
            }),
        );
        let resolved = generate_resource_requirements(
            "postgres",
            Some(&manifest),
            &config,
            ContainerKind::Postgres,
            &sink,
        )
        .unwrap();

        assert_eq!(
            quantity_str(&resolved.requests, "hugepages-2Mi").as_deref(),
            Some("128Mi")
        );
        assert!(quantity_str(&resolved.requests, "hugepages-1Gi").is_none());
        assert!(quantity_str(&resolved.limits, "hugepages-1Gi").is_none());
    }

    #[test]
    fn test_unparsable_bound_is_config_error() {
        let mut config = OperatorConfig::default();
        config.min_cpu_limit = Some("lots".to_string());
        let sink = RecordingEventSink::default();

        let result = generate_resource_requirements(
            "postgres",
            None,
            &config,
            ContainerKind::Postgres,
            &sink,
        );
        assert!(matches!(result, Err(GenerateError::UnparsableQuantity(_))));
    }
}
