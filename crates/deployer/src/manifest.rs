//! Edits to deployment manifests: kustomization image tags, the cache
//! prefix in companion ConfigMaps, and Job templates.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use serde_yaml::{Mapping, Value};

use crate::error::{DeployError, Result};

const CACHE_PREFIX_KEY: &str = "MEMCACHED_PREFIX";

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

fn parse_mapping(raw: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Value>(raw)? {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        _ => Err(DeployError::Config("manifest is not a YAML mapping".to_string())),
    }
}

/// `newTag` of the kustomization image named `image`, if listed.
pub fn image_tag(raw: &str, image: &str) -> Result<Option<String>> {
    let doc = parse_mapping(raw)?;
    let tag = doc
        .get(key("images"))
        .and_then(Value::as_sequence)
        .and_then(|images| {
            images
                .iter()
                .find(|i| i.get("name").and_then(Value::as_str) == Some(image))
        })
        .and_then(|i| i.get("newTag"))
        .and_then(|t| match t {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    Ok(tag)
}

/// Set the `newTag` of `image`, appending an entry if it is not listed.
pub fn set_image_tag(raw: &str, image: &str, tag: &str) -> Result<String> {
    let mut doc = parse_mapping(raw)?;

    if !doc.contains_key("images") {
        doc.insert(key("images"), Value::Sequence(Vec::new()));
    }
    let Some(Value::Sequence(images)) = doc.get_mut("images") else {
        return Err(DeployError::Config(
            "kustomization images is not a list".to_string(),
        ));
    };

    match images
        .iter_mut()
        .find(|i| i.get("name").and_then(Value::as_str) == Some(image))
        .and_then(Value::as_mapping_mut)
    {
        Some(entry) => {
            entry.insert(key("newTag"), key(tag));
        }
        None => {
            let mut entry = Mapping::new();
            entry.insert(key("name"), key(image));
            entry.insert(key("newTag"), key(tag));
            images.push(Value::Mapping(entry));
        }
    }

    Ok(serde_yaml::to_string(&doc)?)
}

/// Path of the ConfigMap that sits next to a kustomization file.
pub fn companion_configmap_path(path: &str) -> Option<String> {
    ["kustomization.yaml", "kustomization.yml"]
        .iter()
        .find_map(|name| path.strip_suffix(name))
        .map(|dir| format!("{dir}configmap.yaml"))
}

/// Refresh the cache prefix so caches are invalidated on deploy.
///
/// Returns `None` when the ConfigMap carries no cache prefix.
pub fn touch_cache_prefix(raw: &str, now: DateTime<Utc>) -> Result<Option<String>> {
    let mut doc = parse_mapping(raw)?;
    let Some(data) = doc.get_mut(key("data")).and_then(Value::as_mapping_mut) else {
        return Ok(None);
    };
    if !data.contains_key(key(CACHE_PREFIX_KEY)) {
        return Ok(None);
    }
    data.insert(
        key(CACHE_PREFIX_KEY),
        key(&now.format("%Y-%m-%dT%H:%M:%S").to_string()),
    );
    Ok(Some(serde_yaml::to_string(&doc)?))
}

/// Build a runnable Job from a template.
///
/// The name gets `-<suffix>` so every run is unique, the namespace defaults
/// to `default`, and containers running `repository` are pinned to `tag`.
pub fn prepare_job(raw: &str, repository: &str, tag: &str, suffix: &str) -> Result<Job> {
    let mut job: Job = serde_yaml::from_str(raw)?;

    let base = job
        .metadata
        .name
        .clone()
        .ok_or_else(|| DeployError::Config("job manifest has no metadata.name".to_string()))?;
    job.metadata.name = Some(format!("{base}-{suffix}"));
    if job.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
        job.metadata.namespace = Some("default".to_string());
    }
    job.metadata.resource_version = None;

    let containers = job
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .map(|p| &mut p.containers);
    for container in containers.into_iter().flatten() {
        if container.image.as_deref() == Some(repository) {
            container.image = Some(format!("{repository}:{tag}"));
        }
    }

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KUSTOMIZATION: &str = r"
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
resources:
  - ../../base
images:
  - name: ghcr.io/acme/api
    newTag: 9f9f9f9
";

    #[test]
    fn reads_image_tag() {
        assert_eq!(
            image_tag(KUSTOMIZATION, "ghcr.io/acme/api").unwrap().as_deref(),
            Some("9f9f9f9")
        );
        assert_eq!(image_tag(KUSTOMIZATION, "ghcr.io/acme/web").unwrap(), None);
    }

    #[test]
    fn rewrites_existing_image_and_keeps_other_keys() {
        let updated = set_image_tag(KUSTOMIZATION, "ghcr.io/acme/api", "a1b2c3d").unwrap();
        assert_eq!(
            image_tag(&updated, "ghcr.io/acme/api").unwrap().as_deref(),
            Some("a1b2c3d")
        );
        assert!(updated.contains("../../base"));
    }

    #[test]
    fn appends_missing_image() {
        let updated = set_image_tag("resources: []\n", "ghcr.io/acme/api", "a1b2c3d").unwrap();
        assert_eq!(
            image_tag(&updated, "ghcr.io/acme/api").unwrap().as_deref(),
            Some("a1b2c3d")
        );
    }

    #[test]
    fn companion_path() {
        assert_eq!(
            companion_configmap_path("overlays/prod/kustomization.yaml").as_deref(),
            Some("overlays/prod/configmap.yaml")
        );
        assert_eq!(companion_configmap_path("jobs/migrate.yaml"), None);
    }

    #[test]
    fn cache_prefix_only_touched_when_present() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let with_prefix = "data:\n  MEMCACHED_PREFIX: old\n  OTHER: x\n";
        let touched = touch_cache_prefix(with_prefix, now).unwrap().unwrap();
        assert!(touched.contains("2024-05-01T09:30:00"));
        assert!(touched.contains("OTHER"));

        assert_eq!(touch_cache_prefix("data:\n  OTHER: x\n", now).unwrap(), None);
    }

    #[test]
    fn job_template_is_pinned_and_renamed() {
        let raw = r"
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: app
          image: ghcr.io/acme/api
        - name: proxy
          image: envoyproxy/envoy:v1.30
";
        let job = prepare_job(raw, "ghcr.io/acme/api", "a1b2c3d", "x7k2p9q0ab").unwrap();
        assert_eq!(job.metadata.name.as_deref(), Some("migrate-x7k2p9q0ab"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("default"));
        let containers = &job.spec.unwrap().template.spec.unwrap().containers;
        assert_eq!(containers[0].image.as_deref(), Some("ghcr.io/acme/api:a1b2c3d"));
        assert_eq!(containers[1].image.as_deref(), Some("envoyproxy/envoy:v1.30"));
    }
}
