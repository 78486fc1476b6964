use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pulse_core::routing::ScaffoldId;
use pulse_core::scaffold::{ScaffoldDescriptor, ScaffoldRegistry, ScaffoldRegistryError};
use thiserror::Error;

/// Scaffolds compiled into the binary, keyed by file name.
const BUILT_IN: [(&str, &str); 3] = [
    (
        "personal_health_signal.json",
        include_str!("../scaffolds/personal_health_signal.json"),
    ),
    (
        "personal_health_signal.growth.json",
        include_str!("../scaffolds/personal_health_signal.growth.json"),
    ),
    (
        "personal_health_signal.risk.json",
        include_str!("../scaffolds/personal_health_signal.risk.json"),
    ),
];

#[derive(Debug, Error)]
pub enum ScaffoldLoadError {
    #[error("failed to read scaffold directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read scaffold file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("scaffold {origin} is not a valid descriptor: {source}")]
    Parse {
        origin: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Registry(#[from] ScaffoldRegistryError),
}

pub fn built_in_descriptors() -> Result<Vec<ScaffoldDescriptor>, ScaffoldLoadError> {
    BUILT_IN
        .iter()
        .map(|(name, raw)| parse_descriptor(name, raw))
        .collect()
}

pub fn parse_descriptor(origin: &str, raw: &str) -> Result<ScaffoldDescriptor, ScaffoldLoadError> {
    serde_json::from_str(raw).map_err(|source| ScaffoldLoadError::Parse {
        origin: origin.to_string(),
        source,
    })
}

/// Read every `*.json` file in `dir`, sorted by name. Files starting with `_` are skipped.
pub fn read_directory(dir: &Path) -> Result<Vec<ScaffoldDescriptor>, ScaffoldLoadError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ScaffoldLoadError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with('_'))
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let raw = std::fs::read_to_string(&path).map_err(|source| {
                ScaffoldLoadError::ReadFile {
                    path: path.clone(),
                    source,
                }
            })?;
            parse_descriptor(&path.display().to_string(), &raw)
        })
        .collect()
}

/// Built-in scaffolds, with descriptors from `override_dir` replacing them by id.
///
/// Every descriptor is linted by the registry; a single bad file fails startup.
pub fn load_registry(override_dir: Option<&Path>) -> Result<ScaffoldRegistry, ScaffoldLoadError> {
    let mut merged: BTreeMap<ScaffoldId, ScaffoldDescriptor> = built_in_descriptors()?
        .into_iter()
        .map(|descriptor| (descriptor.id, descriptor))
        .collect();

    if let Some(dir) = override_dir {
        let overrides = read_directory(dir)?;
        let mut seen = Vec::new();
        for descriptor in overrides {
            if seen.contains(&descriptor.id) {
                return Err(ScaffoldRegistryError::Duplicate(descriptor.id).into());
            }
            seen.push(descriptor.id);
            tracing::info!(
                scaffold = descriptor.id.as_str(),
                version = descriptor.version.as_str(),
                dir = %dir.display(),
                "scaffold overridden from directory"
            );
            merged.insert(descriptor.id, descriptor);
        }
    }

    let registry = ScaffoldRegistry::from_descriptors(merged.into_values())?;
    tracing::debug!(count = registry.len(), "scaffold registry loaded");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pulse-scaffolds-{}-{}",
            std::process::id(),
            DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn built_in_scaffolds_cover_every_id_and_pass_lint() {
        let descriptors = built_in_descriptors().unwrap();
        for id in ScaffoldId::ALL {
            let descriptor = descriptors.iter().find(|d| d.id == id).unwrap();
            assert!(descriptor.lint().is_empty(), "{id}: {:?}", descriptor.lint());
            assert!(descriptor.exports_field("health_signal_summary"));
        }
        assert_eq!(load_registry(None).unwrap().len(), 3);
    }

    #[test]
    fn override_directory_replaces_by_id() {
        let dir = scratch_dir();
        let mut risk = built_in_descriptors()
            .unwrap()
            .into_iter()
            .find(|d| d.id == ScaffoldId::Risk)
            .unwrap();
        risk.version = "2.1".to_string();
        std::fs::write(dir.join("risk.json"), serde_json::to_string(&risk).unwrap()).unwrap();
        std::fs::write(dir.join("_schema.json"), "not a scaffold").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let registry = load_registry(Some(&dir)).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(ScaffoldId::Risk).unwrap().version, "2.1");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn lint_failure_rejects_the_override() {
        let dir = scratch_dir();
        let mut growth = built_in_descriptors()
            .unwrap()
            .into_iter()
            .find(|d| d.id == ScaffoldId::Growth)
            .unwrap();
        growth.guardrails.disclaimers.clear();
        std::fs::write(dir.join("growth.json"), serde_json::to_string(&growth).unwrap()).unwrap();

        let err = load_registry(Some(&dir)).unwrap_err();
        assert!(matches!(
            err,
            ScaffoldLoadError::Registry(ScaffoldRegistryError::Invalid {
                id: ScaffoldId::Growth,
                ..
            })
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn unparseable_file_names_its_origin() {
        let dir = scratch_dir();
        std::fs::write(dir.join("broken.json"), "{ \"id\": 3 }").unwrap();
        let err = load_registry(Some(&dir)).unwrap_err();
        assert!(err.to_string().contains("broken.json"), "{err}");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_directory_is_an_error() {
        let err = load_registry(Some(Path::new("/nonexistent/pulse/scaffolds"))).unwrap_err();
        assert!(matches!(err, ScaffoldLoadError::ReadDir { .. }));
    }
}
