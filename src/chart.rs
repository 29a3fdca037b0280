//! Chart directory inputs: per-environment values and dependency checks.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const BLUEGREEN_DEPENDENCY: &str = "blue-green-microservice";
pub const BLUEGREEN_ALIAS: &str = "bluegreen";
pub const MICROSERVICE_DEPENDENCY: &str = "microservice";

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("expected to find chart values yaml at {0}, but found nothing")]
    MissingValues(PathBuf),

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot set {path}: {segment} is not a map")]
    ValuesPath { path: String, segment: String },

    #[error("dependency {name}{} must be present in {} to deploy this chart", alias_note(.alias), .path.display())]
    MissingDependency {
        name: &'static str,
        alias: Option<&'static str>,
        path: PathBuf,
    },
}

fn alias_note(alias: &Option<&'static str>) -> String {
    alias.map(|a| format!(" aliased to {a}")).unwrap_or_default()
}

/// A value to set at a dotted path such as `deployment.colour`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEdit {
    pub path: String,
    pub value: Value,
}

impl ValueEdit {
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        ValueEdit {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// `{chart_dir}/{target_env}.yaml`
pub fn values_path(chart_dir: &Path, target_env: &str) -> PathBuf {
    chart_dir.join(format!("{target_env}.yaml"))
}

pub fn chart_yaml_path(chart_dir: &Path) -> PathBuf {
    chart_dir.join("Chart.yaml")
}

pub fn requirements_yaml_path(chart_dir: &Path) -> PathBuf {
    chart_dir.join("requirements.yaml")
}

/// Load a values file as a JSON value tree
///
/// An empty file yields an empty map.
pub fn load_values(path: &Path) -> Result<Value, ChartError> {
    if !path.is_file() {
        return Err(ChartError::MissingValues(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ChartError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let values: Value = serde_yaml::from_str(&raw).map_err(|source| ChartError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Loaded chart values");
    Ok(match values {
        Value::Null => Value::Object(Map::new()),
        other => other,
    })
}

/// Copy of `values` with every edit applied
///
/// Missing intermediate maps are created. Descending through a value that is
/// not a map is an error.
pub fn apply_edits(values: &Value, edits: &[ValueEdit]) -> Result<Value, ChartError> {
    let mut result = match values {
        Value::Object(_) => values.clone(),
        _ => Value::Object(Map::new()),
    };

    for edit in edits {
        let mut segments = edit.path.split('.').peekable();
        let mut node = &mut result;
        while let Some(segment) = segments.next() {
            let Value::Object(map) = node else {
                return Err(ChartError::ValuesPath {
                    path: edit.path.clone(),
                    segment: segment.to_string(),
                });
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), edit.value.clone());
                break;
            }
            node = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }

    Ok(result)
}

/// Whether the chart file at `path` lists a dependency named `name`
///
/// With `alias` set the dependency must also carry that alias. A missing or
/// unreadable file counts as "no".
pub fn has_dependency(path: &Path, name: &str, alias: Option<&str>) -> bool {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(chart) = serde_yaml::from_str::<serde_yaml::Value>(&raw) else {
        return false;
    };
    let Some(dependencies) = chart.get("dependencies").and_then(|d| d.as_sequence()) else {
        return false;
    };

    dependencies.iter().any(|dep| {
        let dep_name = dep.get("name").and_then(|n| n.as_str());
        let dep_alias = dep.get("alias").and_then(|a| a.as_str());
        dep_name == Some(name) && alias.map_or(true, |a| dep_alias == Some(a))
    })
}

/// Require the blue-green dependency, in requirements.yaml or Chart.yaml
pub fn ensure_bluegreen_chart(chart_dir: &Path) -> Result<(), ChartError> {
    let requirements = requirements_yaml_path(chart_dir);
    let chart = chart_yaml_path(chart_dir);
    if has_dependency(&requirements, BLUEGREEN_DEPENDENCY, Some(BLUEGREEN_ALIAS))
        || has_dependency(&chart, BLUEGREEN_DEPENDENCY, Some(BLUEGREEN_ALIAS))
    {
        return Ok(());
    }
    Err(ChartError::MissingDependency {
        name: BLUEGREEN_DEPENDENCY,
        alias: Some(BLUEGREEN_ALIAS),
        path: requirements,
    })
}

pub fn ensure_microservice_chart(chart_dir: &Path) -> Result<(), ChartError> {
    let chart = chart_yaml_path(chart_dir);
    if has_dependency(&chart, MICROSERVICE_DEPENDENCY, None) {
        return Ok(());
    }
    Err(ChartError::MissingDependency {
        name: MICROSERVICE_DEPENDENCY,
        alias: None,
        path: chart,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    const BLUEGREEN_REQUIREMENTS: &str = "\
dependencies:
  - name: blue-green-microservice
    version: 1.2.0
    repository: https://charts.example.com
    alias: bluegreen
";

    #[test]
    fn test_paths() {
        let dir = Path::new("/some/dir");
        assert_eq!(values_path(dir, "prod"), PathBuf::from("/some/dir/prod.yaml"));
        assert_eq!(chart_yaml_path(dir), PathBuf::from("/some/dir/Chart.yaml"));
        assert_eq!(
            requirements_yaml_path(dir),
            PathBuf::from("/some/dir/requirements.yaml")
        );
    }

    #[test]
    fn test_load_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = values_path(dir.path(), "staging");
        fs::write(&path, "replicas: 2\ndeployment:\n  image: checkout\n").unwrap();

        let values = load_values(&path).unwrap();

        assert_eq!(values["replicas"], json!(2));
        assert_eq!(values["deployment"]["image"], json!("checkout"));
    }

    #[test]
    fn test_missing_values_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_values(&values_path(dir.path(), "prod")).unwrap_err();
        assert!(matches!(err, ChartError::MissingValues(_)));
    }

    #[test]
    fn test_empty_values_file_is_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = values_path(dir.path(), "prod");
        fs::write(&path, "").unwrap();
        assert_eq!(load_values(&path).unwrap(), json!({}));
    }

    #[test]
    fn test_apply_edits_creates_and_overrides() {
        let base = json!({ "deployment": { "image": "checkout", "colour": "green" } });

        let edited = apply_edits(
            &base,
            &[
                ValueEdit::new("is_service_release", false),
                ValueEdit::new("deployment.colour", "blue"),
                ValueEdit::new("deployment.version", "1.4.0"),
                ValueEdit::new("service.selector.colour", "blue"),
            ],
        )
        .unwrap();

        assert_eq!(
            edited,
            json!({
                "is_service_release": false,
                "deployment": { "image": "checkout", "colour": "blue", "version": "1.4.0" },
                "service": { "selector": { "colour": "blue" } }
            })
        );
        // Input untouched
        assert_eq!(base["deployment"]["colour"], json!("green"));
    }

    #[test]
    fn test_apply_edits_through_scalar_fails() {
        let base = json!({ "deployment": "not-a-map" });
        let err = apply_edits(&base, &[ValueEdit::new("deployment.version", "1.0.0")]).unwrap_err();
        assert!(matches!(err, ChartError::ValuesPath { .. }));
    }

    #[test]
    fn test_has_dependency_with_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = requirements_yaml_path(dir.path());
        fs::write(&path, BLUEGREEN_REQUIREMENTS).unwrap();

        assert!(has_dependency(&path, "blue-green-microservice", Some("bluegreen")));
        assert!(has_dependency(&path, "blue-green-microservice", None));
        assert!(!has_dependency(&path, "blue-green-microservice", Some("other")));
        assert!(!has_dependency(&path, "microservice", None));
    }

    #[test]
    fn test_has_dependency_missing_or_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_dependency(&dir.path().join("nope.yaml"), "x", None));

        let path = chart_yaml_path(dir.path());
        fs::write(&path, "name: checkout\nversion: 0.1.0\n").unwrap();
        assert!(!has_dependency(&path, "microservice", None));
    }

    #[test]
    fn test_ensure_bluegreen_chart() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_bluegreen_chart(dir.path()).is_err());

        fs::write(chart_yaml_path(dir.path()), BLUEGREEN_REQUIREMENTS).unwrap();
        assert!(ensure_bluegreen_chart(dir.path()).is_ok());
    }

    #[test]
    fn test_ensure_microservice_chart() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            chart_yaml_path(dir.path()),
            "apiVersion: v2\nname: checkout\ndependencies:\n  - name: microservice\n    version: 3.0.0\n",
        )
        .unwrap();
        assert!(ensure_microservice_chart(dir.path()).is_ok());

        let err = ensure_microservice_chart(tempfile::tempdir().unwrap().path()).unwrap_err();
        assert!(err.to_string().contains("microservice"));
    }
}
