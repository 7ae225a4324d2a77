//! Loading gateway policies from disk.

use crate::model::policy::GatewayPolicy;
use crate::policy::validate_policy;
use crate::runner::{RunnerError, RunnerResult};
use std::fs;
use std::path::Path;

/// Serialization format of a policy document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyFormat {
    Json,
    Yaml,
}

impl PolicyFormat {
    /// `.yaml` and `.yml` files are YAML; everything else is JSON.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::Yaml
            }
            _ => Self::Json,
        }
    }
}

/// Parse a policy document. Missing fields take their defaults.
pub fn parse_policy(data: &str, format: PolicyFormat) -> RunnerResult<GatewayPolicy> {
    match format {
        PolicyFormat::Json => serde_json::from_str(data).map_err(|err| {
            RunnerError::config(
                format!("failed to parse policy json: {err}"),
                serde_json::json!({ "line": err.line(), "column": err.column() }),
            )
        }),
        PolicyFormat::Yaml => serde_yml::from_str(data).map_err(|err| {
            RunnerError::config(format!("failed to parse policy yaml: {err}"), None)
        }),
    }
}

/// Read and parse a policy file. The result is not yet validated.
pub fn load_policy_file(path: &Path) -> RunnerResult<GatewayPolicy> {
    let data = fs::read_to_string(path).map_err(|err| {
        RunnerError::io(
            format!("failed to read policy file {}", path.display()),
            err,
        )
    })?;
    let policy = parse_policy(&data, PolicyFormat::from_path(path)).map_err(|mut err| {
        err.context = Some(match err.context.take() {
            Some(serde_json::Value::Object(mut map)) => {
                map.insert(
                    "path".to_string(),
                    serde_json::Value::from(path.display().to_string()),
                );
                serde_json::Value::Object(map)
            }
            _ => serde_json::json!({ "path": path.display().to_string() }),
        });
        err
    })?;
    tracing::debug!(
        path = %path.display(),
        tools = policy.allowed_tools.len(),
        "loaded policy file"
    );
    Ok(policy)
}

/// Load a policy file and validate it.
pub fn check_policy_file(path: &Path) -> RunnerResult<GatewayPolicy> {
    let policy = load_policy_file(path)?;
    validate_policy(&policy)?;
    Ok(policy)
}

/// The policy at `path`, or the default policy when no path is given.
pub fn resolve_policy(path: Option<&Path>) -> RunnerResult<GatewayPolicy> {
    match path {
        Some(path) => load_policy_file(path),
        None => Ok(GatewayPolicy::default()),
    }
}
