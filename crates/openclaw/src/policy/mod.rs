//! Policy gate: decides whether a run request may execute.
//!
//! The validator is pure. It holds an immutable [`GatewayPolicy`] and never
//! touches the filesystem or the process environment, so one instance can be
//! shared across threads.

use crate::model::policy::{EnvPolicy, GatewayPolicy, POLICY_VERSION};
use crate::model::{ErrorInfo, RunRequest};
use crate::runner::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Environment variables that could enable library injection or change how
/// the tool's own interpreter loads code.
/// These can never be overridden by a request or inherited via the allowlist.
/// Checking is case-insensitive to prevent bypass via mixed-case variants.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    // Linux library injection
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    // macOS library injection
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "DYLD_FALLBACK_LIBRARY_PATH",
    "DYLD_ROOT_PATH",
    // Language paths
    "PYTHONPATH",
    "RUBYLIB",
    "PERL5LIB",
    "NODE_OPTIONS",
    "CLASSPATH",
    // Shell/system
    "IFS",
    "BASH_ENV",
    "ENV",
    "GMON_OUT_PREFIX",
    "MALLOC_CONF",
];

/// Variables the gateway may pass through from its own environment but a
/// request may never set. `PATH` decides which binary an allowlisted tool
/// name resolves to.
pub const PROTECTED_ENV_VARS: &[&str] = &["PATH"];

fn is_dangerous_env_var(key: &str) -> bool {
    DANGEROUS_ENV_VARS
        .iter()
        .any(|d| d.eq_ignore_ascii_case(key))
}

fn is_protected_env_var(key: &str) -> bool {
    PROTECTED_ENV_VARS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(key))
}

/// Which rule rejected a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialRule {
    ToolAllowlist,
    DenyPattern,
    Mode,
    EnvOverride,
}

impl DenialRule {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolAllowlist => "tool_allowlist",
            Self::DenyPattern => "deny_pattern",
            Self::Mode => "mode",
            Self::EnvOverride => "env_override",
        }
    }
}

impl fmt::Display for DenialRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected request and why.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub rule: DenialRule,
    /// Human-readable reason, surfaced as the run's stderr.
    pub reason: String,
    /// Deny pattern that matched, for `deny_pattern` denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Denial {
    fn new(rule: DenialRule, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
            pattern: None,
        }
    }

    #[must_use]
    pub fn to_error(&self) -> RunnerError {
        let mut context = serde_json::json!({ "rule": self.rule.as_str() });
        if let (Some(pattern), Some(map)) = (&self.pattern, context.as_object_mut()) {
            map.insert("pattern".to_string(), serde_json::Value::from(pattern.as_str()));
        }
        RunnerError::policy_denied(self.reason.clone(), context)
    }
}

/// Outcome of a policy check. Denial is a value, not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(Denial),
}

impl Verdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Report of every rule a request (or policy) fails.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PolicyExplanation {
    pub allowed: bool,
    pub errors: Vec<ErrorInfo>,
}

/// Checks run requests against a validated [`GatewayPolicy`].
///
/// Rules run in order (tool allow-set, deny patterns, mode, environment
/// overrides) and the first failure decides the verdict.
#[derive(Clone, Debug)]
pub struct PolicyValidator {
    policy: GatewayPolicy,
    /// Deny patterns, lowercased once at construction.
    patterns: Vec<String>,
}

impl PolicyValidator {
    /// Validate `policy` and build a validator for it.
    ///
    /// # Errors
    /// - `E_CONFIG`: the policy is malformed (see [`validate_policy`])
    pub fn new(policy: GatewayPolicy) -> RunnerResult<Self> {
        validate_policy(&policy)?;
        let patterns = policy
            .deny_patterns
            .iter()
            .map(|pattern| pattern.to_lowercase())
            .collect();
        Ok(Self { policy, patterns })
    }

    #[must_use]
    pub fn policy(&self) -> &GatewayPolicy {
        &self.policy
    }

    /// Decide whether `request` may run.
    #[must_use]
    pub fn check(&self, request: &RunRequest) -> Verdict {
        let denial = self
            .check_tool(request)
            .or_else(|| self.check_patterns(request))
            .or_else(|| self.check_mode(request))
            .or_else(|| self.check_env(request));
        match denial {
            Some(denial) => {
                tracing::debug!(tool = %request.tool, rule = %denial.rule, "policy denied request");
                Verdict::Denied(denial)
            }
            None => {
                tracing::debug!(tool = %request.tool, "policy allowed request");
                Verdict::Allowed
            }
        }
    }

    /// Every rule `request` fails, in evaluation order.
    #[must_use]
    pub fn denials(&self, request: &RunRequest) -> Vec<Denial> {
        [
            self.check_tool(request),
            self.check_patterns(request),
            self.check_mode(request),
            self.check_env(request),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Explain the verdict for `request` without running it.
    #[must_use]
    pub fn explain(&self, request: &RunRequest) -> PolicyExplanation {
        let errors: Vec<ErrorInfo> = self
            .denials(request)
            .iter()
            .map(|denial| denial.to_error().to_error_info())
            .collect();
        PolicyExplanation {
            allowed: errors.is_empty(),
            errors,
        }
    }

    fn check_tool(&self, request: &RunRequest) -> Option<Denial> {
        if self.policy.allows_tool(&request.tool) {
            return None;
        }
        Some(Denial::new(
            DenialRule::ToolAllowlist,
            format!("tool not allowed: {}", request.tool),
        ))
    }

    fn check_patterns(&self, request: &RunRequest) -> Option<Denial> {
        let line = request.command_line().to_lowercase();
        let (index, _) = self
            .patterns
            .iter()
            .enumerate()
            .find(|(_, pattern)| line.contains(pattern.as_str()))?;
        let mut denial = Denial::new(
            DenialRule::DenyPattern,
            "denied by policy (dangerous command)",
        );
        denial.pattern = self.policy.deny_patterns.get(index).cloned();
        Some(denial)
    }

    fn check_mode(&self, request: &RunRequest) -> Option<Denial> {
        if self.policy.allows_mode(request.mode) {
            return None;
        }
        Some(Denial::new(
            DenialRule::Mode,
            format!("mode not allowed: {}", request.mode),
        ))
    }

    fn check_env(&self, request: &RunRequest) -> Option<Denial> {
        let overrides = request.env.as_ref()?;
        let blocked = overrides.keys().find(|key| {
            is_dangerous_env_var(key)
                || is_protected_env_var(key)
                || self
                    .policy
                    .env
                    .blocked
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(key))
        })?;
        Some(Denial::new(
            DenialRule::EnvOverride,
            format!("environment override not allowed: {blocked}"),
        ))
    }
}

/// Explain a request against a policy that may itself be invalid.
#[must_use]
pub fn explain_policy_for_request(policy: &GatewayPolicy, request: &RunRequest) -> PolicyExplanation {
    match PolicyValidator::new(policy.clone()) {
        Ok(validator) => validator.explain(request),
        Err(err) => PolicyExplanation {
            allowed: false,
            errors: vec![err.to_error_info()],
        },
    }
}

// =============================================================================
// Policy validation
// =============================================================================

pub fn validate_policy_version(policy: &GatewayPolicy) -> RunnerResult<()> {
    if policy.policy_version != POLICY_VERSION {
        return Err(RunnerError::config(
            format!(
                "unsupported policy_version {}, expected {}",
                policy.policy_version, POLICY_VERSION
            ),
            serde_json::json!({
                "received_version": policy.policy_version,
                "expected_version": POLICY_VERSION,
                "fix": format!("Set policy_version to {POLICY_VERSION}"),
            }),
        ));
    }
    Ok(())
}

pub fn validate_allowed_tools(policy: &GatewayPolicy) -> RunnerResult<()> {
    if policy.allowed_tools.is_empty() {
        return Err(RunnerError::config(
            "no tools are allowed by policy",
            serde_json::json!({ "fix": "Add at least one entry to allowed_tools" }),
        ));
    }
    if policy.allowed_tools.iter().any(|tool| tool.trim().is_empty()) {
        return Err(RunnerError::config("allowed_tools contains an empty name", None));
    }
    Ok(())
}

pub fn validate_deny_patterns(policy: &GatewayPolicy) -> RunnerResult<()> {
    // An empty pattern would match every command line.
    if let Some(index) = policy
        .deny_patterns
        .iter()
        .position(|pattern| pattern.trim().is_empty())
    {
        return Err(RunnerError::config(
            "deny_patterns contains an empty pattern",
            serde_json::json!({ "index": index }),
        ));
    }
    Ok(())
}

pub fn validate_budgets(policy: &GatewayPolicy) -> RunnerResult<()> {
    let budgets = &policy.budgets;
    if budgets.max_runtime_ms == 0 {
        return Err(RunnerError::config(
            "budgets.max_runtime_ms must be greater than zero",
            None,
        ));
    }
    if budgets.max_output_bytes == 0 {
        return Err(RunnerError::config(
            "budgets.max_output_bytes must be greater than zero",
            None,
        ));
    }
    Ok(())
}

pub fn validate_env_policy(env: &EnvPolicy) -> RunnerResult<()> {
    if let Some(key) = env.allowlist.iter().find(|key| is_dangerous_env_var(key)) {
        return Err(RunnerError::config(
            "dangerous environment variable in allowlist",
            serde_json::json!({
                "var": key,
                "blocked_vars": DANGEROUS_ENV_VARS,
                "fix": format!("Remove '{key}' from env.allowlist"),
            }),
        ));
    }
    Ok(())
}

pub fn validate_policy(policy: &GatewayPolicy) -> RunnerResult<()> {
    validate_policy_version(policy)?;
    validate_allowed_tools(policy)?;
    validate_deny_patterns(policy)?;
    if policy
        .allowed_modes
        .as_ref()
        .is_some_and(|modes| modes.is_empty())
    {
        return Err(RunnerError::config(
            "allowed_modes is empty; omit it to allow every mode",
            None,
        ));
    }
    validate_budgets(policy)?;
    validate_env_policy(&policy.env)?;
    Ok(())
}

/// Build the complete child environment.
///
/// Allowlisted variables are read through `lookup` when inheritance is on;
/// request overrides are merged on top and win, except for protected names,
/// which only ever come from the gateway's environment.
pub fn apply_env_policy<F>(
    env_policy: &EnvPolicy,
    overrides: Option<&BTreeMap<String, String>>,
    lookup: F,
) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = BTreeMap::new();
    if env_policy.inherit {
        for key in &env_policy.allowlist {
            if is_dangerous_env_var(key) {
                continue;
            }
            if let Some(value) = lookup(key) {
                env.insert(key.clone(), value);
            }
        }
    }
    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            if is_dangerous_env_var(key) || is_protected_env_var(key) {
                continue;
            }
            env.insert(key.clone(), value.clone());
        }
    }
    env
}
