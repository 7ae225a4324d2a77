use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::model::Mode;

/// Current policy format version.
pub const POLICY_VERSION: u32 = 1;

/// Tools permitted by the default policy.
pub const DEFAULT_ALLOWED_TOOLS: &[&str] = &["kubectl", "helm", "terraform", "git", "aws", "docker"];

/// Substrings that deny a run under the default policy.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &["delete namespace kube-system", "rm -rf /"];

/// Context label used when a request names none.
pub const DEFAULT_CONTEXT: &str = "pi5";

/// Variables passed through from the gateway's own environment by default.
///
/// Tools need `PATH` to resolve helpers and their config-location variables
/// to find kubeconfigs and profiles. Credentials are never on this list.
pub const DEFAULT_INHERITED_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TZ",
    "TMPDIR",
    "KUBECONFIG",
    "AWS_PROFILE",
    "AWS_REGION",
    "AWS_DEFAULT_REGION",
    "AWS_CONFIG_FILE",
    "DOCKER_HOST",
    "DOCKER_CONFIG",
    "HELM_CONFIG_HOME",
    "HELM_CACHE_HOME",
    "HELM_DATA_HOME",
    "TF_CLI_CONFIG_FILE",
];

/// Configuration of the execution gateway.
///
/// The allow-set and deny patterns are plain data so operators can change
/// them per environment without touching the validator. Missing fields take
/// the defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayPolicy {
    /// Policy format version for compatibility checking.
    pub policy_version: u32,
    /// Tool names that may be executed.
    pub allowed_tools: BTreeSet<String>,
    /// Case-insensitive substrings that deny a run when found in the
    /// space-joined command line.
    pub deny_patterns: Vec<String>,
    /// When set, only these modes may run. `None` keeps mode advisory.
    pub allowed_modes: Option<Vec<Mode>>,
    /// Context recorded for requests that do not name one.
    pub default_context: String,
    /// Environment handed to tools.
    pub env: EnvPolicy,
    /// Timeouts and output limits.
    pub budgets: Budgets,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            policy_version: POLICY_VERSION,
            allowed_tools: DEFAULT_ALLOWED_TOOLS
                .iter()
                .map(|tool| (*tool).to_string())
                .collect(),
            deny_patterns: DEFAULT_DENY_PATTERNS
                .iter()
                .map(|pattern| (*pattern).to_string())
                .collect(),
            allowed_modes: None,
            default_context: DEFAULT_CONTEXT.to_string(),
            env: EnvPolicy::default(),
            budgets: Budgets::default(),
        }
    }
}

impl GatewayPolicy {
    #[must_use]
    pub fn allows_tool(&self, tool: &str) -> bool {
        self.allowed_tools.contains(tool)
    }

    #[must_use]
    pub fn allows_mode(&self, mode: Mode) -> bool {
        self.allowed_modes
            .as_ref()
            .map_or(true, |modes| modes.contains(&mode))
    }
}

/// Environment variable policy.
///
/// Tools start from an empty environment. Allowlisted variables are copied
/// from the gateway's environment when `inherit` is set, then request
/// overrides are merged on top.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvPolicy {
    /// Copy allowlisted variables from the gateway's environment.
    pub inherit: bool,
    /// Variable names copied when `inherit` is set.
    pub allowlist: Vec<String>,
    /// Extra variable names requests may not override, on top of the
    /// built-in injection list.
    pub blocked: Vec<String>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        Self {
            inherit: true,
            allowlist: DEFAULT_INHERITED_ENV
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            blocked: Vec::new(),
        }
    }
}

/// Resource budgets for a single run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Budgets {
    /// Timeout ceiling in milliseconds.
    pub max_runtime_ms: u64,
    /// Time between SIGTERM and SIGKILL when a run is terminated.
    pub termination_grace_ms: u64,
    /// Bytes kept per output stream; the rest is drained and dropped.
    pub max_output_bytes: u64,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_runtime_ms: 600_000,
            termination_grace_ms: 2_000,
            max_output_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Budgets {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.max_runtime_ms)
    }

    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

// =============================================================================
// PolicyBuilder
// =============================================================================

/// Fluent builder for [`GatewayPolicy`].
///
/// Starts from the default policy; `allowed_tools` and `deny_patterns`
/// replace the defaults, `add_*` methods extend them.
///
/// # Example
///
/// ```
/// use openclaw::model::policy::PolicyBuilder;
///
/// let policy = PolicyBuilder::new()
///     .allowed_tools(vec!["kubectl".into()])
///     .add_deny_pattern("delete ns".into())
///     .max_runtime_ms(30_000)
///     .build();
/// assert!(policy.allows_tool("kubectl"));
/// assert!(!policy.allows_tool("helm"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    policy: GatewayPolicy,
}

impl PolicyBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Allow-set and Deny Patterns
    // =========================================================================

    /// Replace the allow-set.
    #[must_use]
    pub fn allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.policy.allowed_tools = tools.into_iter().collect();
        self
    }

    #[must_use]
    pub fn add_tool(mut self, tool: String) -> Self {
        self.policy.allowed_tools.insert(tool);
        self
    }

    /// Replace the deny patterns.
    #[must_use]
    pub fn deny_patterns(mut self, patterns: Vec<String>) -> Self {
        self.policy.deny_patterns = patterns;
        self
    }

    #[must_use]
    pub fn add_deny_pattern(mut self, pattern: String) -> Self {
        self.policy.deny_patterns.push(pattern);
        self
    }

    /// Restrict runs to the given modes.
    #[must_use]
    pub fn allowed_modes(mut self, modes: Vec<Mode>) -> Self {
        self.policy.allowed_modes = Some(modes);
        self
    }

    #[must_use]
    pub fn default_context(mut self, context: String) -> Self {
        self.policy.default_context = context;
        self
    }

    // =========================================================================
    // Environment
    // =========================================================================

    /// Start tools from an empty environment plus request overrides.
    #[must_use]
    pub fn no_inherited_env(mut self) -> Self {
        self.policy.env.inherit = false;
        self
    }

    #[must_use]
    pub fn env_allowlist(mut self, vars: Vec<String>) -> Self {
        self.policy.env.inherit = true;
        self.policy.env.allowlist = vars;
        self
    }

    #[must_use]
    pub fn block_env_var(mut self, var: String) -> Self {
        self.policy.env.blocked.push(var);
        self
    }

    // =========================================================================
    // Budgets
    // =========================================================================

    #[must_use]
    pub fn max_runtime_ms(mut self, ms: u64) -> Self {
        self.policy.budgets.max_runtime_ms = ms;
        self
    }

    #[must_use]
    pub fn termination_grace_ms(mut self, ms: u64) -> Self {
        self.policy.budgets.termination_grace_ms = ms;
        self
    }

    #[must_use]
    pub fn max_output_bytes(mut self, bytes: u64) -> Self {
        self.policy.budgets.max_output_bytes = bytes;
        self
    }

    /// Build the policy. Validation happens when a validator or gateway is
    /// constructed from it.
    #[must_use]
    pub fn build(self) -> GatewayPolicy {
        self.policy
    }

    #[must_use]
    pub fn as_policy(&self) -> &GatewayPolicy {
        &self.policy
    }
}
