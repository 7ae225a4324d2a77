use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared intent of a run.
///
/// The gateway records the mode with every result. It only restricts
/// execution when the policy lists `allowed_modes`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Describe what would happen.
    Explain,
    /// Dry-run or diff (default).
    #[default]
    Plan,
    /// Mutate the target environment.
    Apply,
}

impl Mode {
    /// All modes, in escalating order of impact.
    pub const ALL: [Mode; 3] = [Mode::Explain, Mode::Plan, Mode::Apply];

    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explain => "explain",
            Self::Plan => "plan",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller's request to run one allowlisted tool.
///
/// Requests are handed to [`crate::Gateway::execute`] by reference and are
/// never mutated by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Tool name, e.g. `kubectl` or `terraform`.
    pub tool: String,
    /// Arguments passed to the tool, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Target environment label (cluster, cloud profile). The policy's
    /// default context applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Declared intent.
    #[serde(default)]
    pub mode: Mode,
    /// Environment overrides. Must not carry secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Working directory for the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl RunRequest {
    /// Request for `tool` with no arguments, default mode and no overrides.
    #[must_use]
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: Vec::new(),
            context: None,
            mode: Mode::default(),
            env: None,
            cwd: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Add an environment override.
    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// The argument vector handed to the runner: tool first, then args.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.tool.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Space-joined command line, as scanned by the deny patterns.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }
}
