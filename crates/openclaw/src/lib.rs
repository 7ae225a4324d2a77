//! openclaw: a policy-gated command-execution gateway.
//!
//! Operators and automation agents submit a [`RunRequest`] naming one of a
//! small set of infrastructure tools (`kubectl`, `helm`, `terraform`, ...).
//! The [`Gateway`] checks it against a [`GatewayPolicy`], runs the tool
//! without a shell under a timeout, and returns exactly one [`RunResult`].

#![forbid(unsafe_code)]
// Public API types have docs; internal helpers are documented where
// behavior is not obvious from the signature.
#![allow(missing_docs)]

pub mod audit;
pub mod config;
pub mod gateway;
pub mod model;
pub mod policy;
pub mod runner;

pub use crate::gateway::Gateway;
pub use crate::model::*;

pub mod run {
    use super::{Gateway, GatewayPolicy, RunRequest, RunResult};

    /// Run one request under `policy` with the system process runner.
    ///
    /// # Errors
    /// - `E_CONFIG`: the policy is invalid. Once the policy is accepted,
    ///   every outcome is reported through the returned [`RunResult`].
    pub fn submit_run(
        request: &RunRequest,
        policy: GatewayPolicy,
    ) -> crate::runner::RunnerResult<RunResult> {
        Ok(Gateway::new(policy)?.execute(request))
    }

    /// Run one request under the default policy.
    pub fn submit_run_default(request: &RunRequest) -> crate::runner::RunnerResult<RunResult> {
        submit_run(request, GatewayPolicy::default())
    }
}
