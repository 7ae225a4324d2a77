// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::inefficient_to_string)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(missing_docs)]
#![cfg(unix)]

use openclaw::model::policy::{GatewayPolicy, PolicyBuilder};
use openclaw::model::{ErrorInfo, RunResult, RunStatus};
use openclaw::policy::PolicyExplanation;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn openclaw() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_openclaw"));
    cmd.env_remove("OPENCLAW_LOG").env("NO_COLOR", "1");
    cmd
}

fn write_policy(dir: &Path, policy: &GatewayPolicy) -> PathBuf {
    let path = dir.join("policy.json");
    fs::write(&path, serde_json::to_vec_pretty(policy).unwrap()).unwrap();
    path
}

fn shell_policy(dir: &Path) -> PathBuf {
    let policy = PolicyBuilder::new()
        .allowed_tools(vec!["sh".to_string()])
        .termination_grace_ms(200)
        .build();
    write_policy(dir, &policy)
}

fn run_json(output: &Output) -> RunResult {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not a run result ({err}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn assert_error_with_code(output: &Output, code: &str, exit_code: i32) {
    assert_eq!(output.status.code(), Some(exit_code));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    if value.get("code").is_some() {
        let err: ErrorInfo = serde_json::from_value(value).unwrap();
        assert_eq!(err.code, code);
        return;
    }
    let run: RunResult = serde_json::from_value(value).unwrap();
    let err = run.error.expect("run result should include error");
    assert_eq!(err.code, code);
}

#[test]
fn health_reports_service() {
    let output = openclaw().args(["health", "--json"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value, serde_json::json!({"ok": true, "service": "openclaw"}));
}

#[test]
fn exec_denied_tool_exits_two() {
    let output = openclaw()
        .args(["exec", "--json", "--", "rm", "-rf", "/tmp/nothing"])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_POLICY_DENIED", 2);
    let run = run_json(&output);
    assert_eq!(run.status, RunStatus::Denied);
    assert_eq!(run.stderr, "tool not allowed: rm");
    assert_eq!(run.exit_code, None);
}

#[test]
fn exec_dangerous_command_exits_two() {
    let output = openclaw()
        .args(["exec", "--json", "--", "kubectl", "delete", "namespace", "kube-system"])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_POLICY_DENIED", 2);
}

#[test]
fn exec_json_outputs_run_result() {
    let dir = tempfile::tempdir().unwrap();
    let policy = shell_policy(dir.path());
    let output = openclaw()
        .args([
            "exec",
            "--json",
            "--policy",
            policy.to_str().unwrap(),
            "--context",
            "lab",
            "--mode",
            "explain",
            "--",
            "sh",
            "-c",
            "echo hello",
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let run = run_json(&output);
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.exit_code, Some(0));
    assert_eq!(run.stdout, "hello\n");
    assert_eq!(run.metadata_str("context"), Some("lab"));
    assert_eq!(run.metadata_str("mode"), Some("explain"));
}

#[test]
fn exec_human_output_passes_tool_stdout_through() {
    let dir = tempfile::tempdir().unwrap();
    let policy = shell_policy(dir.path());
    let output = openclaw()
        .args(["exec", "--policy", policy.to_str().unwrap(), "--", "sh", "-c", "echo plain"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "plain\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("succeeded"));
}

#[test]
fn exec_nonzero_exit_maps_to_process_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let policy = shell_policy(dir.path());
    let output = openclaw()
        .args(["exec", "--json", "--policy", policy.to_str().unwrap(), "--", "sh", "-c", "exit 5"])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_PROCESS_EXIT", 6);
    assert_eq!(run_json(&output).exit_code, Some(5));
}

#[test]
fn exec_env_overrides_reach_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let policy = shell_policy(dir.path());
    let output = openclaw()
        .args([
            "exec",
            "--json",
            "--policy",
            policy.to_str().unwrap(),
            "--env",
            "TARGET=blue=green",
            "--",
            "sh",
            "-c",
            "echo $TARGET",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(run_json(&output).stdout, "blue=green\n");
}

#[test]
fn exec_blocked_env_override_is_denied() {
    let output = openclaw()
        .args(["exec", "--json", "--env", "LD_PRELOAD=/tmp/x.so", "--", "git", "status"])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_POLICY_DENIED", 2);
}

#[test]
fn exec_path_override_is_denied() {
    let output = openclaw()
        .args(["exec", "--json", "--env", "PATH=/tmp", "--", "kubectl", "get", "pods"])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_POLICY_DENIED", 2);
    assert_eq!(run_json(&output).stderr, "environment override not allowed: PATH");
}

#[test]
fn exec_timeout_exits_four() {
    let dir = tempfile::tempdir().unwrap();
    let policy = shell_policy(dir.path());
    let output = openclaw()
        .args([
            "exec",
            "--json",
            "--policy",
            policy.to_str().unwrap(),
            "--timeout-ms",
            "200",
            "--",
            "sh",
            "-c",
            "sleep 30",
        ])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_TIMEOUT", 4);
    let run = run_json(&output);
    assert_eq!(run.exit_code, None);
    assert!(run.stderr.contains("timed out after 200 ms"));
}

#[test]
fn exec_explain_policy_does_not_run() {
    let output = openclaw()
        .args(["exec", "--json", "--explain-policy", "--", "rm", "-rf", "/"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let explanation: PolicyExplanation = serde_json::from_slice(&output.stdout).unwrap();
    assert!(!explanation.allowed);
    assert_eq!(explanation.errors.len(), 2);

    let output = openclaw()
        .args(["exec", "--explain-policy", "--", "git", "status"])
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "policy: allowed");
}

#[test]
fn exec_invalid_policy_exits_seven() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    fs::write(&path, r#"{"allowed_tools": []}"#).unwrap();
    let output = openclaw()
        .args(["exec", "--json", "--policy", path.to_str().unwrap(), "--", "git", "status"])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_CONFIG", 7);
}

#[test]
fn exec_zero_timeout_is_invalid_argument() {
    let output = openclaw()
        .args(["exec", "--json", "--timeout-ms", "0", "--", "git", "status"])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_CLI_INVALID_ARG", 12);
}

#[test]
fn exec_audit_log_records_run() {
    let dir = tempfile::tempdir().unwrap();
    let audit = dir.path().join("audit.jsonl");
    let output = openclaw()
        .args(["exec", "--json", "--audit-log", audit.to_str().unwrap(), "--", "nc", "-l"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let run = run_json(&output);
    let logged: RunResult =
        serde_json::from_str(fs::read_to_string(&audit).unwrap().trim()).unwrap();
    assert_eq!(logged.run_id, run.run_id);
}

#[test]
fn policy_show_prints_default_policy() {
    let output = openclaw().args(["policy", "show"]).output().unwrap();
    assert!(output.status.success());
    let policy: GatewayPolicy = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(policy, GatewayPolicy::default());
}

#[test]
fn policy_check_accepts_valid_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yml");
    let policy = PolicyBuilder::new()
        .allowed_tools(vec!["helm".to_string()])
        .build();
    fs::write(&path, serde_yml::to_string(&policy).unwrap()).unwrap();

    let output = openclaw()
        .args(["policy", "check", "--json", "--policy", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["valid"], true);
    assert_eq!(value["allowed_tools"], serde_json::json!(["helm"]));
}

#[test]
fn policy_check_rejects_invalid_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    fs::write(&path, r#"{"policy_version": 9}"#).unwrap();
    let output = openclaw()
        .args(["policy", "check", "--json", "--policy", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert_error_with_code(&output, "E_CONFIG", 7);
}

#[test]
fn completions_are_generated() {
    let output = openclaw().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("openclaw"));
}
