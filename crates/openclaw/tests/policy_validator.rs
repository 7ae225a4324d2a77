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

use openclaw::model::policy::{GatewayPolicy, PolicyBuilder, POLICY_VERSION};
use openclaw::model::{Mode, RunRequest};
use openclaw::policy::{
    explain_policy_for_request, validate_policy, DenialRule, PolicyValidator, Verdict,
};
use openclaw::runner::ErrorCode;

fn default_validator() -> PolicyValidator {
    PolicyValidator::new(GatewayPolicy::default()).unwrap()
}

fn denial(validator: &PolicyValidator, request: &RunRequest) -> openclaw::policy::Denial {
    match validator.check(request) {
        Verdict::Denied(denial) => denial,
        Verdict::Allowed => panic!("expected denial for {:?}", request.argv()),
    }
}

#[test]
fn tool_outside_allow_set_is_denied() {
    let validator = default_validator();
    let request = RunRequest::new("rm").args(["-rf", "/tmp/x"]);
    let denial = denial(&validator, &request);
    assert_eq!(denial.rule, DenialRule::ToolAllowlist);
    assert_eq!(denial.reason, "tool not allowed: rm");
}

#[test]
fn every_default_tool_is_allowed() {
    let validator = default_validator();
    for tool in ["kubectl", "helm", "terraform", "git", "aws", "docker"] {
        assert!(
            validator.check(&RunRequest::new(tool).arg("version")).is_allowed(),
            "{tool} should be allowed"
        );
    }
}

#[test]
fn tool_match_is_exact() {
    let validator = default_validator();
    assert!(!validator.check(&RunRequest::new("Kubectl")).is_allowed());
    assert!(!validator.check(&RunRequest::new("/usr/bin/kubectl")).is_allowed());
    assert!(!validator.check(&RunRequest::new("")).is_allowed());
}

#[test]
fn deny_pattern_matches_regardless_of_case() {
    let validator = default_validator();
    let request = RunRequest::new("kubectl").args(["DELETE", "Namespace", "KUBE-SYSTEM"]);
    let denial = denial(&validator, &request);
    assert_eq!(denial.rule, DenialRule::DenyPattern);
    assert_eq!(denial.reason, "denied by policy (dangerous command)");
    assert_eq!(denial.pattern.as_deref(), Some("delete namespace kube-system"));
}

#[test]
fn deny_pattern_spans_tool_and_arguments() {
    let validator = default_validator();
    let request = RunRequest::new("git").args(["rm", "-rf", "/"]);
    assert_eq!(denial(&validator, &request).rule, DenialRule::DenyPattern);
}

#[test]
fn deny_pattern_is_plain_substring() {
    let validator = default_validator();
    // "rm -rf /" is contained in "rm -rf /srv/app"; partial matches deny.
    let request = RunRequest::new("docker").args(["exec", "app", "rm", "-rf", "/srv/app"]);
    assert!(!validator.check(&request).is_allowed());

    let safe = RunRequest::new("kubectl").args(["delete", "namespace", "scratch"]);
    assert!(validator.check(&safe).is_allowed());
}

#[test]
fn custom_patterns_are_case_folded() {
    let policy = PolicyBuilder::new()
        .deny_patterns(vec!["Destroy -Auto-Approve".to_string()])
        .build();
    let validator = PolicyValidator::new(policy).unwrap();
    let request = RunRequest::new("terraform").args(["destroy", "-auto-approve"]);
    assert_eq!(denial(&validator, &request).rule, DenialRule::DenyPattern);
}

#[test]
fn allow_set_is_checked_before_patterns() {
    let validator = default_validator();
    let request = RunRequest::new("bash").args(["-c", "rm -rf /"]);
    assert_eq!(denial(&validator, &request).rule, DenialRule::ToolAllowlist);
}

#[test]
fn mode_is_advisory_without_allowed_modes() {
    let validator = default_validator();
    for mode in Mode::ALL {
        let request = RunRequest::new("terraform").arg("apply").mode(mode);
        assert!(validator.check(&request).is_allowed());
    }
}

#[test]
fn allowed_modes_restrict_execution() {
    let policy = PolicyBuilder::new()
        .allowed_modes(vec![Mode::Explain, Mode::Plan])
        .build();
    let validator = PolicyValidator::new(policy).unwrap();

    let plan = RunRequest::new("terraform").arg("plan").mode(Mode::Plan);
    assert!(validator.check(&plan).is_allowed());

    let apply = RunRequest::new("terraform").arg("apply").mode(Mode::Apply);
    let denial = denial(&validator, &apply);
    assert_eq!(denial.rule, DenialRule::Mode);
    assert_eq!(denial.reason, "mode not allowed: apply");
}

#[test]
fn injection_env_overrides_are_denied() {
    let validator = default_validator();
    for name in ["LD_PRELOAD", "ld_preload", "DYLD_INSERT_LIBRARIES"] {
        let request = RunRequest::new("kubectl").env_var(name, "/tmp/evil.so");
        let denial = denial(&validator, &request);
        assert_eq!(denial.rule, DenialRule::EnvOverride);
        assert_eq!(denial.reason, format!("environment override not allowed: {name}"));
    }
}

#[test]
fn path_override_is_denied_in_any_case() {
    let validator = default_validator();
    for name in ["PATH", "Path", "path"] {
        let request = RunRequest::new("kubectl")
            .args(["get", "pods"])
            .env_var(name, "/tmp/shadow:/bin:/usr/bin");
        let denial = denial(&validator, &request);
        assert_eq!(denial.rule, DenialRule::EnvOverride);
        assert_eq!(denial.reason, format!("environment override not allowed: {name}"));
    }
}

#[test]
fn path_stays_inheritable() {
    let policy = PolicyBuilder::new()
        .env_allowlist(vec!["PATH".to_string()])
        .build();
    assert!(validate_policy(&policy).is_ok());
    let validator = PolicyValidator::new(policy).unwrap();
    assert!(validator.check(&RunRequest::new("kubectl")).is_allowed());
}

#[test]
fn policy_blocked_env_names_are_denied() {
    let policy = PolicyBuilder::new()
        .block_env_var("AWS_SECRET_ACCESS_KEY".to_string())
        .build();
    let validator = PolicyValidator::new(policy).unwrap();
    let request = RunRequest::new("aws").env_var("aws_secret_access_key", "x");
    assert_eq!(denial(&validator, &request).rule, DenialRule::EnvOverride);

    let ok = RunRequest::new("aws").env_var("AWS_PROFILE", "staging");
    assert!(validator.check(&ok).is_allowed());
}

#[test]
fn explain_reports_every_failing_rule() {
    let policy = PolicyBuilder::new().allowed_modes(vec![Mode::Plan]).build();
    let validator = PolicyValidator::new(policy).unwrap();
    let request = RunRequest::new("sh")
        .args(["-c", "rm -rf /"])
        .mode(Mode::Apply)
        .env_var("LD_PRELOAD", "x");

    let rules: Vec<DenialRule> = validator.denials(&request).iter().map(|d| d.rule).collect();
    assert_eq!(
        rules,
        vec![
            DenialRule::ToolAllowlist,
            DenialRule::DenyPattern,
            DenialRule::Mode,
            DenialRule::EnvOverride
        ]
    );

    let explanation = validator.explain(&request);
    assert!(!explanation.allowed);
    assert_eq!(explanation.errors.len(), 4);
    assert!(explanation
        .errors
        .iter()
        .all(|err| err.code == "E_POLICY_DENIED"));
}

#[test]
fn explain_of_invalid_policy_reports_config_error() {
    let policy = PolicyBuilder::new().allowed_tools(Vec::new()).build();
    let explanation = explain_policy_for_request(&policy, &RunRequest::new("kubectl"));
    assert!(!explanation.allowed);
    assert_eq!(explanation.errors[0].code, "E_CONFIG");
}

#[test]
fn empty_allow_set_is_rejected() {
    let policy = PolicyBuilder::new().allowed_tools(Vec::new()).build();
    let err = PolicyValidator::new(policy).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
}

#[test]
fn policy_version_must_match() {
    let mut policy = GatewayPolicy::default();
    policy.policy_version = POLICY_VERSION + 1;
    let err = validate_policy(&policy).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
    assert!(err.message.contains("unsupported policy_version"));
}

#[test]
fn blank_deny_pattern_is_rejected() {
    let policy = PolicyBuilder::new().add_deny_pattern("  ".to_string()).build();
    let err = validate_policy(&policy).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
}

#[test]
fn zero_budgets_are_rejected() {
    let policy = PolicyBuilder::new().max_runtime_ms(0).build();
    assert_eq!(validate_policy(&policy).unwrap_err().code, ErrorCode::Config);

    let policy = PolicyBuilder::new().max_output_bytes(0).build();
    assert_eq!(validate_policy(&policy).unwrap_err().code, ErrorCode::Config);
}

#[test]
fn empty_allowed_modes_is_rejected() {
    let policy = PolicyBuilder::new().allowed_modes(Vec::new()).build();
    assert_eq!(validate_policy(&policy).unwrap_err().code, ErrorCode::Config);
}

#[test]
fn dangerous_env_in_allowlist_is_rejected() {
    let policy = PolicyBuilder::new()
        .env_allowlist(vec!["PATH".to_string(), "Ld_Preload".to_string()])
        .build();
    let err = validate_policy(&policy).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
    assert!(err.message.contains("dangerous"));
}

#[test]
fn validator_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<PolicyValidator>();
}
