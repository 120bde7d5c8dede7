//! Admission outcomes for representative Pod layouts.

use std::time::Duration;

use cosign_webhook::verification::{
    AdmissionDecision, COSIGN_KEY_ENV, COSIGN_REPOSITORY_ENV, DEFAULT_KEY_SECRET, EnvEntry,
    EvaluationError, LookupErrorPolicy, Notification, PodVerificationRequest,
    VerificationSettings,
};

use crate::fakes::*;

fn request() -> PodVerificationRequest {
    PodVerificationRequest::new("uid-1", "apps").with_pod_name("web")
}

fn deny_reason(decision: &AdmissionDecision) -> &str {
    match decision {
        AdmissionDecision::Deny { reason, .. } => reason,
        AdmissionDecision::Allow { .. } => panic!("expected deny, got {decision:?}"),
    }
}

// ============================================================
// Scenarios
// ============================================================

#[tokio::test]
async fn test_scenario_a_literal_key_verifies() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let pod = request().with_container(signed_container("app"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.is_allowed());
    assert_eq!(verdict.decision.uid(), "uid-1");
    assert_eq!(verdict.decision.message(), "Cosign verification passed");
    assert_eq!(verdict.notification, Some(Notification::PodVerified));
    assert_eq!(verdict.verified, 1);
    assert_eq!(harness.engine.calls(), vec!["app"]);
    assert_eq!(harness.health.metrics.verified_count(), 1);
}

#[tokio::test]
async fn test_scenario_b_no_key_anywhere() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let pod = request().with_container(container("app"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.is_allowed());
    assert_eq!(verdict.notification, Some(Notification::NoVerification));
    assert_eq!(verdict.skipped, 1);
    assert!(harness.engine.calls().is_empty());
    // The namespace default secret was consulted once
    assert_eq!(harness.secrets.calls(), vec![DEFAULT_KEY_SECRET]);
}

#[tokio::test]
async fn test_scenario_c_malformed_second_key_denies() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let pod = request()
        .with_container(signed_container("first"))
        .with_container(
            container("second").with_env(EnvEntry::literal(COSIGN_KEY_ENV, "not-a-public-key")),
        );

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert_eq!(deny_reason(&verdict.decision), "PublicKeyMalformed");
    assert!(verdict.decision.message().contains("\"second\""));
    assert!(verdict.decision.message().contains("PublicKeyMalformed"));
    assert_eq!(verdict.notification, None);
    assert_eq!(harness.engine.calls(), vec!["first"]);
}

#[tokio::test]
async fn test_scenario_d_init_container_alone_counts_as_verified() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let pod = request()
        .with_init_container(signed_container("setup"))
        .with_container(container("app"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.is_allowed());
    assert_eq!(verdict.notification, Some(Notification::PodVerified));
    assert_eq!(verdict.verified, 1);
    assert_eq!(verdict.skipped, 1);
}

#[tokio::test]
async fn test_scenario_e_missing_referenced_secret_skips() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let pod = request().with_container(
        container("app").with_env(EnvEntry::secret_ref(COSIGN_KEY_ENV, "does-not-exist", "pub")),
    );

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.is_allowed());
    assert_eq!(verdict.notification, Some(Notification::NoVerification));
    assert!(harness.engine.calls().is_empty());
}

// ============================================================
// Key sources
// ============================================================

#[tokio::test]
async fn test_secret_reference_and_default_secret_keys() {
    let secrets = MemorySecretStore::default()
        .with("apps", "team-keys", "cosign.pub", RSA_KEY)
        .with("apps", DEFAULT_KEY_SECRET, COSIGN_KEY_ENV, ECDSA_KEY);
    let harness = Harness::new(secrets, RecordingEngine::default());
    let pod = request()
        .with_container(
            container("referenced")
                .with_env(EnvEntry::secret_ref(COSIGN_KEY_ENV, "team-keys", "cosign.pub")),
        )
        .with_container(container("defaulted"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.is_allowed());
    assert_eq!(verdict.verified, 2);
    assert_eq!(harness.engine.calls(), vec!["referenced", "defaulted"]);
}

#[tokio::test]
async fn test_key_file_with_leading_comment_verifies() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let commented = format!("# cosign.pub generated by cosign generate-key-pair\n{ECDSA_KEY}");
    let pod = request()
        .with_container(container("app").with_env(EnvEntry::literal(COSIGN_KEY_ENV, &commented)));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.is_allowed());
    assert_eq!(verdict.notification, Some(Notification::PodVerified));
    assert_eq!(harness.engine.calls(), vec!["app"]);
}

#[tokio::test]
async fn test_default_secret_is_namespace_scoped() {
    let secrets = MemorySecretStore::default().with(
        "other-namespace",
        DEFAULT_KEY_SECRET,
        COSIGN_KEY_ENV,
        ECDSA_KEY,
    );
    let harness = Harness::new(secrets, RecordingEngine::default());
    let pod = request().with_container(container("app"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert_eq!(verdict.notification, Some(Notification::NoVerification));
}

#[tokio::test]
async fn test_invalid_signature_repository_denies() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let pod = request().with_container(
        signed_container("app")
            .with_env(EnvEntry::literal(COSIGN_REPOSITORY_ENV, "registry.example.com/sigs:v1")),
    );

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert_eq!(deny_reason(&verdict.decision), "SignatureRepositoryInvalid");
    assert!(harness.engine.calls().is_empty());
}

// ============================================================
// Fail-fast and ordering
// ============================================================

#[tokio::test]
async fn test_first_failure_stops_the_walk() {
    let harness = Harness::new(
        MemorySecretStore::default(),
        RecordingEngine::default().rejecting("second"),
    );
    let pod = request()
        .with_container(signed_container("first"))
        .with_container(signed_container("second"))
        .with_container(container("third"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert_eq!(deny_reason(&verdict.decision), "SignatureVerificationFailed");
    assert!(verdict.decision.message().contains("\"second\""));
    assert_eq!(harness.engine.calls(), vec!["first", "second"]);
    // "third" would have consulted the default secret
    assert!(harness.secrets.calls().is_empty());
    assert!(harness.health.metrics.encode().contains(
        "cosign_verification_failures_total{reason=\"SignatureVerificationFailed\"} 1"
    ));
}

#[tokio::test]
async fn test_init_containers_are_verified_first() {
    let harness = Harness::new(MemorySecretStore::default(), RecordingEngine::default());
    let pod = request()
        .with_container(signed_container("main-a"))
        .with_init_container(signed_container("init-a"))
        .with_container(signed_container("main-b"))
        .with_init_container(signed_container("init-b"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert_eq!(verdict.verified, 4);
    assert_eq!(
        harness.engine.calls(),
        vec!["init-a", "init-b", "main-a", "main-b"]
    );
}

#[tokio::test]
async fn test_failing_init_container_denies_before_regular_containers() {
    let harness = Harness::new(
        MemorySecretStore::default(),
        RecordingEngine::default().rejecting("setup"),
    );
    let pod = request()
        .with_init_container(signed_container("setup"))
        .with_container(signed_container("app"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.message().starts_with("[SignatureVerificationFailed] init container"));
    assert_eq!(harness.engine.calls(), vec!["setup"]);
}

// ============================================================
// Lookup-error policy
// ============================================================

#[tokio::test]
async fn test_lookup_error_fails_open_by_default() {
    let harness = Harness::new(
        MemorySecretStore::default().failing(DEFAULT_KEY_SECRET),
        RecordingEngine::default(),
    );
    let pod = request().with_container(container("app"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert!(verdict.decision.is_allowed());
    assert_eq!(verdict.notification, Some(Notification::NoVerification));
    assert!(
        harness
            .health
            .metrics
            .encode()
            .contains("cosign_key_lookup_errors_total 1")
    );
}

#[tokio::test]
async fn test_lookup_error_fails_closed_when_configured() {
    let settings = VerificationSettings {
        lookup_error_policy: LookupErrorPolicy::FailClosed,
        ..Default::default()
    };
    let harness = Harness::with(
        MemorySecretStore::default().failing("team-keys"),
        StaticCredentials::default(),
        RecordingEngine::default(),
        settings,
    );
    let pod = request().with_container(
        container("app").with_env(EnvEntry::secret_ref(COSIGN_KEY_ENV, "team-keys", "pub")),
    );

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert_eq!(deny_reason(&verdict.decision), "KeyLookupFailed");
    assert!(verdict.decision.message().contains("forbidden"));
}

// ============================================================
// Request-level failures
// ============================================================

#[tokio::test]
async fn test_credential_failure_evaluates_nothing() {
    let harness = Harness::with(
        MemorySecretStore::default(),
        StaticCredentials::failing(),
        RecordingEngine::default(),
        VerificationSettings::default(),
    );
    let pod = request()
        .with_service_account("builder")
        .with_pull_secret("regcred")
        .with_container(signed_container("app"));

    let err = harness.verifier.evaluate(&pod).await.unwrap_err();

    assert!(matches!(err, EvaluationError::Credentials(_)));
    assert!(harness.engine.calls().is_empty());
    assert!(harness.secrets.calls().is_empty());

    let calls = harness.credentials.calls.lock().unwrap();
    assert_eq!(
        calls[0],
        (
            "apps".to_string(),
            "builder".to_string(),
            vec!["regcred".to_string()]
        )
    );
}

#[tokio::test(start_paused = true)]
async fn test_request_deadline_stops_the_walk() {
    let settings = VerificationSettings {
        call_timeout: Duration::from_secs(10),
        request_deadline: Duration::from_secs(5),
        ..Default::default()
    };
    let harness = Harness::with(
        MemorySecretStore::default().stalling("slow-keys"),
        StaticCredentials::default(),
        RecordingEngine::default(),
        settings,
    );
    let pod = request()
        .with_container(
            container("first").with_env(EnvEntry::secret_ref(COSIGN_KEY_ENV, "slow-keys", "pub")),
        )
        .with_container(signed_container("second"));

    let err = harness.verifier.evaluate(&pod).await.unwrap_err();

    match err {
        EvaluationError::DeadlineExceeded { evaluated, total } => {
            assert_eq!(evaluated, 1);
            assert_eq!(total, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(harness.engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_request_deadline_on_last_container_is_not_a_skip() {
    for policy in [LookupErrorPolicy::FailOpen, LookupErrorPolicy::FailClosed] {
        let settings = VerificationSettings {
            call_timeout: Duration::from_secs(10),
            request_deadline: Duration::from_secs(5),
            lookup_error_policy: policy,
            ..Default::default()
        };
        let harness = Harness::with(
            MemorySecretStore::default().stalling("slow-keys"),
            StaticCredentials::default(),
            RecordingEngine::default(),
            settings,
        );
        let pod = request().with_container(
            container("only").with_env(EnvEntry::secret_ref(COSIGN_KEY_ENV, "slow-keys", "pub")),
        );

        let err = harness.verifier.evaluate(&pod).await.unwrap_err();

        assert!(
            matches!(
                err,
                EvaluationError::DeadlineExceeded {
                    evaluated: 1,
                    total: 1
                }
            ),
            "{policy}: unexpected error {err:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_engine_is_bounded_by_call_timeout() {
    let settings = VerificationSettings {
        call_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let harness = Harness::with(
        MemorySecretStore::default(),
        StaticCredentials::default(),
        RecordingEngine::default().delayed(Duration::from_secs(30)),
        settings,
    );
    let pod = request().with_container(signed_container("app"));

    let verdict = harness.verifier.evaluate(&pod).await.unwrap();

    assert_eq!(deny_reason(&verdict.decision), "SignatureVerificationFailed");
    assert!(verdict.decision.message().contains("timed out"));
}
