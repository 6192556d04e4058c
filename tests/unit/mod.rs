// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for mesh-verifier.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod pod_readiness_tests {
    use mesh_verifier::observers::is_pod_ready;

    use crate::common::fixtures::{ContainerFixture, PodBuilder, creating_pod, ready_pod};

    #[test]
    fn test_ready_pod() {
        assert!(is_pod_ready(&ready_pod("istiod-1", "istio-system", "istiod")));
    }

    #[test]
    fn test_creating_pod() {
        assert!(!is_pod_ready(&creating_pod("istiod-1", "istio-system", "istiod")));
    }

    #[test]
    fn test_running_without_container_statuses() {
        let pod = PodBuilder::new("istiod-1").phase("Running").build();
        assert!(is_pod_ready(&pod));
    }

    #[test]
    fn test_ready_flag_without_running_state() {
        let pod = PodBuilder::new("istiod-1")
            .phase("Running")
            .container(ContainerFixture::ReadyNoState)
            .build();
        assert!(!is_pod_ready(&pod));
    }

    #[test]
    fn test_succeeded_pod_not_ready() {
        let pod = PodBuilder::new("job-1")
            .phase("Succeeded")
            .container(ContainerFixture::Ready)
            .build();
        assert!(!is_pod_ready(&pod));
    }

    #[test]
    fn test_pod_without_status() {
        let pod = PodBuilder::new("istiod-1").without_status().build();
        assert!(!is_pod_ready(&pod));
    }
}

mod document_tests {
    use mesh_verifier::document::{Document, Lookup};
    use serde_json::json;

    use crate::common::fixtures::{route, subscription};

    #[test]
    fn test_lookup_found() {
        let doc = route("istio-ingressgateway", "gw.apps.example.com");
        assert_eq!(doc.str_at(&["spec", "host"]), Lookup::Found("gw.apps.example.com"));
        assert_eq!(doc.name(), Some("istio-ingressgateway"));
    }

    #[test]
    fn test_lookup_missing_field() {
        let doc = subscription("servicemeshoperator", None);
        assert!(matches!(
            doc.str_at(&["status", "installedCSV"]),
            Lookup::Missing { .. }
        ));
    }

    #[test]
    fn test_lookup_wrong_type() {
        let doc = Document::new(json!({"status": {"phase": 3}}));
        assert!(matches!(
            doc.str_at(&["status", "phase"]),
            Lookup::WrongType { expected: "string", .. }
        ));
    }

    #[test]
    fn test_lookup_through_scalar() {
        let doc = Document::new(json!({"status": "Ready"}));
        assert!(matches!(
            doc.str_at(&["status", "phase"]),
            Lookup::WrongType { expected: "object", .. }
        ));
    }
}

mod operator_state_tests {
    use mesh_verifier::observers::InstallState;
    use mesh_verifier::observers::operator::{csv_state, installed_csv};

    use crate::common::fixtures::{csv, subscription};

    #[test]
    fn test_installed_csv_found() {
        let sub = subscription("servicemeshoperator", Some("servicemeshoperator.v2.6.1"));
        assert_eq!(installed_csv(&sub).found(), Some("servicemeshoperator.v2.6.1"));
    }

    #[test]
    fn test_csv_phases() {
        assert!(csv_state("op.v1", &csv("op.v1", "Succeeded")).is_installed());
        assert_eq!(
            csv_state("op.v1", &csv("op.v1", "Failed")),
            InstallState::Installing {
                csv: "op.v1".to_string(),
                phase: Some("Failed".to_string())
            }
        );
    }
}

mod response_tests {
    use mesh_verifier::exec::response::{ParseError, parse_preamble};

    use crate::common::fixtures::http_preamble;

    #[test]
    fn test_envoy_preamble() {
        let raw = http_preamble(
            200,
            "OK",
            &[
                ("server", "istio-envoy"),
                ("x-envoy-decorator-operation", "httpbin.istio-test.svc.cluster.local:8000/*"),
            ],
        );
        let preamble = parse_preamble(&raw).unwrap();
        assert_eq!(preamble.status_code, 200);
        assert_eq!(
            preamble.headers.get("X-Envoy-Decorator-Operation"),
            Some("httpbin.istio-test.svc.cluster.local:8000/*")
        );
    }

    #[test]
    fn test_not_http() {
        assert!(matches!(
            parse_preamble("not-http"),
            Err(ParseError::MalformedStatusLine(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = parse_preamble("HTTP/1.1 200 OK\nbroken\n").unwrap_err();
        assert_eq!(err.to_string(), "Malformed header on line 2: \"broken\"");
    }
}

mod state_machine_tests {
    use mesh_verifier::exec::state_machine::{
        AttemptContext, ExecEvent, ExecPhase, ExecStateMachine, TransitionResult,
    };

    /// Drive the machine through `failures` failed attempts.
    fn run(max_attempts: u32, failures: u32) -> (ExecPhase, u32) {
        let sm = ExecStateMachine::new();
        let mut phase = ExecPhase::Attempting;
        let mut attempt = 1;
        let mut failed = 0;
        while !phase.is_terminal() {
            let event = match phase {
                ExecPhase::Attempting if failed < failures => {
                    failed += 1;
                    ExecEvent::StreamFailed
                }
                ExecPhase::Attempting => ExecEvent::StreamCompleted,
                ExecPhase::Parsing => ExecEvent::ParseSucceeded,
                ExecPhase::BackingOff => ExecEvent::BackoffElapsed,
                ExecPhase::Done | ExecPhase::Failed => unreachable!(),
            };
            match sm.transition(phase, event, &AttemptContext::new(attempt, max_attempts)) {
                TransitionResult::Success { to, .. } => {
                    if phase == ExecPhase::BackingOff {
                        attempt += 1;
                    }
                    phase = to;
                }
                other => panic!("unexpected transition result: {other:?}"),
            }
        }
        (phase, attempt)
    }

    #[test]
    fn test_success_after_two_failures() {
        assert_eq!(run(3, 2), (ExecPhase::Done, 3));
    }

    #[test]
    fn test_failed_when_budget_spent() {
        assert_eq!(run(3, 3), (ExecPhase::Failed, 3));
        assert_eq!(run(1, 5), (ExecPhase::Failed, 1));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ExecPhase::BackingOff.to_string(), "BackingOff");
        assert_eq!(ExecEvent::ParseFailed.to_string(), "ParseFailed");
    }
}

mod config_tests {
    use std::time::Duration;

    use mesh_verifier::config::VerifierConfig;

    #[test]
    fn test_default_scenario() {
        let scenario = VerifierConfig::default().scenario().unwrap();
        assert_eq!(scenario.poll.interval, Duration::from_secs(5));
        assert_eq!(scenario.poll.timeout, Duration::from_secs(600));
        assert!(scenario.poll.immediate);
        assert_eq!(scenario.server_url(), "http://httpbin.default:8000/ip");
        assert!(scenario.operator_status.is_none());
    }

    #[test]
    fn test_lookup_override() {
        let config = VerifierConfig::from_lookup(|key| match key {
            "MESH_VERIFIER_NAMESPACE" => Some("bookinfo".to_string()),
            "MESH_VERIFIER_EXPECTED_STATUS" => Some("204".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.workload_namespace, "bookinfo");
        assert_eq!(config.expected_status, 204);
    }

    #[test]
    fn test_expected_status_out_of_range() {
        let err = VerifierConfig::from_lookup(|key| {
            (key == "MESH_VERIFIER_EXPECTED_STATUS").then(|| "42".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("not an HTTP status code"));
    }
}

mod error_tests {
    use mesh_verifier::Error;
    use mesh_verifier::cluster::StreamError;
    use mesh_verifier::exec::{AttemptError, ExecError};
    use mesh_verifier::scenario::ScenarioError;

    #[test]
    fn test_exhausted_exec_is_retryable() {
        let err: Error = ExecError::Exhausted {
            target: "istio-test/sleep-1[sleep]".into(),
            attempts: 3,
            last: AttemptError::Stream(StreamError::Remote("exit code 7".into())),
            stdout: String::new(),
            stderr: String::new(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_unexpected_status_not_retryable() {
        let err: Error = ScenarioError::UnexpectedStatus {
            step: "mesh-traffic".into(),
            expected: 200,
            actual: 403,
            stderr: String::new(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
