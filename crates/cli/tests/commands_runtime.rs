use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use vigil_cli::commands::{chat, config, doctor};
use vigil_core::config::ConfigOverrides;

#[test]
fn chat_fails_fast_on_invalid_config() {
    with_env(&[("VIGIL_LLM_TEMPERATURE", "warm")], || {
        let result = chat::run(None, ConfigOverrides::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_attributes_env_sources_and_redacts_the_api_key() {
    with_env(
        &[
            ("VIGIL_LLM_API_KEY", "sk-test-secret"),
            ("VIGIL_LLM_MODEL", "gpt-4o-mini"),
            ("VIGIL_LOG_LEVEL", "debug"),
            ("VIGIL_GUARDRAILS_DENYLIST_ENTITY", "HERB"),
        ],
        || {
            let output = config::run(None);

            assert!(output.contains("- llm.model = gpt-4o-mini (source: env (VIGIL_LLM_MODEL))"));
            assert!(output.contains("- llm.api_key = sk-*** (source: env (VIGIL_LLM_API_KEY))"));
            assert!(output.contains("- logging.level = debug (source: env (VIGIL_LOG_LEVEL))"));
            assert!(output.contains("- guardrails.topic_threshold = 50 (source: default)"));
            assert!(output.contains(
                "- guardrails.denylist_entity = HERB \
                 (source: env (VIGIL_GUARDRAILS_DENYLIST_ENTITY))"
            ));
            assert!(!output.contains("sk-test-secret"));
        },
    );
}

#[test]
fn config_reports_validation_failure_without_credentials() {
    with_env(&[], || {
        let output = config::run(None);
        assert!(output.starts_with("config validation failed:"), "unexpected output: {output}");
    });
}

#[test]
fn doctor_skips_backend_checks_when_config_invalid() {
    with_env(&[], || {
        let result = doctor::run(None, true);
        assert_eq!(result.exit_code, 5);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][0]["name"], "config_validation");
        assert_eq!(payload["checks"][0]["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
        assert_eq!(payload["checks"][2]["name"], "backend_reachability");
        assert_eq!(payload["checks"][2]["status"], "skipped");
    });
}

#[test]
fn doctor_reports_unreachable_local_backend() {
    with_env(
        &[
            ("VIGIL_LLM_BASE_URL", "http://127.0.0.1:9/v1"),
            ("VIGIL_LLM_MAX_RETRIES", "0"),
            ("VIGIL_LLM_TIMEOUT_SECS", "2"),
        ],
        || {
            let result = doctor::run(None, false);
            assert_eq!(result.exit_code, 5);

            let lines: Vec<&str> = result.output.lines().collect();
            assert_eq!(lines[0], "doctor: one or more readiness checks failed");
            assert!(lines[1].starts_with("- [ok] config_validation"));
            assert_eq!(
                lines[2],
                "- [ok] guardrail_pipeline: checks in order: topic_limit=raise, pii_detect=noop"
            );
            assert!(lines[3].starts_with("- [fail] backend_reachability"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "VIGIL_LLM_BASE_URL",
        "VIGIL_LLM_API_KEY",
        "VIGIL_LLM_MODEL",
        "VIGIL_LLM_TEMPERATURE",
        "VIGIL_LLM_TIMEOUT_SECS",
        "VIGIL_LLM_MAX_RETRIES",
        "VIGIL_GUARDRAILS_TOPIC_ENABLED",
        "VIGIL_GUARDRAILS_TOPIC",
        "VIGIL_GUARDRAILS_TOPIC_THRESHOLD",
        "VIGIL_GUARDRAILS_TOPIC_ON_FAIL",
        "VIGIL_GUARDRAILS_STRUCTURED_INPUT",
        "VIGIL_GUARDRAILS_PII_ENABLED",
        "VIGIL_GUARDRAILS_PII_ON_FAIL",
        "VIGIL_GUARDRAILS_PII_ENTITIES",
        "VIGIL_GUARDRAILS_DENYLIST",
        "VIGIL_GUARDRAILS_DENYLIST_ENTITY",
        "VIGIL_SESSION_RUN_TIMEOUT_SECS",
        "VIGIL_SESSION_MAX_AGENT_STEPS",
        "VIGIL_LOGGING_LEVEL",
        "VIGIL_LOGGING_FORMAT",
        "VIGIL_LOG_LEVEL",
        "VIGIL_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
