use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use toml::Value;
use vigil_core::config::{resolve_config_path, AppConfig, LoadOptions};

pub fn run(config_path: Option<&Path>) -> String {
    let options =
        LoadOptions { config_path: config_path.map(Path::to_path_buf), ..LoadOptions::default() };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let guardrails = &config.guardrails;

    let entries = vec![
        entry("llm.base_url", config.llm.base_url.clone(), &["VIGIL_LLM_BASE_URL"]),
        entry("llm.api_key", api_key, &["VIGIL_LLM_API_KEY"]),
        entry("llm.model", config.llm.model.clone(), &["VIGIL_LLM_MODEL"]),
        entry("llm.temperature", config.llm.temperature.to_string(), &["VIGIL_LLM_TEMPERATURE"]),
        entry("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["VIGIL_LLM_TIMEOUT_SECS"]),
        entry("llm.max_retries", config.llm.max_retries.to_string(), &["VIGIL_LLM_MAX_RETRIES"]),
        entry(
            "guardrails.topic_enabled",
            guardrails.topic_enabled.to_string(),
            &["VIGIL_GUARDRAILS_TOPIC_ENABLED"],
        ),
        entry("guardrails.topic", guardrails.topic.clone(), &["VIGIL_GUARDRAILS_TOPIC"]),
        entry(
            "guardrails.topic_threshold",
            guardrails.topic_threshold.to_string(),
            &["VIGIL_GUARDRAILS_TOPIC_THRESHOLD"],
        ),
        entry(
            "guardrails.topic_on_fail",
            guardrails.topic_on_fail.to_string(),
            &["VIGIL_GUARDRAILS_TOPIC_ON_FAIL"],
        ),
        entry(
            "guardrails.structured_input",
            format!("{:?}", guardrails.structured_input),
            &["VIGIL_GUARDRAILS_STRUCTURED_INPUT"],
        ),
        entry(
            "guardrails.pii_enabled",
            guardrails.pii_enabled.to_string(),
            &["VIGIL_GUARDRAILS_PII_ENABLED"],
        ),
        entry(
            "guardrails.pii_on_fail",
            guardrails.pii_on_fail.to_string(),
            &["VIGIL_GUARDRAILS_PII_ON_FAIL"],
        ),
        entry(
            "guardrails.pii_entities",
            guardrails.pii_entities.join(","),
            &["VIGIL_GUARDRAILS_PII_ENTITIES"],
        ),
        entry("guardrails.denylist", guardrails.denylist.join(","), &["VIGIL_GUARDRAILS_DENYLIST"]),
        entry(
            "guardrails.denylist_entity",
            guardrails.denylist_entity.clone(),
            &["VIGIL_GUARDRAILS_DENYLIST_ENTITY"],
        ),
        entry(
            "session.run_timeout_secs",
            config.session.run_timeout_secs.to_string(),
            &["VIGIL_SESSION_RUN_TIMEOUT_SECS"],
        ),
        entry(
            "session.max_agent_steps",
            config.session.max_agent_steps.to_string(),
            &["VIGIL_SESSION_MAX_AGENT_STEPS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["VIGIL_LOGGING_LEVEL", "VIGIL_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["VIGIL_LOGGING_FORMAT", "VIGIL_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in entries {
        lines.push(render_line(key, &value, source(key, env_keys)));
    }
    lines.join("\n")
}

type Entry = (&'static str, String, &'static [&'static str]);

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Entry {
    (key, value, env_keys)
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable key prefix such as `sk-` and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
