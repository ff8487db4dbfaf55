use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::validation::{FailurePolicy, StructuredInputPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub guardrails: GuardrailConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Backend connection settings: endpoint, credentials, model and sampling temperature.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub topic_enabled: bool,
    pub topic: String,
    pub topic_threshold: u8,
    pub topic_on_fail: FailurePolicy,
    pub structured_input: StructuredInputPolicy,
    pub pii_enabled: bool,
    pub pii_on_fail: FailurePolicy,
    pub pii_entities: Vec<String>,
    pub denylist: Vec<String>,
    pub denylist_entity: String,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Zero means the run waits indefinitely for tool decisions.
    pub run_timeout_secs: u64,
    pub max_agent_steps: u32,
}

impl SessionConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
    pub run_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o".to_string(),
                temperature: 0.0,
                timeout_secs: 30,
                max_retries: 2,
            },
            guardrails: GuardrailConfig {
                topic_enabled: true,
                topic: "health".to_string(),
                topic_threshold: 50,
                topic_on_fail: FailurePolicy::Raise,
                structured_input: StructuredInputPolicy::AutoPass,
                pii_enabled: true,
                pii_on_fail: FailurePolicy::Noop,
                pii_entities: vec!["PERSON".to_string()],
                denylist: ["apple", "banana", "orange", "watermelon"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                denylist_entity: "FRUIT".to_string(),
            },
            session: SessionConfig { run_timeout_secs: 0, max_agent_steps: 10 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("vigil.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(topic_enabled) = guardrails.topic_enabled {
                self.guardrails.topic_enabled = topic_enabled;
            }
            if let Some(topic) = guardrails.topic {
                self.guardrails.topic = topic;
            }
            if let Some(topic_threshold) = guardrails.topic_threshold {
                self.guardrails.topic_threshold = topic_threshold;
            }
            if let Some(topic_on_fail) = guardrails.topic_on_fail {
                self.guardrails.topic_on_fail = topic_on_fail;
            }
            if let Some(structured_input) = guardrails.structured_input {
                self.guardrails.structured_input = structured_input;
            }
            if let Some(pii_enabled) = guardrails.pii_enabled {
                self.guardrails.pii_enabled = pii_enabled;
            }
            if let Some(pii_on_fail) = guardrails.pii_on_fail {
                self.guardrails.pii_on_fail = pii_on_fail;
            }
            if let Some(pii_entities) = guardrails.pii_entities {
                self.guardrails.pii_entities = pii_entities;
            }
            if let Some(denylist) = guardrails.denylist {
                self.guardrails.denylist = denylist;
            }
            if let Some(denylist_entity) = guardrails.denylist_entity {
                self.guardrails.denylist_entity = denylist_entity;
            }
        }

        if let Some(session) = patch.session {
            if let Some(run_timeout_secs) = session.run_timeout_secs {
                self.session.run_timeout_secs = run_timeout_secs;
            }
            if let Some(max_agent_steps) = session.max_agent_steps {
                self.session.max_agent_steps = max_agent_steps;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("VIGIL_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("VIGIL_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("VIGIL_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("VIGIL_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("VIGIL_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("VIGIL_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("VIGIL_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("VIGIL_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("VIGIL_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("VIGIL_GUARDRAILS_TOPIC_ENABLED") {
            self.guardrails.topic_enabled = parse_env("VIGIL_GUARDRAILS_TOPIC_ENABLED", &value)?;
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_TOPIC") {
            self.guardrails.topic = value;
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_TOPIC_THRESHOLD") {
            self.guardrails.topic_threshold =
                parse_env("VIGIL_GUARDRAILS_TOPIC_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_TOPIC_ON_FAIL") {
            self.guardrails.topic_on_fail = parse_env("VIGIL_GUARDRAILS_TOPIC_ON_FAIL", &value)?;
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_STRUCTURED_INPUT") {
            self.guardrails.structured_input =
                parse_env("VIGIL_GUARDRAILS_STRUCTURED_INPUT", &value)?;
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_PII_ENABLED") {
            self.guardrails.pii_enabled = parse_env("VIGIL_GUARDRAILS_PII_ENABLED", &value)?;
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_PII_ON_FAIL") {
            self.guardrails.pii_on_fail = parse_env("VIGIL_GUARDRAILS_PII_ON_FAIL", &value)?;
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_PII_ENTITIES") {
            self.guardrails.pii_entities = split_list(&value);
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_DENYLIST") {
            self.guardrails.denylist = split_list(&value);
        }
        if let Some(value) = read_env("VIGIL_GUARDRAILS_DENYLIST_ENTITY") {
            self.guardrails.denylist_entity = value;
        }

        if let Some(value) = read_env("VIGIL_SESSION_RUN_TIMEOUT_SECS") {
            self.session.run_timeout_secs = parse_env("VIGIL_SESSION_RUN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("VIGIL_SESSION_MAX_AGENT_STEPS") {
            self.session.max_agent_steps = parse_env("VIGIL_SESSION_MAX_AGENT_STEPS", &value)?;
        }

        let log_level = read_env("VIGIL_LOGGING_LEVEL").or_else(|| read_env("VIGIL_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("VIGIL_LOGGING_FORMAT").or_else(|| read_env("VIGIL_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(run_timeout_secs) = overrides.run_timeout_secs {
            self.session.run_timeout_secs = run_timeout_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_guardrails(&self.guardrails)?;
        validate_session(&self.session)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// An explicit path wins; otherwise `vigil.toml`, then `config/vigil.toml`.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("vigil.toml"), PathBuf::from("config/vigil.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_local_endpoint(base_url: &str) -> bool {
    let without_scheme = base_url
        .strip_prefix("http://")
        .or_else(|| base_url.strip_prefix("https://"))
        .unwrap_or(base_url);
    ["localhost", "127.0.0.1", "[::1]", "0.0.0.0"]
        .iter()
        .any(|host| without_scheme.starts_with(host))
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    let base_url = llm.base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !is_local_endpoint(base_url) {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for non-local backends (set VIGIL_LLM_API_KEY)"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.topic_threshold > 100 {
        return Err(ConfigError::Validation(
            "guardrails.topic_threshold must be in range 0..=100".to_string(),
        ));
    }

    if guardrails.topic_enabled && guardrails.topic.trim().is_empty() {
        return Err(ConfigError::Validation(
            "guardrails.topic must not be empty when the topic check is enabled".to_string(),
        ));
    }

    if guardrails.pii_enabled && guardrails.pii_entities.is_empty() {
        return Err(ConfigError::Validation(
            "guardrails.pii_entities must list at least one entity type".to_string(),
        ));
    }

    if guardrails.denylist_entity.trim().is_empty() {
        return Err(ConfigError::Validation(
            "guardrails.denylist_entity must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.max_agent_steps == 0 {
        return Err(ConfigError::Validation(
            "session.max_agent_steps must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    guardrails: Option<GuardrailPatch>,
    session: Option<SessionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    topic_enabled: Option<bool>,
    topic: Option<String>,
    topic_threshold: Option<u8>,
    topic_on_fail: Option<FailurePolicy>,
    structured_input: Option<StructuredInputPolicy>,
    pii_enabled: Option<bool>,
    pii_on_fail: Option<FailurePolicy>,
    pii_entities: Option<Vec<String>>,
    denylist: Option<Vec<String>>,
    denylist_entity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    run_timeout_secs: Option<u64>,
    max_agent_steps: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::domain::validation::{FailurePolicy, StructuredInputPolicy};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_VIGIL_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("vigil.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_VIGIL_API_KEY}"
model = "gpt-4o-mini"

[guardrails]
topic_on_fail = "noop"
pii_on_fail = "raise"
pii_entities = ["PERSON", "FRUIT"]
structured_input = "classify"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be loaded from environment",
            )?;
            ensure(config.llm.model == "gpt-4o-mini", "model should come from the file")?;
            ensure(
                config.guardrails.topic_on_fail == FailurePolicy::Noop,
                "topic policy should be parsed from the file",
            )?;
            ensure(
                config.guardrails.pii_entities == vec!["PERSON".to_string(), "FRUIT".to_string()],
                "entity list should be parsed from the file",
            )?;
            ensure(
                config.guardrails.structured_input == StructuredInputPolicy::Classify,
                "structured input policy should be parsed from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_VIGIL_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VIGIL_LLM_API_KEY", "sk-test");
        env::set_var("VIGIL_LOG_LEVEL", "warn");
        env::set_var("VIGIL_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["VIGIL_LLM_API_KEY", "VIGIL_LOG_LEVEL", "VIGIL_LOG_FORMAT"]);
        result
    }

    #[test]
    fn env_beats_file_beats_defaults() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VIGIL_LLM_MODEL", "model-from-env");
        env::set_var("VIGIL_GUARDRAILS_TOPIC_THRESHOLD", "65");
        env::set_var("VIGIL_GUARDRAILS_PII_ENTITIES", "PERSON, FRUIT");
        env::set_var("VIGIL_GUARDRAILS_DENYLIST_ENTITY", "HERB");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("vigil.toml");
            fs::write(
                &path,
                r#"
[llm]
base_url = "http://localhost:11434/v1"
model = "model-from-file"

[guardrails]
topic_threshold = 40

[session]
run_timeout_secs = 120

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    run_timeout_secs: Some(30),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.base_url == "http://localhost:11434/v1", "file base url applies")?;
            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            ensure(config.guardrails.topic_threshold == 65, "env threshold should win over file")?;
            ensure(config.guardrails.denylist_entity == "HERB", "env denylist entity applies")?;
            ensure(
                config.guardrails.pii_entities == vec!["PERSON".to_string(), "FRUIT".to_string()],
                "env entity list should be split on commas",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.session.run_timeout() == Some(Duration::from_secs(30)),
                "overridden run timeout should win over file",
            )?;
            ensure(config.llm.api_key.is_none(), "local backends need no api key")?;
            Ok(())
        })();

        clear_vars(&[
            "VIGIL_LLM_MODEL",
            "VIGIL_GUARDRAILS_TOPIC_THRESHOLD",
            "VIGIL_GUARDRAILS_PII_ENTITIES",
            "VIGIL_GUARDRAILS_DENYLIST_ENTITY",
        ]);
        result
    }

    #[test]
    fn remote_backend_without_api_key_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        clear_vars(&["VIGIL_LLM_API_KEY", "VIGIL_LLM_BASE_URL"]);

        let error = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => {
                return Err("expected validation failure but config load succeeded".to_string())
            }
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("llm.api_key")
        );
        ensure(has_message, "validation failure should mention llm.api_key")
    }

    #[test]
    fn invalid_policy_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VIGIL_LLM_API_KEY", "sk-test");
        env::set_var("VIGIL_GUARDRAILS_PII_ON_FAIL", "sometimes");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "VIGIL_GUARDRAILS_PII_ON_FAIL", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override to fail".to_string()),
        };

        clear_vars(&["VIGIL_LLM_API_KEY", "VIGIL_GUARDRAILS_PII_ON_FAIL"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("VIGIL_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            ensure(config.session.run_timeout().is_none(), "default run has no timeout")?;
            Ok(())
        })();

        clear_vars(&["VIGIL_LLM_API_KEY"]);
        result
    }
}
