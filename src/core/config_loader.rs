//! Configuration file loader for image-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::PublishError;
use regex::Regex;
use reqwest::Url;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Configuration file name
const CONFIG_FILENAME: &str = ".image-publisher.yaml";

/// Environment variable pattern (${VAR_NAME})
const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

/// Environment variables mapped onto configuration paths
const ENV_OVERRIDES: &[(&str, &[&str])] = &[
    ("IMAGE_PUBLISHER_CATALOG_URL", &["catalog", "endpoint"]),
    ("IMAGE_PUBLISHER_IMAGE_API_VERSION", &["catalog", "imageApiVersion"]),
    ("IMAGE_PUBLISHER_USE_TASKS", &["catalog", "useTasks"]),
    ("IMAGE_PUBLISHER_OBJECT_STORE_URL", &["objectStore", "endpoint"]),
    ("IMAGE_PUBLISHER_CONTAINER", &["publish", "container"]),
];

/// Configuration load options
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// Explicit config file, replacing the project file lookup
    pub config_file: Option<PathBuf>,

    /// Environment variables
    pub env: HashMap<String, String>,
}

impl ConfigLoadOptions {
    /// Options for the current directory and process environment
    pub fn from_process_env() -> Self {
        Self {
            project_path: PathBuf::from("."),
            config_file: None,
            env: env::vars().collect(),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "catalog.endpoint")
    pub field: String,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. Environment variables
    /// 2. Project config (./.image-publisher.yaml) or the explicit file
    /// 3. Global config (~/.image-publisher.yaml)
    /// 4. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<PublisherConfig, PublishError> {
        let mut layers: Vec<Value> = Vec::new();

        if let Some(home) = options.env.get("HOME") {
            let global_path = PathBuf::from(home).join(CONFIG_FILENAME);
            if let Some(global) = Self::load_config_file(&global_path).await? {
                layers.push(global);
            }
        }

        let project_path = options
            .config_file
            .clone()
            .unwrap_or_else(|| options.project_path.join(CONFIG_FILENAME));
        match Self::load_config_file(&project_path).await? {
            Some(project) => layers.push(project),
            None if options.config_file.is_some() => {
                return Err(PublishError::Config(format!(
                    "config file {} not found",
                    project_path.display()
                )));
            }
            None => {}
        }

        layers.push(Self::load_env_config(&options.env));

        let merged = layers
            .into_iter()
            .fold(Value::Mapping(Mapping::new()), Self::merge_values);

        let mut config = Self::from_value(merged)?;
        Self::expand_env_vars(&mut config, &options.env);

        Ok(config)
    }

    /// Load one YAML layer, following `extends`
    fn load_config_file(
        file_path: &Path,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Option<Value>, PublishError>> + Send + '_>,
    > {
        Box::pin(async move {
            if !file_path.exists() {
                return Ok(None);
            }

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                PublishError::Config(format!("failed to read {}: {}", file_path.display(), e))
            })?;

            let layer: Value = serde_yaml::from_str(&content).map_err(|e| {
                PublishError::Config(format!("failed to parse {}: {}", file_path.display(), e))
            })?;

            let extends = layer
                .get("extends")
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some(extends_path) = extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| PublishError::Config("invalid config file path".to_string()))?
                    .join(extends_path);

                if let Some(base) = Self::load_config_file(&base_path).await? {
                    return Ok(Some(Self::merge_values(base, layer)));
                }
            }

            Ok(Some(layer))
        })
    }

    /// Build a YAML layer from IMAGE_PUBLISHER_* variables
    fn load_env_config(env: &HashMap<String, String>) -> Value {
        let mut root = Value::Mapping(Mapping::new());

        for (var, path) in ENV_OVERRIDES {
            let Some(raw) = env.get(*var) else {
                continue;
            };
            let value = match raw.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => Value::String(other.to_string()),
            };
            Self::set_path(&mut root, path, value);
        }

        root
    }

    fn set_path(root: &mut Value, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        let mut node = root;
        for key in parents {
            let Value::Mapping(map) = node else {
                return;
            };
            node = map
                .entry(Value::String(key.to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }
        if let Value::Mapping(map) = node {
            map.insert(Value::String(last.to_string()), value);
        }
    }

    /// Deep-merge `source` over `target`; mappings merge key by key, anything else is replaced
    fn merge_values(target: Value, source: Value) -> Value {
        match (target, source) {
            (Value::Mapping(mut target_map), Value::Mapping(source_map)) => {
                for (key, source_value) in source_map {
                    let merged = match target_map.remove(&key) {
                        Some(target_value) => Self::merge_values(target_value, source_value),
                        None => source_value,
                    };
                    target_map.insert(key, merged);
                }
                Value::Mapping(target_map)
            }
            (_, source) => source,
        }
    }

    fn from_value(mut value: Value) -> Result<PublisherConfig, PublishError> {
        if let Value::Mapping(map) = &mut value {
            map.entry(Value::String("version".to_string()))
                .or_insert_with(|| Value::String("1.0".to_string()));
        }

        serde_yaml::from_value(value)
            .map_err(|e| PublishError::Config(format!("failed to parse configuration: {}", e)))
    }

    /// Expand ${VAR} references in endpoint strings
    fn expand_env_vars(config: &mut PublisherConfig, env: &HashMap<String, String>) {
        config.catalog.endpoint = Self::expand_string(&config.catalog.endpoint, env);

        if let Some(object_store) = &mut config.object_store {
            object_store.endpoint = Self::expand_string(&object_store.endpoint, env);
            if let Some(info) = &object_store.info_endpoint {
                object_store.info_endpoint = Some(Self::expand_string(info, env));
            }
        }
    }

    /// Expand environment variables in a single string
    fn expand_string(input: &str, env: &HashMap<String, String>) -> String {
        let Ok(env_var_regex) = Regex::new(ENV_VAR_PATTERN) else {
            return input.to_string();
        };

        let mut result = input.to_string();
        for cap in env_var_regex.captures_iter(input) {
            let var_name = &cap[1];

            match env.get(var_name) {
                Some(value) => result = result.replace(&format!("${{{}}}", var_name), value),
                None => tracing::warn!(variable = var_name, "environment variable not set"),
            }
        }

        result
    }

    /// Validate configuration
    pub fn validate(config: &PublisherConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "Version is required".to_string(),
                expected: Some("string (e.g., \"1.0\")".to_string()),
                actual: Some("empty".to_string()),
            });
        } else if config.version != "1.0" {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("Unknown version: {}", config.version),
                suggestion: Some("Currently supported version is \"1.0\" only".to_string()),
            });
        }

        Self::validate_endpoint("catalog.endpoint", &config.catalog.endpoint, &mut errors);

        if config.catalog.use_tasks {
            if config.catalog.image_api_version == ApiVersion::V1 {
                warnings.push(ConfigValidationWarning {
                    field: "catalog.useTasks".to_string(),
                    message: "Task imports need image API v2, direct upload will be used"
                        .to_string(),
                    suggestion: Some("Set catalog.imageApiVersion to 2".to_string()),
                });
            } else if config.object_store.is_none() {
                errors.push(ConfigValidationError {
                    field: "objectStore".to_string(),
                    message: "Task imports stage the image in an object store".to_string(),
                    expected: Some("objectStore.endpoint".to_string()),
                    actual: Some("missing".to_string()),
                });
            }
        }

        if let Some(object_store) = &config.object_store {
            Self::validate_endpoint("objectStore.endpoint", &object_store.endpoint, &mut errors);

            if object_store.segment_size == Some(0) {
                errors.push(ConfigValidationError {
                    field: "objectStore.segmentSize".to_string(),
                    message: "segmentSize must be positive".to_string(),
                    expected: Some("integer > 0".to_string()),
                    actual: Some("0".to_string()),
                });
            }
        }

        if config.publish.timeout_secs == 0 {
            errors.push(ConfigValidationError {
                field: "publish.timeoutSecs".to_string(),
                message: "timeoutSecs must be positive".to_string(),
                expected: Some("integer > 0".to_string()),
                actual: Some("0".to_string()),
            });
        }

        if config.publish.poll_interval_secs == 0 {
            errors.push(ConfigValidationError {
                field: "publish.pollIntervalSecs".to_string(),
                message: "pollIntervalSecs must be positive".to_string(),
                expected: Some("integer > 0".to_string()),
                actual: Some("0".to_string()),
            });
        } else if config.publish.poll_interval_secs > config.publish.timeout_secs {
            warnings.push(ConfigValidationWarning {
                field: "publish.pollIntervalSecs".to_string(),
                message: "Poll interval is longer than the whole timeout".to_string(),
                suggestion: Some("Lower pollIntervalSecs".to_string()),
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn validate_endpoint(field: &str, endpoint: &str, errors: &mut Vec<ConfigValidationError>) {
        if endpoint.is_empty() {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message: "endpoint is required".to_string(),
                expected: Some("http(s) URL".to_string()),
                actual: Some("empty".to_string()),
            });
        } else if !Url::parse(endpoint)
            .is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
        {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message: "endpoint must be an http(s) URL".to_string(),
                expected: Some("http(s) URL".to_string()),
                actual: Some(endpoint.to_string()),
            });
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("Configuration is valid".to_string());
        } else {
            lines.push("Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\nErrors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
                if let (Some(expected), Some(actual)) = (&error.expected, &error.actual) {
                    lines.push(format!("    Expected: {}", expected));
                    lines.push(format!("    Actual: {}", actual));
                }
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\nWarnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}
