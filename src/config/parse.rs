use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml)?;
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = env_var_pattern()?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.storage.path = expand_tilde(&config.storage.path);
    if let Some(path) = &config.queue.path {
        config.queue.path = Some(expand_tilde(path));
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.web.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen: '{}' is not a valid socket address",
            config.web.listen
        ));
    }

    if config.auth.required && config.auth.api_keys.iter().all(|k| k.is_empty()) {
        errors.push("auth.required is set but auth.api_keys is empty".to_string());
    }

    validate_queue(config, &mut errors);

    if config.writer.batch_size == 0 {
        errors.push("writer.batch_size must be greater than 0".to_string());
    }
    non_zero("writer.flush_interval", config.writer.flush_interval, &mut errors);
    non_zero("writer.receive_backoff", config.writer.receive_backoff, &mut errors);

    validate_tail(&config.tail, &mut errors);

    if config.query.max_limit == 0 {
        errors.push("query.max_limit must be greater than 0".to_string());
    }
    if config.query.default_limit == 0 {
        errors.push("query.default_limit must be greater than 0".to_string());
    }
    if config.query.default_limit > config.query.max_limit {
        errors.push(format!(
            "query.default_limit ({}) exceeds query.max_limit ({})",
            config.query.default_limit, config.query.max_limit
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_queue(config: &Config, errors: &mut Vec<String>) {
    if config.mode == Mode::Unified {
        return;
    }

    match config.queue.backend {
        QueueBackend::Memory => {
            if config.queue.capacity == 0 {
                errors.push("queue.capacity must be greater than 0".to_string());
            }
        }
        QueueBackend::Spool => {
            if config.queue.path.is_none() {
                errors.push("queue.path is required for the spool backend".to_string());
            }
            non_zero("queue.poll_interval", config.queue.poll_interval, errors);
        }
    }
}

fn validate_tail(tail: &TailConfig, errors: &mut Vec<String>) {
    for (name, value) in [
        ("tail.watcher_buffer", tail.watcher_buffer),
        ("tail.dispatch_buffer", tail.dispatch_buffer),
        ("tail.max_batch", tail.max_batch),
        ("tail.poll_limit", tail.poll_limit),
    ] {
        if value == 0 {
            errors.push(format!("{} must be greater than 0", name));
        }
    }

    if tail.mode == TailMode::Poll {
        non_zero("tail.poll_interval", tail.poll_interval, errors);
    }
}

fn non_zero(name: &str, value: Duration, errors: &mut Vec<String>) {
    if value.is_zero() {
        errors.push(format!("{} must be greater than 0", name));
    }
}
