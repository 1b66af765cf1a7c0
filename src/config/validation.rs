use crate::config::types::{
    Config, CrawlerConfig, DeliveryConfig, ExportConfig, OutputConfig, RecoveryConfig,
    RotatorConfig, SourceConfig,
};
use crate::ConfigError;
use url::Url;

/// Time filters accepted by the `top` listing
const TIME_FILTERS: &[&str] = &["hour", "day", "week", "month", "year", "all"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_export_config(&config.export)?;
    validate_recovery_config(&config.recovery)?;
    validate_source_config(&config.source)?;
    validate_rotator_config(&config.rotator)?;
    validate_output_config(&config.output)?;
    if let Some(delivery) = &config.delivery {
        validate_delivery_config(delivery)?;
    }
    if config.dedup.persist_interval < 1 {
        return Err(ConfigError::Validation(
            "persist_interval must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates crawl loop configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.posts_per_entity < 1 {
        return Err(ConfigError::Validation(format!(
            "posts_per_entity must be >= 1, got {}",
            config.posts_per_entity
        )));
    }

    if config.time_filters.is_empty() {
        return Err(ConfigError::Validation(
            "time_filters must name at least one filter".to_string(),
        ));
    }

    for filter in &config.time_filters {
        if !TIME_FILTERS.contains(&filter.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown time filter '{}', expected one of {:?}",
                filter, TIME_FILTERS
            )));
        }
    }

    if config.search_terms.iter().any(|t| t.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "search_terms cannot contain empty terms".to_string(),
        ));
    }

    Ok(())
}

/// Validates export batching configuration
fn validate_export_config(config: &ExportConfig) -> Result<(), ConfigError> {
    if config.chunk_size < 1 {
        return Err(ConfigError::Validation(format!(
            "chunk_size must be >= 1, got {}",
            config.chunk_size
        )));
    }

    if config.threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "threshold must be >= 1, got {}",
            config.threshold
        )));
    }

    Ok(())
}

/// Validates retry budgets
fn validate_recovery_config(config: &RecoveryConfig) -> Result<(), ConfigError> {
    if config.max_failed_rotations < 1 {
        return Err(ConfigError::Validation(
            "max_failed_rotations must be >= 1".to_string(),
        ));
    }

    if config.backoff_min_ms > config.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_min_ms ({}) cannot exceed backoff_max_ms ({})",
            config.backoff_min_ms, config.backoff_max_ms
        )));
    }

    Ok(())
}

/// Validates remote source configuration
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one entry".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates rotator configuration
fn validate_rotator_config(config: &RotatorConfig) -> Result<(), ConfigError> {
    Url::parse(&config.proxy_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy_url: {}", e)))?;

    Url::parse(&config.ip_check_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid ip_check_url: {}", e)))?;

    if config.restart_command.iter().any(|arg| arg.is_empty()) {
        return Err(ConfigError::Validation(
            "restart_command cannot contain empty arguments".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data_dir cannot be empty".to_string(),
        ));
    }

    if config.summary_path.is_empty() {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the delivery target. An incomplete target only disables delivery.
fn validate_delivery_config(config: &DeliveryConfig) -> Result<(), ConfigError> {
    if config.port == 0 {
        return Err(ConfigError::Validation(
            "delivery port cannot be 0".to_string(),
        ));
    }

    if !config.remote_dir.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "delivery remote_dir must be absolute, got '{}'",
            config.remote_dir
        )));
    }

    Ok(())
}
