use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

lazy_static::lazy_static! {
    /// Generated aliases must stay valid identifiers
    static ref ALIAS_SEPARATOR_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9_$]+$").expect("separator pattern is valid");
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Planner configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Resolve `a.owner.id` against the owner's foreign key instead of joining `owner`
    pub optimize_single_valued_id_access: bool,

    /// Non-aggregate select items become group-by items once an aggregate is selected
    pub implicit_group_by_from_select: bool,

    /// Maximum length of a join chain below a root (1-64)
    #[validate(range(min = 1, max = 64, message = "Max join depth must be between 1 and 64"))]
    pub max_join_depth: u32,

    /// Separator between an implicit alias and its counter, e.g. `items_1`
    #[validate(length(
        min = 1,
        max = 4,
        message = "Alias postfix separator must be 1 to 4 characters"
    ))]
    #[validate(regex(
        path = *ALIAS_SEPARATOR_PATTERN,
        message = "Alias postfix separator may only contain letters, digits, `_` and `$`"
    ))]
    pub alias_postfix_separator: String,

    /// Whether fetch joins are rendered with the FETCH keyword
    pub render_fetch_joins: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            optimize_single_valued_id_access: true,
            implicit_group_by_from_select: true,
            max_join_depth: 32,
            alias_postfix_separator: "_".to_string(),
            render_fetch_joins: true,
        }
    }
}

impl PlannerConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            optimize_single_valued_id_access: parse_env_var("CRITERIA_SINGLE_VALUED_ID", "true")?,
            implicit_group_by_from_select: parse_env_var("CRITERIA_IMPLICIT_GROUP_BY", "true")?,
            max_join_depth: parse_env_var("CRITERIA_MAX_JOIN_DEPTH", "32")?,
            alias_postfix_separator: env::var("CRITERIA_ALIAS_SEPARATOR")
                .unwrap_or_else(|_| "_".to_string()),
            render_fetch_joins: parse_env_var("CRITERIA_RENDER_FETCHES", "true")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from CLI arguments with validation
    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        let config = Self {
            optimize_single_valued_id_access: !cli.no_single_valued_id,
            implicit_group_by_from_select: !cli.no_implicit_group_by,
            max_join_depth: cli.max_join_depth,
            alias_postfix_separator: cli.alias_separator,
            render_fetch_joins: !cli.no_fetches,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }
}

/// CLI configuration (parsed from command line arguments)
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub no_single_valued_id: bool,
    pub no_implicit_group_by: bool,
    pub max_join_depth: u32,
    pub alias_separator: String,
    pub no_fetches: bool,
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
