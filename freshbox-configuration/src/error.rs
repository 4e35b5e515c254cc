use thiserror::Error;

/// Errors raised while loading or applying supplier configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid YAML or does not match the configuration model.
    #[error("invalid supplier configuration: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    /// A field parsed but holds a value the supplier cannot use.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Path of the offending field.
        field: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}
