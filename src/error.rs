//! Domain-specific error types for the reconciliation engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return typed errors (e.g., [`EngineError`], [`StoreError`])
//! while units and command handlers at the CLI boundary convert them to
//! [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! DotfilesError
//! ├── Engine(EngineError)             : registration and dependency-graph checks
//! ├── Store(StoreError)               : state store I/O and (de)serialization
//! ├── Contribution(ContributionError) : contribution tables and legacy upgrades
//! └── Config(ConfigError)             : unit declaration files
//! ```

use thiserror::Error;

/// Top-level error type for the engine.
///
/// Aggregates domain-specific sub-errors and is convertible to
/// [`anyhow::Error`] for use at CLI command boundaries.
#[derive(Error, Debug)]
pub enum DotfilesError {
    /// Registration or dependency-graph error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// State store error (I/O, parse, serialization).
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// Contribution table error.
    #[error("Contribution error: {0}")]
    Contribution(#[from] ContributionError),

    /// Configuration-related error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Fatal, pre-execution errors raised by registration and ordering.
///
/// None of these are ever produced after a unit method has been invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Two units were registered with the same id.
    #[error("Module '{0}' is already registered")]
    DuplicateModule(String),

    /// A unit declares a dependency on an id that is not registered.
    #[error("Module '{unit}' depends on unregistered module '{dependency}'")]
    MissingDependency {
        /// Id of the unit declaring the dependency.
        unit: String,
        /// The dependency id that could not be found.
        dependency: String,
    },

    /// The dependency relation contains a cycle.
    ///
    /// The path starts and ends with the same id.
    #[error("Dependency cycle detected: {}", .0.join(" → "))]
    Cycle(Vec<String>),

    /// An operation was restricted to an id that is not registered.
    #[error("Unknown module '{0}'")]
    UnknownModule(String),
}

/// Errors that arise from the persisted key/value store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the state file failed.
    #[error("IO error on state file {path}: {source}")]
    Io {
        /// Path to the state file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The state file exists but is not a JSON object.
    #[error("Invalid state file {path}: {source}")]
    Parse {
        /// Path to the state file.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A value could not be converted to or from its stored JSON form.
    #[error("Cannot convert value for key '{key}': {source}")]
    Value {
        /// Key being read or written.
        key: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Errors that arise from contribution tables.
#[derive(Error, Debug)]
pub enum ContributionError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored contribution list matches neither the current nor the legacy shape.
    #[error("Malformed contributions under '{key}': {reason}")]
    Malformed {
        /// Store key of the namespace list.
        key: String,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Errors that arise from loading unit declarations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML file contains a syntax or schema error.
    #[error("Invalid TOML in {file}: {message}")]
    InvalidSyntax {
        /// File being parsed.
        file: String,
        /// Parser message.
        message: String,
    },

    /// An I/O error occurred while reading a config file.
    #[error("IO error reading config file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::io;

    // -----------------------------------------------------------------------
    // EngineError
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_module_display() {
        let e = EngineError::DuplicateModule("paths".to_string());
        assert_eq!(e.to_string(), "Module 'paths' is already registered");
    }

    #[test]
    fn missing_dependency_display_names_both_ids() {
        let e = EngineError::MissingDependency {
            unit: "shell-env".to_string(),
            dependency: "homebrew".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Module 'shell-env' depends on unregistered module 'homebrew'"
        );
    }

    #[test]
    fn cycle_display_joins_path() {
        let e = EngineError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(e.to_string(), "Dependency cycle detected: a → b → a");
    }

    #[test]
    fn unknown_module_display() {
        let e = EngineError::UnknownModule("nope".to_string());
        assert_eq!(e.to_string(), "Unknown module 'nope'");
    }

    // -----------------------------------------------------------------------
    // StoreError / ContributionError
    // -----------------------------------------------------------------------

    #[test]
    fn store_io_has_source() {
        use std::error::Error as StdError;
        let e = StoreError::Io {
            path: "/state.json".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("/state.json"));
        assert!(e.source().is_some());
    }

    #[test]
    fn contribution_store_error_is_transparent() {
        let inner = StoreError::Io {
            path: "/s.json".to_string(),
            source: io::Error::other("boom"),
        };
        let expected = inner.to_string();
        let e = ContributionError::from(inner);
        assert_eq!(e.to_string(), expected);
    }

    #[test]
    fn malformed_display() {
        let e = ContributionError::Malformed {
            key: "contrib.paths".to_string(),
            reason: "expected an array".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Malformed contributions under 'contrib.paths': expected an array"
        );
    }

    // -----------------------------------------------------------------------
    // ConfigError
    // -----------------------------------------------------------------------

    #[test]
    fn config_error_invalid_syntax_display() {
        let e = ConfigError::InvalidSyntax {
            file: "units.toml".to_string(),
            message: "unexpected token".to_string(),
        };
        assert_eq!(e.to_string(), "Invalid TOML in units.toml: unexpected token");
    }

    // -----------------------------------------------------------------------
    // DotfilesError conversions
    // -----------------------------------------------------------------------

    #[test]
    fn dotfiles_error_from_engine_error() {
        let e: DotfilesError = EngineError::DuplicateModule("x".to_string()).into();
        assert!(e.to_string().contains("Engine error"));
        assert!(e.to_string().contains('x'));
    }

    #[test]
    fn dotfiles_error_from_config_error() {
        let e: DotfilesError = ConfigError::Io {
            path: "units.toml".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        }
        .into();
        assert!(e.to_string().contains("Configuration error"));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<DotfilesError>();
        assert_send_sync::<EngineError>();
        assert_send_sync::<StoreError>();
        assert_send_sync::<ContributionError>();
        assert_send_sync::<ConfigError>();
    }

    #[test]
    fn engine_error_converts_to_anyhow() {
        let e = EngineError::UnknownModule("x".to_string());
        let _anyhow_err: anyhow::Error = e.into();
    }
}
