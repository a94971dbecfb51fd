//! Rich diagnostic error types for the rete engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`ReteError`] wraps them all so callers
//! can use a single `?`-friendly type at the session boundary.

use miette::Diagnostic;
use thiserror::Error;

use crate::fact::FactId;

/// Top-level error type for the rete engine.
#[derive(Debug, Error, Diagnostic)]
pub enum ReteError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Fact(#[from] FactError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Fact errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FactError {
    #[error("fact {id} is already present in the session")]
    #[diagnostic(
        code(rete::fact::duplicate),
        help(
            "A fact identity can only be inserted once. \
             Use `update` to change its attributes, or allocate a fresh id."
        )
    )]
    Duplicate { id: FactId },

    #[error("fact {id} is not known to the session")]
    #[diagnostic(
        code(rete::fact::unknown),
        help("Only facts previously inserted (and not yet retracted) can be updated or retracted.")
    )]
    Unknown { id: FactId },

    #[error("fact {id} cannot change type from {stored} to {requested}")]
    #[diagnostic(
        code(rete::fact::type_changed),
        help("Retract the fact and insert a new one if its type must change.")
    )]
    TypeChanged {
        id: FactId,
        stored: String,
        requested: String,
    },
}

/// Result type for fact store operations.
pub type FactResult<T> = std::result::Result<T, FactError>;

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum NetworkError {
    #[error("network invariant violated at node {node}: {message}")]
    #[diagnostic(
        code(rete::network::invariant),
        help(
            "The network's incremental bookkeeping reached an impossible state. \
             This is an engine bug; the session is no longer usable. \
             Please file a bug report with the mutation sequence that triggered it."
        )
    )]
    InvariantViolation { node: usize, message: String },

    #[error("invalid wiring: {message}")]
    #[diagnostic(
        code(rete::network::wiring),
        help(
            "Left inputs accept the root or token-producing nodes (join, not, exists, filter). \
             Right inputs accept alpha or group-by nodes."
        )
    )]
    InvalidWiring { message: String },

    #[error("node {node} does not exist in this network")]
    #[diagnostic(
        code(rete::network::unknown_node),
        help("Node handles are only valid for the builder that created them.")
    )]
    UnknownNode { node: usize },
}

/// Result type for network operations.
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("action of rule '{rule}' failed after {fired} successful firings: {source}")]
    #[diagnostic(
        code(rete::session::action),
        help(
            "The rule's action returned an error. Facts it inserted, updated or retracted \
             before failing remain applied; the agenda is consistent and `fire()` may be called again."
        )
    )]
    Action {
        rule: String,
        fired: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("session is poisoned by an earlier invariant violation")]
    #[diagnostic(
        code(rete::session::poisoned),
        help("Discard this session and build a new one from the same network.")
    )]
    Poisoned,

    #[error("fire() stopped after reaching the firing limit of {limit}")]
    #[diagnostic(
        code(rete::session::firing_limit),
        help(
            "Raise `max_firings` in the session config, or review rules whose \
             actions keep re-activating themselves."
        )
    )]
    FiringLimit { limit: usize },
}

/// Result type for session-level operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read session config: {path}")]
    #[diagnostic(
        code(rete::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse session config: {path}: {message}")]
    #[diagnostic(
        code(rete::config::parse),
        help("Check the TOML syntax. Valid agenda orders are \"fifo\", \"lifo\" and \"salience\".")
    )]
    Parse { path: String, message: String },

    #[error("failed to write session config: {path}")]
    #[diagnostic(
        code(rete::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for config operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Convenience alias used across the crate.
pub type ReteResult<T> = std::result::Result<T, ReteError>;
