use crate::field::FieldId;
use thiserror::Error;

/// Error type shared by every process variable in the crate.
#[derive(Error, Debug)]
pub enum PvError {
    /// Missing or invalid configuration; the PV must not be put into service
    #[error("Configuration error: {0}")]
    Config(String),

    /// A supplied value could not be converted to the PV's internal type
    #[error("Cannot convert: {0}")]
    Conversion(String),

    /// No PV of that name in the tree
    #[error("PV not found: {0}")]
    NotFound(String),

    /// Field name or numeric field code that no PV understands
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Write attempted on a field that can only be read
    #[error("Field {0} is read-only")]
    ReadOnly(FieldId),

    /// Dispatch reached a state that a correctly built PV never produces
    #[error("Internal error: {0}")]
    Internal(String),

    /// Operation needs an attached host but none is set
    #[error("Host unavailable: {0}")]
    HostUnavailable(String),

    /// A field proxy outlived the PV it exposes
    #[error("Owner of field proxy '{0}' is gone")]
    OwnerGone(String),

    /// The periodic scan timer could not be started
    #[error("Timer error: {0}")]
    Timer(String),

    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Convenient alias over [`Result`] using [`PvError`]
pub type Result<T> = std::result::Result<T, PvError>;
