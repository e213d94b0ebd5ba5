//! MARTe PV - Process variables with EPICS-style alarms and field access
//!
//! A process variable (PV) holds one typed value or array together with its
//! timestamp. The alarm engine PV ([`CommonPv`]) adds control-range
//! saturation, HIHI/HIGH/LOW/LOLO threshold alarms with hysteresis, and
//! deadband gating of the events it posts to an attached [`Host`]. Every
//! metadata field of such a PV is also exposed as a [`PvField`] named
//! `NAME.FIELD`.
//!
//! # Examples
//!
//! ```rust
//! use marte_pv::{ChannelHost, CommonPv, FieldAccess, FieldId, ProcessVariable, PvConfig, PvValue};
//! use std::sync::Arc;
//!
//! let mut config = PvConfig::with_type("float64");
//! config.control_high = Some(100.0);
//! config.alarm_high = Some(90.0);
//!
//! let pv = CommonPv::new("TEMP", &config)?;
//! let (host, mut events) = ChannelHost::new();
//! pv.set_host(Arc::new(host));
//! pv.register_interest()?;
//!
//! pv.write_direct(FieldId::Value, PvValue::from(95.0))?;
//! let event = events.try_recv().unwrap();
//! assert_eq!(event.value.status.name(), "HIHI");
//! # Ok::<(), marte_pv::PvError>(())
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type shared by all PVs
pub mod error;

/// Element types, typed value buffers and the wire representation
pub mod value;

/// Field identifiers and their EPICS names
pub mod field;

/// Severities, statuses and threshold evaluation
pub mod alarm;

/// Host attachment and event masks
pub mod host;

/// PV configuration with YAML support
pub mod config;

// ============================================================================
// PROCESS VARIABLES
// ============================================================================

/// Value container, access traits and the scan timer
pub mod pv;

/// Alarm engine PV
pub mod common;

/// Field proxies
pub mod pv_field;

/// Named PV collections
pub mod tree;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use alarm::{AlarmLimits, AlarmStatus, Severity};
pub use common::CommonPv;
pub use config::{PvConfig, TreeConfig};
pub use error::{PvError, Result};
pub use field::FieldId;
pub use host::{ChannelHost, EventMask, Host, PvEvent};
pub use pv::{FieldAccess, ProcessVariable, ValueContainer};
pub use pv_field::PvField;
pub use tree::PvTree;
pub use value::{PvType, PvValue, WireValue, MAX_STRING_SIZE};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging
///
/// Honours `RUST_LOG` and defaults to `marte_pv=info`. Calling this more
/// than once, or after another logger was installed, is harmless.
pub fn init() -> Result<()> {
    let env = env_logger::Env::default().default_filter_or("marte_pv=info");
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
    log::info!("MARTe PV {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init().unwrap();
        init().unwrap();
    }
}
