// src/field.rs - Field identifiers addressable on a process variable
use crate::error::{PvError, Result};
use crate::value::PvType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of fields a PV answers reads and writes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum FieldId {
    Value = 0,
    Precision,
    ControlHigh,
    ControlLow,
    AlarmHigh,
    AlarmLow,
    WarnHigh,
    WarnLow,
    Units,
    EnumMetadata,
    AckTransient,
    AckSeverity,
    ElementCount,
    Timestamp,
    Hysteresis,
    MonitorDeadband,
    ArchiveDeadband,
    SevHihi,
    SevHigh,
    SevLow,
    SevLolo,
    Status,
    Severity,
}

impl FieldId {
    pub const ALL: [FieldId; 23] = [
        FieldId::Value,
        FieldId::Precision,
        FieldId::ControlHigh,
        FieldId::ControlLow,
        FieldId::AlarmHigh,
        FieldId::AlarmLow,
        FieldId::WarnHigh,
        FieldId::WarnLow,
        FieldId::Units,
        FieldId::EnumMetadata,
        FieldId::AckTransient,
        FieldId::AckSeverity,
        FieldId::ElementCount,
        FieldId::Timestamp,
        FieldId::Hysteresis,
        FieldId::MonitorDeadband,
        FieldId::ArchiveDeadband,
        FieldId::SevHihi,
        FieldId::SevHigh,
        FieldId::SevLow,
        FieldId::SevLolo,
        FieldId::Status,
        FieldId::Severity,
    ];

    /// Record-style field name, as used in `NAME.FIELD` addressing
    pub fn name(&self) -> &'static str {
        match self {
            FieldId::Value => "VAL",
            FieldId::Precision => "PREC",
            FieldId::ControlHigh => "HOPR",
            FieldId::ControlLow => "LOPR",
            FieldId::AlarmHigh => "HIHI",
            FieldId::AlarmLow => "LOLO",
            FieldId::WarnHigh => "HIGH",
            FieldId::WarnLow => "LOW",
            FieldId::Units => "EGU",
            FieldId::EnumMetadata => "ENUM",
            FieldId::AckTransient => "ACKT",
            FieldId::AckSeverity => "ACKS",
            FieldId::ElementCount => "NELM",
            FieldId::Timestamp => "TIME",
            FieldId::Hysteresis => "HYST",
            FieldId::MonitorDeadband => "MDEL",
            FieldId::ArchiveDeadband => "ADEL",
            FieldId::SevHihi => "HHSV",
            FieldId::SevHigh => "HSV",
            FieldId::SevLow => "LSV",
            FieldId::SevLolo => "LLSV",
            FieldId::Status => "STAT",
            FieldId::Severity => "SEVR",
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Result<Self> {
        FieldId::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| PvError::UnknownField(format!("code {}", code)))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, FieldId::ElementCount | FieldId::Status | FieldId::Severity)
    }

    /// Element type of the field on a PV whose value is `value_type`
    pub fn field_type(&self, value_type: PvType) -> PvType {
        match self {
            FieldId::Value => value_type,
            FieldId::Precision | FieldId::ElementCount => PvType::UInt32,
            FieldId::AckTransient => PvType::UInt16,
            FieldId::ControlHigh
            | FieldId::ControlLow
            | FieldId::AlarmHigh
            | FieldId::AlarmLow
            | FieldId::WarnHigh
            | FieldId::WarnLow
            | FieldId::Timestamp
            | FieldId::Hysteresis
            | FieldId::MonitorDeadband
            | FieldId::ArchiveDeadband => PvType::Float64,
            FieldId::EnumMetadata => PvType::String,
            FieldId::Units
            | FieldId::AckSeverity
            | FieldId::SevHihi
            | FieldId::SevHigh
            | FieldId::SevLow
            | FieldId::SevLolo
            | FieldId::Status
            | FieldId::Severity => PvType::FixedString,
        }
    }
}

impl FromStr for FieldId {
    type Err = PvError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        FieldId::ALL
            .iter()
            .find(|f| f.name() == upper)
            .copied()
            .ok_or_else(|| PvError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_table_order() {
        for (idx, field) in FieldId::ALL.iter().enumerate() {
            assert_eq!(field.code() as usize, idx);
            assert_eq!(FieldId::from_code(idx as u16).unwrap(), *field);
        }
        assert!(matches!(FieldId::from_code(99), Err(PvError::UnknownField(_))));
    }

    #[test]
    fn test_names_parse_back() {
        assert_eq!("hhsv".parse::<FieldId>().unwrap(), FieldId::SevHihi);
        assert_eq!("PREC".parse::<FieldId>().unwrap(), FieldId::Precision);
        assert!("BOGUS".parse::<FieldId>().is_err());
    }

    #[test]
    fn test_read_only_fields() {
        let read_only: Vec<_> = FieldId::ALL.iter().filter(|f| f.is_read_only()).collect();
        assert_eq!(read_only, vec![&FieldId::ElementCount, &FieldId::Status, &FieldId::Severity]);
    }
}
