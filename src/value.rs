// src/value.rs - Typed value buffers and the wire-side value representation
use crate::alarm::{AlarmStatus, Severity};
use crate::error::{PvError, Result};
use crate::field::FieldId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed per-element capacity of string PVs, in bytes
pub const MAX_STRING_SIZE: usize = 40;

/// Element type tag of a process variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PvType {
    Invalid,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
    /// String with the fixed [`MAX_STRING_SIZE`] capacity
    FixedString,
    String,
}

impl PvType {
    pub fn type_name(&self) -> &'static str {
        match self {
            PvType::Invalid => "invalid",
            PvType::Int8 => "int8",
            PvType::UInt8 => "uint8",
            PvType::Int16 => "int16",
            PvType::UInt16 => "uint16",
            PvType::Int32 => "int32",
            PvType::UInt32 => "uint32",
            PvType::Float32 => "float32",
            PvType::Float64 => "float64",
            PvType::FixedString => "char8",
            PvType::String => "string",
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, PvType::FixedString | PvType::String)
    }

    pub fn is_numeric(&self) -> bool {
        !self.is_string() && *self != PvType::Invalid
    }

    /// Size in bytes of one element of this type
    pub fn element_size(&self) -> usize {
        match self {
            PvType::Invalid => 0,
            PvType::Int8 | PvType::UInt8 => 1,
            PvType::Int16 | PvType::UInt16 => 2,
            PvType::Int32 | PvType::UInt32 | PvType::Float32 => 4,
            PvType::Float64 => 8,
            PvType::FixedString | PvType::String => MAX_STRING_SIZE,
        }
    }
}

impl FromStr for PvType {
    type Err = PvError;

    fn from_str(s: &str) -> Result<Self> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "int8" => PvType::Int8,
            "uint8" => PvType::UInt8,
            "int16" => PvType::Int16,
            "uint16" => PvType::UInt16,
            "int32" => PvType::Int32,
            "uint32" => PvType::UInt32,
            "float32" => PvType::Float32,
            "float64" => PvType::Float64,
            "char8" | "fixedstring" => PvType::FixedString,
            "string" => PvType::String,
            other => {
                return Err(PvError::Config(format!("Unrecognized PV type '{}'", other)));
            }
        };
        Ok(ty)
    }
}

impl fmt::Display for PvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Owned, typed value buffer of a PV
///
/// A scalar is a buffer of length one. Strings are kept within
/// [`MAX_STRING_SIZE`] bytes per element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PvValue {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(Vec<String>),
}

// Expands `$num` for every numeric buffer and `$text` for the string buffer
macro_rules! each_buffer {
    ($value:expr, $v:ident => $num:expr, $s:ident => $text:expr) => {
        match $value {
            PvValue::Int8($v) => $num,
            PvValue::UInt8($v) => $num,
            PvValue::Int16($v) => $num,
            PvValue::UInt16($v) => $num,
            PvValue::Int32($v) => $num,
            PvValue::UInt32($v) => $num,
            PvValue::Float32($v) => $num,
            PvValue::Float64($v) => $num,
            PvValue::String($s) => $text,
        }
    };
}

impl PvValue {
    /// Allocate a zero-filled buffer for `nelm` elements of `pv_type`
    pub fn zeroed(pv_type: PvType, nelm: usize) -> Result<Self> {
        let value = match pv_type {
            PvType::Int8 => PvValue::Int8(vec![0; nelm]),
            PvType::UInt8 => PvValue::UInt8(vec![0; nelm]),
            PvType::Int16 => PvValue::Int16(vec![0; nelm]),
            PvType::UInt16 => PvValue::UInt16(vec![0; nelm]),
            PvType::Int32 => PvValue::Int32(vec![0; nelm]),
            PvType::UInt32 => PvValue::UInt32(vec![0; nelm]),
            PvType::Float32 => PvValue::Float32(vec![0.0; nelm]),
            PvType::Float64 => PvValue::Float64(vec![0.0; nelm]),
            PvType::FixedString | PvType::String => PvValue::String(vec![String::new(); nelm]),
            PvType::Invalid => {
                return Err(PvError::Config("Cannot allocate a value of invalid type".to_string()));
            }
        };
        Ok(value)
    }

    /// Parse a configured initial value; arrays are comma separated
    pub fn parse_initial(pv_type: PvType, nelm: usize, text: &str) -> Result<Self> {
        let items: Vec<String> = if nelm > 1 {
            text.split(',').map(|s| s.trim().to_string()).collect()
        } else {
            vec![text.trim().to_string()]
        };
        let current = PvValue::zeroed(pv_type, nelm)?;
        PvValue::String(items)
            .convert_to(&current)
            .map_err(|e| PvError::Config(format!("Invalid initial value '{}': {}", text, e)))
    }

    pub fn len(&self) -> usize {
        each_buffer!(self, v => v.len(), v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PvValue::Int8(_) => "int8",
            PvValue::UInt8(_) => "uint8",
            PvValue::Int16(_) => "int16",
            PvValue::UInt16(_) => "uint16",
            PvValue::Int32(_) => "int32",
            PvValue::UInt32(_) => "uint32",
            PvValue::Float32(_) => "float32",
            PvValue::Float64(_) => "float64",
            PvValue::String(_) => "string",
        }
    }

    /// Element `idx` as a float; strings are parsed
    pub fn element_f64(&self, idx: usize) -> Option<f64> {
        each_buffer!(
            self,
            v => v.get(idx).map(|x| f64::from(*x)),
            v => v.get(idx).and_then(|s| s.trim().parse().ok())
        )
    }

    /// Element `idx` rendered as text
    pub fn element_string(&self, idx: usize) -> Option<String> {
        each_buffer!(self, v => v.get(idx).map(|x| x.to_string()), v => v.get(idx).cloned())
    }

    pub fn scalar_f64(&self) -> Option<f64> {
        self.element_f64(0)
    }

    pub fn scalar_string(&self) -> Option<String> {
        self.element_string(0)
    }

    pub fn as_strings(&self) -> Vec<String> {
        (0..self.len()).filter_map(|i| self.element_string(i)).collect()
    }

    /// Convert into the type and shape of `current`
    ///
    /// Elements beyond the supplied ones keep the value they have in
    /// `current`; surplus supplied elements are dropped. `self` is never
    /// partially applied: on error nothing is returned.
    pub fn convert_to(&self, current: &PvValue) -> Result<PvValue> {
        if self.is_empty() {
            return Err(PvError::Conversion("empty value".to_string()));
        }
        let mut out = current.clone();
        let count = self.len().min(out.len());
        for idx in 0..count {
            out.set_from(idx, self, idx)?;
        }
        Ok(out)
    }

    fn set_from(&mut self, idx: usize, src: &PvValue, sidx: usize) -> Result<()> {
        match self {
            PvValue::Int8(v) => v[idx] = src.integral(sidx)? as i8,
            PvValue::UInt8(v) => v[idx] = src.integral(sidx)? as u8,
            PvValue::Int16(v) => v[idx] = src.integral(sidx)? as i16,
            PvValue::UInt16(v) => v[idx] = src.integral(sidx)? as u16,
            PvValue::Int32(v) => v[idx] = src.integral(sidx)? as i32,
            PvValue::UInt32(v) => v[idx] = src.integral(sidx)? as u32,
            PvValue::Float32(v) => {
                v[idx] = src
                    .finite(sidx)?
                    .clamp(f64::from(f32::MIN), f64::from(f32::MAX)) as f32
            }
            PvValue::Float64(v) => v[idx] = src.finite(sidx)?,
            PvValue::String(v) => {
                let text = src.element_string(sidx).unwrap_or_default();
                v[idx] = truncate_to(&text, MAX_STRING_SIZE);
            }
        }
        Ok(())
    }

    fn numeric(&self, idx: usize) -> Result<f64> {
        self.element_f64(idx).ok_or_else(|| {
            PvError::Conversion(format!(
                "element {} of {} value {:?} is not numeric",
                idx,
                self.type_name(),
                self.element_string(idx).unwrap_or_default()
            ))
        })
    }

    // float to integer casts saturate at the target's range
    fn integral(&self, idx: usize) -> Result<f64> {
        let v = self.numeric(idx)?;
        if v.is_nan() {
            return Err(PvError::Conversion(format!("element {} is NaN", idx)));
        }
        Ok(v)
    }

    // float targets take neither NaN nor infinities
    fn finite(&self, idx: usize) -> Result<f64> {
        let v = self.numeric(idx)?;
        if !v.is_finite() {
            return Err(PvError::Conversion(format!("element {} is not finite ({})", idx, v)));
        }
        Ok(v)
    }

    /// Clamp element 0 into `[low, high]`
    pub(crate) fn saturate(&mut self, low: f64, high: f64) -> Result<()> {
        let v = self.numeric(0)?;
        // upper bound first; an inverted range ends at `low`
        let bounded = if v > high { high } else { v };
        let bounded = if bounded < low { low } else { bounded };
        if bounded != v {
            self.set_from(0, &PvValue::Float64(vec![bounded]), 0)?;
        }
        Ok(())
    }
}

macro_rules! scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for PvValue {
                fn from(v: $t) -> Self {
                    PvValue::$variant(vec![v])
                }
            }

            impl From<Vec<$t>> for PvValue {
                fn from(v: Vec<$t>) -> Self {
                    PvValue::$variant(v)
                }
            }
        )*
    };
}

scalar_from! {
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    f32 => Float32,
    f64 => Float64,
    String => String,
}

impl From<&str> for PvValue {
    fn from(s: &str) -> Self {
        PvValue::String(vec![s.to_string()])
    }
}

impl From<Vec<&str>> for PvValue {
    fn from(v: Vec<&str>) -> Self {
        PvValue::String(v.into_iter().map(String::from).collect())
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.as_strings();
        if items.len() == 1 {
            write!(f, "{}", items[0])
        } else {
            write!(f, "[{}]", items.join(", "))
        }
    }
}

pub(crate) fn truncate_to(text: &str, capacity: usize) -> String {
    if text.len() <= capacity {
        return text.to_string();
    }
    let mut end = capacity;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Value as exchanged with the channel-access side
///
/// Carries the field identifier it is addressed to, its shape rank
/// (0 scalar, 1 array), an optional timestamp and the alarm state of the
/// PV it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct WireValue {
    pub field: FieldId,
    pub rank: usize,
    pub data: PvValue,
    pub timestamp: Option<DateTime<Utc>>,
    pub severity: Severity,
    pub status: AlarmStatus,
}

impl WireValue {
    pub fn scalar(field: FieldId, data: impl Into<PvValue>) -> Self {
        Self {
            field,
            rank: 0,
            data: data.into(),
            timestamp: None,
            severity: Severity::NoAlarm,
            status: AlarmStatus::NoAlarm,
        }
    }

    pub fn array(field: FieldId, data: impl Into<PvValue>) -> Self {
        Self {
            field,
            rank: 1,
            data: data.into(),
            timestamp: None,
            severity: Severity::NoAlarm,
            status: AlarmStatus::NoAlarm,
        }
    }

    /// Empty container to be filled by a read
    pub fn request(field: FieldId) -> Self {
        Self {
            field,
            rank: 0,
            data: PvValue::Float64(Vec::new()),
            timestamp: None,
            severity: Severity::NoAlarm,
            status: AlarmStatus::NoAlarm,
        }
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Only scalars and one-dimensional arrays can be written
    pub fn check_shape(&self) -> Result<()> {
        if self.rank >= 2 {
            return Err(PvError::Conversion(format!(
                "unsupported rank {} for field {}",
                self.rank, self.field
            )));
        }
        Ok(())
    }

    /// Fill this container from an internal buffer
    pub fn fill(&mut self, value: &PvValue, timestamp: DateTime<Utc>) {
        self.rank = if value.len() > 1 { 1 } else { 0 };
        self.data = value.clone();
        self.timestamp = Some(timestamp);
    }

    pub fn set_alarm(&mut self, severity: Severity, status: AlarmStatus) {
        self.severity = severity;
        self.status = status;
    }
}
