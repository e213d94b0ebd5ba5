// src/alarm.rs - Threshold alarms with hysteresis and deadband tracking
//
// Four thresholds are checked in the order HIHI, LOLO, HIGH, LOW. A
// threshold is triggered when the value is past its level, or when it
// latched the previous alarm and the value is still within the
// hysteresis band on the alarm side of the level.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// SEVERITY AND STATUS
// ==========================================

/// Alarm severity, ordered by magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    NoAlarm = 0,
    Minor = 1,
    Major = 2,
    Invalid = 3,
}

impl Severity {
    /// Severity used whenever a configured name is not recognized
    pub const FALLBACK: Severity = Severity::Major;

    pub const ALL: [Severity; 4] = [
        Severity::NoAlarm,
        Severity::Minor,
        Severity::Major,
        Severity::Invalid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Severity::NoAlarm => "NO_ALARM",
            Severity::Minor => "MINOR",
            Severity::Major => "MAJOR",
            Severity::Invalid => "INVALID",
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Severity::ALL.get(code as usize).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Severity::ALL.iter().find(|s| s.name() == name).copied()
    }

    /// Resolve a severity name, silently accepting unknown names as [`Severity::FALLBACK`]
    pub fn from_name_or_fallback(name: &str) -> Self {
        Severity::from_name(name).unwrap_or_else(|| {
            warn!("Unrecognized severity '{}', using {}", name, Severity::FALLBACK);
            Severity::FALLBACK
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which threshold currently holds the alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmStatus {
    NoAlarm = 0,
    Hihi = 3,
    High = 4,
    Lolo = 5,
    Low = 6,
}

impl AlarmStatus {
    pub fn name(&self) -> &'static str {
        match self {
            AlarmStatus::NoAlarm => "NO_ALARM",
            AlarmStatus::Hihi => "HIHI",
            AlarmStatus::High => "HIGH",
            AlarmStatus::Lolo => "LOLO",
            AlarmStatus::Low => "LOW",
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }
}

impl fmt::Display for AlarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ==========================================
// LIMITS
// ==========================================

/// Saturation bounds, alarm thresholds and their severities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmLimits {
    pub control_high: f64,
    pub control_low: f64,
    pub alarm_high: f64,
    pub alarm_low: f64,
    pub warn_high: f64,
    pub warn_low: f64,
    pub sev_hihi: Severity,
    pub sev_high: Severity,
    pub sev_low: Severity,
    pub sev_lolo: Severity,
    pub hysteresis: f64,
}

impl Default for AlarmLimits {
    fn default() -> Self {
        Self {
            control_high: 10.0,
            control_low: -10.0,
            alarm_high: 10.0,
            alarm_low: -10.0,
            warn_high: 10.0,
            warn_low: -10.0,
            sev_hihi: Severity::FALLBACK,
            sev_high: Severity::FALLBACK,
            sev_low: Severity::FALLBACK,
            sev_lolo: Severity::FALLBACK,
            hysteresis: 0.0,
        }
    }
}

/// A threshold that fired: its severity, status and level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trip {
    pub severity: Severity,
    pub status: AlarmStatus,
    pub level: f64,
}

impl AlarmLimits {
    /// Resolve the threshold that holds the alarm for `value`
    ///
    /// `last_alarm` is the level latched by the previous evaluation. Among
    /// triggered thresholds the highest severity wins; equal severities
    /// keep the first one in check order.
    pub fn check(&self, value: f64, last_alarm: f64) -> Option<Trip> {
        let hyst = self.hysteresis;
        let candidates = [
            (
                self.alarm_high,
                self.sev_hihi,
                AlarmStatus::Hihi,
                value >= self.alarm_high
                    || (last_alarm == self.alarm_high && value >= self.alarm_high - hyst),
            ),
            (
                self.alarm_low,
                self.sev_lolo,
                AlarmStatus::Lolo,
                value <= self.alarm_low
                    || (last_alarm == self.alarm_low && value <= self.alarm_low + hyst),
            ),
            (
                self.warn_high,
                self.sev_high,
                AlarmStatus::High,
                value >= self.warn_high
                    || (last_alarm == self.warn_high && value >= self.warn_high - hyst),
            ),
            (
                self.warn_low,
                self.sev_low,
                AlarmStatus::Low,
                value <= self.warn_low
                    || (last_alarm == self.warn_low && value <= self.warn_low + hyst),
            ),
        ];

        let mut found: Option<Trip> = None;
        for (level, severity, status, triggered) in candidates {
            let best = found.map(|t| t.severity).unwrap_or(Severity::NoAlarm);
            if triggered && severity > best {
                found = Some(Trip { severity, status, level });
            }
        }
        found
    }
}

// ==========================================
// RUNTIME STATE
// ==========================================

/// Which parts of the alarm state changed in an evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmChange {
    /// Severity changed
    pub alarm: bool,
    /// Status changed; reported with value events
    pub value: bool,
}

/// Transient alarm and deadband state of one PV
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmTracker {
    pub last_alarm: f64,
    pub last_monitored: f64,
    pub last_archived: f64,
    pub severity: Severity,
    pub status: AlarmStatus,
    pub ack_transient: bool,
    pub ack_severity: Severity,
}

impl AlarmTracker {
    pub fn new(initial: f64) -> Self {
        Self {
            last_alarm: initial,
            last_monitored: initial,
            last_archived: initial,
            severity: Severity::NoAlarm,
            status: AlarmStatus::NoAlarm,
            ack_transient: false,
            ack_severity: Severity::NoAlarm,
        }
    }

    pub fn evaluate(&mut self, value: f64, limits: &AlarmLimits) -> AlarmChange {
        let (severity, status) = match limits.check(value, self.last_alarm) {
            Some(trip) => {
                self.last_alarm = trip.level;
                (trip.severity, trip.status)
            }
            None => {
                self.last_alarm = value;
                (Severity::NoAlarm, AlarmStatus::NoAlarm)
            }
        };

        let mut change = AlarmChange::default();
        if severity != self.severity {
            self.severity = severity;
            change.alarm = true;
        }
        if status != self.status {
            self.status = status;
            change.value = true;
        }
        change
    }

    /// Returns (monitor fired, archive fired); each tracker moves only when it fires
    pub fn check_deadbands(&mut self, value: f64, monitor: f64, archive: f64) -> (bool, bool) {
        (
            Self::deadband(&mut self.last_monitored, value, monitor),
            Self::deadband(&mut self.last_archived, value, archive),
        )
    }

    fn deadband(last: &mut f64, value: f64, band: f64) -> bool {
        if (value - *last).abs() > band {
            *last = value;
            true
        } else {
            false
        }
    }
}
