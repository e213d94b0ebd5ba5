// src/common.rs - Alarm engine PV: limits, alarms, deadbands and field dispatch
//
// All field traffic goes through one non-reentrant lock per PV. Every entry
// point takes it exactly once, for the whole convert, evaluate and post
// sequence, and never calls into another PV or proxy while holding it.

use crate::alarm::{AlarmLimits, AlarmStatus, AlarmTracker, Severity};
use crate::config::PvConfig;
use crate::error::{PvError, Result};
use crate::field::FieldId;
use crate::host::{EventMask, Host, PvEvent};
use crate::pv::{FieldAccess, HostSlot, ProcessVariable, Subscription, ValueContainer};
use crate::pv_field::PvField;
use crate::value::{truncate_to, PvType, PvValue, WireValue, MAX_STRING_SIZE};
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Capacity of the engineering units string, in bytes
pub const UNITS_CAPACITY: usize = 8;

const DEFAULT_PRECISION: u32 = 4;

// ============================================================================
// STATE
// ============================================================================

/// Everything guarded by the PV lock
#[derive(Debug, Clone)]
struct PvState {
    container: ValueContainer,
    limits: AlarmLimits,
    tracker: AlarmTracker,
    monitor_deadband: f64,
    archive_deadband: f64,
    precision: u32,
    units: String,
    enum_strings: Vec<String>,
}

impl PvState {
    fn from_config(config: &PvConfig) -> Result<Self> {
        let mut container = ValueContainer::new();
        container.initialize(config)?;

        let defaults = AlarmLimits::default();
        let control_high = config.control_high.unwrap_or(defaults.control_high);
        let control_low = config.control_low.unwrap_or(defaults.control_low);
        let severity = |name: &Option<String>| {
            name.as_deref()
                .map(Severity::from_name_or_fallback)
                .unwrap_or(Severity::FALLBACK)
        };
        let limits = AlarmLimits {
            control_high,
            control_low,
            alarm_high: config.alarm_high.unwrap_or(control_high),
            alarm_low: config.alarm_low.unwrap_or(control_low),
            warn_high: config.warn_high.unwrap_or(control_high),
            warn_low: config.warn_low.unwrap_or(control_low),
            sev_hihi: severity(&config.sev_hihi),
            sev_high: severity(&config.sev_high),
            sev_low: severity(&config.sev_low),
            sev_lolo: severity(&config.sev_lolo),
            hysteresis: config.hysteresis.unwrap_or(defaults.hysteresis),
        };
        let configured = [
            ("HOPR", limits.control_high),
            ("LOPR", limits.control_low),
            ("HIHI", limits.alarm_high),
            ("LOLO", limits.alarm_low),
            ("HIGH", limits.warn_high),
            ("LOW", limits.warn_low),
            ("HYST", limits.hysteresis),
            ("MDEL", config.monitor_deadband.unwrap_or(0.0)),
            ("ADEL", config.archive_deadband.unwrap_or(0.0)),
        ];
        if let Some((key, v)) = configured.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PvError::Config(format!("{} must be a finite number, got {}", key, v)));
        }

        if container.is_scalar_numeric() {
            container.value.saturate(limits.control_low, limits.control_high)?;
        }
        let initial = if container.is_scalar_numeric() {
            container.value.scalar_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        Ok(Self {
            container,
            limits,
            tracker: AlarmTracker::new(initial),
            monitor_deadband: config.monitor_deadband.unwrap_or(0.0),
            archive_deadband: config.archive_deadband.unwrap_or(0.0),
            precision: config.precision.unwrap_or(DEFAULT_PRECISION),
            units: truncate_to(config.units.as_deref().unwrap_or(""), UNITS_CAPACITY),
            enum_strings: config
                .enum_strings
                .iter()
                .map(|s| truncate_to(s, MAX_STRING_SIZE))
                .collect(),
        })
    }

    fn event(&self, pv: &str, mask: EventMask, mut value: WireValue) -> PvEvent {
        value.set_alarm(self.tracker.severity, self.tracker.status);
        PvEvent {
            pv: pv.to_string(),
            mask,
            value,
        }
    }
}

// ============================================================================
// ALARM ENGINE PV
// ============================================================================

/// Process variable with saturation, threshold alarms and deadband-gated events
///
/// Each field other than the value is also reachable as a standalone
/// [`PvField`] named `NAME.FIELD`.
pub struct CommonPv {
    name: String,
    pv_type: PvType,
    element_count: usize,
    state: Mutex<PvState>,
    subscription: Subscription,
    host: HostSlot,
    fields: BTreeMap<FieldId, Arc<PvField>>,
    this: Weak<CommonPv>,
}

impl CommonPv {
    /// Initialize a PV from its configuration
    ///
    /// A failure here means the PV must not be put into service.
    pub fn new(name: &str, config: &PvConfig) -> Result<Arc<Self>> {
        let state = PvState::from_config(config)?;
        let scan_period = config.scan_period()?;
        let pv_type = state.container.pv_type();
        let element_count = state.container.element_count();
        let use_local_timestamp = state.container.use_local_timestamp();

        info!(
            "Initialized PV '{}' as {}[{}] (scan {:?})",
            name, pv_type, element_count, scan_period
        );

        let pv = Arc::new_cyclic(|this: &Weak<CommonPv>| {
            let owner: Weak<dyn FieldAccess> = this.clone();
            let mut fields = BTreeMap::new();
            for field in FieldId::ALL.iter().copied().filter(|f| *f != FieldId::Value) {
                let proxy = PvField::bound(
                    &format!("{}.{}", name, field),
                    scan_period,
                    owner.clone(),
                    field,
                    field.field_type(pv_type),
                    use_local_timestamp,
                );
                fields.insert(field, proxy);
            }

            CommonPv {
                name: name.to_string(),
                pv_type,
                element_count,
                state: Mutex::new(state),
                subscription: Subscription::new(scan_period),
                host: HostSlot::default(),
                fields,
                this: this.clone(),
            }
        });
        Ok(pv)
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Field proxy exposing `field`; `None` for the value field itself
    pub fn field(&self, field: FieldId) -> Option<Arc<PvField>> {
        self.fields.get(&field).cloned()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Arc<PvField>> {
        self.fields.values()
    }

    /// Current value buffer
    pub fn value(&self) -> PvValue {
        self.state.lock().container.value().clone()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.state.lock().container.timestamp()
    }

    /// Current severity and status
    pub fn alarm(&self) -> (Severity, AlarmStatus) {
        let state = self.state.lock();
        (state.tracker.severity, state.tracker.status)
    }

    pub fn limits(&self) -> AlarmLimits {
        self.state.lock().limits.clone()
    }

    pub fn set_external_timestamp(&self, seconds: i64, nanoseconds: u32) -> Result<()> {
        self.state.lock().container.set_external_timestamp(seconds, nanoseconds)
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn read_field(&self, state: &PvState, field: FieldId) -> PvValue {
        let limits = &state.limits;
        match field {
            FieldId::Value => state.container.value().clone(),
            FieldId::Precision => PvValue::from(state.precision),
            FieldId::ControlHigh => PvValue::from(limits.control_high),
            FieldId::ControlLow => PvValue::from(limits.control_low),
            FieldId::AlarmHigh => PvValue::from(limits.alarm_high),
            FieldId::AlarmLow => PvValue::from(limits.alarm_low),
            FieldId::WarnHigh => PvValue::from(limits.warn_high),
            FieldId::WarnLow => PvValue::from(limits.warn_low),
            FieldId::Units => PvValue::from(state.units.clone()),
            FieldId::EnumMetadata => PvValue::String(state.enum_strings.clone()),
            FieldId::AckTransient => PvValue::from(u16::from(state.tracker.ack_transient)),
            FieldId::AckSeverity => PvValue::from(state.tracker.ack_severity.name()),
            FieldId::ElementCount => PvValue::from(self.element_count as u32),
            FieldId::Timestamp => {
                let ts = state.container.timestamp();
                PvValue::from(ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_nanos()) * 1e-9)
            }
            FieldId::Hysteresis => PvValue::from(limits.hysteresis),
            FieldId::MonitorDeadband => PvValue::from(state.monitor_deadband),
            FieldId::ArchiveDeadband => PvValue::from(state.archive_deadband),
            FieldId::SevHihi => PvValue::from(limits.sev_hihi.name()),
            FieldId::SevHigh => PvValue::from(limits.sev_high.name()),
            FieldId::SevLow => PvValue::from(limits.sev_low.name()),
            FieldId::SevLolo => PvValue::from(limits.sev_lolo.name()),
            FieldId::Status => PvValue::from(state.tracker.status.name()),
            FieldId::Severity => PvValue::from(state.tracker.severity.name()),
        }
    }

    fn write_field(
        &self,
        state: &mut PvState,
        field: FieldId,
        input: &PvValue,
        external: Option<DateTime<Utc>>,
    ) -> Result<()> {
        match field {
            FieldId::Value => self.write_value(state, input, external),
            FieldId::Precision => {
                let p = number(field, input)?;
                if p < 0.0 {
                    return Err(PvError::Conversion(format!("negative precision {}", p)));
                }
                state.precision = p as u32;
                Ok(())
            }
            FieldId::ControlHigh => set_number(&mut state.limits.control_high, field, input),
            FieldId::ControlLow => set_number(&mut state.limits.control_low, field, input),
            FieldId::AlarmHigh => set_number(&mut state.limits.alarm_high, field, input),
            FieldId::AlarmLow => set_number(&mut state.limits.alarm_low, field, input),
            FieldId::WarnHigh => set_number(&mut state.limits.warn_high, field, input),
            FieldId::WarnLow => set_number(&mut state.limits.warn_low, field, input),
            FieldId::Hysteresis => set_number(&mut state.limits.hysteresis, field, input),
            FieldId::MonitorDeadband => set_number(&mut state.monitor_deadband, field, input),
            FieldId::ArchiveDeadband => set_number(&mut state.archive_deadband, field, input),
            FieldId::Units => {
                state.units = truncate_to(&text(field, input)?, UNITS_CAPACITY);
                Ok(())
            }
            FieldId::EnumMetadata => {
                state.enum_strings = input
                    .as_strings()
                    .iter()
                    .map(|s| truncate_to(s, MAX_STRING_SIZE))
                    .collect();
                Ok(())
            }
            FieldId::SevHihi => set_severity(&mut state.limits.sev_hihi, field, input),
            FieldId::SevHigh => set_severity(&mut state.limits.sev_high, field, input),
            FieldId::SevLow => set_severity(&mut state.limits.sev_low, field, input),
            FieldId::SevLolo => set_severity(&mut state.limits.sev_lolo, field, input),
            FieldId::AckTransient => {
                let ack = number(field, input)? != 0.0;
                if ack != state.tracker.ack_transient {
                    state.tracker.ack_transient = ack;
                    self.post_acknowledge(state, field);
                }
                Ok(())
            }
            FieldId::AckSeverity => {
                let mut ack = state.tracker.ack_severity;
                set_severity(&mut ack, field, input)?;
                if ack != state.tracker.ack_severity {
                    state.tracker.ack_severity = ack;
                    self.post_acknowledge(state, field);
                }
                Ok(())
            }
            FieldId::Timestamp => {
                let secs = number(field, input)?;
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9) as u32;
                state.container.set_external_timestamp(whole as i64, nanos.min(999_999_999))
            }
            FieldId::ElementCount | FieldId::Status | FieldId::Severity => {
                Err(PvError::ReadOnly(field))
            }
        }
    }

    /// Convert, saturate, store, evaluate alarms and post events
    fn write_value(
        &self,
        state: &mut PvState,
        input: &PvValue,
        external: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut candidate = input.convert_to(state.container.value()).map_err(|e| {
            debug!("'{}' rejected value {}: {}", self.name, input, e);
            e
        })?;

        let scalar = state.container.is_scalar_numeric();
        let current = if scalar {
            candidate.saturate(state.limits.control_low, state.limits.control_high)?;
            Some(candidate.scalar_f64().ok_or_else(|| {
                PvError::Internal(format!("'{}' holds a non-numeric scalar", self.name))
            })?)
        } else {
            None
        };

        state.container.value = candidate;
        if let Some(ts) = external {
            if !state.container.use_local_timestamp() {
                state.container.set_timestamp(ts);
            }
        }
        state.container.stamp();

        // vectors and strings never alarm and are published by scanning only
        let value = match current {
            Some(value) => value,
            None => return Ok(()),
        };
        let change = state.tracker.evaluate(value, &state.limits);
        if change.alarm {
            debug!(
                "'{}' alarm now {} / {}",
                self.name, state.tracker.severity, state.tracker.status
            );
        }

        if !self.subscription.is_subscribed() {
            return Ok(());
        }
        let host = match self.host.get() {
            Some(host) => host,
            None => return Ok(()),
        };

        let mut mask = EventMask::empty();
        if change.alarm {
            mask |= host.alarm_event_mask();
        }
        let (monitor, archive) = state.tracker.check_deadbands(
            value,
            state.monitor_deadband,
            state.archive_deadband,
        );
        if monitor || change.value {
            mask |= host.value_event_mask();
        }
        if archive {
            mask |= host.log_event_mask();
        }
        if !mask.is_empty() {
            let wire = state.container.wire_value(FieldId::Value);
            host.post_event(state.event(&self.name, mask, wire));
        }
        Ok(())
    }

    fn post_acknowledge(&self, state: &PvState, field: FieldId) {
        if let Some(host) = self.host.get() {
            let wire = WireValue::scalar(field, self.read_field(state, field))
                .with_timestamp(state.container.timestamp());
            host.post_event(state.event(&self.name, host.alarm_event_mask(), wire));
        }
    }
}

// numeric field input must be finite
fn number(field: FieldId, input: &PvValue) -> Result<f64> {
    input
        .scalar_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            PvError::Conversion(format!("{} needs a finite number, got {}", field, input))
        })
}

fn text(field: FieldId, input: &PvValue) -> Result<String> {
    input
        .scalar_string()
        .ok_or_else(|| PvError::Conversion(format!("{} needs a value", field)))
}

fn set_number(slot: &mut f64, field: FieldId, input: &PvValue) -> Result<()> {
    *slot = number(field, input)?;
    Ok(())
}

// names resolve permissively; numeric input is taken as a severity code
fn set_severity(slot: &mut Severity, field: FieldId, input: &PvValue) -> Result<()> {
    *slot = match input {
        PvValue::String(_) => Severity::from_name_or_fallback(&text(field, input)?),
        _ => {
            let code = number(field, input)?;
            if code >= 0.0 {
                Severity::from_code(code as u16).unwrap_or(Severity::FALLBACK)
            } else {
                Severity::FALLBACK
            }
        }
    };
    Ok(())
}

impl FieldAccess for CommonPv {
    fn read(&self, request: &mut WireValue) -> Result<()> {
        let state = self.state.lock();
        let value = self.read_field(&state, request.field);
        request.fill(&value, state.container.timestamp());
        request.set_alarm(state.tracker.severity, state.tracker.status);
        Ok(())
    }

    fn write(&self, request: &mut WireValue) -> Result<()> {
        request.check_shape()?;
        let mut state = self.state.lock();
        self.write_field(&mut state, request.field, &request.data, request.timestamp)
    }

    fn read_direct(&self, field: FieldId) -> Result<PvValue> {
        let state = self.state.lock();
        Ok(self.read_field(&state, field))
    }

    fn write_direct(&self, field: FieldId, value: PvValue) -> Result<()> {
        let mut state = self.state.lock();
        self.write_field(&mut state, field, &value, None)
    }
}

impl ProcessVariable for CommonPv {
    fn name(&self) -> &str {
        &self.name
    }

    fn pv_type(&self) -> PvType {
        self.pv_type
    }

    /// Attach `host` to this PV and all its field proxies
    fn set_host(&self, host: Arc<dyn Host>) {
        for proxy in self.fields.values() {
            proxy.set_host(host.clone());
        }
        self.host.set(host);
    }

    fn register_interest(&self) -> Result<()> {
        self.host.require(&self.name)?;
        let this = self.this.clone();
        self.subscription.register(&self.name, move || match this.upgrade() {
            Some(pv) => {
                if let Err(e) = pv.on_scan() {
                    warn!("Scan of '{}' failed: {}", pv.name, e);
                }
                true
            }
            None => false,
        })
    }

    fn unregister_interest(&self) {
        self.subscription.unregister(&self.name);
    }

    fn is_subscribed(&self) -> bool {
        self.subscription.is_subscribed()
    }

    fn on_scan(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.container.stamp();
        if !self.subscription.is_subscribed() {
            return Ok(());
        }
        if let Some(host) = self.host.get() {
            trace!("Republishing '{}'", self.name);
            let wire = state.container.wire_value(FieldId::Value);
            host.post_event(state.event(&self.name, host.value_event_mask(), wire));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ChannelHost;

    fn analog() -> PvConfig {
        let mut config = PvConfig::with_type("float64");
        config.control_low = Some(0.0);
        config.control_high = Some(10.0);
        config.alarm_high = Some(9.0);
        config.warn_high = Some(8.0);
        config.alarm_low = Some(0.0);
        config.warn_low = Some(0.0);
        config.sev_hihi = Some("MAJOR".to_string());
        config.sev_high = Some("MINOR".to_string());
        config.sev_low = Some("NO_ALARM".to_string());
        config.sev_lolo = Some("NO_ALARM".to_string());
        config
    }

    #[test]
    fn test_defaults_collapse_to_control_bounds() {
        let pv = CommonPv::new("X", &PvConfig::with_type("float64")).unwrap();
        let limits = pv.limits();
        assert_eq!(limits.control_high, 10.0);
        assert_eq!(limits.control_low, -10.0);
        assert_eq!(limits.alarm_high, 10.0);
        assert_eq!(limits.warn_low, -10.0);
        assert_eq!(limits.sev_hihi, Severity::Major);
        assert_eq!(pv.read_direct(FieldId::Precision).unwrap(), PvValue::UInt32(vec![4]));
    }

    #[test]
    fn test_garbage_severity_config_falls_back() {
        let mut config = PvConfig::with_type("float64");
        config.sev_high = Some("CRITICAL".to_string());
        let pv = CommonPv::new("X", &config).unwrap();
        assert_eq!(pv.limits().sev_high, Severity::Major);
    }

    #[test]
    fn test_write_saturates() {
        let pv = CommonPv::new("X", &PvConfig::with_type("float64")).unwrap();
        pv.write_direct(FieldId::Value, PvValue::from(11.0)).unwrap();
        assert_eq!(pv.value(), PvValue::Float64(vec![10.0]));
        pv.write_direct(FieldId::Value, PvValue::from(-20.0)).unwrap();
        assert_eq!(pv.value(), PvValue::Float64(vec![-10.0]));
    }

    #[test]
    fn test_priority_hihi_over_high() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        pv.write_direct(FieldId::Value, PvValue::from(8.5)).unwrap();
        assert_eq!(pv.alarm(), (Severity::Minor, AlarmStatus::High));
        pv.write_direct(FieldId::Value, PvValue::from(9.5)).unwrap();
        assert_eq!(pv.alarm(), (Severity::Major, AlarmStatus::Hihi));
        assert_eq!(pv.read_direct(FieldId::Status).unwrap(), PvValue::from("HIHI"));
        assert_eq!(pv.read_direct(FieldId::Severity).unwrap(), PvValue::from("MAJOR"));
    }

    #[test]
    fn test_failed_write_leaves_state() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        pv.write_direct(FieldId::Value, PvValue::from(8.5)).unwrap();
        let before = pv.timestamp();
        assert!(matches!(
            pv.write_direct(FieldId::Value, PvValue::from("hot")),
            Err(PvError::Conversion(_))
        ));
        assert_eq!(pv.value(), PvValue::Float64(vec![8.5]));
        assert_eq!(pv.alarm(), (Severity::Minor, AlarmStatus::High));
        assert_eq!(pv.timestamp(), before);
    }

    #[test]
    fn test_non_finite_writes_rejected() {
        let pv = CommonPv::new("X", &PvConfig::with_type("float64")).unwrap();
        pv.write_direct(FieldId::Value, PvValue::from(2.0)).unwrap();
        for bad in [f64::NAN, f64::INFINITY] {
            assert!(matches!(
                pv.write_direct(FieldId::Value, PvValue::from(bad)),
                Err(PvError::Conversion(_))
            ));
        }
        assert_eq!(pv.value(), PvValue::from(2.0));
        assert_eq!(pv.alarm(), (Severity::NoAlarm, AlarmStatus::NoAlarm));

        let limits = [
            FieldId::ControlHigh,
            FieldId::ControlLow,
            FieldId::AlarmHigh,
            FieldId::Hysteresis,
        ];
        for field in limits {
            assert!(pv.write_direct(field, PvValue::from(f64::NAN)).is_err(), "field {}", field);
        }
        pv.write_direct(FieldId::Value, PvValue::from(1.0e6)).unwrap();
        assert_eq!(pv.value(), PvValue::from(10.0));
    }

    #[test]
    fn test_non_finite_config_rejected() {
        let mut config = PvConfig::with_type("float64");
        config.control_high = Some(f64::NAN);
        assert!(matches!(CommonPv::new("X", &config), Err(PvError::Config(_))));

        let mut config = PvConfig::with_type("float64");
        config.scan_period = Some(1.0e20);
        assert!(matches!(CommonPv::new("X", &config), Err(PvError::Config(_))));
    }

    #[test]
    fn test_limit_change_does_not_reevaluate() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        pv.write_direct(FieldId::Value, PvValue::from(8.5)).unwrap();
        pv.write_direct(FieldId::WarnHigh, PvValue::from(9.5)).unwrap();
        assert_eq!(pv.alarm(), (Severity::Minor, AlarmStatus::High));
        pv.write_direct(FieldId::Value, PvValue::from(8.5)).unwrap();
        assert_eq!(pv.alarm(), (Severity::NoAlarm, AlarmStatus::NoAlarm));
    }

    #[test]
    fn test_field_round_trip() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        let cases: Vec<(FieldId, PvValue, PvValue)> = vec![
            (FieldId::Precision, PvValue::from(6.0), PvValue::UInt32(vec![6])),
            (FieldId::ControlHigh, PvValue::from(20.0), PvValue::from(20.0)),
            (FieldId::ControlLow, PvValue::from(-5.0), PvValue::from(-5.0)),
            (FieldId::AlarmHigh, PvValue::from(19.0), PvValue::from(19.0)),
            (FieldId::AlarmLow, PvValue::from(-4.0), PvValue::from(-4.0)),
            (FieldId::WarnHigh, PvValue::from(18.0), PvValue::from(18.0)),
            (FieldId::WarnLow, PvValue::from(-3.0), PvValue::from(-3.0)),
            (FieldId::Hysteresis, PvValue::from(0.25), PvValue::from(0.25)),
            (FieldId::MonitorDeadband, PvValue::from(0.5), PvValue::from(0.5)),
            (FieldId::ArchiveDeadband, PvValue::from(1.5), PvValue::from(1.5)),
            (FieldId::Units, PvValue::from("mbar"), PvValue::from("mbar")),
            (FieldId::SevHihi, PvValue::from("MINOR"), PvValue::from("MINOR")),
            (FieldId::SevHigh, PvValue::from("INVALID"), PvValue::from("INVALID")),
            (FieldId::SevLow, PvValue::from("NO_ALARM"), PvValue::from("NO_ALARM")),
            (FieldId::SevLolo, PvValue::from("MAJOR"), PvValue::from("MAJOR")),
            (FieldId::AckTransient, PvValue::from(1u16), PvValue::UInt16(vec![1])),
            (FieldId::AckSeverity, PvValue::from("MINOR"), PvValue::from("MINOR")),
            (
                FieldId::EnumMetadata,
                PvValue::from(vec!["OFF", "ON"]),
                PvValue::from(vec!["OFF", "ON"]),
            ),
            (FieldId::Timestamp, PvValue::from(1000.5), PvValue::from(1000.5)),
        ];
        for (field, input, expected) in cases {
            pv.write_direct(field, input).unwrap();
            assert_eq!(pv.read_direct(field).unwrap(), expected, "field {}", field);
        }
    }

    #[test]
    fn test_garbage_severity_write_is_accepted() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        pv.write_direct(FieldId::SevHihi, PvValue::from("MINOR")).unwrap();
        pv.write_direct(FieldId::SevHihi, PvValue::from("GARBAGE")).unwrap();
        assert_eq!(pv.read_direct(FieldId::SevHihi).unwrap(), PvValue::from("MAJOR"));
        pv.write_direct(FieldId::SevHihi, PvValue::from(1u16)).unwrap();
        assert_eq!(pv.limits().sev_hihi, Severity::Minor);
    }

    #[test]
    fn test_read_only_fields_reject_writes() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        for field in [FieldId::ElementCount, FieldId::Status, FieldId::Severity] {
            assert!(matches!(
                pv.write_direct(field, PvValue::from(1.0)),
                Err(PvError::ReadOnly(f)) if f == field
            ));
        }
        assert_eq!(pv.read_direct(FieldId::ElementCount).unwrap(), PvValue::UInt32(vec![1]));
    }

    #[test]
    fn test_wire_write_restores_nothing_and_fills_read() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        let mut request = WireValue::scalar(FieldId::Value, 3.0);
        pv.write(&mut request).unwrap();
        let mut read = WireValue::request(FieldId::Value);
        pv.read(&mut read).unwrap();
        assert_eq!(read.data, PvValue::from(3.0));
        assert_eq!(read.rank, 0);
        assert!(read.timestamp.is_some());

        let mut matrix = WireValue::array(FieldId::Value, vec![1.0, 2.0]).with_rank(2);
        assert!(matches!(pv.write(&mut matrix), Err(PvError::Conversion(_))));
    }

    #[test]
    fn test_external_timestamp_used_when_local_disabled() {
        let mut config = analog();
        config.use_local_timestamp = Some(false);
        let pv = CommonPv::new("X", &config).unwrap();
        let ts = DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap();
        let mut request = WireValue::scalar(FieldId::Value, 1.0).with_timestamp(ts);
        pv.write(&mut request).unwrap();
        assert_eq!(pv.timestamp(), ts);

        pv.set_external_timestamp(1_700_000_000, 0).unwrap();
        pv.write_direct(FieldId::Value, PvValue::from(2.0)).unwrap();
        assert_eq!(pv.timestamp().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_register_requires_host() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        assert!(matches!(pv.register_interest(), Err(PvError::HostUnavailable(_))));
        assert!(!pv.is_subscribed());
        pv.unregister_interest();
    }

    #[test]
    fn test_events_gated_by_deadband() {
        let mut config = analog();
        config.monitor_deadband = Some(1.0);
        let pv = CommonPv::new("X", &config).unwrap();
        let (host, mut rx) = ChannelHost::new();
        pv.set_host(Arc::new(host));
        pv.register_interest().unwrap();

        pv.write_direct(FieldId::Value, PvValue::from(0.5)).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.mask, EventMask::LOG);

        pv.write_direct(FieldId::Value, PvValue::from(2.0)).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.mask, EventMask::VALUE | EventMask::LOG);
        assert_eq!(event.value.data, PvValue::from(2.0));

        pv.write_direct(FieldId::Value, PvValue::from(2.0)).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_change_posts_value_class() {
        let mut config = analog();
        config.monitor_deadband = Some(100.0);
        config.archive_deadband = Some(100.0);
        config.sev_high = Some("MAJOR".to_string());
        let pv = CommonPv::new("X", &config).unwrap();
        let (host, mut rx) = ChannelHost::new();
        pv.set_host(Arc::new(host));
        pv.register_interest().unwrap();

        pv.write_direct(FieldId::Value, PvValue::from(8.5)).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.mask, EventMask::ALARM | EventMask::VALUE);
        assert_eq!(event.value.status, AlarmStatus::High);

        // same severity, different status
        pv.write_direct(FieldId::Value, PvValue::from(9.5)).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.mask, EventMask::VALUE);
        assert_eq!(event.value.status, AlarmStatus::Hihi);
    }

    #[test]
    fn test_unsubscribed_writes_post_nothing() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        let (host, mut rx) = ChannelHost::new();
        pv.set_host(Arc::new(host));
        pv.write_direct(FieldId::Value, PvValue::from(9.5)).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(pv.alarm(), (Severity::Major, AlarmStatus::Hihi));
    }

    #[test]
    fn test_acknowledge_always_announces() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        let (host, mut rx) = ChannelHost::new();
        pv.set_host(Arc::new(host));

        pv.write_direct(FieldId::AckSeverity, PvValue::from("MINOR")).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.mask, EventMask::ALARM);
        assert_eq!(event.value.field, FieldId::AckSeverity);

        pv.write_direct(FieldId::AckSeverity, PvValue::from("MINOR")).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_string_array_round_trip() {
        let mut config = PvConfig::with_type("string");
        config.element_count = Some(5);
        let pv = CommonPv::new("NAMES", &config).unwrap();
        let names = vec!["a", "bb", "ccc", "dddd", "eeeee"];
        let mut request = WireValue::array(FieldId::Value, names.clone());
        pv.write(&mut request).unwrap();

        let mut read = WireValue::request(FieldId::Value);
        pv.read(&mut read).unwrap();
        assert_eq!(read.rank, 1);
        assert_eq!(read.data, PvValue::from(names));
        assert_eq!(pv.alarm(), (Severity::NoAlarm, AlarmStatus::NoAlarm));
    }

    #[test]
    fn test_proxies_for_every_field_but_value() {
        let pv = CommonPv::new("X", &analog()).unwrap();
        assert_eq!(pv.fields().count(), FieldId::ALL.len() - 1);
        assert!(pv.field(FieldId::Value).is_none());
        let prec = pv.field(FieldId::Precision).unwrap();
        assert_eq!(prec.name(), "X.PREC");
        assert_eq!(prec.pv_type(), PvType::UInt32);
    }
}
