// src/pv.rs - Value container, subscription state and the periodic scan timer
use crate::config::PvConfig;
use crate::error::{PvError, Result};
use crate::field::FieldId;
use crate::host::Host;
use crate::value::{PvType, PvValue, WireValue};
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// TRAITS
// ============================================================================

/// Field-addressed read and write entry points
///
/// `read`/`write` work on the wire representation; the `_direct` variants
/// exchange internal values for in-process callers. Both paths have the
/// same side effects.
pub trait FieldAccess: Send + Sync {
    fn read(&self, request: &mut WireValue) -> Result<()>;

    fn write(&self, request: &mut WireValue) -> Result<()>;

    fn read_direct(&self, field: FieldId) -> Result<PvValue>;

    fn write_direct(&self, field: FieldId, value: PvValue) -> Result<()>;
}

/// A process variable as seen by its host
pub trait ProcessVariable: FieldAccess {
    fn name(&self) -> &str;

    fn pv_type(&self) -> PvType;

    fn set_host(&self, host: Arc<dyn Host>);

    /// Mark the PV as of interest and (re)start the scan timer
    ///
    /// Fails when no host is attached.
    fn register_interest(&self) -> Result<()>;

    fn unregister_interest(&self);

    fn is_subscribed(&self) -> bool;

    /// Republish the current value unconditionally
    fn on_scan(&self) -> Result<()>;
}

// ============================================================================
// VALUE CONTAINER
// ============================================================================

/// One typed value with its timestamp policy
#[derive(Debug, Clone)]
pub struct ValueContainer {
    pv_type: PvType,
    element_count: usize,
    pub(crate) value: PvValue,
    timestamp: DateTime<Utc>,
    use_local_timestamp: bool,
}

impl Default for ValueContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueContainer {
    pub fn new() -> Self {
        Self {
            pv_type: PvType::Invalid,
            element_count: 0,
            value: PvValue::Float64(Vec::new()),
            timestamp: Utc::now(),
            use_local_timestamp: true,
        }
    }

    /// Resolve the type and allocate the value buffer
    pub fn initialize(&mut self, config: &PvConfig) -> Result<()> {
        let pv_type = config.resolve_type()?;
        let element_count = config.element_count()?;
        let value = match config.initial_value.as_deref() {
            Some(text) => PvValue::parse_initial(pv_type, element_count, text)?,
            None => PvValue::zeroed(pv_type, element_count)?,
        };

        self.pv_type = pv_type;
        self.element_count = element_count;
        self.value = value;
        self.use_local_timestamp = config.use_local_timestamp();
        self.timestamp = Utc::now();
        Ok(())
    }

    pub fn pv_type(&self) -> PvType {
        self.pv_type
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn value(&self) -> &PvValue {
        &self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn use_local_timestamp(&self) -> bool {
        self.use_local_timestamp
    }

    /// Scalar of a numeric type; the only shape that alarms and saturates
    pub fn is_scalar_numeric(&self) -> bool {
        self.element_count == 1 && self.pv_type.is_numeric()
    }

    /// Capture the local clock if local timestamps are enabled
    pub fn stamp(&mut self) {
        if self.use_local_timestamp {
            self.timestamp = Utc::now();
        }
    }

    /// Record an externally supplied timestamp
    ///
    /// With local timestamps enabled the next write overrides it.
    pub fn set_external_timestamp(&mut self, seconds: i64, nanoseconds: u32) -> Result<()> {
        self.timestamp = DateTime::<Utc>::from_timestamp(seconds, nanoseconds).ok_or_else(|| {
            PvError::Conversion(format!("timestamp {}s {}ns out of range", seconds, nanoseconds))
        })?;
        Ok(())
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
    }

    pub(crate) fn wire_value(&self, field: FieldId) -> WireValue {
        let mut wire = WireValue::request(field);
        wire.fill(&self.value, self.timestamp);
        wire
    }
}

// ============================================================================
// HOST SLOT
// ============================================================================

#[derive(Default)]
pub(crate) struct HostSlot {
    host: RwLock<Option<Arc<dyn Host>>>,
}

impl HostSlot {
    pub(crate) fn set(&self, host: Arc<dyn Host>) {
        *self.host.write() = Some(host);
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn Host>> {
        self.host.read().clone()
    }

    pub(crate) fn require(&self, name: &str) -> Result<Arc<dyn Host>> {
        self.get()
            .ok_or_else(|| PvError::HostUnavailable(format!("no host attached to '{}'", name)))
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Subscription flag plus the optional periodic republish timer
pub struct Subscription {
    subscribed: AtomicBool,
    period: Option<Duration>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// `None` or a zero period disables the timer
    pub fn new(period: Option<Duration>) -> Self {
        let period = period.filter(|p| !p.is_zero());
        Self {
            subscribed: AtomicBool::new(false),
            period,
            timer: Mutex::new(None),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Subscribe and restart the timer
    ///
    /// `tick` runs once per period; returning `false` ends the timer. The
    /// timer needs a tokio runtime on the calling thread.
    pub fn register<F>(&self, name: &str, tick: F) -> Result<()>
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.subscribed.store(true, Ordering::SeqCst);
        let mut timer = self.timer.lock();
        if let Some(old) = timer.take() {
            old.abort();
        }

        let period = match self.period {
            Some(period) => period,
            None => {
                debug!("'{}' subscribed", name);
                return Ok(());
            }
        };

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PvError::Timer(format!("cannot scan '{}': {}", name, e)))?;
        *timer = Some(runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        }));
        debug!("'{}' subscribed, scanning every {:?}", name, period);
        Ok(())
    }

    pub fn unregister(&self, name: &str) {
        self.subscribed.store(false, Ordering::SeqCst);
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
            debug!("'{}' scan timer stopped", name);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_container_starts_invalid() {
        let container = ValueContainer::new();
        assert_eq!(container.pv_type(), PvType::Invalid);
        assert_eq!(container.element_count(), 0);
    }

    #[test]
    fn test_initialize_allocates_buffer() {
        let mut config = PvConfig::with_type("int16");
        config.element_count = Some(4);
        let mut container = ValueContainer::new();
        container.initialize(&config).unwrap();
        assert_eq!(container.value(), &PvValue::Int16(vec![0; 4]));
        assert!(!container.is_scalar_numeric());
    }

    #[test]
    fn test_initialize_fails_without_type() {
        let mut container = ValueContainer::new();
        assert!(matches!(
            container.initialize(&PvConfig::default()),
            Err(PvError::Config(_))
        ));
        let config = PvConfig::with_type("quaternion");
        assert!(container.initialize(&config).is_err());
        assert_eq!(container.pv_type(), PvType::Invalid);
    }

    #[test]
    fn test_local_stamp_overrides_external() {
        let mut container = ValueContainer::new();
        container.initialize(&PvConfig::with_type("float64")).unwrap();
        container.set_external_timestamp(1_000, 5).unwrap();
        assert_eq!(container.timestamp().timestamp(), 1_000);
        container.stamp();
        assert!(container.timestamp().timestamp() > 1_000);

        let mut config = PvConfig::with_type("float64");
        config.use_local_timestamp = Some(false);
        container.initialize(&config).unwrap();
        container.set_external_timestamp(1_000, 5).unwrap();
        container.stamp();
        assert_eq!(container.timestamp().timestamp(), 1_000);
        assert_eq!(container.timestamp().timestamp_subsec_nanos(), 5);
    }

    #[test]
    fn test_subscription_without_period_needs_no_runtime() {
        let sub = Subscription::new(None);
        sub.register("X", || true).unwrap();
        assert!(sub.is_subscribed());
        sub.unregister("X");
        assert!(!sub.is_subscribed());
        sub.unregister("X");
    }

    #[test]
    fn test_timer_without_runtime_reports_error() {
        let sub = Subscription::new(Some(Duration::from_millis(500)));
        assert!(matches!(sub.register("X", || true), Err(PvError::Timer(_))));
        assert!(sub.is_subscribed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timer_ticks_until_unregistered() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let sub = Subscription::new(Some(Duration::from_millis(20)));
        let counter = ticks.clone();
        sub.register("X", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        sub.unregister("X");
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {} ticks", seen);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
