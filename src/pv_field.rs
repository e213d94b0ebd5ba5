// src/pv_field.rs - One field of an alarm engine PV exposed as a PV of its own
use crate::error::{PvError, Result};
use crate::field::FieldId;
use crate::host::{Host, PvEvent};
use crate::pv::{FieldAccess, HostSlot, ProcessVariable, Subscription};
use crate::value::{PvType, PvValue, WireValue};
use chrono::{DateTime, Utc};
use log::{trace, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Binding {
    owner: Weak<dyn FieldAccess>,
    field: FieldId,
    pv_type: PvType,
    use_local_timestamp: bool,
}

/// Field proxy
///
/// Holds no value of its own: every read and write is forwarded to the
/// owner with the bound field identifier. The owner is referenced weakly
/// and must outlive the proxy; a proxy used after its owner is gone
/// reports [`PvError::OwnerGone`].
pub struct PvField {
    name: String,
    binding: OnceCell<Binding>,
    subscription: Subscription,
    host: HostSlot,
    timestamp: Mutex<DateTime<Utc>>,
    this: Weak<PvField>,
}

impl PvField {
    /// Create an unbound proxy; [`PvField::bind`] must follow
    pub fn new(name: &str, scan_period: Option<Duration>) -> Arc<Self> {
        Arc::new_cyclic(|this| PvField {
            name: name.to_string(),
            binding: OnceCell::new(),
            subscription: Subscription::new(scan_period),
            host: HostSlot::default(),
            timestamp: Mutex::new(Utc::now()),
            this: this.clone(),
        })
    }

    pub(crate) fn bound(
        name: &str,
        scan_period: Option<Duration>,
        owner: Weak<dyn FieldAccess>,
        field: FieldId,
        pv_type: PvType,
        use_local_timestamp: bool,
    ) -> Arc<Self> {
        let binding = OnceCell::with_value(Binding {
            owner,
            field,
            pv_type,
            use_local_timestamp,
        });
        Arc::new_cyclic(|this| PvField {
            name: name.to_string(),
            binding,
            subscription: Subscription::new(scan_period),
            host: HostSlot::default(),
            timestamp: Mutex::new(Utc::now()),
            this: this.clone(),
        })
    }

    /// One-time binding to the owner and the field this proxy stands for
    pub fn bind(
        &self,
        owner: Weak<dyn FieldAccess>,
        field: FieldId,
        pv_type: PvType,
        use_local_timestamp: bool,
    ) -> Result<()> {
        self.binding
            .set(Binding {
                owner,
                field,
                pv_type,
                use_local_timestamp,
            })
            .map_err(|_| PvError::Internal(format!("'{}' is already bound", self.name)))
    }

    /// Bound field, if any
    pub fn field_id(&self) -> Option<FieldId> {
        self.binding.get().map(|b| b.field)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        *self.timestamp.lock()
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding
            .get()
            .ok_or_else(|| PvError::Internal(format!("'{}' used before bind", self.name)))
    }

    fn owner(&self) -> Result<(Arc<dyn FieldAccess>, FieldId)> {
        let binding = self.binding()?;
        let owner = binding
            .owner
            .upgrade()
            .ok_or_else(|| PvError::OwnerGone(self.name.clone()))?;
        Ok((owner, binding.field))
    }

    // swaps the bound field in for the duration of `forward`
    fn substituted<F>(&self, request: &mut WireValue, forward: F) -> Result<()>
    where
        F: FnOnce(&dyn FieldAccess, &mut WireValue) -> Result<()>,
    {
        let (owner, field) = self.owner()?;
        let original = std::mem::replace(&mut request.field, field);
        let result = forward(owner.as_ref(), request);
        request.field = original;
        result
    }
}

impl FieldAccess for PvField {
    fn read(&self, request: &mut WireValue) -> Result<()> {
        self.substituted(request, |owner, req| owner.read(req))
    }

    fn write(&self, request: &mut WireValue) -> Result<()> {
        self.substituted(request, |owner, req| owner.write(req))
    }

    fn read_direct(&self, _field: FieldId) -> Result<PvValue> {
        let (owner, field) = self.owner()?;
        owner.read_direct(field)
    }

    fn write_direct(&self, _field: FieldId, value: PvValue) -> Result<()> {
        let (owner, field) = self.owner()?;
        owner.write_direct(field, value)
    }
}

impl ProcessVariable for PvField {
    fn name(&self) -> &str {
        &self.name
    }

    fn pv_type(&self) -> PvType {
        self.binding
            .get()
            .map(|b| b.pv_type)
            .unwrap_or(PvType::Invalid)
    }

    fn set_host(&self, host: Arc<dyn Host>) {
        self.host.set(host);
    }

    fn register_interest(&self) -> Result<()> {
        self.host.require(&self.name)?;
        let this = self.this.clone();
        self.subscription.register(&self.name, move || match this.upgrade() {
            Some(proxy) => match proxy.on_scan() {
                Ok(()) => true,
                Err(PvError::OwnerGone(_)) => false,
                Err(e) => {
                    warn!("Scan of '{}' failed: {}", proxy.name, e);
                    true
                }
            },
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
        let (field, local) = {
            let binding = self.binding()?;
            (binding.field, binding.use_local_timestamp)
        };
        if local {
            *self.timestamp.lock() = Utc::now();
        }

        let mut request = WireValue::request(field);
        self.read(&mut request)?;
        if local {
            request.timestamp = Some(self.timestamp());
        }

        if !self.subscription.is_subscribed() {
            return Ok(());
        }
        if let Some(host) = self.host.get() {
            trace!("Republishing '{}'", self.name);
            host.post_event(PvEvent {
                pv: self.name.clone(),
                mask: host.value_event_mask() | host.log_event_mask(),
                value: request,
            });
        }
        Ok(())
    }
}
