// src/host.rs - Host attachment: event classes and event delivery
use crate::value::WireValue;
use bitflags::bitflags;
use log::trace;
use tokio::sync::mpsc;

bitflags! {
    /// Event classes a posted event belongs to
    pub struct EventMask: u32 {
        const VALUE = 0b0001;
        const LOG = 0b0010;
        const ALARM = 0b0100;
    }
}

/// A change announcement from a PV to its host
#[derive(Debug, Clone, PartialEq)]
pub struct PvEvent {
    /// Name of the posting PV (`NAME` or `NAME.FIELD`)
    pub pv: String,
    pub mask: EventMask,
    /// Value, field, timestamp and alarm state being announced
    pub value: WireValue,
}

/// The server side a PV reports to
///
/// Posting must not block; delivery guarantees are the host's concern.
pub trait Host: Send + Sync {
    fn value_event_mask(&self) -> EventMask {
        EventMask::VALUE
    }

    fn log_event_mask(&self) -> EventMask {
        EventMask::LOG
    }

    fn alarm_event_mask(&self) -> EventMask {
        EventMask::ALARM
    }

    fn post_event(&self, event: PvEvent);
}

/// Host that forwards every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<PvEvent>,
}

impl ChannelHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PvEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Host for ChannelHost {
    fn post_event(&self, event: PvEvent) {
        trace!("Posting {:?} event for {}", event.mask, event.pv);
        if self.tx.send(event).is_err() {
            trace!("Event receiver closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldId;

    #[test]
    fn test_default_masks_are_disjoint() {
        let (host, _rx) = ChannelHost::new();
        let all = host.value_event_mask() | host.log_event_mask() | host.alarm_event_mask();
        assert_eq!(all.bits().count_ones(), 3);
    }

    #[test]
    fn test_channel_host_delivers() {
        let (host, mut rx) = ChannelHost::new();
        host.post_event(PvEvent {
            pv: "TEMP".to_string(),
            mask: EventMask::VALUE,
            value: WireValue::scalar(FieldId::Value, 1.0),
        });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.pv, "TEMP");
        assert_eq!(event.mask, EventMask::VALUE);
    }

    #[test]
    fn test_closed_receiver_is_harmless() {
        let (host, rx) = ChannelHost::new();
        drop(rx);
        host.post_event(PvEvent {
            pv: "TEMP".to_string(),
            mask: EventMask::LOG,
            value: WireValue::scalar(FieldId::Value, 1.0),
        });
    }
}
