//! Call records and the fixed-capacity call map
//!
//! One bridged call owns two correlated dialogs: the A-leg toward the
//! caller and the B-leg toward the callee. The map is a fixed array of
//! slots; each slot carries its own lock so transitions for one call are
//! serialized independently of map-level bookkeeping. A slot is
//! reachable by Call-ID lookup exactly while it is active; release
//! re-initializes it in place for reuse.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::limits::B_LEG_PREFIX;
use crate::types::{CallState, Leg};

/// Verbatim header lines captured from one leg's dialog, used to
/// synthesize dialog-consistent outbound messages to that leg
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegHeaders {
    pub from: String,
    pub via: String,
    pub cseq: String,
    pub to: String,
}

impl LegHeaders {
    /// Sequence number parsed out of the stored `CSeq:` line
    pub fn cseq_number(&self) -> Option<u32> {
        let value = self.cseq.split(':').nth(1)?.trim_start();
        let end = value
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(value.len());
        value[..end].parse().ok()
    }

    fn clear(&mut self) {
        self.from.clear();
        self.via.clear();
        self.cseq.clear();
        self.to.clear();
    }
}

/// Per-leg media observation flags, informational only
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaState {
    pub local_media: bool,
    pub remote_media: bool,
}

/// One slot in the call map
#[derive(Debug)]
pub struct Call {
    /// Slot position, stable for the lifetime of the map
    pub index: usize,
    /// Slot occupancy flag; a slot is reachable by lookup iff active
    pub is_active: bool,
    pub state: CallState,

    /// A-leg dialog identifier (the inbound INVITE's Call-ID)
    pub a_leg_uuid: String,
    /// B-leg dialog identifier, derived from the A-leg one
    pub b_leg_uuid: String,

    pub a_leg_addr: Option<SocketAddr>,
    pub b_leg_addr: Option<SocketAddr>,

    pub a_leg_headers: LegHeaders,
    pub b_leg_headers: LegHeaders,

    /// Contact URIs captured from between `<` and `>`
    pub a_leg_contact: String,
    pub b_leg_contact: String,

    pub a_leg_media: MediaState,
    pub b_leg_media: MediaState,

    pub caller: String,
    pub callee: String,
}

impl Call {
    fn idle(index: usize) -> Self {
        Self {
            index,
            is_active: false,
            state: CallState::Idle,
            a_leg_uuid: String::new(),
            b_leg_uuid: String::new(),
            a_leg_addr: None,
            b_leg_addr: None,
            a_leg_headers: LegHeaders::default(),
            b_leg_headers: LegHeaders::default(),
            a_leg_contact: String::new(),
            b_leg_contact: String::new(),
            a_leg_media: MediaState::default(),
            b_leg_media: MediaState::default(),
            caller: String::new(),
            callee: String::new(),
        }
    }

    /// Re-initialize the slot to defaults, keeping its index
    fn reset(&mut self) {
        self.is_active = false;
        self.state = CallState::Idle;
        self.a_leg_uuid.clear();
        self.b_leg_uuid.clear();
        self.a_leg_addr = None;
        self.b_leg_addr = None;
        self.a_leg_headers.clear();
        self.b_leg_headers.clear();
        self.a_leg_contact.clear();
        self.b_leg_contact.clear();
        self.a_leg_media = MediaState::default();
        self.b_leg_media = MediaState::default();
        self.caller.clear();
        self.callee.clear();
    }

    /// Stored headers for the given leg
    pub fn headers(&self, leg: Leg) -> &LegHeaders {
        match leg {
            Leg::A => &self.a_leg_headers,
            Leg::B => &self.b_leg_headers,
        }
    }

    /// Transport address of the given leg's peer
    pub fn addr(&self, leg: Leg) -> Option<SocketAddr> {
        match leg {
            Leg::A => self.a_leg_addr,
            Leg::B => self.b_leg_addr,
        }
    }

    /// Dialog identifier of the given leg
    pub fn uuid(&self, leg: Leg) -> &str {
        match leg {
            Leg::A => &self.a_leg_uuid,
            Leg::B => &self.b_leg_uuid,
        }
    }
}

/// Derive the B-leg Call-ID by overwriting the first five bytes of the
/// A-leg Call-ID with `b-leg`. A Call-ID too short to overwrite is
/// prefixed whole instead, so the two dialog identifiers never coincide
/// (an inbound Call-ID of exactly `b-leg` would otherwise map to
/// itself and leave the B-leg unreachable by lookup).
pub fn derive_b_leg_uuid(call_id: &str) -> String {
    if call_id.len() > B_LEG_PREFIX.len() {
        format!("{}{}", B_LEG_PREFIX, &call_id[B_LEG_PREFIX.len()..])
    } else {
        format!("{}{}", B_LEG_PREFIX, call_id)
    }
}

/// Shared handle to one call slot
pub type CallSlot = Arc<Mutex<Call>>;

/// Fixed-capacity pool of call slots with Call-ID lookup
pub struct CallMap {
    slots: Vec<CallSlot>,
    active: Mutex<usize>,
}

impl CallMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|i| Arc::new(Mutex::new(Call::idle(i)))).collect(),
            active: Mutex::new(0),
        }
    }

    /// Claim the first inactive slot, or `None` when the pool is full.
    ///
    /// Busy slot locks are skipped rather than awaited: a slot another
    /// task holds locked is in use and cannot be inactive.
    pub fn allocate(&self) -> Option<CallSlot> {
        let mut active = self.active.lock().unwrap();
        if *active >= self.slots.len() {
            return None;
        }
        for slot in &self.slots {
            if let Ok(mut call) = slot.try_lock() {
                if !call.is_active {
                    call.is_active = true;
                    *active += 1;
                    return Some(slot.clone());
                }
            }
        }
        None
    }

    /// Linear scan of active slots comparing the Call-ID against each
    /// leg's dialog identifier; reports which leg matched.
    pub fn find_by_callid(&self, call_id: &str) -> Option<(CallSlot, Leg)> {
        for slot in &self.slots {
            let call = slot.lock().unwrap();
            if !call.is_active {
                continue;
            }
            if call.a_leg_uuid == call_id {
                drop(call);
                return Some((slot.clone(), Leg::A));
            }
            if call.b_leg_uuid == call_id {
                drop(call);
                return Some((slot.clone(), Leg::B));
            }
        }
        None
    }

    /// Re-initialize a slot on a terminal transition. The caller holds
    /// the slot lock and passes the guarded record in.
    pub fn release(&self, call: &mut Call) {
        if call.is_active {
            call.reset();
            let mut active = self.active.lock().unwrap();
            *active = active.saturating_sub(1);
        }
    }

    /// Number of currently active calls
    pub fn active_count(&self) -> usize {
        *self.active.lock().unwrap()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_b_leg_uuid() {
        assert_eq!(
            derive_b_leg_uuid("flow-001@example.com"),
            "b-leg001@example.com"
        );
        assert_eq!(derive_b_leg_uuid("abc"), "b-legabc");
        // A Call-ID of exactly "b-leg" must still yield a distinct
        // B-leg identifier.
        assert_eq!(derive_b_leg_uuid("b-leg"), "b-legb-leg");
        for call_id in ["a", "abc", "b-leg", "flow-001@example.com"] {
            assert_ne!(derive_b_leg_uuid(call_id), call_id);
        }
    }

    #[test]
    fn test_allocate_to_capacity() {
        let map = CallMap::new(2);
        let first = map.allocate().unwrap();
        let _second = map.allocate().unwrap();
        assert!(map.allocate().is_none());
        assert_eq!(map.active_count(), 2);

        {
            let mut call = first.lock().unwrap();
            map.release(&mut call);
        }
        assert_eq!(map.active_count(), 1);
        assert!(map.allocate().is_some());
    }

    #[test]
    fn test_find_by_callid_reports_leg() {
        let map = CallMap::new(4);
        let slot = map.allocate().unwrap();
        {
            let mut call = slot.lock().unwrap();
            call.a_leg_uuid = "flow-001@example.com".to_string();
            call.b_leg_uuid = derive_b_leg_uuid("flow-001@example.com");
        }

        let (_, leg) = map.find_by_callid("flow-001@example.com").unwrap();
        assert_eq!(leg, Leg::A);
        let (_, leg) = map.find_by_callid("b-leg001@example.com").unwrap();
        assert_eq!(leg, Leg::B);
        assert!(map.find_by_callid("missing").is_none());
    }

    #[test]
    fn test_released_slot_is_unreachable() {
        let map = CallMap::new(4);
        let slot = map.allocate().unwrap();
        {
            let mut call = slot.lock().unwrap();
            call.a_leg_uuid = "gone@example.com".to_string();
            call.state = CallState::Routing;
            map.release(&mut call);
            assert_eq!(call.state, CallState::Idle);
            assert!(!call.is_active);
        }
        assert!(map.find_by_callid("gone@example.com").is_none());
        assert_eq!(map.active_count(), 0);
    }
}
