//! The fixed 5-field message that crosses the wire between peers.
//!
//! Kept as a flat struct rather than a tagged enum with per-variant payloads
//! so the on-wire shape matches the integer-tuple contract byte for byte:
//! `kind, sender_id, timestamp, house_id, house_status`. `house_id` and
//! `house_status` are unused (zero) for every kind but `UpdateHouseState`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum Kind {
    RequestHouse = 0,
    ReplyHouse = 1,
    RequestPaser = 2,
    ReplyPaser = 3,
    UpdateHouseState = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: Kind,
    pub sender_id: i64,
    pub timestamp: i64,
    pub house_id: i64,
    pub house_status: i64,
}

impl WireMessage {
    pub fn new(kind: Kind, sender_id: i64, timestamp: i64) -> Self {
        Self {
            kind,
            sender_id,
            timestamp,
            house_id: 0,
            house_status: 0,
        }
    }

    pub fn house_update(sender_id: i64, timestamp: i64, house_id: i64, house_status: i64) -> Self {
        Self {
            kind: Kind::UpdateHouseState,
            sender_id,
            timestamp,
            house_id,
            house_status,
        }
    }
}
