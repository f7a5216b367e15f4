//! Two independent Ricart-Agrawala instances (house, paser) plus the
//! best-effort house-ownership mirror, all mutated under the single guard
//! the driver holds around [`Shared`].
//!
//! Both resource classes share the same request/reply/defer bookkeeping, so
//! it is written once as [`RaInstance`] and instantiated twice. The only
//! difference between the two instances is their readiness threshold: a
//! house is ready when zero peers are still owed a reply (threshold 1, i.e.
//! `replies_needed.len() < 1`); a paser is ready once fewer than P peers are
//! still owed one (threshold P). Expressing "all replies in" as "fewer than
//! 1 outstanding" lets both classes share one `ready` check.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::clock::LamportClock;
use crate::error::ProtocolError;
use crate::message::{Kind, WireMessage};
use crate::net::TransportHandle;

pub const HOUSE_FREE: i64 = 0;

/// One instance of the request/reply/defer state machine that Ricart and
/// Agrawala's mutual-exclusion algorithm needs, generalized over an
/// arbitrary "how many replies still outstanding is low enough" threshold so
/// both the exclusive (house) and N-out-of-P (paser) classes reuse it.
#[derive(Debug, Default)]
pub struct RaInstance {
    requesting: bool,
    request_ts: i64,
    replies_needed: HashSet<i64>,
    deferred: VecDeque<i64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RequestDecision {
    ReplyNow,
    Deferred,
}

impl RaInstance {
    pub fn is_requesting(&self) -> bool {
        self.requesting
    }

    pub fn request_ts(&self) -> i64 {
        self.request_ts
    }

    pub fn replies_outstanding(&self) -> usize {
        self.replies_needed.len()
    }

    /// Priority this instance presents to an incoming REQUEST: our own
    /// (timestamp, id) while requesting or holding, otherwise a sentinel
    /// strictly greater than any real priority, which always loses.
    fn priority(&self, self_id: i64, holding: bool) -> (i64, i64) {
        if self.requesting || holding {
            (self.request_ts, self_id)
        } else {
            (i64::MAX, self_id)
        }
    }

    /// Broadcasts a fresh request, recording `request_ts` and the set of
    /// peers whose reply we still need.
    pub fn begin_request(&mut self, self_id: i64, request_ts: i64, peer_ids: impl Iterator<Item = i64>) {
        debug_assert!(!self.requesting, "begin_request called while already requesting");
        self.requesting = true;
        self.request_ts = request_ts;
        self.replies_needed = peer_ids.filter(|&id| id != self_id).collect();
    }

    /// Decides whether to answer a peer's REQUEST immediately or defer it,
    /// based on lexicographic (timestamp, id) priority.
    pub fn on_request(&mut self, self_id: i64, holding: bool, sender_id: i64, sender_ts: i64) -> RequestDecision {
        let mine = self.priority(self_id, holding);
        let theirs = (sender_ts, sender_id);
        if theirs < mine {
            RequestDecision::ReplyNow
        } else {
            self.deferred.push_back(sender_id);
            RequestDecision::Deferred
        }
    }

    /// Drops stale replies, otherwise marks the sender as answered.
    pub fn on_reply(&mut self, sender_id: i64, reply_ts: i64) {
        if !self.requesting || reply_ts < self.request_ts {
            return;
        }
        self.replies_needed.remove(&sender_id);
    }

    /// Ready once fewer than `threshold` replies remain outstanding.
    /// `threshold = 1` models "all replies in"; `threshold = P` models the
    /// N-out-of-P relaxation.
    pub fn ready(&self, threshold: i64) -> bool {
        self.requesting && (self.replies_needed.len() as i64) < threshold.max(0)
    }

    /// Ends the requesting episode without necessarily having acquired
    /// anything (used both by a successful acquire and by an abort).
    pub fn end_request(&mut self) {
        self.requesting = false;
    }

    /// FIFO-drains the deferred queue, returning the peers to reply to in
    /// the order their REQUEST arrived.
    pub fn drain_deferred(&mut self) -> Vec<i64> {
        self.deferred.drain(..).collect()
    }
}

/// All per-process coordinator state, guarded as a single unit by the
/// driver's mutex together with the process state machine (see
/// [`crate::process::ProcessState`], embedded by the driver alongside this).
pub struct Coordinator {
    pub self_id: i64,
    pub n: i64,
    pub d: i64,
    pub p: i64,
    pub clock: LamportClock,

    house: RaInstance,
    held_house_id: i64,
    local_house_state: HashMap<i64, i64>,

    paser: RaInstance,
    holding_paser: bool,

    transport: TransportHandle,
}

impl Coordinator {
    pub fn new(self_id: i64, n: i64, d: i64, p: i64, transport: TransportHandle) -> Self {
        let mut local_house_state = HashMap::new();
        for house_id in 1..=d {
            local_house_state.insert(house_id, HOUSE_FREE);
        }
        Self {
            self_id,
            n,
            d,
            p,
            clock: LamportClock::new(),
            house: RaInstance::default(),
            held_house_id: 0,
            local_house_state,
            paser: RaInstance::default(),
            holding_paser: false,
            transport,
        }
    }

    fn peer_ids(&self) -> impl Iterator<Item = i64> {
        1..=self.n
    }

    fn broadcast(&mut self, kind: Kind, house_id: i64, house_status: i64) {
        let ts = self.clock.tick();
        let msg = WireMessage {
            kind,
            sender_id: self.self_id,
            timestamp: ts,
            house_id,
            house_status,
        };
        self.transport.broadcast(msg);
    }

    fn reply_to(&mut self, target_id: i64, kind: Kind) {
        let ts = self.clock.tick();
        let msg = WireMessage::new(kind, self.self_id, ts);
        self.transport.send_to(target_id, msg);
    }

    // ---- house class -----------------------------------------------------

    pub fn is_house_held(&self) -> bool {
        self.held_house_id != 0
    }

    pub fn held_house_id(&self) -> i64 {
        self.held_house_id
    }

    pub fn is_requesting_house(&self) -> bool {
        self.house.is_requesting()
    }

    pub fn house_ready(&self) -> bool {
        self.house.ready(1)
    }

    /// Begins a house request: records `request_ts` and broadcasts it.
    pub fn request_house(&mut self) {
        info!(process = self.self_id, "initiating house request");
        let ts = self.clock.tick();
        self.house.begin_request(self.self_id, ts, self.peer_ids());
        let request_ts = self.house.request_ts();
        debug!(
            process = self.self_id,
            ts = request_ts,
            expecting = self.house.replies_outstanding(),
            "broadcasting REQUEST_HOUSE"
        );
        let msg = WireMessage::new(Kind::RequestHouse, self.self_id, request_ts);
        self.transport.broadcast(msg);
    }

    /// Lowest-indexed house whose mirrored state is FREE, or `None` if every
    /// mirrored house looks taken (§4.4 WANT_HOUSE -> IDLE abort path).
    pub fn choose_free_house(&self) -> Option<i64> {
        (1..=self.d).find(|house_id| {
            self.local_house_state.get(house_id).copied().unwrap_or(HOUSE_FREE) == HOUSE_FREE
        })
    }

    /// §4.3.5 house acquired.
    pub fn acquire_house(&mut self, house_id: i64) {
        self.held_house_id = house_id;
        self.local_house_state.insert(house_id, self.self_id);
        self.house.end_request();
        info!(process = self.self_id, house_id, "acquired house");
        self.broadcast(Kind::UpdateHouseState, house_id, self.self_id);
    }

    /// Abort path: a house request was satisfied but no free house exists.
    /// Ends the requesting episode and drains anyone we deferred while
    /// requesting, per invariant 5.
    pub fn abort_house_request(&mut self) {
        warn!(process = self.self_id, "no free house available, aborting request");
        self.house.end_request();
        self.drain_house_deferred();
    }

    /// §4.3.5 house released.
    pub fn release_house(&mut self) {
        let house_id = self.held_house_id;
        if house_id == 0 {
            return;
        }
        self.local_house_state.insert(house_id, HOUSE_FREE);
        self.held_house_id = 0;
        self.house.end_request();
        info!(process = self.self_id, house_id, "released house");
        self.broadcast(Kind::UpdateHouseState, house_id, HOUSE_FREE);
        self.drain_house_deferred();
    }

    fn drain_house_deferred(&mut self) {
        for peer in self.house.drain_deferred() {
            debug!(process = self.self_id, peer, "sending deferred REPLY_HOUSE");
            self.reply_to(peer, Kind::ReplyHouse);
        }
    }

    // ---- paser class -------------------------------------------------------

    pub fn is_paser_held(&self) -> bool {
        self.holding_paser
    }

    pub fn is_requesting_paser(&self) -> bool {
        self.paser.is_requesting()
    }

    pub fn paser_ready(&self) -> bool {
        self.paser.ready(self.p)
    }

    /// §4.3.1 for the paser class. Errors (without sending anything) when
    /// P <= 0, per §7's configuration-error policy.
    pub fn request_paser(&mut self) -> Result<(), ProtocolError> {
        if self.p <= 0 {
            return Err(ProtocolError::InvalidPaserCount(self.p));
        }
        info!(process = self.self_id, "initiating paser request");
        let ts = self.clock.tick();
        self.paser.begin_request(self.self_id, ts, self.peer_ids());
        let request_ts = self.paser.request_ts();
        debug!(
            process = self.self_id,
            ts = request_ts,
            expecting = self.paser.replies_outstanding(),
            "broadcasting REQUEST_PASER"
        );
        let msg = WireMessage::new(Kind::RequestPaser, self.self_id, request_ts);
        self.transport.broadcast(msg);
        Ok(())
    }

    pub fn acquire_paser(&mut self) {
        self.holding_paser = true;
        self.paser.end_request();
        info!(process = self.self_id, "acquired paser");
    }

    pub fn release_paser(&mut self) {
        self.holding_paser = false;
        self.paser.end_request();
        info!(process = self.self_id, "released paser");
        self.drain_paser_deferred();
    }

    fn drain_paser_deferred(&mut self) {
        for peer in self.paser.drain_deferred() {
            debug!(process = self.self_id, peer, "sending deferred REPLY_PASER");
            self.reply_to(peer, Kind::ReplyPaser);
        }
    }

    // ---- inbound dispatch ---------------------------------------------------

    /// Dispatches one already-clock-observed message. The caller (the
    /// driver's receiver task) is responsible for calling
    /// `clock.observe(msg.timestamp)` before this, so any send triggered
    /// here carries a strictly greater timestamp (§4.1).
    ///
    /// A `sender_id` outside `[1..N]` is a misaddressed message (§4.8,
    /// `ProtocolError::UnknownPeer`): logged and dropped, nothing else
    /// reads or replies to it.
    pub fn on_message(&mut self, msg: WireMessage) {
        if msg.sender_id < 1 || msg.sender_id > self.n {
            let err = ProtocolError::UnknownPeer(msg.sender_id);
            warn!(process = self.self_id, %err, "dropping message");
            return;
        }
        match msg.kind {
            Kind::RequestHouse => self.on_house_request(msg.sender_id, msg.timestamp),
            Kind::ReplyHouse => {
                debug!(process = self.self_id, from = msg.sender_id, "REPLY_HOUSE");
                self.house.on_reply(msg.sender_id, msg.timestamp);
            }
            Kind::RequestPaser => self.on_paser_request(msg.sender_id, msg.timestamp),
            Kind::ReplyPaser => {
                debug!(process = self.self_id, from = msg.sender_id, "REPLY_PASER");
                self.paser.on_reply(msg.sender_id, msg.timestamp);
            }
            Kind::UpdateHouseState => {
                if msg.house_id >= 1 && msg.house_id <= self.d {
                    self.local_house_state.insert(msg.house_id, msg.house_status);
                    debug!(
                        process = self.self_id,
                        house_id = msg.house_id,
                        owner = msg.house_status,
                        "updated house mirror"
                    );
                }
            }
        }
    }

    fn on_house_request(&mut self, sender_id: i64, sender_ts: i64) {
        debug!(process = self.self_id, from = sender_id, ts = sender_ts, "REQUEST_HOUSE");
        let holding = self.is_house_held();
        match self.house.on_request(self.self_id, holding, sender_id, sender_ts) {
            RequestDecision::ReplyNow => self.reply_to(sender_id, Kind::ReplyHouse),
            RequestDecision::Deferred => {
                debug!(process = self.self_id, peer = sender_id, "deferred HOUSE reply");
            }
        }
    }

    fn on_paser_request(&mut self, sender_id: i64, sender_ts: i64) {
        debug!(process = self.self_id, from = sender_id, ts = sender_ts, "REQUEST_PASER");
        let holding = self.is_paser_held();
        match self.paser.on_request(self.self_id, holding, sender_id, sender_ts) {
            RequestDecision::ReplyNow => self.reply_to(sender_id, Kind::ReplyPaser),
            RequestDecision::Deferred => {
                debug!(process = self.self_id, peer = sender_id, "deferred PASER reply");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::net;

    /// S6: with D=2 and house 1 already marked TAKEN in the mirror (by an
    /// UPDATE_HOUSE_STATE that arrived ahead of our own readiness, as can
    /// happen since broadcasts from different senders race independently),
    /// selection skips straight to the lowest-indexed house that is FREE.
    #[tokio::test]
    async fn choose_free_house_skips_taken_entries_in_the_mirror() {
        let config = Config {
            id: 1,
            peers: vec![([127, 0, 0, 1], 31501).into()],
            houses: 2,
            pasers: 1,
            tick_interval: std::time::Duration::from_millis(50),
            watchdog: std::time::Duration::from_secs(600),
        };
        let (transport, _inbound) = net::bind(&config).await.unwrap();
        let mut coord = Coordinator::new(1, 2, 2, 1, transport);

        assert_eq!(coord.choose_free_house(), Some(1));
        coord.on_message(WireMessage::house_update(2, 1, 1, 2));
        assert_eq!(coord.choose_free_house(), Some(2));
    }

    #[test]
    fn ra_instance_lower_timestamp_wins() {
        let mut mine = RaInstance::default();
        mine.begin_request(1, 5, [1, 2, 3].into_iter());
        // sender 2 requests at ts=3, which beats our ts=5
        let decision = mine.on_request(1, false, 2, 3);
        assert_eq!(decision, RequestDecision::ReplyNow);

        // sender 3 requests at ts=5 too, tie-break on id: 3 > 1, we win, defer
        let decision = mine.on_request(1, false, 3, 5);
        assert_eq!(decision, RequestDecision::Deferred);
    }

    #[test]
    fn ra_instance_drops_stale_reply() {
        let mut mine = RaInstance::default();
        mine.begin_request(1, 10, [1, 2].into_iter());
        mine.on_reply(2, 3); // stale: reply_ts < request_ts
        assert_eq!(mine.replies_outstanding(), 1);
        mine.on_reply(2, 11);
        assert_eq!(mine.replies_outstanding(), 0);
    }

    #[test]
    fn ra_instance_reply_removal_is_idempotent() {
        let mut mine = RaInstance::default();
        mine.begin_request(1, 10, [1, 2].into_iter());
        mine.on_reply(2, 11);
        mine.on_reply(2, 11);
        assert_eq!(mine.replies_outstanding(), 0);
    }

    #[test]
    fn paser_readiness_uses_threshold() {
        let mut mine = RaInstance::default();
        mine.begin_request(1, 1, [1, 2, 3].into_iter());
        assert!(!mine.ready(2)); // P=2, both outstanding
        mine.on_reply(2, 2);
        assert!(mine.ready(2)); // 1 outstanding < 2
    }

    #[tokio::test]
    async fn on_message_drops_messages_from_unknown_peers() {
        let config = Config {
            id: 1,
            peers: vec![([127, 0, 0, 1], 31502).into()],
            houses: 1,
            pasers: 1,
            tick_interval: std::time::Duration::from_millis(50),
            watchdog: std::time::Duration::from_secs(600),
        };
        let (transport, _inbound) = net::bind(&config).await.unwrap();
        let mut coord = Coordinator::new(1, 2, 1, 1, transport);

        // sender_id 7 is outside [1..2]: dropped, no deferral recorded.
        coord.on_message(WireMessage::new(Kind::RequestHouse, 7, 1));
        assert!(coord.house.deferred.is_empty());
    }

    #[test]
    fn house_readiness_needs_every_reply() {
        let mut mine = RaInstance::default();
        mine.begin_request(1, 1, [1, 2].into_iter());
        assert!(!mine.ready(1));
        mine.on_reply(2, 2);
        assert!(mine.ready(1));
    }
}
