//! Per-coding-block transmission and repair state.
//!
//! A block is one FEC coding group: `ndata` source segments plus up to
//! `nparity` parity segments. The same shell serves either the sender or the
//! receiver role, selected by the role-specific init (`tx_init`/`tx_recover`
//! or `rx_init`); the two roles keep their bookkeeping in a tagged enum so a
//! sender-only operation on a receiver block fails loudly instead of
//! silently misreading counters.
//!
//! Sender bookkeeping: `parity_offset` counts parity slots consumed so far
//! (auto-parity plus earlier repair rounds), `parity_count` is the fresh
//! parity promised for the current repair cycle, and `parity_readiness`
//! tracks encoder progress toward full redundancy. Receiver bookkeeping:
//! `erasure_count` starts at `ndata` and falls as segments arrive; the block
//! is decodable at zero.

// Slot indices are bounded by the u16 block capacity.
#![allow(clippy::cast_possible_truncation)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bitset::Bitset;
use crate::message::{ObjectId, RepairSink};
use crate::pool::{Segment, SegmentPool};

/// Segment slot index within a block: `0..ndata` are source slots, the rest
/// parity slots.
pub type SegmentId = u16;

/// Block sequence number.
///
/// The id space is far larger than any window held in memory, so ordering is
/// wraparound-aware: comparisons go through signed deltas, never a derived
/// `Ord`. Two ids are comparable as long as they are within `i32::MAX` of
/// each other, which every window guarantees by construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Signed sequence distance from `other` to `self`.
    #[must_use]
    pub const fn delta(self, other: Self) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// True when `self` sorts before `other` in sequence order.
    #[must_use]
    pub const fn precedes(self, other: Self) -> bool {
        self.delta(other) < 0
    }

    /// Successor id, wrapping.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Predecessor id, wrapping.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.wrapping_sub(1))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug)]
struct SenderState {
    parity_readiness: u16,
    parity_count: u16,
    parity_offset: u16,
}

#[derive(Clone, Copy, Debug)]
struct ReceiverState {
    erasure_count: u16,
    parity_count: u16,
}

#[derive(Clone, Copy, Debug)]
enum BlockRole {
    /// Pooled shell awaiting a role-specific init.
    Idle,
    Sender(SenderState),
    Receiver(ReceiverState),
}

impl BlockRole {
    const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sender(_) => "sender",
            Self::Receiver(_) => "receiver",
        }
    }
}

/// State of one FEC coding block.
pub struct Block {
    id: BlockId,
    slots: Box<[Option<Segment>]>,
    pending: Bitset,
    repair: Bitset,
    in_repair: bool,
    role: BlockRole,
}

impl Block {
    /// Create an idle shell with `block_size` segment slots.
    pub(crate) fn new(block_size: u16) -> Self {
        let capacity = usize::from(block_size);
        Self {
            id: BlockId::default(),
            slots: (0..capacity).map(|_| None).collect(),
            pending: Bitset::new(capacity),
            repair: Bitset::new(capacity),
            in_repair: false,
            role: BlockRole::Idle,
        }
    }

    fn sender(&self) -> &SenderState {
        match &self.role {
            BlockRole::Sender(state) => state,
            other => panic!(
                "sender operation on {} block {}",
                other.name(),
                self.id
            ),
        }
    }

    fn sender_mut(&mut self) -> &mut SenderState {
        match &mut self.role {
            BlockRole::Sender(state) => state,
            other => panic!("sender operation on {} block {}", other.name(), self.id),
        }
    }

    fn receiver(&self) -> &ReceiverState {
        match &self.role {
            BlockRole::Receiver(state) => state,
            other => panic!(
                "receiver operation on {} block {}",
                other.name(),
                self.id
            ),
        }
    }

    fn receiver_mut(&mut self) -> &mut ReceiverState {
        match &mut self.role {
            BlockRole::Receiver(state) => state,
            other => panic!("receiver operation on {} block {}", other.name(), self.id),
        }
    }

    /// Block sequence number.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Total slot capacity (source plus parity).
    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.slots.len() as u16
    }

    /// True when the block is under active reactive repair rather than
    /// initial proactive transmission.
    #[must_use]
    pub const fn in_repair(&self) -> bool {
        self.in_repair
    }

    /// Mark the block as under active reactive repair.
    pub fn set_in_repair(&mut self) {
        self.in_repair = true;
    }

    // ------------------------------------------------------------------
    // Segment slots
    // ------------------------------------------------------------------

    /// Segment held in slot `sid`, if any.
    #[must_use]
    pub fn segment(&self, sid: SegmentId) -> Option<&Segment> {
        self.slots.get(usize::from(sid)).and_then(Option::as_ref)
    }

    /// Mutable access to the segment held in slot `sid`, if any.
    pub fn segment_mut(&mut self, sid: SegmentId) -> Option<&mut Segment> {
        self.slots.get_mut(usize::from(sid)).and_then(Option::as_mut)
    }

    /// Place a segment into an empty slot.
    ///
    /// # Panics
    ///
    /// Panics if `sid` is out of range or the slot already holds a segment -
    /// both are contract violations of the caller.
    pub fn attach_segment(&mut self, sid: SegmentId, segment: Segment) {
        let slot = usize::from(sid);
        assert!(
            slot < self.slots.len(),
            "slot {sid} out of range for block {}",
            self.id
        );
        assert!(
            self.slots[slot].is_none(),
            "slot {sid} of block {} already holds a segment",
            self.id
        );
        self.slots[slot] = Some(segment);
    }

    /// Take the segment out of slot `sid`, handing ownership to the caller.
    pub fn detach_segment(&mut self, sid: SegmentId) -> Option<Segment> {
        self.slots.get_mut(usize::from(sid)).and_then(Option::take)
    }

    /// True when no slot holds a segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Detach every held segment back to `pool`.
    ///
    /// This is the only sanctioned bulk release of a block's segments before
    /// the shell is recycled into a block pool.
    pub fn empty_to_pool(&mut self, pool: &mut SegmentPool) {
        for slot in &mut self.slots {
            if let Some(segment) = slot.take() {
                pool.put(segment);
            }
        }
    }

    // ------------------------------------------------------------------
    // Pending / repair masks
    // ------------------------------------------------------------------

    /// Mark slot `sid` as needing (re)transmission or reception.
    pub fn set_pending(&mut self, sid: SegmentId) -> bool {
        self.pending.set(usize::from(sid))
    }

    /// Mark `count` consecutive slots pending, starting at `first`.
    pub fn set_pending_range(&mut self, first: SegmentId, count: u16) -> bool {
        self.pending.set_bits(usize::from(first), usize::from(count))
    }

    /// Clear slot `sid` from the pending mask.
    pub fn unset_pending(&mut self, sid: SegmentId) {
        self.pending.unset(usize::from(sid));
    }

    /// Clear the whole pending mask.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// True when slot `sid` is pending.
    #[must_use]
    pub fn is_pending(&self, sid: SegmentId) -> bool {
        self.pending.test(usize::from(sid))
    }

    /// True when any slot is pending.
    #[must_use]
    pub fn is_pending_any(&self) -> bool {
        self.pending.any()
    }

    /// Number of pending slots.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.count_set()
    }

    /// Lowest pending slot, if any.
    #[must_use]
    pub fn first_pending(&self) -> Option<SegmentId> {
        self.pending.first_set().map(|i| i as SegmentId)
    }

    /// Lowest pending slot at or above `from`, if any.
    #[must_use]
    pub fn next_pending(&self, from: SegmentId) -> Option<SegmentId> {
        self.pending.next_set(usize::from(from)).map(|i| i as SegmentId)
    }

    /// Mark slot `sid` in the repair mask.
    pub fn set_repair(&mut self, sid: SegmentId) -> bool {
        self.repair.set(usize::from(sid))
    }

    /// Mark the inclusive slot run `[first, last]` in the repair mask.
    pub fn set_repair_range(&mut self, first: SegmentId, last: SegmentId) -> bool {
        if first == last {
            self.repair.set(usize::from(first))
        } else {
            self.repair
                .set_bits(usize::from(first), usize::from(last - first) + 1)
        }
    }

    /// Clear slot `sid` from the repair mask.
    pub fn unset_repair(&mut self, sid: SegmentId) {
        self.repair.unset(usize::from(sid));
    }

    /// Clear the whole repair mask.
    pub fn clear_repairs(&mut self) {
        self.repair.clear();
    }

    /// True when the repair mask holds any slot.
    #[must_use]
    pub fn has_repair_pending(&self) -> bool {
        self.repair.any()
    }

    /// Number of slots in the repair mask.
    #[must_use]
    pub fn repair_count(&self) -> usize {
        self.repair.count_set()
    }

    /// True when anything remains to transmit: pending or repair work.
    #[must_use]
    pub fn is_transmit_pending(&self) -> bool {
        self.pending.any() || self.repair.any()
    }

    // ------------------------------------------------------------------
    // Sender role
    // ------------------------------------------------------------------

    /// Initialize for proactive transmission: all `ndata + auto_parity`
    /// slots pending, repair state cleared.
    pub fn tx_init(&mut self, id: BlockId, ndata: u16, auto_parity: u16) {
        self.id = id;
        self.pending.clear();
        let fits = self
            .pending
            .set_bits(0, usize::from(ndata) + usize::from(auto_parity));
        assert!(fits, "ndata + auto_parity exceeds capacity of block {id}");
        self.repair.clear();
        self.in_repair = false;
        self.role = BlockRole::Sender(SenderState {
            parity_readiness: 0,
            parity_count: 0,
            parity_offset: auto_parity,
        });
    }

    /// Reconstitute a retired block to answer a late repair request.
    ///
    /// Nothing is queued proactively and all parity capacity is treated as
    /// already consumed: a recovered block serves reactive repair only.
    pub fn tx_recover(&mut self, id: BlockId, nparity: u16) {
        self.id = id;
        self.pending.clear();
        self.repair.clear();
        self.in_repair = true;
        self.role = BlockRole::Sender(SenderState {
            parity_readiness: 0,
            parity_count: nparity,
            parity_offset: nparity,
        });
    }

    /// Reconfigure in place for a new transmission pass over possibly
    /// adjusted `ndata`/`nparity`/`auto_parity`.
    ///
    /// Unresolved repair-mask state survives the reconfigure. Returns
    /// `false`, mutating nothing, when the new geometry does not fit the
    /// allocated slot table.
    pub fn tx_reset(&mut self, ndata: u16, nparity: u16, auto_parity: u16) -> bool {
        let span = usize::from(ndata) + usize::from(nparity.max(auto_parity));
        if span > self.slots.len() {
            return false;
        }
        self.pending.clear();
        let fits = self
            .pending
            .set_bits(0, usize::from(ndata) + usize::from(auto_parity));
        debug_assert!(fits);
        self.in_repair = false;
        self.role = BlockRole::Sender(SenderState {
            parity_readiness: 0,
            parity_count: 0,
            parity_offset: auto_parity,
        });
        true
    }

    /// Re-arm pending transmission over `[next_id, last_id]` plus
    /// `erasure_count` fresh parity slots for a repair pass.
    ///
    /// Returns `false`, mutating nothing, when the explicit range or the
    /// fresh-parity range is structurally invalid for this block.
    pub fn tx_update(
        &mut self,
        next_id: SegmentId,
        last_id: SegmentId,
        ndata: u16,
        nparity: u16,
        erasure_count: u16,
    ) -> bool {
        let total = usize::from(ndata) + usize::from(nparity);
        if next_id > last_id || usize::from(last_id) >= total || total > self.slots.len() {
            return false;
        }
        let offset = self.sender().parity_offset;
        if usize::from(offset) + usize::from(erasure_count) > usize::from(nparity) {
            return false;
        }
        let set = self
            .pending
            .set_bits(usize::from(next_id), usize::from(last_id - next_id) + 1);
        debug_assert!(set);
        if erasure_count > 0 {
            let set = self.pending.set_bits(
                usize::from(ndata) + usize::from(offset),
                usize::from(erasure_count),
            );
            debug_assert!(set);
            let state = self.sender_mut();
            if erasure_count > state.parity_count {
                state.parity_count = erasure_count;
            }
        }
        true
    }

    /// Fold a range-based repair request into the repair mask and parity
    /// promise. Returns whether any new repair work resulted, so the caller
    /// knows to keep or re-activate the block instead of retiring it.
    ///
    /// Explicit slots below `ndata + parity_offset` (everything transmitted
    /// at least once) become repair-mask entries; `erasure_count` raises the
    /// fresh-parity promise toward the remaining `nparity` budget.
    pub fn handle_segment_request(
        &mut self,
        next_id: SegmentId,
        last_id: SegmentId,
        ndata: u16,
        nparity: u16,
        erasure_count: u16,
    ) -> bool {
        let offset = self.sender().parity_offset;
        let mut increased = false;
        let total = usize::from(ndata) + usize::from(nparity);
        let explicit_end = (usize::from(ndata) + usize::from(offset)).min(total);
        let mut sid = usize::from(next_id);
        let last = usize::from(last_id);
        while sid <= last && sid < explicit_end {
            if !self.pending.test(sid) && !self.repair.test(sid) {
                let set = self.repair.set(sid);
                debug_assert!(set);
                increased = true;
            }
            sid += 1;
        }
        let budget = nparity.saturating_sub(offset);
        let want = erasure_count.min(budget);
        let state = self.sender_mut();
        if want > state.parity_count {
            state.parity_count = want;
            increased = true;
        }
        increased
    }

    /// Promote queued repair-mask slots into pending work and schedule the
    /// promised fresh parity, respecting the `nparity` ceiling.
    ///
    /// Returns `false` when nothing could be activated - including the case
    /// where parity was demanded but no parity capacity remains.
    pub fn activate_repairs(&mut self, ndata: u16, nparity: u16) -> bool {
        let mut activated = false;
        if self.repair.any() {
            self.pending.union_with(&self.repair);
            self.repair.clear();
            activated = true;
        }
        let SenderState {
            parity_count,
            parity_offset,
            ..
        } = *self.sender();
        if parity_count > 0 {
            let fresh = parity_count.min(nparity.saturating_sub(parity_offset));
            if fresh > 0 {
                let set = self.pending.set_bits(
                    usize::from(ndata) + usize::from(parity_offset),
                    usize::from(fresh),
                );
                debug_assert!(set);
                // Clamp the promise to what actually got scheduled so the
                // next reset_parity_count rolls forward the true consumption.
                self.sender_mut().parity_count = fresh;
                activated = true;
            }
        }
        activated
    }

    /// Roll unused parity budget into the next repair cycle:
    /// `parity_offset += parity_count` capped at `nparity`, promise zeroed.
    pub fn reset_parity_count(&mut self, nparity: u16) {
        let state = self.sender_mut();
        state.parity_offset = (state.parity_offset + state.parity_count).min(nparity);
        state.parity_count = 0;
    }

    /// True once `ndata` parity segments worth of redundancy have been
    /// generated - the block is then decodable by the worst-case receiver.
    #[must_use]
    pub fn parity_ready(&self, ndata: u16) -> bool {
        self.sender().parity_readiness == ndata
    }

    /// Encoder progress toward full redundancy.
    #[must_use]
    pub fn parity_readiness(&self) -> u16 {
        self.sender().parity_readiness
    }

    /// Record one more parity segment generated.
    pub fn increase_parity_readiness(&mut self) {
        self.sender_mut().parity_readiness += 1;
    }

    /// Force the readiness level (e.g. when parity arrives precomputed).
    pub fn set_parity_readiness(&mut self, ndata: u16) {
        self.sender_mut().parity_readiness = ndata;
    }

    /// Parity segments promised for the current repair cycle (sender) or
    /// received so far (receiver).
    #[must_use]
    pub fn parity_count(&self) -> u16 {
        match &self.role {
            BlockRole::Sender(state) => state.parity_count,
            BlockRole::Receiver(state) => state.parity_count,
            BlockRole::Idle => panic!("parity_count on idle block {}", self.id),
        }
    }

    /// Parity slots consumed by auto-parity and earlier repair rounds.
    #[must_use]
    pub fn parity_offset(&self) -> u16 {
        self.sender().parity_offset
    }

    /// Append this block's outstanding-repair description as coalesced
    /// ranges into `sink`, optionally preceded by the block-info marker.
    ///
    /// Covers both the explicit repair mask and the fresh parity promised
    /// for the current cycle. Returns `false` as soon as the sink reports
    /// it is full.
    pub fn append_repair_adv(
        &self,
        sink: &mut dyn RepairSink,
        object_id: ObjectId,
        repair_info: bool,
        ndata: u16,
        nparity: u16,
    ) -> bool {
        if repair_info && !sink.append_block_info(object_id, self.id) {
            return false;
        }
        if !append_mask_ranges(&self.repair, sink, object_id, self.id) {
            return false;
        }
        let state = self.sender();
        let fresh = state
            .parity_count
            .min(nparity.saturating_sub(state.parity_offset));
        if fresh > 0 {
            let first = ndata + state.parity_offset;
            if !sink.append_range(object_id, self.id, first, first + fresh - 1) {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Receiver role
    // ------------------------------------------------------------------

    /// Initialize for reception: all `ndata + nparity` slots pending (not
    /// yet received), nothing decoded (`erasure_count = ndata`).
    pub fn rx_init(&mut self, id: BlockId, ndata: u16, nparity: u16) {
        self.id = id;
        self.pending.clear();
        let fits = self
            .pending
            .set_bits(0, usize::from(ndata) + usize::from(nparity));
        assert!(fits, "ndata + nparity exceeds capacity of block {id}");
        self.repair.clear();
        self.in_repair = false;
        self.role = BlockRole::Receiver(ReceiverState {
            erasure_count: ndata,
            parity_count: 0,
        });
    }

    /// Record one newly arrived segment toward decodability.
    pub fn decrement_erasure_count(&mut self) {
        let state = self.receiver_mut();
        debug_assert!(state.erasure_count > 0, "erasure count underflow");
        state.erasure_count -= 1;
    }

    /// Segments still missing before the block is declared FEC-decodable.
    #[must_use]
    pub fn erasure_count(&self) -> u16 {
        self.receiver().erasure_count
    }

    /// True once enough segments have arrived to decode the block.
    #[must_use]
    pub fn is_decodable(&self) -> bool {
        self.receiver().erasure_count == 0
    }

    /// Record one parity segment received.
    pub fn increment_parity_count(&mut self) {
        self.receiver_mut().parity_count += 1;
    }

    /// Recompute the repair mask from pending state and report whether any
    /// deficit remains that warrants a NACK.
    ///
    /// Any segment repairs an erasure, so the mask is the lowest
    /// `erasure_count` pending slots within `ndata + nparity`. The previous
    /// repair-mask contents do not survive this call.
    pub fn update_repair_pending(&mut self, ndata: u16, nparity: u16) -> bool {
        self.refresh_repair_mask(ndata, nparity)
    }

    fn refresh_repair_mask(&mut self, ndata: u16, nparity: u16) -> bool {
        self.repair.clear();
        let deficit = self.receiver().erasure_count;
        if deficit == 0 {
            return false;
        }
        let limit = usize::from(ndata) + usize::from(nparity);
        let mut need = usize::from(deficit);
        let mut next = self.pending.first_set();
        while need > 0 {
            match next {
                Some(sid) if sid < limit => {
                    let set = self.repair.set(sid);
                    debug_assert!(set);
                    need -= 1;
                    next = self.pending.next_set(sid + 1);
                }
                _ => break,
            }
        }
        self.repair.any()
    }

    /// Recompute the outstanding gaps and append them as coalesced ranges
    /// into `sink`, optionally flagging that the block's info segment is
    /// also needed. Returns `false` as soon as the sink reports it is full,
    /// so the caller can flush the message and retry.
    pub fn append_repair_request(
        &mut self,
        sink: &mut dyn RepairSink,
        ndata: u16,
        nparity: u16,
        object_id: ObjectId,
        pending_info: bool,
    ) -> bool {
        self.refresh_repair_mask(ndata, nparity);
        if pending_info && !sink.append_block_info(object_id, self.id) {
            return false;
        }
        append_mask_ranges(&self.repair, sink, object_id, self.id)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("role", &self.role.name())
            .field("pending", &self.pending.count_set())
            .field("repair", &self.repair.count_set())
            .field("in_repair", &self.in_repair)
            .finish_non_exhaustive()
    }
}

/// Walk `mask` as maximal runs of consecutive set bits and append each run.
fn append_mask_ranges(
    mask: &Bitset,
    sink: &mut dyn RepairSink,
    object_id: ObjectId,
    block_id: BlockId,
) -> bool {
    let mut next = mask.first_set();
    while let Some(first) = next {
        let mut last = first;
        while mask.test(last + 1) {
            last += 1;
        }
        if !sink.append_range(object_id, block_id, first as SegmentId, last as SegmentId) {
            return false;
        }
        next = mask.next_set(last + 1);
    }
    true
}
