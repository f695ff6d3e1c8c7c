//! End-to-end sender/receiver repair cycles over pooled blocks and the
//! sliding block window.

use mcx_buffer::{
    Block, BlockId, BufferConfig, ObjectId, RepairEntry, RepairRanges, SegmentPool,
};

fn test_config() -> BufferConfig {
    BufferConfig {
        segment_size: 64,
        segment_count: 64,
        block_count: 8,
        block_size: 10,
        range_max: 4,
        table_size: 16,
    }
}

/// Transmit every pending slot, attaching a pooled segment to each slot on
/// first service.
fn serve_pending(block: &mut Block, segments: &mut SegmentPool) {
    while let Some(sid) = block.first_pending() {
        if block.segment(sid).is_none() {
            let mut segment = segments.get().unwrap();
            segment.as_mut_slice()[0] = sid as u8;
            block.attach_segment(sid, segment);
        }
        block.unset_pending(sid);
    }
}

#[test]
fn sender_repair_cycle() {
    let config = test_config();
    config.validate().unwrap();
    let mut segments = config.segment_pool();
    let mut blocks = config.block_pool();
    let object = ObjectId(1);

    let mut block = blocks.get().unwrap();
    block.tx_init(BlockId(0), 8, 1);
    assert_eq!(block.pending_count(), 9);
    assert_eq!(block.parity_offset(), 1);

    // Initial pass: all source segments plus one auto-parity go out.
    serve_pending(&mut block, &mut segments);
    assert!(!block.is_transmit_pending());
    assert_eq!(segments.in_use(), 9);

    // NACK: segments 2..4 lost plus one erasure wanting fresh parity.
    assert!(block.handle_segment_request(2, 4, 8, 2, 1));
    assert_eq!(block.repair_count(), 3);
    assert_eq!(block.parity_count(), 1);
    // Same request again adds nothing.
    assert!(!block.handle_segment_request(2, 4, 8, 2, 1));

    // Advertise the queued repair before flushing it.
    let mut adv = RepairRanges::with_capacity(8);
    assert!(block.append_repair_adv(&mut adv, object, true, 8, 2));
    assert_eq!(
        adv.entries(),
        &[
            RepairEntry::Info {
                object_id: object,
                block_id: BlockId(0),
            },
            RepairEntry::Range {
                object_id: object,
                block_id: BlockId(0),
                first: 2,
                last: 4,
            },
            RepairEntry::Range {
                object_id: object,
                block_id: BlockId(0),
                first: 9,
                last: 9,
            },
        ]
    );

    // Flush: repairs become pending, fresh parity scheduled at slot 9.
    assert!(block.activate_repairs(8, 2));
    assert!(!block.has_repair_pending());
    assert_eq!(block.pending_count(), 4);
    assert!(block.is_pending(2) && block.is_pending(3) && block.is_pending(4));
    assert!(block.is_pending(9));

    serve_pending(&mut block, &mut segments);
    block.reset_parity_count(2);
    assert_eq!(block.parity_offset(), 2);
    assert_eq!(block.parity_count(), 0);

    // Parity budget spent: further erasures cannot raise the promise, but
    // an explicit retransmission of an already-sent slot still queues.
    assert!(block.handle_segment_request(9, 9, 8, 2, 2));
    assert_eq!(block.parity_count(), 0);
    assert!(block.activate_repairs(8, 2));
    assert!(block.is_pending(9));
    serve_pending(&mut block, &mut segments);

    block.empty_to_pool(&mut segments);
    assert_eq!(segments.in_use(), 0);
    blocks.put(block);
}

#[test]
fn receiver_nack_and_decode() {
    let config = test_config();
    let mut segments = config.segment_pool();
    let mut blocks = config.block_pool();
    let object = ObjectId(3);

    let mut block = blocks.get().unwrap();
    block.rx_init(BlockId(5), 4, 2);
    assert_eq!(block.pending_count(), 6);
    assert_eq!(block.erasure_count(), 4);

    // Segments 0 and 2 arrive; 1 and 3 are lost.
    for sid in [0u16, 2] {
        let segment = segments.get().unwrap();
        block.attach_segment(sid, segment);
        block.unset_pending(sid);
        block.decrement_erasure_count();
    }
    assert_eq!(block.erasure_count(), 2);
    assert!(!block.is_decodable());

    // NACK covers exactly the deficit: the two lowest outstanding slots.
    let mut nack = RepairRanges::with_capacity(8);
    assert!(block.append_repair_request(&mut nack, 4, 2, object, false));
    assert_eq!(
        nack.entries(),
        &[
            RepairEntry::Range {
                object_id: object,
                block_id: BlockId(5),
                first: 1,
                last: 1,
            },
            RepairEntry::Range {
                object_id: object,
                block_id: BlockId(5),
                first: 3,
                last: 3,
            },
        ]
    );

    // Repair arrives as one source retransmission plus one parity segment.
    let segment = segments.get().unwrap();
    block.attach_segment(1, segment);
    block.unset_pending(1);
    block.decrement_erasure_count();

    let segment = segments.get().unwrap();
    block.attach_segment(4, segment);
    block.unset_pending(4);
    block.decrement_erasure_count();
    block.increment_parity_count();

    assert!(block.is_decodable());
    assert_eq!(block.parity_count(), 1);
    assert!(!block.update_repair_pending(4, 2));
    assert!(!block.has_repair_pending());

    block.empty_to_pool(&mut segments);
    blocks.put(block);
    assert_eq!(segments.in_use(), 0);
}

#[test]
fn nack_stops_when_message_fills() {
    let config = test_config();
    let mut blocks = config.block_pool();
    let mut segments = config.segment_pool();
    let object = ObjectId(0);

    let mut block = blocks.get().unwrap();
    block.rx_init(BlockId(9), 6, 2);
    for sid in [0u16, 2] {
        let segment = segments.get().unwrap();
        block.attach_segment(sid, segment);
        block.unset_pending(sid);
        block.decrement_erasure_count();
    }

    // Deficit 4 over pending {1, 3, 4, 5, 6, 7} coalesces to (1-1), (3-5);
    // a one-entry sink takes the first run and refuses the second.
    let mut nack = RepairRanges::with_capacity(1);
    assert!(!block.append_repair_request(&mut nack, 6, 2, object, false));
    assert_eq!(
        nack.entries(),
        &[RepairEntry::Range {
            object_id: object,
            block_id: BlockId(9),
            first: 1,
            last: 1,
        }]
    );

    block.empty_to_pool(&mut segments);
    blocks.put(block);
}

#[test]
fn window_slides_and_recycles_resources() {
    let config = test_config();
    let mut segments = config.segment_pool();
    let mut blocks = config.block_pool();
    let mut buffer = config.block_buffer();

    // Receive a long run of blocks through a window of span 4, retiring the
    // oldest resident whenever the next id would not fit.
    for bid in 0..12u32 {
        let id = BlockId(bid);
        if !buffer.can_insert(id) {
            let oldest = buffer.iter().next().map(Block::id).unwrap();
            let mut old = buffer.remove(oldest).unwrap();
            old.empty_to_pool(&mut segments);
            blocks.put(old);
        }
        let mut block = blocks.get().unwrap();
        block.rx_init(id, 4, 2);
        for sid in 0..4u16 {
            let segment = segments.get().unwrap();
            block.attach_segment(sid, segment);
            block.unset_pending(sid);
            block.decrement_erasure_count();
        }
        assert!(block.is_decodable());
        buffer.insert(block).unwrap();
    }
    assert_eq!(buffer.len(), 4);

    // Residents are exactly the last four ids, in order.
    let resident: Vec<BlockId> = buffer.iter().map(Block::id).collect();
    assert_eq!(
        resident,
        vec![BlockId(8), BlockId(9), BlockId(10), BlockId(11)]
    );

    // Duplicate and out-of-window inserts hand the block back.
    let mut dup = blocks.get().unwrap();
    dup.rx_init(BlockId(10), 4, 2);
    let rejected = buffer.insert(dup).unwrap_err();
    assert_eq!(rejected.block.id(), BlockId(10));
    blocks.put(rejected.block);

    buffer.drain_into(&mut blocks, &mut segments);
    assert!(buffer.is_empty());
    assert_eq!(segments.in_use(), 0);
    assert_eq!(blocks.free(), blocks.total());
}
