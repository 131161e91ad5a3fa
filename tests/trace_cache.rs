// tests/trace_cache.rs
use rvooo_rust::functional_simulator::instructions::{
    encode_add, encode_addi, encode_beq, encode_jal, increment_pc, Insn, UNKNOWN_PC_ADDR,
};
use rvooo_rust::functional_simulator::memory::{Memory, Mmu};
use rvooo_rust::timing_simulator::config::{TerminateHeuristic, TraceCacheConfig};
use rvooo_rust::timing_simulator::payload::PayloadEntry;
use rvooo_rust::timing_simulator::trace_cache::{TraceCache, TraceIterator};

/// Test suite for the trace cache

/// Helper function to build a single-set, single-way trace cache with
/// M = 3 branches and N = 8 instructions per trace.
fn create_tiny_trace_cache() -> TraceCache {
    TraceCache::new(TraceCacheConfig::new(3, 8, 1, 1))
}

/// Helper function to feed one fetched instruction into pending fills.
fn feed(cache: &mut TraceCache, bits: u32, pc: u64, next_pc: u64) {
    let entry = PayloadEntry {
        inst: Insn::new(bits),
        pc,
        next_pc,
        ..PayloadEntry::default()
    };
    cache.feed(&entry);
}

const A: u64 = 0x1000;
const Y: u64 = 0x2000;

/// Fill the tiny cache with the stream
///   A: add, A+4: beq taken to X, A+8: add, A+12: jal to Y
/// The JAL terminates the fill.
fn fill_demo_trace(cache: &mut TraceCache, pred_vec: u32) {
    assert!(cache.access(A, pred_vec).is_none(), "cold access must miss");
    assert_eq!(cache.pending_fill_count(), 1);

    feed(cache, encode_add(1, 2, 3), A, A + 4);
    // Taken conditional: next_pc differs from fall-through.
    feed(cache, encode_beq(1, 0, 0x100), A + 4, A + 4 + 0x100);
    feed(cache, encode_add(4, 5, 6), A + 8, A + 12);
    feed(
        cache,
        encode_jal(0, (Y as i64 - (A as i64 + 12)) as i32),
        A + 12,
        Y,
    );

    assert_eq!(cache.pending_fill_count(), 0, "JAL must terminate the fill");
}

#[test]
fn test_fill_then_hit() {
    let mut cache = create_tiny_trace_cache();
    fill_demo_trace(&mut cache, 0b1);

    let entry = cache
        .access(A, 0b1)
        .expect("matching direction vector must hit");
    assert_eq!(entry.start_pc, A);
    assert_eq!(entry.num_insn, 4);
    assert_eq!(entry.num_br, 1);
    assert_eq!(entry.br_direction_vec, 0b1);
    assert_eq!(entry.fall_thru_addr, A + 16);
    assert_eq!(entry.target_addr, Y);
    // The trace ends with the JAL, not the conditional, so the single
    // branch bit is meaningful and had to match.
    assert!(!entry.end_with_br);

    assert_eq!(cache.stats.hits, 1);
    assert_eq!(cache.stats.accesses, 2);
    assert_eq!(cache.stats.fills_completed, 1);
}

#[test]
fn test_miss_on_direction_mismatch() {
    let mut cache = create_tiny_trace_cache();
    fill_demo_trace(&mut cache, 0b1);

    // Same start PC but the branch bit disagrees: miss, and the LRU way is
    // recycled into a fresh fill.
    assert!(cache.access(A, 0b0).is_none());
    assert_eq!(cache.pending_fill_count(), 1);
    assert_eq!(cache.stats.hits, 0);
}

#[test]
fn test_match_mask_excludes_trailing_branch() {
    // A trace that ends with a conditional branch excludes that branch's
    // bit from the match, because its direction only picks the successor of
    // the whole trace.
    assert!(TraceCache::match_br_direction(0b01, 0b11, 2, true));
    assert!(!TraceCache::match_br_direction(0b10, 0b11, 2, true));

    // Without end_with_br every low bit participates.
    assert!(!TraceCache::match_br_direction(0b01, 0b11, 2, false));
    assert!(TraceCache::match_br_direction(0b11, 0b11, 2, false));

    // Bits above num_br never participate.
    assert!(TraceCache::match_br_direction(0b111, 0b011, 2, false));
}

#[test]
fn test_branch_limit_terminates_fill() {
    // M = 1: the second conditional cannot join the trace; the fill is
    // completed just before it.
    let mut cache = TraceCache::new(TraceCacheConfig::new(1, 8, 1, 1));
    assert!(cache.access(A, 0).is_none());

    feed(&mut cache, encode_beq(1, 0, 0x40), A, A + 4);
    assert_eq!(cache.pending_fill_count(), 1);
    feed(&mut cache, encode_beq(2, 0, 0x40), A + 4, A + 8);
    assert_eq!(cache.pending_fill_count(), 0);

    let entry = cache.access(A, 0).expect("trace with one branch must hit");
    assert_eq!(entry.num_insn, 1);
    assert_eq!(entry.num_br, 1);
    assert!(entry.end_with_br);
}

#[test]
fn test_insn_limit_terminates_fill() {
    let mut cache = TraceCache::new(TraceCacheConfig::new(2, 2, 1, 1));
    assert!(cache.access(A, 0).is_none());

    feed(&mut cache, encode_add(1, 2, 3), A, A + 4);
    assert_eq!(cache.pending_fill_count(), 1);
    feed(&mut cache, encode_add(4, 5, 6), A + 4, A + 8);
    assert_eq!(cache.pending_fill_count(), 0);

    let entry = cache.access(A, 0).expect("full trace must hit");
    assert_eq!(entry.num_insn, 2);
    assert_eq!(entry.num_br, 0);
}

#[test]
fn test_backward_branch_heuristic() {
    let mut cache = TraceCache::new(
        TraceCacheConfig::new(3, 8, 1, 1)
            .with_terminate_heuristic(TerminateHeuristic::BackwardBranch),
    );
    assert!(cache.access(A, 0).is_none());

    feed(&mut cache, encode_add(1, 2, 3), A, A + 4);
    // Backward (negative offset) conditional ends the trace at once.
    feed(&mut cache, encode_beq(1, 0, -8), A + 4, A + 4 - 8);
    assert_eq!(cache.pending_fill_count(), 0);

    let entry = cache.access(A, 0b10).expect("hit; trailing bit excluded");
    assert_eq!(entry.num_insn, 2);
    assert_eq!(entry.num_br, 1);
    assert!(entry.end_with_br);
}

#[test]
fn test_squash_aborts_pending_fill() {
    let mut cache = create_tiny_trace_cache();
    assert!(cache.access(A, 0).is_none());
    feed(&mut cache, encode_add(1, 2, 3), A, A + 4);
    assert_eq!(cache.pending_fill_count(), 1);

    cache.squash_unfinished_fill();
    assert_eq!(cache.pending_fill_count(), 0);

    // The aborted slot is neither valid nor filling: the next access
    // restarts the fill from scratch.
    assert!(cache.access(A, 0).is_none());
    assert_eq!(cache.pending_fill_count(), 1);
}

#[test]
fn test_blocking_fill_rejects_second_fill() {
    let mut cache = TraceCache::new(TraceCacheConfig::new(3, 8, 4, 1));
    assert!(cache.access(A, 0).is_none());
    assert_eq!(cache.pending_fill_count(), 1);

    // Another PC also misses, but blocking-fill mode refuses to open a
    // second fill while one is outstanding.
    assert!(cache.access(A + 4, 0).is_none());
    assert_eq!(cache.pending_fill_count(), 1);
}

#[test]
fn test_non_blocking_fill_allows_concurrent_fills() {
    // 64 sets so the word-aligned PCs land in distinct sets.
    let mut cache = TraceCache::new(
        TraceCacheConfig::new(3, 8, 64, 1).with_non_blocking_fill(true, 2),
    );
    assert!(cache.access(A, 0).is_none());
    assert!(cache.access(A + 4, 0).is_none());
    assert_eq!(cache.pending_fill_count(), 2);

    // The concurrency cap holds.
    assert!(cache.access(A + 8, 0).is_none());
    assert_eq!(cache.pending_fill_count(), 2);
}

#[test]
fn test_trace_iterator_replays_stream() {
    // Build the demo trace, then walk it through the MMU: the iterator
    // must reproduce the same PCs and instructions, steering the taken
    // conditional by the stored direction bit.
    let mut memory = Memory::new(0x4000);
    let beq_target = 0x100;
    let program = [
        (A, encode_add(1, 2, 3)),
        (A + 4, encode_beq(1, 0, beq_target)),
        (A + 4 + beq_target as u64, encode_add(4, 5, 6)),
        (
            A + 4 + beq_target as u64 + 4,
            encode_jal(0, (Y as i64 - (A as i64 + 4 + beq_target as i64 + 4)) as i32),
        ),
    ];
    for &(addr, bits) in &program {
        assert!(memory.write_word(addr as usize, bits));
    }
    let mmu = Mmu::new(memory);

    let mut cache = create_tiny_trace_cache();
    assert!(cache.access(A, 0b1).is_none());
    for &(addr, bits) in &program {
        let next_pc = match Insn::new(bits).bits() {
            bits if bits == encode_beq(1, 0, beq_target) => A + 4 + beq_target as u64,
            bits if bits == program[3].1 => Y,
            _ => increment_pc(addr),
        };
        feed(&mut cache, bits, addr, next_pc);
    }

    let entry = cache.access(A, 0b1).expect("trace must hit");
    let mut iterator = TraceIterator::new(&entry, &mmu);

    for &(addr, bits) in &program {
        assert!(!iterator.end());
        assert_eq!(iterator.next_pc(), addr);
        let insn = iterator.next(true).expect("iterator not exhausted");
        assert_eq!(insn.bits(), bits);
    }
    assert!(iterator.end());
    // Terminal next PC: the JAL's target.
    assert_eq!(iterator.next_pc(), Y);

    iterator.rewind();
    assert_eq!(iterator.next_pc(), A);
    assert!(!iterator.end());
}

#[test]
fn test_iterator_unknown_next_pc_after_indirect_tail() {
    use rvooo_rust::functional_simulator::instructions::encode_jalr;

    let mut memory = Memory::new(0x4000);
    assert!(memory.write_word(A as usize, encode_addi(1, 0, 5)));
    assert!(memory.write_word((A + 4) as usize, encode_jalr(0, 1, 0)));
    let mmu = Mmu::new(memory);

    let mut cache = create_tiny_trace_cache();
    assert!(cache.access(A, 0).is_none());
    feed(&mut cache, encode_addi(1, 0, 5), A, A + 4);
    // The indirect jump terminates the fill.
    feed(&mut cache, encode_jalr(0, 1, 0), A + 4, 0x3000);
    assert_eq!(cache.pending_fill_count(), 0);

    let entry = cache.access(A, 0).expect("trace must hit");
    let mut iterator = TraceIterator::new(&entry, &mmu);
    let _ = iterator.next(true);
    let _ = iterator.next(true);
    assert!(iterator.end());
    assert_eq!(iterator.next_pc(), UNKNOWN_PC_ADDR);
}
