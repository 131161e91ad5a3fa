// tests/branch_predictor.rs
use rvooo_rust::functional_simulator::instructions::{
    encode_beq, encode_jal, encode_jalr, increment_pc, Insn,
};
use rvooo_rust::timing_simulator::branch_predictor::{
    gen_next_history, MultiBranchPredictor, PredictAutomaton,
};
use rvooo_rust::timing_simulator::config::PredictorConfig;

/// Test suite for the multiple-branch predictor

fn create_predictor(k: usize) -> MultiBranchPredictor {
    MultiBranchPredictor::new(
        &PredictorConfig::new()
            .with_num_multi_pred(k)
            .with_cti_queue_size(64),
    )
}

fn branch_at(pc: u64, offset: i32) -> (u64, Insn, u64) {
    let insn = Insn::new(encode_beq(1, 2, offset));
    (pc, insn, pc.wrapping_add(offset as u64))
}

#[test]
fn test_global_history_shift() {
    // Right-shift insertion at bit 15, 16-bit mask.
    assert_eq!(gen_next_history(0, true), 0x8000);
    assert_eq!(gen_next_history(0x8000, false), 0x4000);
    assert_eq!(gen_next_history(0x8000, true), 0xC000);
    assert_eq!(gen_next_history(0xFFFF, false), 0x7FFF);

    let mut history = 0;
    for _ in 0..16 {
        history = gen_next_history(history, true);
    }
    assert_eq!(history, 0xFFFF);
}

#[test]
fn test_predict_automaton_hysteresis() {
    let mut automaton = PredictAutomaton::default();
    assert_eq!(automaton.pred, 0);

    // One contrary outcome builds hysteresis pressure but does not flip.
    automaton.update(1);
    assert_eq!(automaton.pred, 0);
    // The second contrary outcome flips the prediction.
    automaton.update(1);
    assert_eq!(automaton.pred, 1);
    // Agreement saturates hysteresis; one disagreement then cannot flip.
    automaton.update(1);
    automaton.update(0);
    assert_eq!(automaton.pred, 1);
}

#[test]
fn test_scalar_branch_prediction_cold_path() {
    // The scalar get_pred path serves conditional branches from the PHT.
    // A cold PHT predicts not-taken; the taken outcome is recovered via
    // fix_pred and trained at verify.
    let mut predictor = create_predictor(3);
    let (pc, insn, target) = branch_at(0x1000, 0x100);

    let pred = predictor.get_pred(pc, insn, target);
    assert_eq!(pred.next_pc, increment_pc(pc), "cold PHT predicts not-taken");
    assert_eq!(predictor.pending_predictions(), 1);

    predictor.fix_pred(pred.tag, target);
    assert_eq!(
        predictor.speculative_history(),
        gen_next_history(0, true),
        "history replays from the checkpoint with the corrected outcome"
    );

    predictor.verify_pred(pred.tag, target, false);
    assert_eq!(predictor.committed_history(), gen_next_history(0, true));
    assert_eq!(predictor.stats.num_pred, 1);
    assert_eq!(predictor.stats.num_cond_pred, 1);
    assert_eq!(predictor.stats.num_cond_miss, 1);
}

#[test]
fn test_scalar_branch_trains_toward_taken() {
    // Resolving the same scalar-path branch as taken over and over must
    // flip the PHT row once the global history settles.
    let mut predictor = create_predictor(3);
    let (pc, insn, target) = branch_at(0x1000, 0x100);

    let mut predicted_taken = false;
    for _ in 0..32 {
        let pred = predictor.get_pred(pc, insn, target);
        predicted_taken = pred.next_pc == target;
        if !predicted_taken {
            predictor.fix_pred(pred.tag, target);
        }
        predictor.verify_pred(pred.tag, target, false);
    }

    assert!(
        predicted_taken,
        "an always-taken branch must train the PHT toward taken"
    );
    assert_eq!(predictor.stats.num_cond_pred, 32);
}

#[test]
fn test_multi_prediction_exhaustion() {
    // k = 3: a bundle with four conditional branches consumes three
    // prediction bits; the fourth gets pred_valid = false and next_pc
    // equal to its own PC.
    let mut predictor = create_predictor(3);
    let vector = predictor.prepare_multi_pred_future_buf(0x1000);
    assert_eq!(vector, 0, "untrained tables predict not-taken");

    for i in 0..3 {
        let (pc, insn, target) = branch_at(0x1000 + i * 4, 0x100);
        let pred = predictor.get_multi_pred_for_branch(pc, insn, target);
        assert!(pred.valid, "bit {} should be available", i);
        assert_eq!(pred.next_pc, increment_pc(pc), "untrained: not taken");
        predictor.multi_pred_notify_branch();
    }

    let (pc, insn, target) = branch_at(0x100C, 0x100);
    let pred = predictor.get_multi_pred_for_branch(pc, insn, target);
    assert!(!pred.valid);
    assert_eq!(pred.next_pc, pc);
    // The failed prediction allocated nothing.
    assert_eq!(predictor.pending_predictions(), 3);
}

#[test]
fn test_prepare_refreshes_buffer() {
    let mut predictor = create_predictor(2);
    let _ = predictor.prepare_multi_pred_future_buf(0x1000);
    let (pc, insn, target) = branch_at(0x1000, 0x40);
    assert!(predictor.get_multi_pred_for_branch(pc, insn, target).valid);
    predictor.multi_pred_notify_branch();
    assert!(predictor.get_multi_pred_for_branch(pc + 4, insn, target).valid);
    predictor.multi_pred_notify_branch();
    assert!(!predictor.get_multi_pred_for_branch(pc + 8, insn, target).valid);

    // A fresh fetch cycle re-arms the buffer.
    let _ = predictor.prepare_multi_pred_future_buf(0x2000);
    assert!(predictor.get_multi_pred_for_branch(pc + 8, insn, target).valid);
}

#[test]
fn test_multi_prediction_trains_toward_taken() {
    // Retiring the same branch as taken repeatedly must eventually flip the
    // consumed bit of the multi-prediction row.
    let mut predictor = create_predictor(3);
    let (pc, insn, target) = branch_at(0x1000, 0x100);

    for _ in 0..4 {
        let _ = predictor.prepare_multi_pred_future_buf(pc);
        let pred = predictor.get_multi_pred_for_branch(pc, insn, target);
        assert!(pred.valid);
        predictor.multi_pred_notify_branch();
        // Architectural outcome: taken.
        predictor.verify_pred(pred.tag, target, false);
    }

    let vector = predictor.prepare_multi_pred_future_buf(pc);
    assert_eq!(vector & 1, 1, "bit 0 should now predict taken");
}

#[test]
fn test_fix_pred_rewinds_history_and_drops_younger() {
    let mut predictor = create_predictor(3);
    let _ = predictor.prepare_multi_pred_future_buf(0x1000);

    let (pc0, insn, target0) = branch_at(0x1000, 0x100);
    let pred0 = predictor.get_multi_pred_for_branch(pc0, insn, target0);
    predictor.multi_pred_notify_branch();
    let history_after_first = predictor.speculative_history();

    let (pc1, _, target1) = branch_at(0x1004, 0x100);
    let pred1 = predictor.get_multi_pred_for_branch(pc1, insn, target1);
    predictor.multi_pred_notify_branch();
    assert_eq!(predictor.pending_predictions(), 2);
    let _ = pred1;

    // The first branch was actually taken: history is replayed from its
    // checkpoint with the corrected outcome, the younger entry disappears.
    predictor.fix_pred(pred0.tag, target0);
    assert_eq!(predictor.pending_predictions(), 1);
    assert_ne!(predictor.speculative_history(), history_after_first);
    assert_eq!(
        predictor.speculative_history(),
        gen_next_history(0, true),
        "replay = checkpointed history plus the corrected outcome"
    );

    // Retire trains with the corrected outcome.
    predictor.verify_pred(pred0.tag, target0, false);
    assert_eq!(predictor.pending_predictions(), 0);
    assert_eq!(predictor.committed_history(), gen_next_history(0, true));
}

#[test]
fn test_jal_and_return_prediction() {
    let mut predictor = create_predictor(3);

    // A call pushes the return address.
    let call_pc = 0x1000;
    let call = Insn::new(encode_jal(1, 0x200));
    let pred = predictor.get_pred(call_pc, call, call_pc + 0x200);
    assert_eq!(pred.next_pc, call_pc + 0x200);

    // The matching return pops it.
    let ret_pc = 0x1200;
    let ret = Insn::new(encode_jalr(0, 1, 0));
    let pred = predictor.get_pred(ret_pc, ret, 0);
    assert_eq!(pred.next_pc, increment_pc(call_pc));

    predictor.verify_pred(0, call_pc + 0x200, false);
}

#[test]
fn test_btb_learns_indirect_target() {
    let mut predictor = create_predictor(3);
    let jalr_pc = 0x1000;
    // Indirect jump through x5: not a return, so the BTB is consulted.
    let jalr = Insn::new(encode_jalr(0, 5, 0));
    let actual_target = 0x3000;

    // Cold BTB: predicted fall-through, actually taken elsewhere.
    let pred = predictor.get_pred(jalr_pc, jalr, 0);
    assert_eq!(pred.next_pc, increment_pc(jalr_pc));
    predictor.fix_pred(pred.tag, actual_target);
    predictor.verify_pred(pred.tag, actual_target, false);

    // Trained: the BTB now supplies the target.
    let pred = predictor.get_pred(jalr_pc, jalr, 0);
    assert_eq!(pred.next_pc, actual_target);
    predictor.verify_pred(pred.tag, actual_target, false);
}

#[test]
fn test_verify_in_order_and_flush() {
    let mut predictor = create_predictor(3);
    let _ = predictor.prepare_multi_pred_future_buf(0x1000);

    let (pc0, insn, target0) = branch_at(0x1000, 0x80);
    let pred0 = predictor.get_multi_pred_for_branch(pc0, insn, target0);
    predictor.multi_pred_notify_branch();
    let (pc1, _, target1) = branch_at(0x1004, 0x80);
    let pred1 = predictor.get_multi_pred_for_branch(pc1, insn, target1);
    predictor.multi_pred_notify_branch();

    predictor.verify_pred(pred0.tag, increment_pc(pc0), false);
    predictor.verify_pred(pred1.tag, increment_pc(pc1), false);
    assert_eq!(predictor.pending_predictions(), 0);

    // Flush drops whatever is in flight and re-seats speculative state.
    let _ = predictor.prepare_multi_pred_future_buf(0x2000);
    let (pc2, _, target2) = branch_at(0x2000, 0x80);
    let _ = predictor.get_multi_pred_for_branch(pc2, insn, target2);
    predictor.multi_pred_notify_branch();
    assert_eq!(predictor.pending_predictions(), 1);
    predictor.flush();
    assert_eq!(predictor.pending_predictions(), 0);
    assert_eq!(predictor.speculative_history(), predictor.committed_history());
}

#[test]
fn test_stats_accumulate() {
    let mut predictor = create_predictor(3);
    let _ = predictor.prepare_multi_pred_future_buf(0x1000);
    let (pc, insn, target) = branch_at(0x1000, 0x40);
    let pred = predictor.get_multi_pred_for_branch(pc, insn, target);
    predictor.multi_pred_notify_branch();
    predictor.verify_pred(pred.tag, increment_pc(pc), false);

    assert_eq!(predictor.stats.num_pred, 1);
    assert_eq!(predictor.stats.num_cond_pred, 1);
    assert_eq!(predictor.stats.num_miss, 0);
}
