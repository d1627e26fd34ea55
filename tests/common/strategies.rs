use proptest::prelude::*;

/// One step in an acquire/release sequence against a small pool of job ids
#[derive(Debug, Clone)]
pub enum SlotOp {
    Acquire(u8),
    Release(u8),
    Renew(u8),
}

/// Strategy for job ids drawn from a pool small enough to force collisions
pub fn job_index_strategy() -> impl Strategy<Value = u8> {
    0u8..12
}

pub fn slot_op_strategy() -> impl Strategy<Value = SlotOp> {
    prop_oneof![
        3 => job_index_strategy().prop_map(SlotOp::Acquire),
        3 => job_index_strategy().prop_map(SlotOp::Release),
        1 => job_index_strategy().prop_map(SlotOp::Renew),
    ]
}

pub fn slot_ops_strategy() -> impl Strategy<Value = Vec<SlotOp>> {
    prop::collection::vec(slot_op_strategy(), 1..60)
}
