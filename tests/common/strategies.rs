use proptest::prelude::*;

/// Strategy for item list lengths, including empty lists
pub fn item_count_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(0usize), Just(1usize), 1usize..=1500]
}

/// Strategy for per-operation batch limits
pub fn batch_limit_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(1usize), Just(20usize), Just(100usize), Just(500usize), 1usize..=600]
}

/// Strategy for target weights accepted by the cloud
pub fn valid_weight_strategy() -> impl Strategy<Value = u32> {
    0u32..=100
}

/// Strategy for weights the cloud rejects
pub fn invalid_weight_strategy() -> impl Strategy<Value = u32> {
    101u32..=10_000
}

/// Strategy for target group layouts: number of targets per group
pub fn group_sizes_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=250, 1..5)
}
