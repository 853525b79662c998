use std::hash::BuildHasher;

/// Hashes `value` with a fixed-seed hasher. Results are stable from run to run, which
/// keeps everything derived from these hashes deterministic.
pub(crate) fn hash_of(value: impl std::hash::Hash) -> u64 {
    foldhash::fast::FixedState::default().hash_one(value)
}
