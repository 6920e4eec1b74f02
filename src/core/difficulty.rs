use log::info;

// Retarget constants
pub const RETARGET_INTERVAL: u64 = 10; // Adjust every 10 blocks
pub const TARGET_BLOCK_TIME_MS: i64 = 10_000; // 10 seconds per block
pub const INITIAL_DIFFICULTY: u32 = 2;
pub const MIN_DIFFICULTY: u32 = 1;
pub const MAX_DIFFICULTY: u32 = 10;

/// Difficulty retargeting over fixed windows of [`RETARGET_INTERVAL`] blocks.
pub struct DifficultyAdjustment;

impl DifficultyAdjustment {
    /// The retarget fires exactly when a block lands on a nonzero multiple
    /// of the interval.
    pub fn should_retarget(index: u64) -> bool {
        index > 0 && index % RETARGET_INTERVAL == 0
    }

    /// Compare the actual time span of the last window against the
    /// expected span. Twice too fast: one step up. Twice too slow: one
    /// step down, never below the floor.
    pub fn next_difficulty(current: u32, window_start_ts: i64, window_end_ts: i64) -> u32 {
        let actual = window_end_ts - window_start_ts;
        let expected = TARGET_BLOCK_TIME_MS * RETARGET_INTERVAL as i64;

        let next = if actual < expected / 2 {
            (current + 1).min(MAX_DIFFICULTY)
        } else if actual > expected * 2 {
            current.saturating_sub(1).max(MIN_DIFFICULTY)
        } else {
            current
        };

        if next != current {
            info!(
                "Difficulty retarget: {current} -> {next} (actual: {actual}ms, expected: {expected}ms)"
            );
        }
        next
    }

    pub fn clamp(difficulty: u32) -> u32 {
        difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retarget_fires_on_interval_multiples_only() {
        assert!(!DifficultyAdjustment::should_retarget(0));
        assert!(!DifficultyAdjustment::should_retarget(1));
        assert!(!DifficultyAdjustment::should_retarget(9));
        assert!(DifficultyAdjustment::should_retarget(10));
        assert!(!DifficultyAdjustment::should_retarget(11));
        assert!(DifficultyAdjustment::should_retarget(20));
    }

    #[test]
    fn test_fast_window_increments() {
        // 10 blocks in 49s against an expected 100s
        assert_eq!(DifficultyAdjustment::next_difficulty(2, 0, 49_000), 3);
    }

    #[test]
    fn test_slow_window_decrements() {
        // 10 blocks in 201s against an expected 100s
        assert_eq!(DifficultyAdjustment::next_difficulty(2, 0, 201_000), 1);
    }

    #[test]
    fn test_window_within_band_is_unchanged() {
        assert_eq!(DifficultyAdjustment::next_difficulty(2, 0, 100_000), 2);
        // Boundaries are exclusive in both directions
        assert_eq!(DifficultyAdjustment::next_difficulty(2, 0, 50_000), 2);
        assert_eq!(DifficultyAdjustment::next_difficulty(2, 0, 200_000), 2);
    }

    #[test]
    fn test_floor_and_cap() {
        assert_eq!(
            DifficultyAdjustment::next_difficulty(MIN_DIFFICULTY, 0, 500_000),
            MIN_DIFFICULTY
        );
        assert_eq!(
            DifficultyAdjustment::next_difficulty(MAX_DIFFICULTY, 0, 1_000),
            MAX_DIFFICULTY
        );
    }
}
