//! Proportional worker-pool scaling with hysteresis (spec §4.5).

/// Compute the next worker count for one tick.
///
/// Purely proportional with a ±½ `scale_factor` hysteresis band: at most one
/// worker is added or removed per call, and the result never leaves
/// `[floor, max_workers]`.
pub fn next_worker_count(workers: u32, depth: u64, scale_factor: u32, floor: u32, max_workers: u32) -> u32 {
    let upper = workers as u64 * scale_factor as u64 + (scale_factor / 2) as u64;
    let lower = (workers as u64 * scale_factor as u64).saturating_sub((scale_factor / 2) as u64);

    if depth > upper && workers < max_workers {
        workers + 1
    } else if depth < lower && workers > floor {
        workers - 1
    } else {
        workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_up_above_upper_band() {
        assert_eq!(next_worker_count(3, 400, 100, 3, 6), 4);
    }

    #[test]
    fn scales_down_below_lower_band() {
        assert_eq!(next_worker_count(5, 100, 100, 3, 6), 4);
    }

    #[test]
    fn stays_put_inside_band() {
        assert_eq!(next_worker_count(3, 320, 100, 3, 6), 3);
    }

    #[test]
    fn never_exceeds_max_workers() {
        assert_eq!(next_worker_count(6, 10_000, 100, 3, 6), 6);
    }

    #[test]
    fn never_drops_below_floor() {
        assert_eq!(next_worker_count(3, 0, 100, 3, 6), 3);
    }

    #[test]
    fn s6_scales_up_one_step_at_a_time() {
        let (floor, max, sf) = (3, 6, 100);
        let mut workers = floor;
        for expected in [4, 5, 6, 6] {
            workers = next_worker_count(workers, 400, sf, floor, max);
            assert_eq!(workers, expected);
        }
    }

    #[test]
    fn s6_scales_down_one_step_at_a_time() {
        let (floor, max, sf) = (3, 6, 100);
        let mut workers = max;
        for expected in [5, 4, 3, 3] {
            workers = next_worker_count(workers, 100, sf, floor, max);
            assert_eq!(workers, expected);
        }
    }
}
