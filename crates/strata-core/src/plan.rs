//! The interval planner: which stored entries reconstruct a range.
//!
//! Aggregate entries exist at every index that is a multiple of a power of
//! the granularity `g`, each covering the power-of-g-sized interval ending
//! there. [`span_keys`] greedily scans backward from the upper index,
//! consuming at each step the largest aggregate that both ends on the
//! cursor and fits in the remaining distance, so a plan is O(log_g n) keys.
//!
//! The planner is pure: it never consults the store. Entries it names that
//! turn out to be absent (compacted away or canonically empty) fold as
//! no-ops at query time.

use crate::key::Key;

/// Plan the ordered entry keys whose deltas, folded left to right onto the
/// state at `from`, reconstruct the state at `to`.
///
/// Requires `from <= to` and `granularity >= 2`; `from == to` plans no
/// keys. Keys are discovered newest-first and returned oldest-first.
pub fn span_keys(from: u64, to: u64, granularity: u64) -> Vec<Key> {
    debug_assert!(from <= to);
    debug_assert!(granularity >= 2);

    let mut keys = Vec::new();
    let mut idx = to;

    while idx > from {
        // Off the granularity grid only the raw entry ends here.
        if idx % granularity != 0 {
            keys.push(Key::entry(idx, 1));
            idx -= 1;
            continue;
        }

        let span = idx - from;
        let mut scale = largest_power_not_above(granularity, span);

        // Fall back to finer scales until one ends on the cursor.
        while scale > 1 && idx % scale != 0 {
            scale /= granularity;
        }

        keys.push(Key::entry(idx, scale));
        idx -= scale;
    }

    keys.reverse();
    keys
}

/// Largest power of `base` that is `<= limit` (at least 1).
fn largest_power_not_above(base: u64, limit: u64) -> u64 {
    let mut power = 1u64;
    loop {
        match power.checked_mul(base) {
            Some(next) if next <= limit => power = next,
            _ => return power,
        }
    }
}
