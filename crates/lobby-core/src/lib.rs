//! Foundational low-level utilities shared across Lobby crates.
//!
//! Provides unix-millisecond clock helpers, monotonic timestamp advance, and
//! the total order over possibly-absent instants used by interaction and
//! message bookkeeping.

pub mod time_utils;

pub use time_utils::{
    advance_timestamp_ms, compare_optional_instants, current_unix_timestamp,
    current_unix_timestamp_ms,
};

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;

    #[test]
    fn time_utils_round_trip_bounds() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn unit_advance_timestamp_never_moves_backward() {
        assert_eq!(advance_timestamp_ms(None, 50), 50);
        assert_eq!(advance_timestamp_ms(Some(100), 50), 100);
        assert_eq!(advance_timestamp_ms(Some(100), 150), 150);
        assert_eq!(advance_timestamp_ms(Some(100), 100), 100);
    }

    #[test]
    fn unit_compare_optional_instants_sorts_absent_first() {
        assert_eq!(compare_optional_instants(None, None), Ordering::Equal);
        assert_eq!(compare_optional_instants(None, Some(0)), Ordering::Less);
        assert_eq!(compare_optional_instants(Some(0), None), Ordering::Greater);
        assert_eq!(
            compare_optional_instants(Some(10), Some(20)),
            Ordering::Less
        );
    }
}
