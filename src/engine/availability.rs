use crate::hours::{DayConfig, candidate_slots};
use crate::model::Minutes;

// ── Availability ─────────────────────────────────────────────────
//
// Two different occupancy tests on purpose. `free_slots` filters candidate
// start instants against reservation ranges — a cheap pre-filter for the
// booking UI, computed from a stale snapshot. `fits` is the authoritative
// range/range overlap test for an actual (start, duration) pair; mutations
// re-run it inside the commit critical section, so `free_slots` output is
// never treated as a commit guarantee.

/// Bookable start instants of a day: every grid slot whose start is not
/// inside any busy interval. `busy` holds half-open `[start, end)` pairs.
/// When the queried day is today, pass the current minute-of-day as
/// `now_minute`; slots at or before it are dropped.
pub fn free_slots(
    day: &DayConfig,
    on_vacation: bool,
    busy: &[(Minutes, Minutes)],
    step: Minutes,
    now_minute: Option<Minutes>,
) -> Vec<Minutes> {
    if on_vacation || !day.is_open {
        return Vec::new();
    }
    candidate_slots(day, step)
        .into_iter()
        .filter(|&slot| !busy.iter().any(|&(start, end)| slot >= start && slot < end))
        .filter(|&slot| now_minute.is_none_or(|now| slot > now))
        .collect()
}

/// Whether `[start, start + duration)` fits the day window without
/// intersecting any busy interval. This is the check that guards true
/// overlap safety for durations longer than one grid step.
pub fn fits(
    start: Minutes,
    duration: Minutes,
    busy: &[(Minutes, Minutes)],
    day: &DayConfig,
) -> bool {
    if !day.is_open || duration == 0 {
        return false;
    }
    let end = start + duration;
    if start < day.open || end > day.close {
        return false;
    }
    !busy
        .iter()
        .any(|&(busy_start, busy_end)| start < busy_end && busy_start < end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(open: Minutes, close: Minutes) -> DayConfig {
        DayConfig {
            is_open: true,
            open,
            close,
        }
    }

    // ── free_slots ────────────────────────────────────────

    #[test]
    fn free_slots_exactness() {
        // Open 09:00-12:00, step 30, one reservation 10:00-11:00.
        let day = open(540, 720);
        let slots = free_slots(&day, false, &[(600, 660)], 30, None);
        assert_eq!(slots, vec![540, 570, 660, 690]);
    }

    #[test]
    fn free_slots_empty_when_closed() {
        let day = DayConfig {
            is_open: false,
            open: 540,
            close: 720,
        };
        assert!(free_slots(&day, false, &[], 30, None).is_empty());
    }

    #[test]
    fn free_slots_empty_on_vacation() {
        let day = open(540, 720);
        assert!(free_slots(&day, true, &[(600, 660)], 30, None).is_empty());
        assert!(free_slots(&day, true, &[], 30, None).is_empty());
    }

    #[test]
    fn free_slots_excludes_past_times_today() {
        // Now is 14:05 — nothing at or before 14:00 survives.
        let day = open(540, 1140);
        let slots = free_slots(&day, false, &[], 30, Some(845));
        assert!(slots.iter().all(|&s| s > 845));
        assert_eq!(slots.first(), Some(&870)); // 14:30
    }

    #[test]
    fn free_slots_start_instant_test_only() {
        // A 30-minute grid slot starting inside a busy range is excluded,
        // but one starting just before it is NOT — start instants only.
        let day = open(540, 720);
        let busy = [(585, 615)]; // 09:45-10:15, off-grid
        let slots = free_slots(&day, false, &busy, 30, None);
        assert!(slots.contains(&570)); // 09:30 starts free, even though 09:30+30 overlaps
        assert!(!slots.contains(&600)); // 10:00 starts inside
        assert!(slots.contains(&630)); // 10:30 starts after
    }

    #[test]
    fn free_slots_idempotent_and_sorted() {
        let day = open(540, 720);
        let busy = [(600, 660)];
        let a = free_slots(&day, false, &busy, 30, None);
        let b = free_slots(&day, false, &busy, 30, None);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn free_slots_fully_booked_day() {
        let day = open(540, 660);
        let busy = [(540, 660)];
        assert!(free_slots(&day, false, &busy, 30, None).is_empty());
    }

    // ── fits ──────────────────────────────────────────────

    #[test]
    fn fits_boundary_at_close() {
        let day = open(540, 720); // close 12:00
        assert!(fits(690, 30, &[], &day)); // 11:30+30 ends exactly at close
        assert!(!fits(691, 30, &[], &day)); // 11:31+30 spills over
    }

    #[test]
    fn fits_boundary_at_open() {
        let day = open(540, 720);
        assert!(fits(540, 30, &[], &day));
        assert!(!fits(539, 30, &[], &day));
    }

    #[test]
    fn fits_rejects_overlap_both_directions() {
        let day = open(540, 1140);
        let busy = [(600, 660)]; // 10:00-11:00
        assert!(!fits(630, 30, &busy, &day)); // starts inside
        assert!(!fits(570, 60, &busy, &day)); // ends inside
        assert!(!fits(570, 120, &busy, &day)); // spans it entirely
        assert!(fits(660, 30, &busy, &day)); // adjacent after
        assert!(fits(570, 30, &busy, &day)); // adjacent before
    }

    #[test]
    fn fits_catches_sub_grid_tail_overlap() {
        // The slot index alone would admit 10:30 next to a 10:00-11:00
        // reservation; the range test must not.
        let day = open(540, 1140);
        let busy = [(600, 660)];
        assert!(!fits(630, 30, &busy, &day));
    }

    #[test]
    fn fits_closed_day_or_zero_duration() {
        let closed = DayConfig {
            is_open: false,
            open: 540,
            close: 1140,
        };
        assert!(!fits(600, 30, &[], &closed));
        let day = open(540, 1140);
        assert!(!fits(600, 0, &[], &day));
    }
}
