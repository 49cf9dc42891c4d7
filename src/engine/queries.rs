use chrono::{NaiveDate, NaiveDateTime, Timelike};
use ulid::Ulid;

use crate::hours::WorkingHours;
use crate::limits::*;
use crate::model::*;

use super::availability::{fits, free_slots};
use super::{Engine, EngineError};

// Read-side snapshots. Everything here reads a stale view under the read
// lock — UI hints, not commit guarantees. The authoritative occupancy
// checks live in `mutations.rs`, inside the write lock.

impl Engine {
    /// All reservations on one date, ascending by start time.
    pub async fn reservations_on(&self, date: NaiveDate) -> Vec<Reservation> {
        let state = self.state().read().await;
        state
            .reservations_on(date)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Reservations in the inclusive date range, ordered by (date, start).
    /// The admin calendar pages by week; the window cap keeps a bad client
    /// from cloning the whole store.
    pub async fn reservations_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        if to < from {
            return Ok(Vec::new());
        }
        if (to - from).num_days() > MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }
        let state = self.state().read().await;
        let mut rows: Vec<Reservation> = state
            .by_date
            .range(from..=to)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| state.reservations.get(id))
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.date, r.start));
        Ok(rows)
    }

    pub async fn all_reservations(&self) -> Vec<Reservation> {
        let state = self.state().read().await;
        let mut rows: Vec<Reservation> = state.reservations.values().cloned().collect();
        rows.sort_by_key(|r| (r.date, r.start));
        rows
    }

    /// Bookable start times on a date. `now` is the caller's wall clock;
    /// when it falls on the queried date, past slots are dropped.
    pub async fn free_slots_on(
        &self,
        date: NaiveDate,
        step: Minutes,
        now: NaiveDateTime,
    ) -> Result<Vec<Minutes>, EngineError> {
        if !(MIN_SLOT_STEP_MIN..=MAX_SLOT_STEP_MIN).contains(&step) {
            return Err(EngineError::LimitExceeded("slot step out of range"));
        }
        let state = self.state().read().await;
        let on_vacation = state.hours.is_on_vacation(date);
        let day = *state.hours.day_config(date);
        let busy = state.busy_on(date, None);
        let now_minute = (now.date() == date)
            .then(|| (now.time().hour() * 60 + now.time().minute()) as Minutes);
        Ok(free_slots(&day, on_vacation, &busy, step, now_minute))
    }

    /// Availability probe for a concrete (start, duration) pair — the same
    /// test the mutations re-run before committing.
    pub async fn fits_at(&self, date: NaiveDate, start: Minutes, duration: Minutes) -> bool {
        let state = self.state().read().await;
        if state.hours.is_on_vacation(date) {
            return false;
        }
        let day = *state.hours.day_config(date);
        let busy = state.busy_on(date, None);
        fits(start, duration, &busy, &day)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let state = self.state().read().await;
        state.reservations.get(&id).cloned()
    }

    pub async fn working_hours(&self) -> WorkingHours {
        let state = self.state().read().await;
        state.hours.clone()
    }

    pub async fn list_services(&self) -> Vec<Service> {
        let state = self.state().read().await;
        let mut services: Vec<Service> = state.services.values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        services
    }
}
