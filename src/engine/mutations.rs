use chrono::{Days, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::fits;
use super::{Engine, EngineError};

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// UTC midnight of `date + retention_days` — the instant from which the
/// retention sweep may delete the record.
pub(super) fn expire_at(date: NaiveDate, retention_days: u32) -> Ms {
    date.checked_add_days(Days::new(u64::from(retention_days)))
        .unwrap_or(date)
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
}

fn validate_duration(duration: Minutes) -> Result<(), EngineError> {
    if !(MIN_DURATION_MIN..=MAX_DURATION_MIN).contains(&duration) {
        return Err(EngineError::LimitExceeded("duration out of range"));
    }
    Ok(())
}

fn validate_draft(draft: &ReservationDraft) -> Result<(), EngineError> {
    validate_duration(draft.duration_min)?;
    match &draft.kind {
        ReservationKind::User { user_id, .. } if user_id.len() > MAX_SUBJECT_LEN => {
            return Err(EngineError::LimitExceeded("user id too long"));
        }
        ReservationKind::Guest { name, .. } if name.len() > MAX_SUBJECT_LEN => {
            return Err(EngineError::LimitExceeded("guest name too long"));
        }
        _ => {}
    }
    if let Some(color) = &draft.card_color
        && color.len() > MAX_CARD_COLOR_LEN {
            return Err(EngineError::LimitExceeded("card color too long"));
        }
    Ok(())
}

/// What a retention sweep should do.
#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Report matches without deleting anything.
    pub dry_run: bool,
    /// Delete every reservation regardless of age.
    pub delete_all: bool,
    /// Stop after this many deletions.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub matched: usize,
    pub deleted: usize,
}

impl Engine {
    /// Book a slot. The policy check, the slot-index check and the strict
    /// interval-overlap check all run under the state write lock, in that
    /// order — policy violations are domain errors, both occupancy failures
    /// surface as `SlotTaken`.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Ulid, EngineError> {
        validate_draft(&draft)?;

        let mut state = self.state().write().await;
        if state.reservations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if state.hours.is_on_vacation(draft.date) {
            return Err(EngineError::OutOfPolicy("the salon is on vacation"));
        }
        let day = *state.hours.day_config(draft.date);
        if !day.is_open {
            return Err(EngineError::OutOfPolicy("the salon is closed on this day"));
        }
        if !state.hours.is_within(draft.date, draft.start, draft.duration_min) {
            return Err(EngineError::OutOfPolicy("outside working hours"));
        }

        let key = slot_key(draft.date, draft.start);
        if state.slots.contains_key(&key) {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken {
                date: draft.date,
                start: draft.start,
            });
        }
        // The slot index keys start instants only; this is what rejects an
        // interval landing inside another reservation's tail.
        let busy = state.busy_on(draft.date, None);
        if !fits(draft.start, draft.duration_min, &busy, &day) {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken {
                date: draft.date,
                start: draft.start,
            });
        }

        let now = now_ms();
        let reservation = Reservation {
            id,
            kind: draft.kind,
            date: draft.date,
            start: draft.start,
            end: draft.start + draft.duration_min,
            duration_min: draft.duration_min,
            card_color: draft.card_color,
            expire_at: expire_at(draft.date, self.retention_days()),
            created_at: now,
        };
        let date = reservation.date;
        let event = Event::ReservationBooked { reservation };
        self.persist_and_apply(&mut state, &event, &[date]).await?;
        metrics::counter!(crate::observability::RESERVATIONS_BOOKED_TOTAL).increment(1);
        Ok(id)
    }

    /// Relocate a reservation. When the slot key does not change, only the
    /// time fields are rewritten; otherwise the new slot entry is created,
    /// the old one deleted and the record updated as one atomic unit.
    pub async fn move_reservation(
        &self,
        id: Ulid,
        next_date: NaiveDate,
        next_start: Minutes,
        next_duration: Option<Minutes>,
    ) -> Result<(), EngineError> {
        if let Some(duration) = next_duration {
            validate_duration(duration)?;
        }

        let mut state = self.state().write().await;
        let current = state
            .reservations
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let duration = next_duration.unwrap_or(current.duration_min);

        if state.hours.is_on_vacation(next_date) {
            return Err(EngineError::OutOfPolicy("the salon is on vacation"));
        }
        let day = *state.hours.day_config(next_date);
        if !state.hours.is_within(next_date, next_start, duration) {
            return Err(EngineError::OutOfPolicy("outside working hours"));
        }

        let new_key = slot_key(next_date, next_start);
        if new_key != current.slot_key() && state.slots.contains_key(&new_key) {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken {
                date: next_date,
                start: next_start,
            });
        }
        let busy = state.busy_on(next_date, Some(id));
        if !fits(next_start, duration, &busy, &day) {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken {
                date: next_date,
                start: next_start,
            });
        }

        let event = Event::ReservationMoved {
            id,
            date: next_date,
            start: next_start,
            end: next_start + duration,
            duration_min: duration,
            expire_at: expire_at(next_date, self.retention_days()),
        };
        self.persist_and_apply(&mut state, &event, &[current.date, next_date])
            .await
    }

    /// Delete a reservation and its slot entry. Physical and terminal —
    /// there is no tombstone state.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state().write().await;
        let current = state
            .reservations
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::ReservationCancelled { id };
        self.persist_and_apply(&mut state, &event, &[current.date])
            .await?;
        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        Ok(())
    }

    /// Delete reservations whose retention window has passed (or all of
    /// them, under `delete_all`), in bounded batches so no single write-lock
    /// hold grows with the backlog. Safe to re-run at any time.
    pub async fn sweep_expired(
        &self,
        now: Ms,
        opts: &SweepOptions,
    ) -> Result<SweepReport, EngineError> {
        let mut matched: Vec<(Ulid, NaiveDate)> = {
            let state = self.state().read().await;
            state
                .reservations
                .values()
                .filter(|r| opts.delete_all || r.expire_at <= now)
                .map(|r| (r.id, r.date))
                .collect()
        };
        matched.sort();
        if let Some(limit) = opts.limit {
            matched.truncate(limit);
        }

        let mut report = SweepReport {
            matched: matched.len(),
            deleted: 0,
        };
        if opts.dry_run {
            return Ok(report);
        }

        for batch in matched.chunks(SWEEP_BATCH) {
            let mut state = self.state().write().await;
            for (id, date) in batch {
                // May have been cancelled since the scan.
                if !state.reservations.contains_key(id) {
                    continue;
                }
                let event = Event::ReservationCancelled { id: *id };
                self.persist_and_apply(&mut state, &event, &[*date]).await?;
                report.deleted += 1;
            }
        }
        if report.deleted > 0 {
            metrics::counter!(crate::observability::SWEEP_DELETED_TOTAL)
                .increment(report.deleted as u64);
        }
        Ok(report)
    }

    pub async fn add_service(&self, service: Service) -> Result<(), EngineError> {
        if service.name.len() > MAX_SERVICE_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        validate_duration(service.duration_min)?;

        let mut state = self.state().write().await;
        if state.services.contains_key(&service.id) {
            return Err(EngineError::AlreadyExists(service.id));
        }
        let event = Event::ServiceAdded { service };
        self.persist_and_apply(&mut state, &event, &[]).await
    }

    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state().write().await;
        if !state.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ServiceRemoved { id };
        self.persist_and_apply(&mut state, &event, &[]).await
    }

    /// Replace the working-hours configuration. Past-looking availability
    /// queries are reinterpreted under the new schedule; stored reservations
    /// keep their times.
    pub async fn update_working_hours(
        &self,
        hours: crate::hours::WorkingHours,
    ) -> Result<(), EngineError> {
        let mut state = self.state().write().await;
        let event = Event::WorkingHoursUpdated { hours };
        self.persist_and_apply(&mut state, &event, &[]).await
    }
}
