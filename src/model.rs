use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::hours::{WorkingHours, format_hhmm};

/// Unix milliseconds.
pub type Ms = i64;

/// Minutes since midnight, day-local.
pub type Minutes = u16;

/// Composite key of the slot index: `YYYY-MM-DD_HH:MM`.
///
/// The key covers only the start instant of a reservation, not its full
/// interval. Interval safety for durations longer than one grid step is the
/// job of the overlap check that runs in the same critical section.
pub fn slot_key(date: NaiveDate, start: Minutes) -> String {
    format!("{}_{}", date.format("%Y-%m-%d"), format_hhmm(start))
}

/// Who a reservation is for. The three shapes carry different payloads, so
/// they are variants rather than a bag of optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationKind {
    /// A registered customer, identified by an opaque id issued elsewhere.
    User {
        user_id: String,
        service_id: Option<Ulid>,
    },
    /// A walk-in booked by the admin under a free-text name.
    Guest {
        name: String,
        service_id: Option<Ulid>,
    },
    /// The barber blocks the slot for themselves.
    Break,
}

impl ReservationKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReservationKind::User { .. } => "user",
            ReservationKind::Guest { .. } => "guest",
            ReservationKind::Break => "break",
        }
    }

    pub fn subject(&self) -> Option<&str> {
        match self {
            ReservationKind::User { user_id, .. } => Some(user_id),
            ReservationKind::Guest { name, .. } => Some(name),
            ReservationKind::Break => None,
        }
    }

    pub fn service_id(&self) -> Option<Ulid> {
        match self {
            ReservationKind::User { service_id, .. }
            | ReservationKind::Guest { service_id, .. } => *service_id,
            ReservationKind::Break => None,
        }
    }
}

/// One booked interval `[start, end)` on a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub kind: ReservationKind,
    pub date: NaiveDate,
    pub start: Minutes,
    /// Always `start + duration_min`; rewritten together with them on move.
    pub end: Minutes,
    pub duration_min: Minutes,
    /// Display only, never interpreted.
    pub card_color: Option<String>,
    /// When the retention sweep may delete this record.
    pub expire_at: Ms,
    pub created_at: Ms,
}

impl Reservation {
    pub fn slot_key(&self) -> String {
        slot_key(self.date, self.start)
    }

    /// Half-open interval overlap against `[start, end)`.
    pub fn overlaps(&self, start: Minutes, end: Minutes) -> bool {
        self.start < end && start < self.end
    }
}

/// Caller-supplied fields of a new reservation; the engine fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub kind: ReservationKind,
    pub date: NaiveDate,
    pub start: Minutes,
    pub duration_min: Minutes,
    pub card_color: Option<String>,
}

/// Uniqueness marker for one occupied `(date, start)` instant. Exists iff an
/// active reservation starts exactly there; created and deleted only inside
/// the same commit section as its reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub date: NaiveDate,
    pub start: Minutes,
    pub reservation_id: Ulid,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub price: u32,
    pub duration_min: Minutes,
}

/// The WAL record format — flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationBooked {
        reservation: Reservation,
    },
    ReservationMoved {
        id: Ulid,
        date: NaiveDate,
        start: Minutes,
        end: Minutes,
        duration_min: Minutes,
        expire_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
    },
    ServiceAdded {
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
    },
    WorkingHoursUpdated {
        hours: WorkingHours,
    },
}

/// The authoritative document set of one salon: reservations, the slot
/// index keyed by `(date, start)`, a per-date listing index, services and
/// the working-hours configuration. Mutated only through `Event`s so that
/// live application and WAL replay share one code path.
#[derive(Debug, Clone, Default)]
pub struct SalonState {
    pub reservations: HashMap<Ulid, Reservation>,
    pub slots: HashMap<String, SlotEntry>,
    pub by_date: BTreeMap<NaiveDate, Vec<Ulid>>,
    pub services: HashMap<Ulid, Service>,
    pub hours: WorkingHours,
}

impl SalonState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reservation together with its slot entry and date index row.
    fn insert_reservation(&mut self, reservation: Reservation) {
        self.slots.insert(
            reservation.slot_key(),
            SlotEntry {
                date: reservation.date,
                start: reservation.start,
                reservation_id: reservation.id,
                created_at: reservation.created_at,
            },
        );
        self.by_date
            .entry(reservation.date)
            .or_default()
            .push(reservation.id);
        self.reservations.insert(reservation.id, reservation);
    }

    /// Remove a reservation, its slot entry and its date index row.
    fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let reservation = self.reservations.remove(&id)?;
        self.slots.remove(&reservation.slot_key());
        if let Some(ids) = self.by_date.get_mut(&reservation.date) {
            ids.retain(|r| *r != id);
            if ids.is_empty() {
                self.by_date.remove(&reservation.date);
            }
        }
        Some(reservation)
    }

    /// All reservations on a date, ascending by start time.
    pub fn reservations_on(&self, date: NaiveDate) -> Vec<&Reservation> {
        let mut on_date: Vec<&Reservation> = self
            .by_date
            .get(&date)
            .into_iter()
            .flatten()
            .filter_map(|id| self.reservations.get(id))
            .collect();
        on_date.sort_by_key(|r| r.start);
        on_date
    }

    /// Busy `[start, end)` intervals on a date, optionally excluding one
    /// reservation (the one being moved), ascending by start.
    pub fn busy_on(&self, date: NaiveDate, exclude: Option<Ulid>) -> Vec<(Minutes, Minutes)> {
        self.reservations_on(date)
            .into_iter()
            .filter(|r| exclude != Some(r.id))
            .map(|r| (r.start, r.end))
            .collect()
    }

    /// Apply one committed event. Unknown ids are ignored: replay of a WAL
    /// whose tail was compacted away must not fail.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ReservationBooked { reservation } => {
                self.insert_reservation(reservation.clone());
            }
            Event::ReservationMoved {
                id,
                date,
                start,
                end,
                duration_min,
                expire_at,
            } => {
                if let Some(mut reservation) = self.remove_reservation(*id) {
                    reservation.date = *date;
                    reservation.start = *start;
                    reservation.end = *end;
                    reservation.duration_min = *duration_min;
                    reservation.expire_at = *expire_at;
                    self.insert_reservation(reservation);
                }
            }
            Event::ReservationCancelled { id } => {
                self.remove_reservation(*id);
            }
            Event::ServiceAdded { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceRemoved { id } => {
                self.services.remove(id);
            }
            Event::WorkingHoursUpdated { hours } => {
                self.hours = hours.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn booked(date_s: &str, start: Minutes, duration: Minutes) -> Reservation {
        Reservation {
            id: Ulid::new(),
            kind: ReservationKind::Break,
            date: date(date_s),
            start,
            end: start + duration,
            duration_min: duration,
            card_color: None,
            expire_at: 0,
            created_at: 0,
        }
    }

    #[test]
    fn slot_key_format() {
        assert_eq!(slot_key(date("2025-06-10"), 600), "2025-06-10_10:00");
        assert_eq!(slot_key(date("2025-06-10"), 575), "2025-06-10_09:35");
    }

    #[test]
    fn overlap_is_half_open() {
        let r = booked("2025-06-10", 600, 60);
        assert!(r.overlaps(630, 660));
        assert!(r.overlaps(570, 630));
        assert!(!r.overlaps(660, 690)); // adjacent after
        assert!(!r.overlaps(570, 600)); // adjacent before
    }

    #[test]
    fn booked_event_creates_paired_records() {
        let mut state = SalonState::new();
        let r = booked("2025-06-10", 600, 30);
        let id = r.id;
        let key = r.slot_key();
        state.apply(&Event::ReservationBooked { reservation: r });

        assert!(state.reservations.contains_key(&id));
        assert_eq!(state.slots[&key].reservation_id, id);
        assert_eq!(state.by_date[&date("2025-06-10")], vec![id]);
    }

    #[test]
    fn cancelled_event_removes_paired_records() {
        let mut state = SalonState::new();
        let r = booked("2025-06-10", 600, 30);
        let id = r.id;
        let key = r.slot_key();
        state.apply(&Event::ReservationBooked { reservation: r });
        state.apply(&Event::ReservationCancelled { id });

        assert!(state.reservations.is_empty());
        assert!(!state.slots.contains_key(&key));
        assert!(state.by_date.is_empty());
    }

    #[test]
    fn cancel_of_unknown_id_is_ignored() {
        let mut state = SalonState::new();
        state.apply(&Event::ReservationCancelled { id: Ulid::new() });
        assert!(state.reservations.is_empty());
    }

    #[test]
    fn moved_event_relocates_slot_entry() {
        let mut state = SalonState::new();
        let r = booked("2025-06-10", 600, 30);
        let id = r.id;
        let old_key = r.slot_key();
        state.apply(&Event::ReservationBooked { reservation: r });

        state.apply(&Event::ReservationMoved {
            id,
            date: date("2025-06-11"),
            start: 630,
            end: 660,
            duration_min: 30,
            expire_at: 1,
        });

        assert!(!state.slots.contains_key(&old_key));
        let new_key = slot_key(date("2025-06-11"), 630);
        assert_eq!(state.slots[&new_key].reservation_id, id);
        let moved = &state.reservations[&id];
        assert_eq!(moved.start, 630);
        assert_eq!(moved.end, 660);
        assert_eq!(moved.expire_at, 1);
        assert!(!state.by_date.contains_key(&date("2025-06-10")));
        assert_eq!(state.by_date[&date("2025-06-11")], vec![id]);
    }

    #[test]
    fn reservations_on_sorted_by_start() {
        let mut state = SalonState::new();
        for start in [660u16, 540, 600] {
            state.apply(&Event::ReservationBooked {
                reservation: booked("2025-06-10", start, 30),
            });
        }
        let starts: Vec<Minutes> = state
            .reservations_on(date("2025-06-10"))
            .iter()
            .map(|r| r.start)
            .collect();
        assert_eq!(starts, vec![540, 600, 660]);
    }

    #[test]
    fn busy_on_can_exclude_one_reservation() {
        let mut state = SalonState::new();
        let keep = booked("2025-06-10", 540, 30);
        let skip = booked("2025-06-10", 600, 60);
        let skip_id = skip.id;
        state.apply(&Event::ReservationBooked { reservation: keep });
        state.apply(&Event::ReservationBooked { reservation: skip });

        assert_eq!(
            state.busy_on(date("2025-06-10"), Some(skip_id)),
            vec![(540, 570)]
        );
        assert_eq!(
            state.busy_on(date("2025-06-10"), None),
            vec![(540, 570), (600, 660)]
        );
    }

    #[test]
    fn kind_accessors() {
        let user = ReservationKind::User {
            user_id: "u-1".into(),
            service_id: None,
        };
        assert_eq!(user.label(), "user");
        assert_eq!(user.subject(), Some("u-1"));

        let guest = ReservationKind::Guest {
            name: "Marko".into(),
            service_id: Some(Ulid::new()),
        };
        assert_eq!(guest.label(), "guest");
        assert!(guest.service_id().is_some());

        assert_eq!(ReservationKind::Break.subject(), None);
        assert_eq!(ReservationKind::Break.service_id(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationBooked {
            reservation: Reservation {
                id: Ulid::new(),
                kind: ReservationKind::Guest {
                    name: "Jovan".into(),
                    service_id: None,
                },
                date: date("2025-06-10"),
                start: 600,
                end: 660,
                duration_min: 60,
                card_color: Some("#93c5fd".into()),
                expire_at: 1_757_462_400_000,
                created_at: 1_749_550_000_000,
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
