mod availability;
mod error;
mod mutations;
mod queries;

pub use availability::{fits, free_slots};
pub use error::EngineError;
pub use mutations::{SweepOptions, SweepReport, now_ms};

use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::limits::WAL_CHANNEL_DEPTH;
use crate::model::{Event, SalonState};
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let each = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(each);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The booking engine: one salon's state behind a single writer lock, a
/// durable WAL and a change broadcast hub. All reservation mutations run
/// their read-check-write cycle under the write lock, which is what makes
/// the slot-index check authoritative — a racer that loses the lock order
/// observes the winner's committed slot entry and fails with `SlotTaken`.
pub struct Engine {
    state: RwLock<SalonState>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    retention_days: u32,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer task.
    pub fn new(wal_path: &Path, retention_days: u32, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_DEPTH);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = SalonState::new();
        for event in &events {
            state.apply(event);
        }

        Ok(Self {
            state: RwLock::new(state),
            wal_tx,
            notify,
            retention_days,
        })
    }

    pub(super) fn state(&self) -> &RwLock<SalonState> {
        &self.state
    }

    pub(super) fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Write an event to the WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify in one call. The caller holds the state
    /// write lock, so nothing is observable until the event is durable.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut SalonState,
        event: &Event,
        dates: &[NaiveDate],
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        state.apply(event);
        let mut seen: Option<NaiveDate> = None;
        for &date in dates {
            if seen != Some(date) {
                self.notify.send(date, event);
                seen = Some(date);
            }
        }
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state: configuration, services, then live reservations.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = {
            let state = self.state.read().await;
            let mut events = Vec::with_capacity(state.reservations.len() + state.services.len() + 1);
            events.push(Event::WorkingHoursUpdated {
                hours: state.hours.clone(),
            });
            let mut services: Vec<_> = state.services.values().cloned().collect();
            services.sort_by_key(|s| s.id);
            for service in services {
                events.push(Event::ServiceAdded { service });
            }
            let mut reservations: Vec<_> = state.reservations.values().cloned().collect();
            reservations.sort_by_key(|r| r.id);
            for reservation in reservations {
                events.push(Event::ReservationBooked { reservation });
            }
            events
        };

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
