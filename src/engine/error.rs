use chrono::NaiveDate;
use ulid::Ulid;

use crate::hours::format_hhmm;
use crate::model::Minutes;

#[derive(Debug)]
pub enum EngineError {
    /// The targeted (date, start) is already occupied at commit time. A lost
    /// race, not a fault — callers prompt for another slot.
    SlotTaken { date: NaiveDate, start: Minutes },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Target interval violates working hours or falls into a vacation
    /// window. Rejected before anything is written.
    OutOfPolicy(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotTaken { date, start } => {
                write!(
                    f,
                    "slot {} {} is already taken",
                    date.format("%Y-%m-%d"),
                    format_hhmm(*start)
                )
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::OutOfPolicy(msg) => write!(f, "out of policy: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
