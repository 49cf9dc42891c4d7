use crate::model::Minutes;

/// Longest accepted guest name / user id.
pub const MAX_SUBJECT_LEN: usize = 120;

/// Longest accepted service name.
pub const MAX_SERVICE_NAME_LEN: usize = 120;

/// Longest accepted card color value (hex or CSS color keyword).
pub const MAX_CARD_COLOR_LEN: usize = 32;

/// Accepted reservation duration range, minutes.
pub const MIN_DURATION_MIN: Minutes = 5;
pub const MAX_DURATION_MIN: Minutes = 480;

/// Accepted slot step range for free-slot queries, minutes.
pub const MIN_SLOT_STEP_MIN: Minutes = 5;
pub const MAX_SLOT_STEP_MIN: Minutes = 240;
pub const DEFAULT_SLOT_STEP_MIN: Minutes = 30;

/// Widest reservation listing window, days (admin calendar pages by week).
pub const MAX_QUERY_DAYS: i64 = 62;

/// Retention sweep deletes at most this many reservations per write-lock
/// acquisition. Matches the batch ceiling the original cleanup job used.
pub const SWEEP_BATCH: usize = 450;

/// Default retention window for reservation records, days.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Depth of the WAL group-commit channel.
pub const WAL_CHANNEL_DEPTH: usize = 4096;
