use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::hours::{WorkingHours, WorkingHoursDoc};
use crate::limits::DEFAULT_SLOT_STEP_MIN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        id: Ulid,
        draft: ReservationDraft,
    },
    MoveReservation {
        id: Ulid,
        date: NaiveDate,
        start: Minutes,
        duration_min: Option<Minutes>,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        on: Option<NaiveDate>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    SelectFreeSlots {
        date: NaiveDate,
        step: Minutes,
    },
    InsertService {
        service: Service,
    },
    DeleteService {
        id: Ulid,
    },
    SelectServices,
    UpdateWorkingHours {
        hours: WorkingHours,
    },
    SelectWorkingHours,
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        // (id, kind, subject, service_id, date, start_time, duration_min, card_color)
        "reservations" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("reservations", 7, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let kind_label = parse_string(&values[1])?;
            let subject = parse_string_or_null(&values[2])?;
            let service_id = parse_ulid_or_null(&values[3])?;
            let date = parse_date(&values[4])?;
            let start = parse_time(&values[5])?;
            let duration_min = parse_minutes(&values[6])?;
            let card_color = if values.len() >= 8 {
                parse_string_or_null(&values[7])?
            } else {
                None
            };

            let kind = match kind_label.as_str() {
                "user" => ReservationKind::User {
                    user_id: subject
                        .ok_or(SqlError::Parse("user reservation needs a subject".into()))?,
                    service_id,
                },
                "guest" => ReservationKind::Guest {
                    name: subject
                        .ok_or(SqlError::Parse("guest reservation needs a subject".into()))?,
                    service_id,
                },
                "break" => ReservationKind::Break,
                other => return Err(SqlError::Parse(format!("unknown reservation kind: {other}"))),
            };

            Ok(Command::InsertReservation {
                id,
                draft: ReservationDraft {
                    kind,
                    date,
                    start,
                    duration_min,
                    card_color,
                },
            })
        }
        // (id, name, price, duration_min)
        "services" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("services", 4, values.len()));
            }
            Ok(Command::InsertService {
                service: Service {
                    id: parse_ulid(&values[0])?,
                    name: parse_string(&values[1])?,
                    price: parse_u32(&values[2])?,
                    duration_min: parse_minutes(&values[3])?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::DeleteReservation { id }),
        "services" => Ok(Command::DeleteService { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;

    match table.as_str() {
        // SET date = '...', start_time = '...' [, duration_min = N] WHERE id = '...'
        "reservations" => {
            let id = extract_where_id(selection)?;
            let (mut date, mut start, mut duration_min) = (None, None, None);
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "date" => date = Some(parse_date(&assignment.value)?),
                    "start_time" => start = Some(parse_time(&assignment.value)?),
                    "duration_min" => duration_min = Some(parse_minutes(&assignment.value)?),
                    other => {
                        return Err(SqlError::Parse(format!(
                            "column {other} is not updatable on reservations"
                        )));
                    }
                }
            }
            Ok(Command::MoveReservation {
                id,
                date: date.ok_or(SqlError::MissingFilter("date"))?,
                start: start.ok_or(SqlError::MissingFilter("start_time"))?,
                duration_min,
            })
        }
        // SET config = '<json>'
        "working_hours" => {
            let mut hours = None;
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "config" => {
                        let raw = parse_string(&assignment.value)?;
                        let doc: WorkingHoursDoc = serde_json::from_str(&raw)
                            .map_err(|e| SqlError::Parse(format!("bad working hours: {e}")))?;
                        hours = Some(doc.normalize());
                    }
                    other => {
                        return Err(SqlError::Parse(format!(
                            "column {other} is not updatable on working_hours"
                        )));
                    }
                }
            }
            Ok(Command::UpdateWorkingHours {
                hours: hours.ok_or(SqlError::MissingFilter("config"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "reservations" => {
            let (mut on, mut from, mut to) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_reservation_filters(selection, &mut on, &mut from, &mut to)?;
            }
            Ok(Command::SelectReservations { on, from, to })
        }
        "free_slots" => {
            let (mut date, mut step) = (None, None);
            if let Some(selection) = &select.selection {
                extract_free_slot_filters(selection, &mut date, &mut step)?;
            }
            Ok(Command::SelectFreeSlots {
                date: date.ok_or(SqlError::MissingFilter("date"))?,
                step: step.unwrap_or(DEFAULT_SLOT_STEP_MIN),
            })
        }
        "services" => Ok(Command::SelectServices),
        "working_hours" => Ok(Command::SelectWorkingHours),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_reservation_filters(
    expr: &Expr,
    on: &mut Option<NaiveDate>,
    from: &mut Option<NaiveDate>,
    to: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_reservation_filters(left, on, from, to)?;
                extract_reservation_filters(right, on, from, to)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *on = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *from = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("date") {
                    *to = Some(parse_date(right)?);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

fn extract_free_slot_filters(
    expr: &Expr,
    date: &mut Option<NaiveDate>,
    step: &mut Option<Minutes>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_free_slot_filters(left, date, step)?;
                extract_free_slot_filters(right, date, step)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left);
                if col.as_deref() == Some("date") {
                    *date = Some(parse_date(right)?);
                } else if col.as_deref() == Some("step") {
                    *step = Some(parse_minutes(right)?);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_minutes(expr: &Expr) -> Result<Minutes, SqlError> {
    let v = parse_i64(expr)?;
    Minutes::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of minute range")))
}

/// Strict `YYYY-MM-DD`. Configuration values parse leniently elsewhere;
/// command inputs do not.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// Strict `HH:MM` with `HH < 24`, `MM < 60`.
fn parse_time(expr: &Expr) -> Result<Minutes, SqlError> {
    let s = parse_string(expr)?;
    parse_time_str(&s)
}

fn parse_time_str(s: &str) -> Result<Minutes, SqlError> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| SqlError::Parse(format!("bad time: {s}")))?;
    let h: Minutes = h
        .parse()
        .map_err(|_| SqlError::Parse(format!("bad time: {s}")))?;
    let m: Minutes = m
        .parse()
        .map_err(|_| SqlError::Parse(format!("bad time: {s}")))?;
    if h >= 24 || m >= 60 {
        return Err(SqlError::Parse(format!("bad time: {s}")));
    }
    Ok(h * 60 + m)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
