use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::ZakaziAuthSource;
use crate::engine::{Engine, EngineError};
use crate::hours::format_hhmm;
use crate::model::Reservation;
use crate::sql::{self, Command};

pub struct ZakaziHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ZakaziQueryParser>,
}

impl ZakaziHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ZakaziQueryParser),
        }
    }

    async fn dispatch(&self, sql_text: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertReservation { id, draft } => {
                self.engine
                    .create_reservation(id, draft)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::MoveReservation {
                id,
                date,
                start,
                duration_min,
            } => {
                self.engine
                    .move_reservation(id, date, start, duration_min)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                self.engine
                    .cancel_reservation(id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservations { on, from, to } => {
                let rows = match (on, from, to) {
                    (Some(date), _, _) => self.engine.reservations_on(date).await,
                    (None, Some(from), Some(to)) => self
                        .engine
                        .reservations_between(from, to)
                        .await
                        .map_err(engine_err)?,
                    (None, None, None) => self.engine.all_reservations().await,
                    _ => {
                        return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                            "ERROR".into(),
                            "42601".into(),
                            "reservations need date = or a full date >= / <= range".into(),
                        ))));
                    }
                };
                Ok(vec![reservation_rows(&rows)?])
            }
            Command::SelectFreeSlots { date, step } => {
                let slots = self
                    .engine
                    .free_slots_on(date, step, Local::now().naive_local())
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(free_slots_schema());
                let date_str = date.format("%Y-%m-%d").to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date_str)?;
                        encoder.encode_field(&format_hhmm(slot))?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertService { service } => {
                self.engine.add_service(service).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteService { id } => {
                self.engine.remove_service(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectServices => {
                let services = self.engine.list_services().await;
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = services
                    .into_iter()
                    .map(|service| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&service.id.to_string())?;
                        encoder.encode_field(&service.name)?;
                        encoder.encode_field(&(service.price as i64))?;
                        encoder.encode_field(&(service.duration_min as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::UpdateWorkingHours { hours } => {
                self.engine
                    .update_working_hours(hours)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectWorkingHours => {
                let hours = self.engine.working_hours().await;
                let config = serde_json::to_string(&hours).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "XX000".into(),
                        format!("working hours serialization: {e}"),
                    )))
                })?;
                let schema = Arc::new(working_hours_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&config)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let date_str = channel.strip_prefix("day_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected day_YYYY-MM-DD)"),
                    )))
                })?;
                let _date: NaiveDate =
                    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
                        PgWireError::UserError(Box::new(ErrorInfo::new(
                            "ERROR".into(),
                            "42000".into(),
                            format!("bad date in channel: {e}"),
                        )))
                    })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn reservation_rows(rows: &[Reservation]) -> PgWireResult<Response> {
    let schema = Arc::new(reservations_schema());
    let encoded: Vec<PgWireResult<_>> = rows
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.kind.label())?;
            encoder.encode_field(&r.kind.subject())?;
            encoder.encode_field(&r.kind.service_id().map(|id| id.to_string()))?;
            encoder.encode_field(&r.date.format("%Y-%m-%d").to_string())?;
            encoder.encode_field(&format_hhmm(r.start))?;
            encoder.encode_field(&format_hhmm(r.end))?;
            encoder.encode_field(&(r.duration_min as i32))?;
            encoder.encode_field(&r.card_color)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(encoded),
    )))
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("kind"),
        varchar("subject"),
        varchar("service_id"),
        varchar("date"),
        varchar("start_time"),
        varchar("end_time"),
        FieldInfo::new(
            "duration_min".into(),
            None,
            None,
            Type::INT4,
            FieldFormat::Text,
        ),
        varchar("card_color"),
    ]
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![varchar("date"), varchar("start_time")]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        FieldInfo::new("price".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new(
            "duration_min".into(),
            None,
            None,
            Type::INT4,
            FieldFormat::Text,
        ),
    ]
}

fn working_hours_schema() -> Vec<FieldInfo> {
    vec![varchar("config")]
}

fn schema_for_statement(sql_upper: &str) -> Option<Vec<FieldInfo>> {
    if !sql_upper.contains("SELECT") {
        return None;
    }
    if sql_upper.contains("FREE_SLOTS") {
        Some(free_slots_schema())
    } else if sql_upper.contains("WORKING_HOURS") {
        Some(working_hours_schema())
    } else if sql_upper.contains("SERVICES") {
        Some(services_schema())
    } else if sql_upper.contains("RESERVATIONS") {
        Some(reservations_schema())
    } else {
        None
    }
}

#[async_trait]
impl SimpleQueryHandler for ZakaziHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.dispatch(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ZakaziQueryParser;

#[async_trait]
impl QueryParser for ZakaziQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(&stmt.to_uppercase()).unwrap_or_default())
    }
}

#[async_trait]
impl ExtendedQueryHandler for ZakaziHandler {
    type Statement = String;
    type QueryParser = ZakaziQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql_text = substitute_params(portal);
        let mut responses = self.dispatch(&sql_text).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let schema = schema_for_statement(&target.statement.to_uppercase()).unwrap_or_default();
        Ok(DescribeStatementResponse::new(param_types, schema))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let schema = schema_for_statement(&target.statement.statement.to_uppercase())
            .unwrap_or_default();
        Ok(DescribePortalResponse::new(schema))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text
/// format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ZakaziFactory {
    handler: Arc<ZakaziHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ZakaziAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ZakaziFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ZakaziAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ZakaziHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ZakaziFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Drive one client connection over the Postgres wire protocol.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = ZakaziFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    // SQLSTATE per outcome: lost slot races map to unique_violation so any
    // Postgres client library classifies them as the expected conflict.
    let code = match &e {
        EngineError::SlotTaken { .. } | EngineError::AlreadyExists(_) => "23505",
        EngineError::OutOfPolicy(_) => "23514",
        EngineError::NotFound(_) => "P0002",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
