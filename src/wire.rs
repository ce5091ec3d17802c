use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use tokio::net::TcpStream;

use crate::auth::CenterbookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::command_label;
use crate::sql::{self, Command, SqlError};

const TIME_FORMAT: &str = "%H:%M:%S";

pub struct CenterbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<CenterbookQueryParser>,
}

impl CenterbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(CenterbookQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertCenter { id, name, location } => {
                engine
                    .create_center(Center { id, name, location })
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertService {
                id,
                name,
                category,
                duration_minutes,
                price_cents,
            } => {
                engine
                    .create_service(Service {
                        id,
                        name,
                        category,
                        duration_minutes,
                        price_cents,
                    })
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBooking(req) => {
                engine.create_booking(req).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectCenters => {
                let schema = Arc::new(centers_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_centers()
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.name)?;
                        encoder.encode_field(&c.location)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectServices => {
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_services()
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&s.category.as_str())?;
                        encoder.encode_field(&i64::from(s.duration_minutes))?;
                        encoder.encode_field(&s.price_cents)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBookings { center_id, date } => {
                let bookings = engine.list_bookings(center_id, date).map_err(engine_err)?;
                Ok(vec![bookings_response(bookings)])
            }
            Command::SelectPending => Ok(vec![bookings_response(engine.pending_bookings())]),
            Command::SelectAvailability {
                center_id,
                date,
                service_id,
            } => {
                let availability = engine
                    .get_availability(center_id, date, service_id)
                    .map_err(engine_err)?;
                Ok(vec![availability_response(date, availability)])
            }
        }
    }
}

// ── Result encoding ──────────────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn centers_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("name"), varchar("location")]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        varchar("category"),
        int8("duration_minutes"),
        int8("price_cents"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("center_id"),
        varchar("service_id"),
        varchar("date"),
        varchar("start_time"),
        varchar("end_time"),
        varchar("customer_name"),
        varchar("status"),
        varchar("created_at"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        varchar("date"),
        varchar("start_time"),
        varchar("end_time"),
        int8("gap_remaining_after"),
        int8("slot_count"),
        varchar("message"),
    ]
}

fn bookings_response(bookings: Vec<BookingRecord>) -> Response {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.center_id.to_string())?;
            encoder.encode_field(&b.service_id.to_string())?;
            encoder.encode_field(&b.date.to_string())?;
            encoder.encode_field(&b.start_time.format(TIME_FORMAT).to_string())?;
            encoder.encode_field(&b.end_time.format(TIME_FORMAT).to_string())?;
            encoder.encode_field(&b.customer_name)?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.created_at.to_rfc3339())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// One row per offered slot when open. Otherwise one row per suggested date
/// carrying the message, or a lone message row when nothing was found.
struct AvailabilityRow {
    available: bool,
    date: String,
    start_time: Option<String>,
    end_time: Option<String>,
    gap_remaining_after: Option<i64>,
    slot_count: Option<i64>,
    message: Option<String>,
}

fn availability_rows(date: chrono::NaiveDate, availability: Availability) -> Vec<AvailabilityRow> {
    match availability {
        Availability::Open { slots } => slots
            .into_iter()
            .map(|s| AvailabilityRow {
                available: true,
                date: s.start.date().to_string(),
                start_time: Some(s.start_time().format(TIME_FORMAT).to_string()),
                end_time: Some(s.end_time().format(TIME_FORMAT).to_string()),
                gap_remaining_after: Some(s.gap_remaining_after_minutes),
                slot_count: None,
                message: None,
            })
            .collect(),
        Availability::Unavailable {
            message,
            suggested_dates,
        } if suggested_dates.is_empty() => vec![AvailabilityRow {
            available: false,
            date: date.to_string(),
            start_time: None,
            end_time: None,
            gap_remaining_after: None,
            slot_count: None,
            message: Some(message),
        }],
        Availability::Unavailable {
            message,
            suggested_dates,
        } => suggested_dates
            .into_iter()
            .map(|alt| AvailabilityRow {
                available: false,
                date: alt.date.to_string(),
                start_time: Some(alt.earliest_start.format(TIME_FORMAT).to_string()),
                end_time: None,
                gap_remaining_after: None,
                slot_count: Some(alt.slot_count as i64),
                message: Some(message.clone()),
            })
            .collect(),
    }
}

fn availability_response(date: chrono::NaiveDate, availability: Availability) -> Response {
    let schema = Arc::new(availability_schema());
    let rows: Vec<PgWireResult<_>> = availability_rows(date, availability)
        .into_iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&row.available)?;
            encoder.encode_field(&row.date)?;
            encoder.encode_field(&row.start_time)?;
            encoder.encode_field(&row.end_time)?;
            encoder.encode_field(&row.gap_remaining_after)?;
            encoder.encode_field(&row.slot_count)?;
            encoder.encode_field(&row.message)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result columns a statement will produce, judged from its text.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if !normalized.starts_with("SELECT") {
        return vec![];
    }
    if normalized.contains("FROM AVAILABILITY") {
        availability_schema()
    } else if normalized.contains("FROM PENDING_BOOKINGS") || normalized.contains("FROM BOOKINGS") {
        bookings_schema()
    } else if normalized.contains("FROM CENTERS") {
        centers_schema()
    } else if normalized.contains("FROM SERVICES") {
        services_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for CenterbookHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CenterbookQueryParser;

#[async_trait]
impl QueryParser for CenterbookQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CenterbookHandler {
    type Statement = String;
    type QueryParser = CenterbookQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
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

pub struct CenterbookFactory {
    handler: Arc<CenterbookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CenterbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CenterbookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = CenterbookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CenterbookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CenterbookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>, password: String) -> std::io::Result<()> {
    let factory = CenterbookFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::CenterNotFound(_) | EngineError::ServiceNotFound(_) | EngineError::BookingNotFound(_) => {
            "P0002"
        }
        EngineError::Rejected(_) => "23P01",
        EngineError::AlreadyExists(_) | EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => "22023",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
