use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharebnbAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, BookingFilter, Command, SqlError};

pub struct BookingHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BookingQueryParser>,
}

impl BookingHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BookingQueryParser),
        }
    }

    /// Parse, execute and record one statement.
    async fn run(&self, sql: &str, format: Option<&Format>) -> PgWireResult<Response> {
        let started = Instant::now();
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let result = self.execute_command(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        cmd: Command,
        format: Option<&Format>,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertProperty {
                id,
                owner_id,
                price_rate,
            } => {
                engine
                    .register_property(id, owner_id, price_rate)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::ChangeRate { id, price_rate } => {
                engine
                    .change_price_rate(id, price_rate)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteProperty { id } => {
                engine.remove_property(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking {
                property_id,
                customer_id,
                start,
                end,
            } => {
                let booking = engine
                    .create_booking(property_id, customer_id, start, end)
                    .await
                    .map_err(engine_err)?;
                booking_rows(vec![booking], format)
            }
            Command::EditBooking { id, start, end } => {
                let booking = engine
                    .update_booking(id, start, end)
                    .await
                    .map_err(engine_err)?;
                booking_rows(vec![booking], format)
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings(filter) => {
                let bookings = match filter {
                    BookingFilter::Id(id) => found(engine.get_booking(id).await)?,
                    BookingFilter::Property(pid) => {
                        engine.bookings_for_property(pid).await.map_err(engine_err)?
                    }
                    BookingFilter::Customer(cid) => engine.bookings_for_customer(cid).await,
                };
                booking_rows(bookings, format)
            }
            Command::SelectProperties { id } => {
                let properties = match id {
                    Some(id) => found(engine.get_property(id).await)?,
                    None => engine.list_properties().await,
                };
                property_rows(properties, format)
            }
        }
    }
}

/// A point lookup that misses is an empty result set, not an error.
fn found<T>(result: Result<T, EngineError>) -> PgWireResult<Vec<T>> {
    match result {
        Ok(v) => Ok(vec![v]),
        Err(EngineError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(engine_err(e)),
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type, idx: usize, format: Option<&Format>) -> FieldInfo {
    let fmt = format.map_or(FieldFormat::Text, |f| f.format_for(idx));
    FieldInfo::new(name.into(), None, None, ty, fmt)
}

fn booking_schema(format: Option<&Format>) -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR, 0, format),
        field("property_id", Type::VARCHAR, 1, format),
        field("customer_id", Type::VARCHAR, 2, format),
        field("start_date", Type::VARCHAR, 3, format),
        field("end_date", Type::VARCHAR, 4, format),
        field("total_price", Type::INT8, 5, format),
    ]
}

fn property_schema(format: Option<&Format>) -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR, 0, format),
        field("owner_id", Type::VARCHAR, 1, format),
        field("price_rate", Type::INT8, 2, format),
        field("booking_count", Type::INT8, 3, format),
    ]
}

/// Columns a statement returns, judged from its text so it works before parameters are bound.
fn result_schema(sql: &str, format: Option<&Format>) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|w| !w.is_empty())
        .collect();
    let target = match words.as_slice() {
        ["insert", "into", table, ..] => *table,
        ["select", ..] => words
            .iter()
            .position(|w| *w == "from")
            .and_then(|i| words.get(i + 1))
            .copied()
            .unwrap_or(""),
        _ => "",
    };
    match (words.first().copied(), target) {
        (Some("insert"), "bookings" | "booking_edits") | (Some("select"), "bookings") => {
            booking_schema(format)
        }
        (Some("select"), "properties") => property_schema(format),
        _ => Vec::new(),
    }
}

fn booking_rows(bookings: Vec<Booking>, format: Option<&Format>) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema(format));
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.property_id.to_string())?;
            encoder.encode_field(&b.customer_id.to_string())?;
            encoder.encode_field(&b.range.start.format(DATE_FORMAT).to_string())?;
            encoder.encode_field(&b.range.end.format(DATE_FORMAT).to_string())?;
            encoder.encode_field(&b.total_price)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn property_rows(properties: Vec<PropertyInfo>, format: Option<&Format>) -> PgWireResult<Response> {
    let schema = Arc::new(property_schema(format));
    let rows: Vec<PgWireResult<_>> = properties
        .into_iter()
        .map(|p| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&p.id.to_string())?;
            encoder.encode_field(&p.owner_id.to_string())?;
            encoder.encode_field(&i64::from(p.price_rate))?;
            encoder.encode_field(&(p.booking_count as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for BookingHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, None).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookingQueryParser;

#[async_trait]
impl QueryParser for BookingQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookingHandler {
    type Statement = String;
    type QueryParser = BookingQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&sql, Some(&portal.result_column_format)).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, None),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            Some(&target.result_column_format),
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so `$1`
/// never eats the prefix of `$10`.
fn substitute_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine outcome.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange(_) => "22023",
        EngineError::DateConflict(_) => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Transient(_) => "40001",
        EngineError::OwnBooking(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::BadDate(_) => "22007",
        SqlError::TooLong(_) => "54000",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BookingServerFactory {
    handler: Arc<BookingHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharebnbAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl BookingServerFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(BookingHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharebnbAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookingServerFactory {
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
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = BookingServerFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}
