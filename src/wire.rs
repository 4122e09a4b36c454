use std::fmt::Debug;
use std::io;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::TableBookAuthSource;
use crate::booking::{
    BookingError, ReservationService, UserBooking, FIELD_EMAIL, FIELD_MOBILE, FIELD_NAME,
};
use crate::engine::{Engine, EngineError};
use crate::form::FormValidator;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub type Service = ReservationService<Engine>;

pub struct TableBookHandler {
    service: Arc<Service>,
    query_parser: Arc<TableBookQueryParser>,
}

impl TableBookHandler {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            query_parser: Arc::new(TableBookQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = self.service.repo();
        match cmd {
            Command::InsertLocation { cafe_id, id, name } => {
                engine.add_location(cafe_id, id, name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertOccasion { cafe_id, id, name } => {
                engine.add_occasion(cafe_id, id, name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertTable {
                cafe_id,
                id,
                capacity,
                location_id,
            } => {
                engine
                    .add_table(Table {
                        id,
                        cafe_id,
                        capacity,
                        location_id,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertReservation {
                choice,
                name,
                mobile,
                email,
                user_id,
            } => {
                let form =
                    FormValidator::new([(FIELD_NAME, name), (FIELD_MOBILE, mobile), (FIELD_EMAIL, email)]);
                let reservation = self
                    .service
                    .book_table(form, &choice, user_id)
                    .await
                    .map_err(booking_err)?;
                id_response(&reservation)
            }
            Command::InsertWalkIn { choice, user_id } => {
                let reservation = self
                    .service
                    .book_table_manually(&choice, user_id)
                    .await
                    .map_err(booking_err)?;
                id_response(&reservation)
            }
            Command::DeleteReservations { choice } => {
                let removed = self
                    .service
                    .free_table_manually(&choice)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(removed.len())))
            }
            Command::SelectAvailableTables {
                cafe_id,
                party_size,
                location_id,
                date,
                time,
            } => {
                let tables = self
                    .service
                    .get_available_tables(cafe_id, party_size, location_id, &date, &time)
                    .await
                    .map_err(booking_err)?;
                tables_response(tables)
            }
            Command::SelectBusyTables {
                cafe_id,
                party_size,
                location_id,
                date,
                time,
            } => {
                let tables = self
                    .service
                    .get_busy_tables(cafe_id, party_size, location_id, &date, &time)
                    .await
                    .map_err(booking_err)?;
                tables_response(tables)
            }
            Command::SelectSlots => {
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = self
                    .service
                    .slots()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectLocations { cafe_id } => {
                let named = engine
                    .locations(cafe_id)
                    .await
                    .into_iter()
                    .map(|l| (l.id, l.name));
                named_response(named)
            }
            Command::SelectOccasions { cafe_id } => {
                let named = engine
                    .occasions(cafe_id)
                    .await
                    .into_iter()
                    .map(|o| (o.id, o.name));
                named_response(named)
            }
            Command::SelectUserReservations { user_id } => {
                let bookings = self
                    .service
                    .user_bookings(user_id)
                    .await
                    .map_err(booking_err)?;
                reservations_response(bookings)
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn id_schema() -> Vec<FieldInfo> {
    vec![field("id", Type::VARCHAR)]
}

fn tables_schema() -> Vec<FieldInfo> {
    vec![
        field("cafe_id", Type::INT8),
        field("id", Type::INT8),
        field("capacity", Type::INT8),
        field("location_id", Type::INT8),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![field("book_time", Type::VARCHAR)]
}

fn named_schema() -> Vec<FieldInfo> {
    vec![field("id", Type::INT8), field("name", Type::VARCHAR)]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("cafe_id", Type::INT8),
        field("table_id", Type::INT8),
        field("occasion_id", Type::INT8),
        field("party_size", Type::INT8),
        field("book_date", Type::VARCHAR),
        field("book_time", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("starts_in_minutes", Type::INT8),
        field("notified", Type::BOOL),
    ]
}

/// Result columns a statement will produce, judged from its text alone so it
/// works before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let Some(&verb) = words.first() else {
        return vec![];
    };
    let target = words
        .windows(2)
        .find(|w| w[0] == "into" || w[0] == "from")
        .map(|w| w[1].trim_matches(|c: char| c == ';' || c == '"' || c == '('))
        .unwrap_or("");

    match (verb, target) {
        ("insert", "reservations" | "walk_ins") => id_schema(),
        ("select", "available_tables" | "busy_tables") => tables_schema(),
        ("select", "slots") => slots_schema(),
        ("select", "locations" | "occasions") => named_schema(),
        ("select", "reservations") => reservations_schema(),
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn id_response(reservation: &Reservation) -> PgWireResult<Response> {
    let schema = Arc::new(id_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&reservation.id.to_string())?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn tables_response(tables: Vec<Table>) -> PgWireResult<Response> {
    let schema = Arc::new(tables_schema());
    let rows: Vec<PgWireResult<_>> = tables
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.cafe_id)?;
            encoder.encode_field(&t.id)?;
            encoder.encode_field(&i64::from(t.capacity))?;
            encoder.encode_field(&t.location_id)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn named_response(named: impl Iterator<Item = (i64, String)>) -> PgWireResult<Response> {
    let schema = Arc::new(named_schema());
    let rows: Vec<PgWireResult<_>> = named
        .map(|(id, name)| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&id)?;
            encoder.encode_field(&name)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn reservations_response(bookings: Vec<UserBooking>) -> PgWireResult<Response> {
    let schema = Arc::new(reservations_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let r = &b.reservation;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.cafe_id)?;
            encoder.encode_field(&r.table_id)?;
            encoder.encode_field(&r.occasion_id)?;
            encoder.encode_field(&i64::from(r.party_size))?;
            encoder.encode_field(&r.at.format(DATE_FORMAT).to_string())?;
            encoder.encode_field(&r.at.format(TIME_FORMAT).to_string())?;
            encoder.encode_field(&r.description)?;
            encoder.encode_field(&b.starts_in.map(|d| d.num_minutes()))?;
            encoder.encode_field(&r.notified)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for TableBookHandler {
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
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TableBookQueryParser;

#[async_trait]
impl QueryParser for TableBookQueryParser {
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
impl ExtendedQueryHandler for TableBookHandler {
    type Statement = String;
    type QueryParser = TableBookQueryParser;

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
        self.run(&substitute_params(portal)).await
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
            result_schema(&target.statement),
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
        )))
    }
}

/// Highest `$N` placeholder in the statement.
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split `sql` at `$N` placeholders in one left-to-right pass. Placeholders
/// inside single-quoted literals or double-quoted identifiers are left alone.
fn split_params(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut quote: Option<u8> = None;
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let digits = i + 1;
                let mut end = digits;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                match sql[digits..end].parse::<usize>() {
                    Ok(n) if n > 0 => {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                        pieces.push(Piece::Param(n));
                        text_start = end;
                        i = end;
                    }
                    _ => i = digits,
                }
            }
            None => i += 1,
        }
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

fn count_params(sql: &str) -> usize {
    split_params(sql)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Param(n) => Some(n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Inline bound parameters as quoted text literals. Inlined values are never
/// scanned again, so a `$1` inside one parameter stays text.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    for piece in split_params(sql) {
        match piece {
            Piece::Text(text) => result.push_str(text),
            Piece::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes.as_ref());
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                Some(None) => result.push_str("NULL"),
                None => {
                    result.push('$');
                    result.push_str(&n.to_string());
                }
            },
        }
    }
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TableBookFactory {
    handler: Arc<TableBookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TableBookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TableBookFactory {
    pub fn new(service: Arc<Service>, password: String) -> Self {
        Self {
            handler: Arc::new(TableBookHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                TableBookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TableBookFactory {
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
    service: Arc<Service>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(TableBookFactory::new(service, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::CafeNotFound(_)
        | EngineError::TableNotFound { .. }
        | EngineError::LocationNotFound { .. }
        | EngineError::OccasionNotFound { .. } => "P0002",
        EngineError::EmptyParty | EngineError::PartyDoesNotFit { .. } => "23514",
        EngineError::AlreadyExists(..) => "23505",
        EngineError::Conflict(_) => "23P01",
        EngineError::LimitExceeded(_) | EngineError::WalError(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn booking_sqlstate(e: &BookingError) -> &'static str {
    match e {
        BookingError::Invalid(_) => "23514",
        BookingError::Parse(_) => "22007",
        BookingError::Conflict(_) => "23P01",
        BookingError::FlowExpired | BookingError::FlowIncomplete => "P0001",
        BookingError::Store(inner) => engine_sqlstate(inner),
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    user_error(booking_sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
