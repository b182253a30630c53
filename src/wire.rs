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
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::auth::HallbookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::grid::WeeklyGrid;
use crate::model::*;
use crate::observability::{self, command_label};
use crate::picker::{ClickOutcome, PickError, PickedRange, Picker, Selection, SlotBoard};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Query handler for one client connection. The picker selection lives
/// here, so it is private to the session and gone on disconnect.
pub struct HallbookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<HallbookQueryParser>,
    picker: Mutex<Picker>,
}

impl HallbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(HallbookQueryParser),
            picker: Mutex::new(Picker::new()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Run one command, recording its outcome and latency.
    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertLocation { id, name } => {
                engine.create_location(id, name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::RenameLocation { id, name } => {
                engine.rename_location(id, name).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteLocation { id } => {
                engine.delete_location(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectLocations => {
                let locations = engine.list_locations().await;
                Ok(rows_response(locations_schema(), locations, |enc, loc| {
                    enc.encode_field(&loc.id.to_string())?;
                    enc.encode_field(&loc.name)?;
                    enc.encode_field(&(loc.booking_count as i64))
                }))
            }
            Command::InsertBooking { booking } => {
                engine.create_booking(booking).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::BatchInsertBookings { bookings } => {
                let count = bookings.len();
                engine.batch_create_bookings(bookings).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::ImportDocument { id, location_id, doc } => {
                engine
                    .import_document(id, location_id, &doc)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateBooking { id, patch } => {
                engine.update_booking(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings { location_id, date } => {
                let bookings = engine
                    .fetch_bookings_for_day(date, location_id)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(bookings_schema(), bookings, encode_booking))
            }
            Command::SelectWeeklyGrid { location_id, week_of } => {
                let grid = engine
                    .weekly_grid(location_id, week_of)
                    .await
                    .map_err(engine_err)?;
                Ok(grid_response(&grid))
            }
            Command::SelectGridConflicts { location_id, week_of } => {
                let grid = engine
                    .weekly_grid(location_id, week_of)
                    .await
                    .map_err(engine_err)?;
                Ok(rows_response(grid_conflicts_schema(), grid.conflicts(), |enc, c| {
                    enc.encode_field(&c.day.label().to_string())?;
                    enc.encode_field(&c.slot.to_string())?;
                    enc.encode_field(&c.kept.to_string())?;
                    enc.encode_field(&c.displaced.to_string())
                }))
            }
            Command::SelectSlots { location_id, date } => {
                let board = engine.slot_board(date, location_id).await.map_err(engine_err)?;
                Ok(slots_response(&board))
            }
            Command::PickDate { date, location_id } => {
                let board = match engine.slot_board(date, location_id).await {
                    Ok(board) => board,
                    Err(e) => {
                        warn!(%location_id, %date, "could not load bookings for picker: {e}");
                        SlotBoard::empty(date)
                    }
                };
                let mut picker = self.picker.lock().await;
                picker.select_date(location_id, board);
                record_pick("pick_date", "loaded");
                Ok(picker_response(&picker, None, None))
            }
            Command::PickSlot { slot } => {
                let mut picker = self.picker.lock().await;
                let outcome = picker.click(slot).map_err(pick_err)?;
                let label = match outcome {
                    ClickOutcome::Ignored => "ignored",
                    ClickOutcome::Anchored => "anchored",
                    ClickOutcome::RangeConfirmed => "range_confirmed",
                    ClickOutcome::Conflict => "conflict",
                };
                record_pick("pick_slot", label);
                Ok(picker_response(&picker, None, outcome.notice()))
            }
            Command::ConfirmPick => {
                let mut picker = self.picker.lock().await;
                let picked = picker.confirm().map_err(pick_err)?;
                record_pick("confirm_pick", "emitted");
                info!(start = %picked.start, end = %picked.end, date = %picked.date, "slot range picked");
                Ok(picker_response(&picker, Some(picked), None))
            }
            Command::ClearPick => {
                let mut picker = self.picker.lock().await;
                picker.clear();
                record_pick("clear_pick", "cleared");
                Ok(picker_response(&picker, None, None))
            }
        }
    }
}

fn record_pick(action: &'static str, outcome: &'static str) {
    metrics::counter!(observability::PICKER_ACTIONS_TOTAL, "action" => action, "outcome" => outcome)
        .increment(1);
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn locations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("booking_count", Type::INT8),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("location_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("organizer", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("day_of_week", Type::INT2),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
    ]
}

fn weekly_grid_schema() -> Vec<FieldInfo> {
    vec![
        field("day", Type::VARCHAR),
        field("day_of_week", Type::INT2),
        field("slot", Type::VARCHAR),
        field("booking_id", Type::VARCHAR),
        field("location_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("organizer", Type::VARCHAR),
        field("first_hour", Type::BOOL),
        field("total_hours", Type::INT4),
    ]
}

fn grid_conflicts_schema() -> Vec<FieldInfo> {
    vec![
        field("day", Type::VARCHAR),
        field("slot", Type::VARCHAR),
        field("kept_booking_id", Type::VARCHAR),
        field("displaced_booking_id", Type::VARCHAR),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("slot", Type::VARCHAR),
        field("booked", Type::BOOL),
        field("booking_id", Type::VARCHAR),
        field("title", Type::VARCHAR),
    ]
}

fn picker_schema() -> Vec<FieldInfo> {
    vec![
        field("state", Type::VARCHAR),
        field("anchor", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("notice", Type::VARCHAR),
    ]
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_booking(enc: &mut DataRowEncoder, b: Booking) -> PgWireResult<()> {
    let (date, day) = match b.when {
        BookingDate::Dated(d) => (Some(d.to_string()), Day::of(d)),
        BookingDate::Recurring(day) => (None, day),
    };
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.location_id.to_string())?;
    enc.encode_field(&b.title)?;
    enc.encode_field(&b.organizer)?;
    enc.encode_field(&date)?;
    enc.encode_field(&(day.number() as i16))?;
    enc.encode_field(&b.start.to_string())?;
    enc.encode_field(&b.end.map(|e| e.to_string()))
}

fn grid_response(grid: &WeeklyGrid) -> Response {
    rows_response(weekly_grid_schema(), grid.rows(), |enc, (day, slot, cell)| {
        enc.encode_field(&day.label().to_string())?;
        enc.encode_field(&(day.number() as i16))?;
        enc.encode_field(&slot.to_string())?;
        enc.encode_field(&cell.booking.id.to_string())?;
        enc.encode_field(&cell.booking.location_id.to_string())?;
        enc.encode_field(&cell.booking.title)?;
        enc.encode_field(&cell.booking.organizer)?;
        enc.encode_field(&cell.first_hour)?;
        enc.encode_field(&(cell.total_hours as i32))
    })
}

fn slots_response(board: &SlotBoard) -> Response {
    rows_response(slots_schema(), board.iter(), |enc, (slot, occupant)| {
        enc.encode_field(&slot.to_string())?;
        enc.encode_field(&occupant.is_some())?;
        enc.encode_field(&occupant.map(|o| o.booking_id.to_string()))?;
        enc.encode_field(&occupant.map(|o| o.title.clone()))
    })
}

/// One row describing the picker after an action. A confirmed pick fills
/// start/end/date from the emitted range; otherwise they show the current
/// selection.
fn picker_response(picker: &Picker, picked: Option<PickedRange>, notice: Option<&str>) -> Response {
    let selection = picker.selection();
    let anchor = match selection {
        Selection::AnchorSet(a) => Some(TIME_SLOTS[a].to_string()),
        _ => None,
    };
    let (start, end, date) = match (picked, selection) {
        (Some(p), _) => (Some(p.start), Some(p.end), Some(p.date)),
        (None, Selection::RangeConfirmed { start, end }) => (
            Some(TIME_SLOTS[start]),
            TIME_SLOTS[end].plus_hours(1),
            picker.board().map(SlotBoard::date),
        ),
        (None, _) => (None, None, picker.board().map(SlotBoard::date)),
    };
    let row = [
        Some(selection.label().to_string()),
        anchor,
        start.map(|t| t.to_string()),
        end.map(|t| t.to_string()),
        date.map(|d| d.to_string()),
        notice.map(str::to_string),
    ];
    rows_response(picker_schema(), [row], |enc, row| {
        for value in &row {
            enc.encode_field(value)?;
        }
        Ok(())
    })
}

/// Result columns a statement will produce, for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    if ["PICK_DATE(", "PICK_SLOT(", "CONFIRM_PICK(", "CLEAR_PICK("].iter().any(|f| upper.contains(f)) {
        picker_schema()
    } else if upper.contains("FROM GRID_CONFLICTS") {
        grid_conflicts_schema()
    } else if upper.contains("FROM WEEKLY_GRID") {
        weekly_grid_schema()
    } else if upper.contains("FROM SLOTS") {
        slots_schema()
    } else if upper.contains("FROM LOCATIONS") {
        locations_schema()
    } else if upper.contains("FROM BOOKINGS") {
        bookings_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for HallbookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(&engine, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HallbookQueryParser;

#[async_trait]
impl QueryParser for HallbookQueryParser {
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
impl ExtendedQueryHandler for HallbookHandler {
    type Statement = String;
    type QueryParser = HallbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&engine, cmd).await
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

/// Walk `sql` once, offering each `$N` outside quoted text to `replace`.
/// `None` keeps the placeholder as written. Replacement text is never rescanned.
fn rewrite_placeholders(sql: &str, mut replace: impl FnMut(usize) -> Option<String>) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote stays inside the literal
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Some(value) = sql[start..end].parse::<usize>().ok().and_then(&mut replace) {
                    out.push_str(&sql[copied..i]);
                    out.push_str(&value);
                    copied = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0;
    rewrite_placeholders(sql, |n| {
        max = max.max(n);
        None
    });
    max
}

/// Inline bound text parameters as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    substitute_text_params(&portal.statement.statement, &portal.parameters)
}

fn substitute_text_params(sql: &str, params: &[Option<impl AsRef<[u8]>>]) -> String {
    rewrite_placeholders(sql, |n| {
        let param = params.get(n.checked_sub(1)?)?;
        Some(match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        })
    })
}

// ── Factory ──────────────────────────────────────────────────────

/// Handlers for a single connection.
pub struct HallbookFactory {
    handler: Arc<HallbookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<HallbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl HallbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = HallbookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(HallbookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HallbookFactory {
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

/// Serve one accepted socket until the client disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = HallbookFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "23P01",
        EngineError::Invalid(_) | EngineError::Model(_) => "22023",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::Model(_) => "22023",
        _ => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}

fn pick_err(e: PickError) -> PgWireError {
    user_error("22023", e.to_string())
}
