use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectNamePart,
    SelectItem, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertLocation {
        id: Ulid,
        name: Option<String>,
    },
    RenameLocation {
        id: Ulid,
        name: Option<String>,
    },
    DeleteLocation {
        id: Ulid,
    },
    SelectLocations,
    InsertBooking {
        booking: Booking,
    },
    BatchInsertBookings {
        bookings: Vec<Booking>,
    },
    ImportDocument {
        id: Ulid,
        location_id: Ulid,
        doc: String,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        location_id: Ulid,
        date: NaiveDate,
    },
    SelectWeeklyGrid {
        location_id: Option<Ulid>,
        week_of: Option<NaiveDate>,
    },
    SelectGridConflicts {
        location_id: Option<Ulid>,
        week_of: Option<NaiveDate>,
    },
    SelectSlots {
        location_id: Ulid,
        date: NaiveDate,
    },
    PickDate {
        date: NaiveDate,
        location_id: Ulid,
    },
    PickSlot {
        slot: ClockTime,
    },
    ConfirmPick,
    ClearPick,
}

const LOCATION_COLUMNS: &[&str] = &["id", "name"];
const BOOKING_COLUMNS: &[&str] = &["id", "location_id", "title", "organizer", "date", "start_time", "end_time"];
const RECURRING_COLUMNS: &[&str] =
    &["id", "location_id", "title", "organizer", "day_of_week", "start_time", "end_time"];
const DOCUMENT_COLUMNS: &[&str] = &["id", "location_id", "doc"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(&table.relation, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: &'static str,
    index: usize,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        known: &[&str],
        columns: &[String],
        index: usize,
        exprs: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            known.iter().take(exprs.len()).map(|c| c.to_string()).collect()
        } else {
            columns.to_vec()
        };
        if names.len() != exprs.len() {
            return Err(SqlError::WrongArity(table, names.len(), exprs.len()));
        }
        let mut values = HashMap::with_capacity(names.len());
        for (name, expr) in names.into_iter().zip(exprs) {
            if !known.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name));
            }
            values.insert(name, expr);
        }
        Ok(Self { table, index, values })
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        match self.values.get(column) {
            Some(expr) if !is_null(expr) => Ok(expr),
            _ => Err(SqlError::MissingColumn(self.table, column)),
        }
    }

    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.values.get(column).copied().filter(|e| !is_null(e))
    }

    /// Prefix errors with the row number on multi-row inserts.
    fn context(&self, e: SqlError) -> SqlError {
        if self.index == 0 {
            e
        } else {
            SqlError::Parse(format!("row {}: {e}", self.index))
        }
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "locations" => {
            let row = Row::new("locations", LOCATION_COLUMNS, &columns, 0, single_row("locations", &rows)?)?;
            Ok(Command::InsertLocation {
                id: parse_ulid(row.required("id")?)?,
                name: row.optional("name").map(parse_string).transpose()?,
            })
        }
        "bookings" | "recurring_bookings" => {
            let recurring = table == "recurring_bookings";
            let (name, known) = if recurring {
                ("recurring_bookings", RECURRING_COLUMNS)
            } else {
                ("bookings", BOOKING_COLUMNS)
            };
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, exprs) in rows.iter().enumerate() {
                let index = if rows.len() == 1 { 0 } else { i + 1 };
                let row = Row::new(name, known, &columns, index, exprs)?;
                bookings.push(booking_from_row(&row, recurring).map_err(|e| row.context(e))?);
            }
            if bookings.len() == 1 {
                let booking = bookings.remove(0);
                Ok(Command::InsertBooking { booking })
            } else {
                Ok(Command::BatchInsertBookings { bookings })
            }
        }
        "booking_documents" => {
            let exprs = single_row("booking_documents", &rows)?;
            let row = Row::new("booking_documents", DOCUMENT_COLUMNS, &columns, 0, exprs)?;
            Ok(Command::ImportDocument {
                id: parse_ulid(row.required("id")?)?,
                location_id: parse_ulid(row.required("location_id")?)?,
                doc: parse_string(row.required("doc")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Tables without a batch form take exactly one VALUES row.
fn single_row<'a>(table: &str, rows: &'a [Vec<Expr>]) -> Result<&'a Vec<Expr>, SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!(
            "multi-row INSERT INTO {table} ({} rows)",
            rows.len()
        ))),
    }
}

fn booking_from_row(row: &Row<'_>, recurring: bool) -> Result<Booking, SqlError> {
    let when = if recurring {
        BookingDate::Recurring(parse_day(row.required("day_of_week")?)?)
    } else {
        BookingDate::Dated(parse_date_expr(row.required("date")?)?)
    };
    Ok(Booking {
        id: parse_ulid(row.required("id")?)?,
        location_id: parse_ulid(row.required("location_id")?)?,
        title: parse_string(row.required("title")?)?,
        organizer: row.optional("organizer").map(parse_string).transpose()?.unwrap_or_default(),
        when,
        start: parse_time(row.required("start_time")?)?,
        end: row.optional("end_time").map(parse_end_time).transpose()?.flatten(),
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "locations" => {
            let mut name = None;
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "name" => name = Some(nullable(&assignment.value).map(parse_string).transpose()?),
                    other => return Err(SqlError::UnknownColumn("locations", other.to_string())),
                }
            }
            let name = name.ok_or(SqlError::MissingColumn("locations", "name"))?;
            Ok(Command::RenameLocation { id, name })
        }
        "bookings" => {
            let mut patch = BookingPatch::default();
            for assignment in assignments {
                let value = &assignment.value;
                match assignment_column(assignment)?.as_str() {
                    "title" => patch.title = Some(parse_string(value)?),
                    "organizer" => {
                        patch.organizer = Some(nullable(value).map(parse_string).transpose()?.unwrap_or_default())
                    }
                    "date" => patch.when = Some(BookingDate::Dated(parse_date_expr(value)?)),
                    "day_of_week" => patch.when = Some(BookingDate::Recurring(parse_day(value)?)),
                    "start_time" => patch.start = Some(parse_time(value)?),
                    "end_time" => {
                        patch.end = Some(nullable(value).map(parse_end_time).transpose()?.flatten())
                    }
                    other => return Err(SqlError::UnknownColumn("bookings", other.to_string())),
                }
            }
            Ok(Command::UpdateBooking { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "locations" => Ok(Command::DeleteLocation { id }),
        "bookings" | "recurring_bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Default)]
struct Filters {
    location_id: Option<Ulid>,
    date: Option<NaiveDate>,
    week_of: Option<NaiveDate>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return parse_picker_call(&select.projection);
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "locations" => Ok(Command::SelectLocations),
        "bookings" => Ok(Command::SelectBookings {
            location_id: filters.location_id.ok_or(SqlError::MissingFilter("location_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
        }),
        "weekly_grid" => Ok(Command::SelectWeeklyGrid {
            location_id: filters.location_id,
            week_of: filters.week_of,
        }),
        "grid_conflicts" => Ok(Command::SelectGridConflicts {
            location_id: filters.location_id,
            week_of: filters.week_of,
        }),
        "slots" => Ok(Command::SelectSlots {
            location_id: filters.location_id.ok_or(SqlError::MissingFilter("location_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)?;
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            match expr_column_name(left).as_deref() {
                Some("location_id") => filters.location_id = Some(parse_ulid(right)?),
                Some("date") => filters.date = Some(parse_date_expr(right)?),
                Some("week_of") => filters.week_of = Some(parse_date_expr(right)?),
                Some(other) => return Err(SqlError::Unsupported(format!("filter on {other}"))),
                None => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            }
        }
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

/// `SELECT pick_date(...)` and friends: the picker's function-call surface.
fn parse_picker_call(projection: &[SelectItem]) -> Result<Command, SqlError> {
    let expr = match projection {
        [SelectItem::UnnamedExpr(expr)] | [SelectItem::ExprWithAlias { expr, .. }] => expr,
        _ => return Err(SqlError::Parse("SELECT without FROM".into())),
    };
    let Expr::Function(func) = expr else {
        return Err(SqlError::Unsupported(format!("SELECT {expr}")));
    };
    let name = object_name_last(&func.name).ok_or_else(|| SqlError::Parse("empty function name".into()))?;
    let args = function_args(&func.args)?;

    let expect_arity = |n: usize, f: &'static str| {
        if args.len() == n {
            Ok(())
        } else {
            Err(SqlError::WrongArity(f, n, args.len()))
        }
    };
    match name.as_str() {
        "pick_date" => {
            expect_arity(2, "pick_date")?;
            Ok(Command::PickDate {
                date: parse_date_expr(args[0])?,
                location_id: parse_ulid(args[1])?,
            })
        }
        "pick_slot" => {
            expect_arity(1, "pick_slot")?;
            Ok(Command::PickSlot { slot: parse_time(args[0])? })
        }
        "confirm_pick" => {
            expect_arity(0, "confirm_pick")?;
            Ok(Command::ConfirmPick)
        }
        "clear_pick" => {
            expect_arity(0, "clear_pick")?;
            Ok(Command::ClearPick)
        }
        _ => Err(SqlError::UnknownFunction(name)),
    }
}

fn function_args(args: &FunctionArguments) -> Result<Vec<&Expr>, SqlError> {
    match args {
        FunctionArguments::None => Ok(Vec::new()),
        FunctionArguments::List(list) => list
            .args
            .iter()
            .map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(expr),
                other => Err(SqlError::Unsupported(format!("argument {other}"))),
            })
            .collect(),
        FunctionArguments::Subquery(_) => Err(SqlError::Unsupported("subquery argument".into())),
    }
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(&values.rows),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right })
            if expr_column_name(left).as_deref() == Some("id") =>
        {
            parse_ulid(right)
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn nullable(expr: &Expr) -> Option<&Expr> {
    if is_null(expr) { None } else { Some(expr) }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::DollarQuotedString(dq)) => Ok(dq.value.clone()),
        Some(Value::EscapedStringLiteral(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<ClockTime, SqlError> {
    Ok(parse_string(expr)?.parse::<ClockTime>()?)
}

/// An empty string reads as "no end time", like a blank form field.
fn parse_end_time(expr: &Expr) -> Result<Option<ClockTime>, SqlError> {
    let s = parse_string(expr)?;
    if s.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(s.parse()?))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    Ok(parse_date(&parse_string(expr)?)?)
}

fn parse_day(expr: &Expr) -> Result<Day, SqlError> {
    let raw = match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s.trim().to_string(),
        _ => return Err(SqlError::Parse(format!("expected day of week 1-7, got {expr}"))),
    };
    let n: u8 = raw
        .parse()
        .map_err(|_| SqlError::Parse(format!("expected day of week 1-7, got {raw}")))?;
    Ok(Day::from_number(n).ok_or(ModelError::BadDay(n))?)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{0}: missing value for {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALL: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const BOOKING: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parse_insert_location() {
        let sql = format!("INSERT INTO locations (id, name) VALUES ('{HALL}', 'Seminar Hall A')");
        match parse_sql(&sql).unwrap() {
            Command::InsertLocation { id, name } => {
                assert_eq!(id.to_string(), HALL);
                assert_eq!(name.as_deref(), Some("Seminar Hall A"));
            }
            cmd => panic!("expected InsertLocation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_location_without_name() {
        let sql = format!("INSERT INTO locations (id) VALUES ('{HALL}')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertLocation { name: None, .. }));

        let sql = format!("INSERT INTO locations (id, name) VALUES ('{HALL}', NULL)");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertLocation { name: None, .. }));
    }

    #[test]
    fn multi_row_insert_without_batch_form_rejected() {
        let sql = format!("INSERT INTO locations (id, name) VALUES ('{HALL}', 'A'), ('{BOOKING}', 'B')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let sql = format!(
            r#"INSERT INTO booking_documents (id, location_id, doc) VALUES ('{BOOKING}', '{HALL}', '{{}}'), ('{HALL}', '{HALL}', '{{}}')"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_rename_location() {
        let sql = format!("UPDATE locations SET name = 'Room 204' WHERE id = '{HALL}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::RenameLocation { id: Ulid::from_string(HALL).unwrap(), name: Some("Room 204".into()) }
        );
    }

    #[test]
    fn parse_delete_location() {
        let sql = format!("DELETE FROM locations WHERE id = '{HALL}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteLocation { .. }));
    }

    #[test]
    fn parse_insert_dated_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, location_id, title, organizer, date, start_time, end_time) \
             VALUES ('{BOOKING}', '{HALL}', 'Robotics demo', 'Robotics Club', '2026-10-20', '14:00', '16:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { booking } => {
                assert_eq!(booking.id.to_string(), BOOKING);
                assert_eq!(booking.location_id.to_string(), HALL);
                assert_eq!(booking.title, "Robotics demo");
                assert_eq!(booking.organizer, "Robotics Club");
                assert_eq!(booking.when, BookingDate::Dated(d("2026-10-20")));
                assert_eq!(booking.start, t("14:00"));
                assert_eq!(booking.end, Some(t("16:00")));
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_recurring_booking_without_end() {
        let sql = format!(
            "INSERT INTO recurring_bookings (id, location_id, title, day_of_week, start_time) \
             VALUES ('{BOOKING}', '{HALL}', 'Data Structures', 3, '09:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { booking } => {
                assert_eq!(booking.when, BookingDate::Recurring(Day::Wed));
                assert_eq!(booking.organizer, "");
                assert_eq!(booking.end, None);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_without_column_list_is_positional() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{BOOKING}', '{HALL}', 'Quiz', 'Lit Society', '2026-10-21', '10:00', '')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { booking } => {
                assert_eq!(booking.start, t("10:00"));
                assert_eq!(booking.end, None);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_multi_row_insert_is_batch() {
        let sql = format!(
            "INSERT INTO recurring_bookings (id, location_id, title, day_of_week, start_time, end_time) VALUES \
             ('{BOOKING}', '{HALL}', 'Lecture', 1, '08:00', '10:00'), \
             ('{HALL}', '{HALL}', 'Lab', 2, '13:00', '15:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::BatchInsertBookings { bookings } => {
                assert_eq!(bookings.len(), 2);
                assert_eq!(bookings[0].when, BookingDate::Recurring(Day::Mon));
                assert_eq!(bookings[1].start, t("13:00"));
            }
            cmd => panic!("expected BatchInsertBookings, got {cmd:?}"),
        }
    }

    #[test]
    fn batch_errors_name_the_row() {
        let sql = format!(
            "INSERT INTO recurring_bookings (id, location_id, title, day_of_week, start_time) VALUES \
             ('{BOOKING}', '{HALL}', 'Lecture', 1, '08:00'), \
             ('{HALL}', '{HALL}', 'Lab', 9, '13:00')"
        );
        let err = parse_sql(&sql).unwrap_err().to_string();
        assert!(err.contains("row 2"), "{err}");
    }

    #[test]
    fn parse_booking_rejects_bad_time() {
        let sql = format!(
            "INSERT INTO bookings (id, location_id, title, date, start_time) \
             VALUES ('{BOOKING}', '{HALL}', 'Talk', '2026-10-20', '9am')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Model(ModelError::BadTime(_)))));
    }

    #[test]
    fn parse_booking_requires_title() {
        let sql = format!(
            "INSERT INTO bookings (id, location_id, date, start_time) VALUES ('{BOOKING}', '{HALL}', '2026-10-20', '09:00')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("bookings", "title"))));
    }

    #[test]
    fn parse_unknown_column_errors() {
        let sql = format!("INSERT INTO locations (id, capacity) VALUES ('{HALL}', '40')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("locations", _))));
    }

    #[test]
    fn parse_import_document() {
        let sql = format!(
            r#"INSERT INTO booking_documents (id, location_id, doc) VALUES ('{BOOKING}', '{HALL}', '{{"title":"Debate","dayOfWeek":5,"startTime":"15:00"}}')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::ImportDocument { doc, .. } => assert!(doc.contains("dayOfWeek")),
            cmd => panic!("expected ImportDocument, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_booking() {
        let sql = format!(
            "UPDATE bookings SET title = 'Moved talk', start_time = '11:00', end_time = NULL WHERE id = '{BOOKING}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpdateBooking { id, patch } => {
                assert_eq!(id.to_string(), BOOKING);
                assert_eq!(patch.title.as_deref(), Some("Moved talk"));
                assert_eq!(patch.start, Some(t("11:00")));
                assert_eq!(patch.end, Some(None));
                assert_eq!(patch.when, None);
            }
            cmd => panic!("expected UpdateBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE bookings SET title = 'x'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_booking() {
        let sql = format!("DELETE FROM bookings WHERE id = '{BOOKING}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteBooking { .. }));
    }

    #[test]
    fn parse_select_locations() {
        assert_eq!(parse_sql("SELECT * FROM locations").unwrap(), Command::SelectLocations);
    }

    #[test]
    fn parse_select_bookings_for_day() {
        let sql = format!(r#"SELECT * FROM bookings WHERE location_id = '{HALL}' AND "date" = '2026-10-20'"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings { location_id: Ulid::from_string(HALL).unwrap(), date: d("2026-10-20") }
        );
    }

    #[test]
    fn parse_select_bookings_requires_date() {
        let sql = format!("SELECT * FROM bookings WHERE location_id = '{HALL}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("date"))));
    }

    #[test]
    fn parse_select_weekly_grid_filters_are_optional() {
        assert_eq!(
            parse_sql("SELECT * FROM weekly_grid").unwrap(),
            Command::SelectWeeklyGrid { location_id: None, week_of: None }
        );
        let sql = format!("SELECT * FROM weekly_grid WHERE location_id = '{HALL}' AND week_of = '2026-10-21'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectWeeklyGrid {
                location_id: Some(Ulid::from_string(HALL).unwrap()),
                week_of: Some(d("2026-10-21")),
            }
        );
    }

    #[test]
    fn parse_select_grid_conflicts() {
        assert!(matches!(
            parse_sql("SELECT * FROM grid_conflicts").unwrap(),
            Command::SelectGridConflicts { location_id: None, week_of: None }
        ));
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!(r#"SELECT * FROM slots WHERE location_id = '{HALL}' AND "date" = '2026-10-20'"#);
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectSlots { .. }));
    }

    #[test]
    fn parse_select_rejects_unknown_filter() {
        let sql = format!("SELECT * FROM slots WHERE location_id = '{HALL}' AND capacity = 3");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_picker_calls() {
        let sql = format!("SELECT pick_date('2026-10-20', '{HALL}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::PickDate { date: d("2026-10-20"), location_id: Ulid::from_string(HALL).unwrap() }
        );
        assert_eq!(parse_sql("SELECT pick_slot('10:00')").unwrap(), Command::PickSlot { slot: t("10:00") });
        assert_eq!(parse_sql("SELECT confirm_pick()").unwrap(), Command::ConfirmPick);
        assert_eq!(parse_sql("select clear_pick() as cleared").unwrap(), Command::ClearPick);
    }

    #[test]
    fn parse_picker_call_arity() {
        assert!(matches!(
            parse_sql("SELECT pick_slot()"),
            Err(SqlError::WrongArity("pick_slot", 1, 0))
        ));
        assert!(matches!(parse_sql("SELECT launch_rockets()"), Err(SqlError::UnknownFunction(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO rooms (id) VALUES ('{HALL}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
