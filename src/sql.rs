use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_SQL_LEN;
use crate::model::parse_date;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProperty {
        id: Ulid,
        owner_id: Ulid,
        price_rate: u32,
    },
    /// `INSERT INTO property_rates`: set a new per-day rate.
    ChangeRate {
        id: Ulid,
        price_rate: u32,
    },
    DeleteProperty {
        id: Ulid,
    },
    InsertBooking {
        property_id: Ulid,
        customer_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },
    /// `INSERT INTO booking_edits`: move a booking. `None` keeps the stored date.
    EditBooking {
        id: Ulid,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings(BookingFilter),
    SelectProperties {
        id: Option<Ulid>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    Id(Ulid),
    Property(Ulid),
    Customer(Ulid),
}

const PROPERTY_COLUMNS: [&str; 3] = ["id", "owner_id", "price_rate"];
const RATE_COLUMNS: [&str; 2] = ["id", "price_rate"];
const BOOKING_COLUMNS: [&str; 4] = ["property_id", "customer_id", "start_date", "end_date"];
const EDIT_COLUMNS: [&str; 3] = ["id", "start_date", "end_date"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::TooLong(sql.len()));
    }
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [one] => one,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "properties" => {
            let [id, owner_id, price_rate] = bind_row(insert, "properties", &PROPERTY_COLUMNS)?;
            Ok(Command::InsertProperty {
                id: parse_ulid(id)?,
                owner_id: parse_ulid(owner_id)?,
                price_rate: parse_u32(price_rate)?,
            })
        }
        "property_rates" => {
            let [id, price_rate] = bind_row(insert, "property_rates", &RATE_COLUMNS)?;
            Ok(Command::ChangeRate {
                id: parse_ulid(id)?,
                price_rate: parse_u32(price_rate)?,
            })
        }
        "bookings" => {
            let [property_id, customer_id, start, end] =
                bind_row(insert, "bookings", &BOOKING_COLUMNS)?;
            Ok(Command::InsertBooking {
                property_id: parse_ulid(property_id)?,
                customer_id: parse_ulid(customer_id)?,
                start: parse_date_expr(start)?,
                end: parse_date_expr(end)?,
            })
        }
        "booking_edits" => {
            let [id, start, end] = bind_row(insert, "booking_edits", &EDIT_COLUMNS)?;
            Ok(Command::EditBooking {
                id: parse_ulid(id)?,
                start: parse_date_or_null(start)?,
                end: parse_date_or_null(end)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let selection = delete.selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let (column, value) = where_eq(selection).ok_or(SqlError::MissingFilter("id"))?;
    if column != "id" {
        return Err(SqlError::MissingFilter("id"));
    }
    let id = parse_ulid(value)?;

    match table.as_str() {
        "properties" => Ok(Command::DeleteProperty { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let filter = match &select.selection {
        Some(expr) => Some(where_eq(expr).ok_or_else(|| {
            SqlError::Unsupported("only a single `column = value` filter is supported".into())
        })?),
        None => None,
    };

    match table.as_str() {
        "bookings" => {
            let (column, value) = filter.ok_or(SqlError::MissingFilter(
                "id, property_id or customer_id",
            ))?;
            let id = parse_ulid(value)?;
            let filter = match column.as_str() {
                "id" => BookingFilter::Id(id),
                "property_id" => BookingFilter::Property(id),
                "customer_id" => BookingFilter::Customer(id),
                _ => return Err(SqlError::UnknownColumn(column)),
            };
            Ok(Command::SelectBookings(filter))
        }
        "properties" => match filter {
            None => Ok(Command::SelectProperties { id: None }),
            Some((column, value)) if column == "id" => Ok(Command::SelectProperties {
                id: Some(parse_ulid(value)?),
            }),
            Some((column, _)) => Err(SqlError::UnknownColumn(column)),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── VALUES binding ────────────────────────────────────────────

/// The single VALUES row, reordered to match `columns`. Without a column list
/// the values are taken positionally.
fn bind_row<'a, const N: usize>(
    insert: &'a ast::Insert,
    table: &'static str,
    columns: &[&'static str; N],
) -> Result<[&'a Expr; N], SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    let rows = match source.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row VALUES".into())),
    };
    if row.len() != N {
        return Err(SqlError::WrongArity(table, N, row.len()));
    }

    let values: Vec<&Expr> = if insert.columns.is_empty() {
        row.iter().collect()
    } else {
        if insert.columns.len() != N {
            return Err(SqlError::WrongArity(table, insert.columns.len(), N));
        }
        let named: Vec<String> = insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .collect();
        columns
            .iter()
            .map(|&col| {
                named
                    .iter()
                    .position(|n| n == col)
                    .map(|pos| &row[pos])
                    .ok_or(SqlError::MissingColumn(table, col))
            })
            .collect::<Result<_, _>>()?
    };
    values
        .try_into()
        .map_err(|v: Vec<&Expr>| SqlError::WrongArity(table, N, v.len()))
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// `column = value` → (lowercased column, value expression).
fn where_eq(expr: &Expr) -> Option<(String, &Expr)> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => Some((expr_column_name(left)?, right.as_ref())),
        Expr::Nested(inner) => where_eq(inner),
        _ => None,
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let text = match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s,
        Some(value) => return Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr}"))),
    };
    text.trim()
        .parse()
        .map_err(|_| SqlError::Parse(format!("{text} is not a non-negative 32-bit integer")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            parse_date(s).map_err(|e| SqlError::BadDate(format!("{s:?}: {e}")))
        }
        Some(value) => Err(SqlError::BadDate(format!("expected 'YYYY-MM-DD', got {value}"))),
        None => Err(SqlError::BadDate(format!("expected 'YYYY-MM-DD', got {expr}"))),
    }
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_date_expr(expr).map(Some),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    TooLong(usize),
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Date literal not in `YYYY-MM-DD` form or not a real calendar day.
    BadDate(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::TooLong(n) => write!(f, "statement too long: {n} bytes (max {MAX_SQL_LEN})"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadDate(s) => write!(f, "invalid date: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRY";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn insert_property() {
        let sql =
            format!("INSERT INTO properties (id, owner_id, price_rate) VALUES ('{A}', '{B}', 120)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertProperty {
                id: ulid(A),
                owner_id: ulid(B),
                price_rate: 120
            }
        );
    }

    #[test]
    fn insert_columns_in_any_order() {
        let sql = format!(
            "INSERT INTO properties (price_rate, owner_id, id) VALUES ('75', '{B}', '{A}')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertProperty {
                id: ulid(A),
                owner_id: ulid(B),
                price_rate: 75
            }
        );
    }

    #[test]
    fn insert_without_column_list_is_positional() {
        let sql = format!("INSERT INTO property_rates VALUES ('{A}', 90)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ChangeRate {
                id: ulid(A),
                price_rate: 90
            }
        );
    }

    #[test]
    fn negative_rate_is_rejected() {
        let sql = format!("INSERT INTO property_rates (id, price_rate) VALUES ('{A}', '-5')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn insert_booking_parses_dates() {
        let sql = format!(
            "INSERT INTO bookings (property_id, customer_id, start_date, end_date) \
             VALUES ('{A}', '{B}', '2024-06-01', '2024-06-10')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                property_id: ulid(A),
                customer_id: ulid(B),
                start: date("2024-06-01"),
                end: date("2024-06-10"),
            }
        );
    }

    #[test]
    fn reversed_dates_still_parse() {
        let sql = format!(
            "INSERT INTO bookings (property_id, customer_id, start_date, end_date) \
             VALUES ('{A}', '{B}', '2024-06-20', '2024-06-05')"
        );
        assert!(matches!(parse_sql(&sql), Ok(Command::InsertBooking { .. })));
    }

    #[test]
    fn bad_date_literal() {
        for bad in ["2024-13-01", "2023-02-29", "06/01/2024", "tomorrow"] {
            let sql = format!(
                "INSERT INTO bookings (property_id, customer_id, start_date, end_date) \
                 VALUES ('{A}', '{B}', '{bad}', '2024-06-10')"
            );
            assert!(matches!(parse_sql(&sql), Err(SqlError::BadDate(_))), "{bad}");
        }
        let sql = format!(
            "INSERT INTO bookings (property_id, customer_id, start_date, end_date) \
             VALUES ('{A}', '{B}', 20240601, '2024-06-10')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::BadDate(_))));
    }

    #[test]
    fn booking_edit_with_null_keeps_field() {
        let sql = format!(
            "INSERT INTO booking_edits (id, start_date, end_date) \
             VALUES ('{A}', NULL, '2024-07-08')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::EditBooking {
                id: ulid(A),
                start: None,
                end: Some(date("2024-07-08")),
            }
        );
    }

    #[test]
    fn missing_column_is_reported() {
        let sql =
            format!("INSERT INTO properties (id, owner, price_rate) VALUES ('{A}', '{B}', 1)");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("properties", "owner_id"))
        ));
    }

    #[test]
    fn wrong_arity() {
        let sql = format!("INSERT INTO bookings VALUES ('{A}', '{B}', '2024-06-01')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("bookings", 4, 3))));
    }

    #[test]
    fn multi_row_insert_unsupported() {
        let sql = format!("INSERT INTO property_rates VALUES ('{A}', 1), ('{B}', 2)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn delete_by_id() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{A}'")).unwrap(),
            Command::DeleteBooking { id: ulid(A) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM properties WHERE id = '{B}'")).unwrap(),
            Command::DeleteProperty { id: ulid(B) }
        );
    }

    #[test]
    fn delete_needs_id_filter() {
        assert!(matches!(
            parse_sql("DELETE FROM bookings"),
            Err(SqlError::MissingFilter("id"))
        ));
        assert!(matches!(
            parse_sql(&format!("DELETE FROM bookings WHERE customer_id = '{A}'")),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn select_bookings_filters() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE id = '{A}'")).unwrap(),
            Command::SelectBookings(BookingFilter::Id(ulid(A)))
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE property_id = '{A}'")).unwrap(),
            Command::SelectBookings(BookingFilter::Property(ulid(A)))
        );
        assert_eq!(
            parse_sql(&format!("select id from BOOKINGS where CUSTOMER_ID = '{B}';")).unwrap(),
            Command::SelectBookings(BookingFilter::Customer(ulid(B)))
        );
    }

    #[test]
    fn select_bookings_requires_filter() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::MissingFilter(_))
        ));
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM bookings WHERE start_date = '{A}'")),
            Err(SqlError::UnknownColumn(_))
        ));
    }

    #[test]
    fn select_properties() {
        assert_eq!(
            parse_sql("SELECT * FROM properties").unwrap(),
            Command::SelectProperties { id: None }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM properties WHERE id = '{A}'")).unwrap(),
            Command::SelectProperties { id: Some(ulid(A)) }
        );
    }

    #[test]
    fn bad_ulid() {
        assert!(matches!(
            parse_sql("DELETE FROM bookings WHERE id = 'not-a-ulid'"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn unknown_table_and_statement() {
        assert!(matches!(
            parse_sql(&format!("DELETE FROM users WHERE id = '{A}'")),
            Err(SqlError::UnknownTable(t)) if t == "users"
        ));
        assert!(matches!(
            parse_sql("CREATE TABLE t (a INT)"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(parse_sql("SELEC * FROM x"), Err(SqlError::Parse(_))));
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn oversized_statement() {
        let sql = format!("SELECT * FROM properties WHERE id = '{}'", "A".repeat(MAX_SQL_LEN));
        assert!(matches!(parse_sql(&sql), Err(SqlError::TooLong(_))));
    }
}
