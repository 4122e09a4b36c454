use std::collections::HashMap;

use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertLocation {
        cafe_id: CafeId,
        id: LocationId,
        name: String,
    },
    InsertOccasion {
        cafe_id: CafeId,
        id: OccasionId,
        name: String,
    },
    InsertTable {
        cafe_id: CafeId,
        id: TableId,
        capacity: u32,
        location_id: LocationId,
    },
    /// Customer booking; contact fields are validated by the booking service.
    InsertReservation {
        choice: UserChoice,
        name: String,
        mobile: String,
        email: String,
        user_id: Option<UserId>,
    },
    InsertWalkIn {
        choice: UserChoice,
        user_id: Option<UserId>,
    },
    /// Frees every reservation of the table around the given time.
    DeleteReservations {
        choice: UserChoice,
    },
    SelectAvailableTables {
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        date: String,
        time: String,
    },
    SelectBusyTables {
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        date: String,
        time: String,
    },
    SelectSlots,
    SelectLocations {
        cafe_id: CafeId,
    },
    SelectOccasions {
        cafe_id: CafeId,
    },
    SelectUserReservations {
        user_id: UserId,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::Parse("query too long".into()));
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column order assumed when an INSERT names no columns.
fn default_columns(table: &str) -> &'static [&'static str] {
    match table {
        "locations" | "occasions" => &["cafe_id", "id", "name"],
        "tables" => &["cafe_id", "id", "capacity", "location_id"],
        "reservations" => &[
            "cafe_id",
            "table_id",
            "occasion_id",
            "party_size",
            "book_date",
            "book_time",
            "name",
            "mobile",
            "email",
            "description",
            "user_id",
        ],
        "walk_ins" => &["cafe_id", "table_id", "book_date", "book_time", "user_id", "party_size"],
        _ => &[],
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = insert_row(insert, &table)?;

    match table.as_str() {
        "locations" => Ok(Command::InsertLocation {
            cafe_id: row.i64("cafe_id")?,
            id: row.i64("id")?,
            name: row.string("name")?,
        }),
        "occasions" => Ok(Command::InsertOccasion {
            cafe_id: row.i64("cafe_id")?,
            id: row.i64("id")?,
            name: row.string("name")?,
        }),
        "tables" => Ok(Command::InsertTable {
            cafe_id: row.i64("cafe_id")?,
            id: row.i64("id")?,
            capacity: row.u32("capacity")?,
            location_id: row.i64("location_id")?,
        }),
        "reservations" => Ok(Command::InsertReservation {
            choice: UserChoice {
                cafe_id: row.i64("cafe_id")?,
                location_id: row.opt_i64("location_id")?.unwrap_or_default(),
                party_size: row.u32("party_size")?,
                date: row.string("book_date")?,
                time: row.string("book_time")?,
                table_id: Some(row.i64("table_id")?),
                occasion_id: Some(row.opt_i64("occasion_id")?.unwrap_or(DEFAULT_OCCASION)),
                description: row.opt_string("description")?,
            },
            name: row.opt_string("name")?.unwrap_or_default(),
            mobile: row.opt_string("mobile")?.unwrap_or_default(),
            email: row.opt_string("email")?.unwrap_or_default(),
            user_id: row.opt_i64("user_id")?,
        }),
        "walk_ins" => Ok(Command::InsertWalkIn {
            choice: UserChoice {
                cafe_id: row.i64("cafe_id")?,
                party_size: row.opt_u32("party_size")?.unwrap_or(1),
                date: row.string("book_date")?,
                time: row.string("book_time")?,
                table_id: Some(row.i64("table_id")?),
                ..UserChoice::default()
            },
            user_id: row.opt_i64("user_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = Filters::from_selection(delete.selection.as_ref())?;
    Ok(Command::DeleteReservations {
        choice: UserChoice {
            cafe_id: filters.i64("cafe_id")?,
            date: filters.string("book_date")?,
            time: filters.string("book_time")?,
            table_id: Some(filters.i64("table_id")?),
            ..UserChoice::default()
        },
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "available_tables" => Ok(Command::SelectAvailableTables {
            cafe_id: filters.i64("cafe_id")?,
            party_size: filters.u32("party_size")?,
            location_id: filters.i64("location_id")?,
            date: filters.string("book_date")?,
            time: filters.string("book_time")?,
        }),
        "busy_tables" => Ok(Command::SelectBusyTables {
            cafe_id: filters.i64("cafe_id")?,
            party_size: filters.u32("party_size")?,
            location_id: filters.i64("location_id")?,
            date: filters.string("book_date")?,
            time: filters.string("book_time")?,
        }),
        "slots" => Ok(Command::SelectSlots),
        "locations" => Ok(Command::SelectLocations {
            cafe_id: filters.i64("cafe_id")?,
        }),
        "occasions" => Ok(Command::SelectOccasions {
            cafe_id: filters.i64("cafe_id")?,
        }),
        "reservations" => Ok(Command::SelectUserReservations {
            user_id: filters.i64("user_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Named values ──────────────────────────────────────────────

/// Column name → value expression, for one INSERT row or a WHERE clause of
/// `col = value` terms joined by AND.
struct Filters {
    values: HashMap<String, Expr>,
    missing: fn(&'static str) -> SqlError,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut values = HashMap::new();
        if let Some(expr) = selection {
            collect_equalities(expr, &mut values)?;
        }
        Ok(Self {
            values,
            missing: SqlError::MissingFilter,
        })
    }

    fn get(&self, col: &'static str) -> Option<&Expr> {
        self.values.get(col).filter(|e| !is_null(e))
    }

    fn expr(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or((self.missing)(col))
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        parse_i64_expr(self.expr(col)?)
    }

    fn u32(&self, col: &'static str) -> Result<u32, SqlError> {
        parse_u32(self.expr(col)?)
    }

    fn string(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.expr(col)?)
    }

    fn opt_i64(&self, col: &'static str) -> Result<Option<i64>, SqlError> {
        self.get(col).map(parse_i64_expr).transpose()
    }

    fn opt_u32(&self, col: &'static str) -> Result<Option<u32>, SqlError> {
        self.get(col).map(parse_u32).transpose()
    }

    fn opt_string(&self, col: &'static str) -> Result<Option<String>, SqlError> {
        self.get(col).map(parse_string_expr).transpose()
    }
}

fn collect_equalities(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.insert(col, right.as_ref().clone());
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn insert_row(insert: &ast::Insert, table: &str) -> Result<Filters, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let row = match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => row,
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns(table).iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if row.len() > columns.len() {
        return Err(SqlError::WrongArity(table.to_string(), columns.len(), row.len()));
    }

    Ok(Filters {
        values: columns.into_iter().zip(row.iter().cloned()).collect(),
        missing: SqlError::MissingColumn,
    })
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

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(String, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_location() {
        let cmd = parse_sql("INSERT INTO locations (cafe_id, id, name) VALUES (1, 2, 'Terrace')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertLocation {
                cafe_id: 1,
                id: 2,
                name: "Terrace".into()
            }
        );
    }

    #[test]
    fn parse_insert_table_positional() {
        let cmd = parse_sql("INSERT INTO tables VALUES (1, 7, 4, 2)").unwrap();
        assert_eq!(
            cmd,
            Command::InsertTable {
                cafe_id: 1,
                id: 7,
                capacity: 4,
                location_id: 2
            }
        );
    }

    #[test]
    fn parse_insert_table_any_column_order() {
        let cmd = parse_sql(
            "INSERT INTO tables (location_id, capacity, id, cafe_id) VALUES (2, 4, 7, 1)",
        )
        .unwrap();
        assert!(matches!(
            cmd,
            Command::InsertTable {
                cafe_id: 1,
                id: 7,
                capacity: 4,
                location_id: 2
            }
        ));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = "INSERT INTO reservations (cafe_id, table_id, occasion_id, party_size, book_date, book_time, name, mobile, email, description, user_id) \
                   VALUES (1, 3, 2, 4, '2024-06-01', '19:00', 'Ann', '87011234567', 'ann@example.com', 'window', 42)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation {
                choice,
                name,
                mobile,
                email,
                user_id,
            } => {
                assert_eq!(choice.cafe_id, 1);
                assert_eq!(choice.table_id, Some(3));
                assert_eq!(choice.occasion_id, Some(2));
                assert_eq!(choice.party_size, 4);
                assert_eq!(choice.date, "2024-06-01");
                assert_eq!(choice.time, "19:00");
                assert_eq!(choice.description.as_deref(), Some("window"));
                assert_eq!(name, "Ann");
                assert_eq!(mobile, "87011234567");
                assert_eq!(email, "ann@example.com");
                assert_eq!(user_id, Some(42));
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_anonymous_with_null_user() {
        let sql = "INSERT INTO reservations (cafe_id, table_id, party_size, book_date, book_time, name, mobile, email, user_id) \
                   VALUES ('1', '3', '2', '2024-06-01', '19:00', 'Ann', '87011234567', 'ann@example.com', NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { choice, user_id, .. } => {
                assert_eq!(user_id, None);
                assert_eq!(choice.occasion_id, Some(DEFAULT_OCCASION));
                assert_eq!(choice.description, None);
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_walk_in() {
        let sql = "INSERT INTO walk_ins (cafe_id, table_id, book_date, book_time) VALUES (1, 3, '2024-06-01', '13:00')";
        match parse_sql(sql).unwrap() {
            Command::InsertWalkIn { choice, user_id } => {
                assert_eq!(choice.table_id, Some(3));
                assert_eq!(choice.party_size, 1);
                assert_eq!(user_id, None);
            }
            other => panic!("expected InsertWalkIn, got {other:?}"),
        }
    }

    #[test]
    fn parse_delete_reservations() {
        let sql = "DELETE FROM reservations WHERE cafe_id = 1 AND table_id = 3 AND book_date = '2024-06-01' AND book_time = '19:00'";
        match parse_sql(sql).unwrap() {
            Command::DeleteReservations { choice } => {
                assert_eq!(choice.cafe_id, 1);
                assert_eq!(choice.table_id, Some(3));
                assert_eq!(choice.time, "19:00");
            }
            other => panic!("expected DeleteReservations, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_available_tables() {
        let sql = "SELECT * FROM available_tables WHERE cafe_id = 1 AND party_size = 2 AND location_id = 1 AND book_date = '2024-06-01' AND book_time = '19:00'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailableTables {
                cafe_id: 1,
                party_size: 2,
                location_id: 1,
                date: "2024-06-01".into(),
                time: "19:00".into(),
            }
        );
    }

    #[test]
    fn parse_select_busy_tables_needs_every_filter() {
        let sql = "SELECT * FROM busy_tables WHERE cafe_id = 1 AND party_size = 2 AND book_date = '2024-06-01' AND book_time = '19:00'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("location_id"))));
    }

    #[test]
    fn parse_select_slots_and_user_reservations() {
        assert_eq!(parse_sql("SELECT * FROM slots").unwrap(), Command::SelectSlots);
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE user_id = 42").unwrap(),
            Command::SelectUserReservations { user_id: 42 }
        );
        assert_eq!(
            parse_sql("SELECT * FROM occasions WHERE cafe_id = 3").unwrap(),
            Command::SelectOccasions { cafe_id: 3 }
        );
    }

    #[test]
    fn parse_rejects_or_filters() {
        let sql = "SELECT * FROM reservations WHERE user_id = 1 OR user_id = 2";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_missing_column_errors() {
        let sql = "INSERT INTO tables (cafe_id, id, capacity) VALUES (1, 2, 4)";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("location_id"))));
    }

    #[test]
    fn parse_too_many_values_errors() {
        let sql = "INSERT INTO locations VALUES (1, 2, 'Hall', 'extra')";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity(_, 3, 4))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO foobar (id) VALUES (1)"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
