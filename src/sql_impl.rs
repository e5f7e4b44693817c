//! [`Driver`] implementation on top of sqlx for SQLite and PostgreSQL.
//!
//! sqlx is asynchronous, every connection therefore owns a current-thread
//! tokio runtime and blocks on it. Rows are fetched eagerly and handed out as
//! a [`RowSet`] cursor.

use std::backtrace::Backtrace;
use std::str::FromStr;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use log::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Column, Connection as _, Postgres, Row, Sqlite, TypeInfo, ValueRef};
use tokio::runtime::Runtime;

use crate::driver::{Connection, Cursor, Driver, Resource, Statement};
use crate::error::{BoxDynError, Error, Result};
use crate::sql::{DbValue, RowSet};
use crate::sql_replace::replace_null_placeholders;
use crate::sql_utils::{call_escape_to_sql, postgres_query_positional_args_from_sqlite};
use crate::wire::WireType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Sqlite,
    Postgres,
}

fn backend_kind(url: &str) -> Option<BackendKind> {
    let url = url.to_ascii_lowercase();
    if url.starts_with("sqlite:") {
        Some(BackendKind::Sqlite)
    } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        Some(BackendKind::Postgres)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxDriver;

impl Driver for SqlxDriver {
    fn name(&self) -> &str {
        "sqlx"
    }

    fn accepts_url(&self, url: &str) -> bool {
        backend_kind(url).is_some()
    }

    fn connect(&self, url: &str, login: Option<&str>, password: Option<&str>) -> Result<Box<dyn Connection>> {
        let kind = backend_kind(url).ok_or_else(|| Error::DriverNotFound(url.to_string()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::database)?;
        debug!("Connecting to {url}");
        let backend = match kind {
            BackendKind::Sqlite => Backend::Sqlite(runtime.block_on(SqliteConnection::connect(url))?),
            BackendKind::Postgres => {
                let mut options = PgConnectOptions::from_str(url)?;
                if let Some(login) = login {
                    options = options.username(login);
                }
                if let Some(password) = password {
                    options = options.password(password);
                }
                Backend::Postgres(runtime.block_on(PgConnection::connect_with(&options))?)
            }
        };
        Ok(Box::new(SqlxConnection {
            runtime,
            backend: Some(backend),
            auto_commit: true,
            in_transaction: false,
        }))
    }
}

enum Backend {
    Sqlite(SqliteConnection),
    Postgres(PgConnection),
}

impl Backend {
    fn kind(&self) -> BackendKind {
        match self {
            Backend::Sqlite(_) => BackendKind::Sqlite,
            Backend::Postgres(_) => BackendKind::Postgres,
        }
    }
}

fn closed() -> Error {
    Error::database("connection is closed")
}

pub struct SqlxConnection {
    runtime: Runtime,
    backend: Option<Backend>,
    auto_commit: bool,
    in_transaction: bool,
}

impl SqlxConnection {
    fn run_simple(&mut self, sql: &str) -> Result<()> {
        let backend = self.backend.as_mut().ok_or_else(closed)?;
        match backend {
            Backend::Sqlite(conn) => {
                self.runtime.block_on(sqlx::query(sql).execute(&mut *conn))?;
            }
            Backend::Postgres(conn) => {
                self.runtime.block_on(sqlx::query(sql).execute(&mut *conn))?;
            }
        }
        Ok(())
    }

    /// Opens the explicit transaction emulating disabled auto-commit.
    fn begin_if_needed(&mut self) -> Result<()> {
        if !self.auto_commit && !self.in_transaction {
            self.run_simple("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn prepare_impl(&mut self, sql: &str, callable: bool) -> Result<Box<dyn Statement + '_>> {
        let kind = self.backend.as_ref().ok_or_else(closed)?.kind();
        // PostgreSQL placeholders are numbered once the bindings are known
        let sql = match kind {
            BackendKind::Postgres if callable => call_escape_to_sql(sql),
            _ => sql.to_string(),
        };
        Ok(Box::new(SqlxStatement {
            connection: self,
            kind,
            sql,
            bindings: Vec::new(),
            out_indexes: Vec::new(),
            out_values: Vec::new(),
        }))
    }
}

impl Resource for SqlxConnection {
    fn close(&mut self) -> Result<()> {
        let Some(backend) = self.backend.take() else {
            return Ok(());
        };
        if self.in_transaction {
            warn!("Closing connection with an uncommitted transaction");
        }
        match backend {
            Backend::Sqlite(conn) => self.runtime.block_on(conn.close())?,
            Backend::Postgres(conn) => self.runtime.block_on(conn.close())?,
        }
        Ok(())
    }
}

impl Connection for SqlxConnection {
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled && self.in_transaction {
            self.commit()?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.run_simple("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.run_simple("ROLLBACK")?;
        }
        Ok(())
    }

    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>> {
        self.prepare_impl(sql, false)
    }

    fn prepare_call<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>> {
        self.prepare_impl(sql, true)
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Value(DbValue),
    Null(WireType),
    Out(WireType),
}

struct SqlxStatement<'c> {
    connection: &'c mut SqlxConnection,
    kind: BackendKind,
    sql: String,
    bindings: Vec<Option<Binding>>,
    out_indexes: Vec<usize>,
    out_values: Vec<DbValue>,
}

impl SqlxStatement<'_> {
    fn set(&mut self, index: usize, binding: Binding) -> Result<()> {
        if index == 0 {
            return Err(Error::database("parameter indexes start at 1"));
        }
        if self.bindings.len() < index {
            self.bindings.resize(index, None);
        }
        self.bindings[index - 1] = Some(binding);
        Ok(())
    }
}

/// Output slots without a declared type are passed as a literal `NULL`, a
/// typed NULL would steer procedure overload resolution.
fn is_untyped_out(binding: &Binding) -> bool {
    matches!(binding, Binding::Out(WireType::Other | WireType::Null))
}

fn postgres_statement_sql(sql: &str, bindings: &[&Binding]) -> String {
    let inline_nulls: Vec<bool> = bindings.iter().map(|binding| is_untyped_out(binding)).collect();
    postgres_query_positional_args_from_sqlite(&replace_null_placeholders(sql, &inline_nulls))
}

fn collect_bindings(bindings: &[Option<Binding>]) -> Result<Vec<&Binding>> {
    bindings
        .iter()
        .enumerate()
        .map(|(ix, binding)| {
            binding
                .as_ref()
                .ok_or_else(|| Error::database(format!("parameter {} is not bound", ix + 1)))
        })
        .collect()
}

impl Resource for SqlxStatement<'_> {
    fn close(&mut self) -> Result<()> {
        self.bindings.clear();
        Ok(())
    }
}

impl Statement for SqlxStatement<'_> {
    fn bind(&mut self, index: usize, value: &DbValue, wire_type: WireType) -> Result<()> {
        self.set(index, Binding::Value(coerce_to_wire(value, wire_type)))
    }

    fn bind_null(&mut self, index: usize, wire_type: WireType) -> Result<()> {
        self.set(index, Binding::Null(wire_type))
    }

    fn register_out_parameter(&mut self, index: usize, wire_type: WireType) -> Result<()> {
        if self.kind == BackendKind::Sqlite {
            return Err(Error::database("SQLite does not support output parameters"));
        }
        self.set(index, Binding::Out(wire_type))?;
        self.out_indexes.push(index);
        Ok(())
    }

    fn execute(&mut self) -> Result<Option<Box<dyn Cursor + '_>>> {
        self.connection.begin_if_needed()?;
        let bindings = collect_bindings(&self.bindings)?;
        let SqlxConnection { runtime, backend, .. } = &mut *self.connection;
        let row_set = match backend.as_mut().ok_or_else(closed)? {
            Backend::Sqlite(conn) => {
                let mut q = sqlx::query(&self.sql);
                for binding in bindings {
                    q = bind_sqlite(q, binding)?;
                }
                let rows = runtime.block_on(q.fetch_all(&mut *conn))?;
                process_rows(&rows, db_value_from_sqlite_row)?
            }
            Backend::Postgres(conn) => {
                let sql = postgres_statement_sql(&self.sql, &bindings);
                let mut q = sqlx::query(&sql);
                for binding in bindings.into_iter().filter(|binding| !is_untyped_out(binding)) {
                    q = bind_postgres(q, binding)?;
                }
                let rows = runtime.block_on(q.fetch_all(&mut *conn))?;
                process_rows(&rows, db_value_from_postgres_row)?
            }
        };
        if !self.out_indexes.is_empty() {
            // CALL returns the output parameters as its only row
            self.out_values = row_set.rows.into_iter().next().unwrap_or_default();
            return Ok(None);
        }
        Ok(Some(Box::new(row_set)))
    }

    fn out_value(&mut self, index: usize) -> Result<DbValue> {
        let pos = self
            .out_indexes
            .iter()
            .position(|ix| *ix == index)
            .ok_or_else(|| Error::database(format!("parameter {index} is not an output parameter")))?;
        Ok(self.out_values.get(pos).cloned().unwrap_or(DbValue::Null))
    }
}

fn unbindable(value: &DbValue) -> Error {
    Error::database(format!("Cannot bind value of kind {:?}", value.kind()))
}

/// Converts `value` to the representation implied by `wire_type` where the
/// conversion is lossless enough to be meaningful. Other combinations keep
/// the value unchanged and leave the final word to the database.
fn coerce_to_wire(value: &DbValue, wire_type: WireType) -> DbValue {
    let integer = |v: &DbValue| v.to_i64().filter(|_| !matches!(v, DbValue::Bool(_)));
    let float = |v: &DbValue| match v {
        DbValue::Float(f) => Some(*f as f64),
        DbValue::Double(d) => Some(*d),
        DbValue::Decimal(d) => d.to_f64(),
        v => integer(v).map(|i| i as f64),
    };
    let coerced = match wire_type {
        WireType::Varchar => match value {
            DbValue::String(_) | DbValue::Blob(_) => None,
            DbValue::Bool(b) => Some(DbValue::String(b.to_string())),
            DbValue::Float(f) => Some(DbValue::String(f.to_string())),
            DbValue::Double(d) => Some(DbValue::String(d.to_string())),
            DbValue::Decimal(d) => Some(DbValue::String(d.to_string())),
            DbValue::Date(d) => Some(DbValue::String(d.to_string())),
            DbValue::Time(t) => Some(DbValue::String(t.to_string())),
            DbValue::DateTime(dt) => Some(DbValue::String(dt.to_rfc3339())),
            v => integer(v).map(|i| DbValue::String(i.to_string())),
        },
        WireType::Bit => value.to_i64().map(|i| DbValue::Bool(i != 0)),
        WireType::TinyInt => value.to_i64().and_then(|i| i8::try_from(i).ok()).map(DbValue::TinyInt),
        WireType::SmallInt => value.to_i64().and_then(|i| i16::try_from(i).ok()).map(DbValue::SmallInt),
        WireType::Integer => value.to_i64().and_then(|i| i32::try_from(i).ok()).map(DbValue::Int),
        WireType::BigInt => value.to_i64().map(DbValue::BigInt),
        WireType::Real => float(value).map(|f| DbValue::Float(f as f32)),
        WireType::Double => float(value).map(DbValue::Double),
        WireType::Numeric => match value {
            DbValue::Decimal(_) => None,
            DbValue::Float(f) => Decimal::from_f32(*f).map(DbValue::Decimal),
            DbValue::Double(d) => Decimal::from_f64(*d).map(DbValue::Decimal),
            v => integer(v).map(|i| DbValue::Decimal(Decimal::from(i))),
        },
        _ => None,
    };
    coerced.unwrap_or_else(|| value.clone())
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, <Sqlite as sqlx::Database>::Arguments<'q>>;
type PgQuery<'q> = sqlx::query::Query<'q, Postgres, <Postgres as sqlx::Database>::Arguments<'q>>;

fn bind_sqlite<'q>(q: SqliteQuery<'q>, binding: &Binding) -> Result<SqliteQuery<'q>> {
    let value = match binding {
        Binding::Value(value) => value,
        Binding::Null(_) => return Ok(q.bind(None::<String>)),
        Binding::Out(_) => return Err(Error::database("SQLite does not support output parameters")),
    };
    Ok(match value {
        DbValue::String(s) => q.bind(s.clone()),
        DbValue::Blob(b) => q.bind(b.clone()),
        DbValue::Bool(b) => q.bind(*b),
        DbValue::TinyInt(i) => q.bind(*i),
        DbValue::SmallInt(i) => q.bind(*i),
        DbValue::Int(i) => q.bind(*i),
        DbValue::BigInt(i) => q.bind(*i),
        DbValue::Float(f) => q.bind(*f),
        DbValue::Double(d) => q.bind(*d),
        DbValue::Decimal(d) => q.bind(d.to_string()),
        DbValue::Date(d) => q.bind(*d),
        DbValue::Time(t) => q.bind(*t),
        DbValue::DateTime(dt) => q.bind(*dt),
        DbValue::Null => q.bind(None::<String>),
        DbValue::Cursor(_) | DbValue::Rows(_) => return Err(unbindable(value)),
    })
}

fn bind_postgres_null<'q>(q: PgQuery<'q>, wire_type: WireType) -> PgQuery<'q> {
    match wire_type {
        WireType::Bit => q.bind(None::<bool>),
        WireType::TinyInt | WireType::SmallInt => q.bind(None::<i16>),
        WireType::Integer => q.bind(None::<i32>),
        WireType::BigInt => q.bind(None::<i64>),
        WireType::Real => q.bind(None::<f32>),
        WireType::Double => q.bind(None::<f64>),
        WireType::Numeric => q.bind(None::<Decimal>),
        WireType::VarBinary => q.bind(None::<Vec<u8>>),
        WireType::Date => q.bind(None::<NaiveDate>),
        WireType::Time => q.bind(None::<NaiveTime>),
        WireType::Timestamp => q.bind(None::<chrono::DateTime<FixedOffset>>),
        _ => q.bind(None::<String>),
    }
}

fn bind_postgres<'q>(q: PgQuery<'q>, binding: &Binding) -> Result<PgQuery<'q>> {
    let value = match binding {
        Binding::Value(value) => value,
        Binding::Null(wire_type) | Binding::Out(wire_type) => return Ok(bind_postgres_null(q, *wire_type)),
    };
    Ok(match value {
        DbValue::String(s) => q.bind(s.clone()),
        DbValue::Blob(b) => q.bind(b.clone()),
        DbValue::Bool(b) => q.bind(*b),
        // i8 maps to the internal "char" type in PostgreSQL
        DbValue::TinyInt(i) => q.bind(*i as i16),
        DbValue::SmallInt(i) => q.bind(*i),
        DbValue::Int(i) => q.bind(*i),
        DbValue::BigInt(i) => q.bind(*i),
        DbValue::Float(f) => q.bind(*f),
        DbValue::Double(d) => q.bind(*d),
        DbValue::Decimal(d) => q.bind(*d),
        DbValue::Date(d) => q.bind(*d),
        DbValue::Time(t) => q.bind(*t),
        DbValue::DateTime(dt) => q.bind(*dt),
        DbValue::Null => q.bind(None::<String>),
        DbValue::Cursor(_) | DbValue::Rows(_) => return Err(unbindable(value)),
    })
}

fn process_rows<R>(rows: &[R], value_extractor: impl Fn(&R, usize) -> Result<DbValue>) -> Result<RowSet>
where
    R: Row,
{
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|col| col.name().to_string()).collect())
        .unwrap_or_default();
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| value_extractor(row, i)).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;
    Ok(RowSet::new(columns, rows))
}

fn decode_error(err: BoxDynError) -> Error {
    error!("SQL decode error: {err}\nbacktrace: {}", Backtrace::capture());
    Error::Database(err)
}

fn is_text_type(type_name: &str) -> bool {
    type_name.contains("NAME")
        || type_name.contains("TEXT")
        || type_name.contains("STRING")
        || type_name.contains("VARCHAR")
}

/// SQLite stores booleans, dates, times, timestamps and decimals as INTEGER,
/// REAL or TEXT. The declared column type tells them apart; values which do
/// not decode as declared are left to the storage class.
fn sqlite_declared_value(row: &SqliteRow, index: usize) -> Result<Option<DbValue>> {
    let declared = row.columns()[index].type_info().name().to_uppercase();
    let raw_val = row.try_get_raw(index)?;
    let value = match declared.as_str() {
        "BOOLEAN" => <bool as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map(DbValue::Bool),
        "DATE" => <NaiveDate as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map(DbValue::Date),
        "TIME" => <NaiveTime as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map(DbValue::Time),
        "DATETIME" => {
            <chrono::DateTime<FixedOffset> as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map(DbValue::DateTime)
        }
        "NUMERIC" => <String as sqlx::decode::Decode<Sqlite>>::decode(raw_val)
            .and_then(|s| Ok(DbValue::Decimal(Decimal::from_str(s.trim())?))),
        _ => return Ok(None),
    };
    match value {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            debug!("Column {index} does not decode as {declared}: {err}");
            Ok(None)
        }
    }
}

fn db_value_from_sqlite_row(row: &SqliteRow, index: usize) -> Result<DbValue> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(DbValue::Null);
    }
    if let Some(value) = sqlite_declared_value(row, index)? {
        return Ok(value);
    }
    let raw_val = row.try_get_raw(index)?;
    let type_name = raw_val.type_info().name().to_uppercase();

    if is_text_type(&type_name) || type_name.contains("DATE") || type_name.contains("TIME") {
        Ok(DbValue::String(<String as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map_err(decode_error)?))
    } else if type_name.contains("INT") {
        Ok(DbValue::BigInt(<i64 as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map_err(decode_error)?))
    } else if type_name.contains("BOOL") {
        Ok(DbValue::Bool(<bool as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map_err(decode_error)?))
    } else if type_name.contains("REAL") || type_name.contains("NUMERIC") {
        Ok(DbValue::Double(<f64 as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map_err(decode_error)?))
    } else if type_name.contains("BLOB") {
        Ok(DbValue::Blob(<Vec<u8> as sqlx::decode::Decode<Sqlite>>::decode(raw_val).map_err(decode_error)?))
    } else {
        Err(Error::database(format!("Unsupported type: {type_name}")))
    }
}

fn db_value_from_postgres_row(row: &PgRow, index: usize) -> Result<DbValue> {
    let raw_val = row.try_get_raw(index)?;
    if raw_val.is_null() {
        return Ok(DbValue::Null);
    }
    let type_name = raw_val.type_info().name().to_uppercase();

    let value = match type_name.as_str() {
        "BOOL" => DbValue::Bool(<bool as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "\"CHAR\"" => DbValue::TinyInt(<i8 as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "INT2" => DbValue::SmallInt(<i16 as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "INT4" => DbValue::Int(<i32 as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "INT8" => DbValue::BigInt(<i64 as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "FLOAT4" => DbValue::Float(<f32 as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "FLOAT8" => DbValue::Double(<f64 as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "NUMERIC" => DbValue::Decimal(<Decimal as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "BYTEA" => DbValue::Blob(<Vec<u8> as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "DATE" => DbValue::Date(<NaiveDate as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "TIME" => DbValue::Time(<NaiveTime as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?),
        "TIMESTAMPTZ" => DbValue::DateTime(
            <chrono::DateTime<FixedOffset> as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?,
        ),
        "TIMESTAMP" => {
            let dt = <NaiveDateTime as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?;
            DbValue::DateTime(dt.and_utc().fixed_offset())
        }
        name if is_text_type(name) || name == "CHAR" => {
            DbValue::String(<String as sqlx::decode::Decode<Postgres>>::decode(raw_val).map_err(decode_error)?)
        }
        name => return Err(Error::database(format!("Unsupported type: {name}"))),
    };
    Ok(value)
}
