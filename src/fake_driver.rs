//! Recording driver for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::driver::{Connection, Cursor, Driver, Resource, Statement};
use crate::error::{Error, Result};
use crate::sql::{DbValue, RowSet};
use crate::wire::WireType;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Connect(String),
    AutoCommit(bool),
    Commit,
    Rollback,
    Prepare { sql: String, callable: bool },
    Bind { index: usize, value: DbValue, wire_type: WireType },
    BindNull { index: usize, wire_type: WireType },
    RegisterOut { index: usize, wire_type: WireType },
    Execute,
    CursorClosed,
    StatementClosed,
    ConnectionClosed,
}

#[derive(Default)]
pub(crate) struct Script {
    pub rows: Option<RowSet>,
    pub out_values: HashMap<usize, DbValue>,
    pub fail_connect: bool,
    pub fail_prepare: bool,
    pub fail_execute: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
}

#[derive(Clone)]
pub(crate) struct FakeDriver {
    scheme: String,
    events: Arc<Mutex<Vec<Event>>>,
    script: Arc<Mutex<Script>>,
}

impl FakeDriver {
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            events: Default::default(),
            script: Default::default(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}:test", self.scheme)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Driver for FakeDriver {
    fn name(&self) -> &str {
        &self.scheme
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with(&format!("{}:", self.scheme))
    }

    fn connect(&self, url: &str, _login: Option<&str>, _password: Option<&str>) -> Result<Box<dyn Connection>> {
        if self.script.lock().unwrap().fail_connect {
            return Err(Error::database("connection refused"));
        }
        self.record(Event::Connect(url.to_string()));
        Ok(Box::new(FakeConnection { driver: self.clone() }))
    }
}

struct FakeConnection {
    driver: FakeDriver,
}

impl FakeConnection {
    fn prepare_impl(&mut self, sql: &str, callable: bool) -> Result<Box<dyn Statement + '_>> {
        self.driver.record(Event::Prepare { sql: sql.to_string(), callable });
        if self.driver.script.lock().unwrap().fail_prepare {
            return Err(Error::database("syntax error"));
        }
        Ok(Box::new(FakeStatement { driver: self.driver.clone() }))
    }
}

impl Resource for FakeConnection {
    fn close(&mut self) -> Result<()> {
        self.driver.record(Event::ConnectionClosed);
        Ok(())
    }
}

impl Connection for FakeConnection {
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.driver.record(Event::AutoCommit(enabled));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.driver.record(Event::Commit);
        if self.driver.script.lock().unwrap().fail_commit {
            return Err(Error::database("commit failed"));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.driver.record(Event::Rollback);
        if self.driver.script.lock().unwrap().fail_rollback {
            return Err(Error::database("rollback failed"));
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

struct FakeStatement {
    driver: FakeDriver,
}

impl Resource for FakeStatement {
    fn close(&mut self) -> Result<()> {
        self.driver.record(Event::StatementClosed);
        Ok(())
    }
}

impl Statement for FakeStatement {
    fn bind(&mut self, index: usize, value: &DbValue, wire_type: WireType) -> Result<()> {
        self.driver.record(Event::Bind { index, value: value.clone(), wire_type });
        Ok(())
    }

    fn bind_null(&mut self, index: usize, wire_type: WireType) -> Result<()> {
        self.driver.record(Event::BindNull { index, wire_type });
        Ok(())
    }

    fn register_out_parameter(&mut self, index: usize, wire_type: WireType) -> Result<()> {
        self.driver.record(Event::RegisterOut { index, wire_type });
        Ok(())
    }

    fn execute(&mut self) -> Result<Option<Box<dyn Cursor + '_>>> {
        self.driver.record(Event::Execute);
        let script = self.driver.script.lock().unwrap();
        if script.fail_execute {
            return Err(Error::database("constraint violation"));
        }
        Ok(script.rows.clone().map(|rows| {
            Box::new(FakeCursor { rows, driver: self.driver.clone() }) as Box<dyn Cursor>
        }))
    }

    fn out_value(&mut self, index: usize) -> Result<DbValue> {
        Ok(self.driver.script.lock().unwrap().out_values.get(&index).cloned().unwrap_or(DbValue::Null))
    }
}

struct FakeCursor {
    rows: RowSet,
    driver: FakeDriver,
}

impl Resource for FakeCursor {
    fn close(&mut self) -> Result<()> {
        self.driver.record(Event::CursorClosed);
        Ok(())
    }
}

impl Cursor for FakeCursor {
    fn column_names(&self) -> Vec<String> {
        self.rows.column_names()
    }

    fn next_row(&mut self) -> Result<Option<Vec<DbValue>>> {
        self.rows.next_row()
    }
}
