//! Blocking driver seam and the process-wide driver registry.
//!
//! A [`Driver`] opens [`Connection`]s, connections prepare [`Statement`]s and
//! executing a statement may produce a [`Cursor`]. All of them are released
//! through [`Resource::close`]; [`Scoped`] does that on every exit path.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, OnceLock, RwLock};

use log::*;

use crate::error::{Error, Result};
use crate::sql::DbValue;
use crate::sql_impl::SqlxDriver;
use crate::wire::WireType;

pub trait Resource {
    fn close(&mut self) -> Result<()>;
}

pub trait Driver: Send + Sync {
    fn name(&self) -> &str;
    fn accepts_url(&self, url: &str) -> bool;
    fn connect(&self, url: &str, login: Option<&str>, password: Option<&str>) -> Result<Box<dyn Connection>>;
}

pub trait Connection: Resource {
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>>;
    fn prepare_call<'c>(&'c mut self, sql: &str) -> Result<Box<dyn Statement + 'c>>;
}

/// Prepared statement. Parameter indexes are 1-based.
pub trait Statement: Resource {
    /// Binds a non-null value. [`WireType::Other`] leaves the type to the driver.
    fn bind(&mut self, index: usize, value: &DbValue, wire_type: WireType) -> Result<()>;
    fn bind_null(&mut self, index: usize, wire_type: WireType) -> Result<()>;
    fn register_out_parameter(&mut self, index: usize, wire_type: WireType) -> Result<()>;
    /// Returns the cursor when the statement produced one.
    fn execute(&mut self) -> Result<Option<Box<dyn Cursor + '_>>>;
    fn out_value(&mut self, index: usize) -> Result<DbValue>;
}

pub trait Cursor: Resource {
    fn column_names(&self) -> Vec<String>;
    fn next_row(&mut self) -> Result<Option<Vec<DbValue>>>;
}

/// Closes the wrapped resource when dropped.
pub struct Scoped<R: Resource + ?Sized> {
    inner: Box<R>,
    what: &'static str,
}

impl<R: Resource + ?Sized> Scoped<R> {
    pub fn new(inner: Box<R>, what: &'static str) -> Self {
        Self { inner, what }
    }
}

impl<R: Resource + ?Sized> Deref for Scoped<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.inner
    }
}

impl<R: Resource + ?Sized> DerefMut for Scoped<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Resource + ?Sized> Drop for Scoped<R> {
    fn drop(&mut self) {
        if let Err(err) = self.inner.close() {
            warn!("Cannot close {}: {err}", self.what);
        }
    }
}

static DRIVERS: OnceLock<RwLock<Vec<Arc<dyn Driver>>>> = OnceLock::new();

fn drivers() -> &'static RwLock<Vec<Arc<dyn Driver>>> {
    DRIVERS.get_or_init(|| RwLock::new(Vec::new()))
}

pub fn register_driver(driver: Arc<dyn Driver>) {
    let mut drivers = drivers().write().unwrap_or_else(|e| e.into_inner());
    debug!("Registering driver {}", driver.name());
    drivers.push(driver);
}

pub fn registered_drivers() -> Vec<Arc<dyn Driver>> {
    drivers().read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn find_driver(pred: impl Fn(&dyn Driver) -> bool) -> Option<Arc<dyn Driver>> {
    drivers()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .find(|driver| pred(driver.as_ref()))
        .cloned()
}

fn builtin_driver(name_or_url: &str) -> Option<Arc<dyn Driver>> {
    let sqlx = SqlxDriver;
    if sqlx.accepts_url(name_or_url) || sqlx.name().eq_ignore_ascii_case(name_or_url) {
        Some(Arc::new(sqlx))
    } else {
        None
    }
}

/// Makes sure a driver accepting `name_or_url` (or named so) is registered.
/// Nothing happens when one already is.
pub fn ensure_registered(name_or_url: &str) -> Result<Arc<dyn Driver>> {
    let mut drivers = drivers().write().unwrap_or_else(|e| e.into_inner());
    if let Some(driver) = drivers
        .iter()
        .find(|driver| driver.accepts_url(name_or_url) || driver.name().eq_ignore_ascii_case(name_or_url))
    {
        return Ok(driver.clone());
    }
    let driver = builtin_driver(name_or_url).ok_or_else(|| Error::DriverNotFound(name_or_url.to_string()))?;
    info!("Loaded built-in driver {} for {name_or_url}", driver.name());
    drivers.push(driver.clone());
    Ok(driver)
}

/// Connects through the first registered driver accepting `url`.
pub fn connect(url: &str, login: Option<&str>, password: Option<&str>) -> Result<Box<dyn Connection>> {
    let driver = find_driver(|driver| driver.accepts_url(url))
        .ok_or_else(|| Error::DriverNotFound(url.to_string()))?;
    driver.connect(url, login, password)
}
