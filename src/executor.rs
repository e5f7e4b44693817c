use std::sync::Arc;

use log::*;
use serde::{Deserialize, Serialize};

use crate::config::DbConfig;
use crate::driver::{self, Connection, Driver, Scoped};
use crate::error::{Error, Result};
use crate::rows::{ConverterTable, convert_rows};
use crate::sql::{DbValue, Parameter, Record, ValueKind};
use crate::sql_replace::replace_null_placeholders;
use crate::wire::{WireType, WireTypeMap};

/// What to do with a parameter whose value kind has no wire type mapping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedTypePolicy {
    /// Log a warning and bind with [`WireType::Other`].
    #[default]
    Fallback,
    /// Fail the call with [`Error::UnsupportedParameterType`].
    Reject,
}

/// Opens a connection per call, binds parameters, executes and collects the
/// produced rows as records.
pub struct Executor {
    url: Option<String>,
    login: Option<String>,
    password: Option<String>,
    fix_auto_commit: bool,
    null_substitution: bool,
    unmapped_types: UnmappedTypePolicy,
    wire_types: WireTypeMap,
    converters: ConverterTable,
    driver: Option<Arc<dyn Driver>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            url: None,
            login: None,
            password: None,
            fix_auto_commit: false,
            null_substitution: false,
            unmapped_types: UnmappedTypePolicy::default(),
            wire_types: WireTypeMap::default(),
            converters: ConverterTable::default(),
            driver: None,
        }
    }

    /// Creates an executor, first making sure a driver for the given driver
    /// name or URL is registered.
    pub fn create(driver_name_or_url: Option<&str>) -> Result<Self> {
        if let Some(name_or_url) = driver_name_or_url {
            driver::ensure_registered(name_or_url)?;
        }
        Ok(Self::new())
    }

    /// Connects through `driver` instead of the driver registry.
    pub fn with_driver(driver: Arc<dyn Driver>) -> Self {
        Self { driver: Some(driver), ..Self::new() }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self> {
        let mut executor = Self::create(Some(config.url.as_str()))?;
        executor
            .set_url(config.url.as_str())?
            .set_credentials(config.login.as_deref(), config.password.as_deref())
            .set_fix_auto_commit(config.fix_auto_commit)
            .set_null_substitution(config.null_substitution)
            .set_unmapped_types(config.unmapped_types);
        for (kind, wire_type) in &config.wire_types {
            executor.set_wire_type(*kind, *wire_type);
        }
        Ok(executor)
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: &str) -> Result<&mut Self> {
        if url.trim().is_empty() {
            return Err(Error::config("URL cannot be empty"));
        }
        self.url = Some(url.to_string());
        Ok(self)
    }

    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }

    pub fn set_credentials(&mut self, login: Option<&str>, password: Option<&str>) -> &mut Self {
        self.login = login.map(str::to_string);
        self.password = password.map(str::to_string);
        self
    }

    pub fn is_fix_auto_commit(&self) -> bool {
        self.fix_auto_commit
    }

    /// Disables auto-commit before executing and commits explicitly afterwards.
    pub fn set_fix_auto_commit(&mut self, fix_auto_commit: bool) -> &mut Self {
        self.fix_auto_commit = fix_auto_commit;
        self
    }

    pub fn is_null_substitution(&self) -> bool {
        self.null_substitution
    }

    /// Writes null input parameters as literal `NULL` into the query text
    /// instead of binding them.
    pub fn set_null_substitution(&mut self, null_substitution: bool) -> &mut Self {
        self.null_substitution = null_substitution;
        self
    }

    pub fn unmapped_types(&self) -> UnmappedTypePolicy {
        self.unmapped_types
    }

    pub fn set_unmapped_types(&mut self, policy: UnmappedTypePolicy) -> &mut Self {
        self.unmapped_types = policy;
        self
    }

    pub fn wire_types(&self) -> &WireTypeMap {
        &self.wire_types
    }

    pub fn set_wire_type(&mut self, kind: ValueKind, wire_type: WireType) -> &mut Self {
        self.wire_types.put(kind, wire_type);
        self
    }

    pub fn set_wire_types(&mut self, wire_types: WireTypeMap) -> Result<&mut Self> {
        if wire_types.is_empty() {
            return Err(Error::config("Wire type map cannot be empty"));
        }
        self.wire_types = wire_types;
        Ok(self)
    }

    pub fn type_converters(&self) -> &ConverterTable {
        &self.converters
    }

    pub fn set_type_converter<F>(&mut self, kind: ValueKind, converter: F) -> &mut Self
    where
        F: Fn(DbValue, &str) -> DbValue + Send + Sync + 'static,
    {
        self.converters.put(kind, converter);
        self
    }

    pub fn set_type_converters(&mut self, converters: ConverterTable) -> Result<&mut Self> {
        if converters.is_empty() {
            return Err(Error::config("Converter table cannot be empty"));
        }
        self.converters = converters;
        Ok(self)
    }

    fn connect(&self) -> Result<Scoped<dyn Connection>> {
        let url = self.url.as_deref().ok_or_else(|| Error::config("URL is not set"))?;
        let login = self.login.as_deref();
        let password = self.password.as_deref();
        let connection = match &self.driver {
            Some(driver) => driver.connect(url, login, password)?,
            None => driver::connect(url, login, password)?,
        };
        Ok(Scoped::new(connection, "connection"))
    }

    pub fn execute_query(&self, sql: &str, values: &[DbValue]) -> Result<Vec<Record>> {
        let mut params: Vec<Parameter> = values.iter().cloned().map(Parameter::input).collect();
        let mut connection = self.connect()?;
        self.execute(&mut *connection, false, sql, &mut params)
    }

    /// Calls a stored procedure. Values of output parameters are stored back
    /// into `params`.
    pub fn execute_call(&self, sql: &str, params: &mut [Parameter]) -> Result<Vec<Record>> {
        let mut connection = self.connect()?;
        self.execute(&mut *connection, true, sql, params)
    }

    /// Runs `sql` on an already open `connection`, which stays open.
    ///
    /// With fix-auto-commit the statement runs in its own transaction. It is
    /// committed on success and rolled back when the statement fails.
    pub fn execute(
        &self,
        connection: &mut dyn Connection,
        callable: bool,
        sql: &str,
        params: &mut [Parameter],
    ) -> Result<Vec<Record>> {
        if self.fix_auto_commit {
            connection.set_auto_commit(false)?;
        }
        let records = match self.run_statement(connection, callable, sql, params) {
            Ok(records) => records,
            Err(err) => {
                if self.fix_auto_commit
                    && let Err(rollback_err) = connection.rollback()
                {
                    warn!("Rollback after '{sql}' failed: {rollback_err}");
                }
                return Err(err);
            }
        };
        if self.fix_auto_commit
            && let Err(err) = connection.commit()
        {
            warn!("Commit after '{sql}' failed: {err}");
        }
        Ok(records)
    }

    fn run_statement(
        &self,
        connection: &mut dyn Connection,
        callable: bool,
        sql: &str,
        params: &mut [Parameter],
    ) -> Result<Vec<Record>> {
        let wire_types = self.resolve_wire_types(params)?;

        // indexes into `params` of the parameters which get bound
        let (sql, bound): (String, Vec<usize>) = if self.null_substitution {
            let nulls: Vec<bool> = params.iter().map(|p| !p.is_out() && p.value().is_null()).collect();
            let bound = (0..params.len()).filter(|ix| !nulls[*ix]).collect();
            (replace_null_placeholders(sql, &nulls), bound)
        } else {
            (sql.to_string(), (0..params.len()).collect())
        };
        debug!("execute{}: {sql}", if callable { " call" } else { "" });

        let mut statement = Scoped::new(
            if callable { connection.prepare_call(&sql)? } else { connection.prepare(&sql)? },
            "statement",
        );
        let mut out_params = Vec::new();
        for (pos, &ix) in bound.iter().enumerate() {
            let index = pos + 1;
            let param = &params[ix];
            let wire_type = wire_types[ix];
            if param.is_out() {
                statement.register_out_parameter(index, wire_type)?;
                out_params.push((index, ix));
            } else if param.value().is_null() {
                statement.bind_null(index, wire_type)?;
            } else {
                statement.bind(index, param.value(), wire_type)?;
            }
        }

        let records = match statement.execute()? {
            Some(cursor) => {
                let mut cursor = Scoped::new(cursor, "cursor");
                convert_rows(&mut *cursor, Some(&self.converters))?
            }
            None => Vec::new(),
        };

        for (index, ix) in out_params {
            let value = statement.out_value(index)?;
            params[ix].set_value(self.converters.apply(value, ""));
        }
        Ok(records)
    }

    fn resolve_wire_types(&self, params: &[Parameter]) -> Result<Vec<WireType>> {
        params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                if param.is_out() {
                    return Ok(param.out_type().unwrap_or(WireType::Other));
                }
                let Some(kind) = param.value().kind() else {
                    return Ok(WireType::Null);
                };
                match (self.wire_types.get(kind), self.unmapped_types) {
                    (Some(wire_type), _) => Ok(wire_type),
                    (None, UnmappedTypePolicy::Fallback) => {
                        warn!("No wire type mapped for {kind} (parameter {index}), falling back to {}", WireType::Other);
                        Ok(WireType::Other)
                    }
                    (None, UnmappedTypePolicy::Reject) => Err(Error::UnsupportedParameterType { index, kind }),
                }
            })
            .collect()
    }
}
