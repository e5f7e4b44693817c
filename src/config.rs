use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::executor::UnmappedTypePolicy;
use crate::sql::ValueKind;
use crate::wire::WireType;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    pub db: DbConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DbConfig {
    pub url: Url,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub fix_auto_commit: bool,
    #[serde(default)]
    pub null_substitution: bool,
    #[serde(default)]
    pub unmapped_types: UnmappedTypePolicy,
    /// Overrides of the default wire type map.
    #[serde(default)]
    pub wire_types: BTreeMap<ValueKind, WireType>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("sqlite::memory:").expect("valid default URL"),
            login: None,
            password: None,
            fix_auto_commit: false,
            null_substitution: false,
            unmapped_types: UnmappedTypePolicy::default(),
            wire_types: BTreeMap::new(),
        }
    }
}
