use std::{collections::HashMap, path::Path};

use serde::Deserialize;

use crate::error::ShoalError;

/// Engine configuration, loadable from a JSON file. Every field has a
/// default so a config file only needs to name what it changes.
///
/// ```json
/// {
///     "db_path": "data/",
///     "max_table_weight": 1000,
///     "tables": { "scores": { "weight": 3, "no_save": true } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,

    /// Target per-file table weight before a new file is opened.
    pub max_table_weight: u32,

    /// Per-worker queue cap; 0 means unbounded.
    pub max_queue: u32,

    /// Every table defaults to `no_save`.
    pub all_no_save: bool,

    /// Enable per-worker statistics emission.
    pub stat: bool,

    /// Statistics emission period in milliseconds.
    pub stat_check_time: u64,

    pub tables: HashMap<String, TableConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub weight: Option<u32>,
    pub no_share: Option<bool>,
    pub no_save: Option<bool>,
    pub parent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data".to_string(),
            max_table_weight: 1000,
            max_queue: 0,
            all_no_save: false,
            stat: false,
            stat_check_time: 5000,
            tables: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ShoalError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).or_else(|e| Err(ShoalError::corrupt(&e.to_string())))
    }
}
