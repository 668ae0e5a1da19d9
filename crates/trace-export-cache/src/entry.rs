//! Cache entry type

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A timestamped set of properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// When the properties were last fetched, in Unix milliseconds
    pub updated_at_millis: i64,
    #[serde(default)]
    pub props: HashMap<String, String>,
}

impl CacheEntry {
    pub fn new(updated_at_millis: i64, props: HashMap<String, String>) -> Self {
        Self {
            updated_at_millis,
            props,
        }
    }

    /// Entry stamped with the current time
    pub fn fresh(props: HashMap<String, String>) -> Self {
        Self::new(Utc::now().timestamp_millis(), props)
    }

    /// Replace the properties and stamp the current time
    pub fn replace_props(&mut self, props: HashMap<String, String>) {
        self.props = props;
        self.updated_at_millis = Utc::now().timestamp_millis();
    }
}
