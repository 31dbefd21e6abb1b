//! Port attribute store.
//!
//! Free-form JSON attributes keyed by port id. The wiring path uses them to
//! remember where a port lands on a device (slot, adapter model, adapter
//! port); callers may keep anything else alongside.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::store::{StateStore, StateStoreError};

/// Attribute map stored for a port.
pub type PortAttributes = serde_json::Map<String, serde_json::Value>;

/// Persistent attribute store.
#[derive(Clone)]
pub struct PortAttributeStore {
    store: Arc<StateStore>,
}

impl PortAttributeStore {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Insert or replace the attributes of `port_id`.
    pub fn set_attributes(
        &self,
        port_id: &str,
        attributes: &PortAttributes,
    ) -> Result<(), StateStoreError> {
        let json = serde_json::to_string(attributes)?;
        self.store.immediate(|tx| {
            tx.execute(
                r#"
                INSERT INTO port_attributes (port_id, attributes_json, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(port_id) DO UPDATE SET
                    attributes_json = excluded.attributes_json,
                    updated_at = excluded.updated_at
                "#,
                params![port_id, json, chrono::Utc::now().timestamp()],
            )?;
            Ok(())
        })?;

        debug!(port_id = %port_id, keys = attributes.len(), "port attributes stored");
        Ok(())
    }

    /// Attributes of `port_id`; an unknown port has an empty map.
    pub fn get_attributes(&self, port_id: &str) -> Result<PortAttributes, StateStoreError> {
        let json: Option<String> = self.store.read(|conn| {
            Ok(conn
                .query_row(
                    "SELECT attributes_json FROM port_attributes WHERE port_id = ?1",
                    params![port_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(PortAttributes::new()),
        }
    }
}
