// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Records, change-log entries and client sync bookkeeping.
//!
//! The [`Record`] is the unit every layer moves around: the Local Store
//! owns them, the cache service reads and writes them back, and the sync
//! protocol applies [`ChangeLogEntry`] snapshots of them.
//!
//! # Example
//!
//! ```
//! use mirror_sync::Record;
//! use serde_json::json;
//!
//! let record = Record::from_json("3f2a".into(), json!({"name": "Acme", "tier": 2}));
//!
//! assert_eq!(record.id, "3f2a");
//! assert_eq!(record.row_version, 0);
//! assert!(record.is_active);
//! assert_eq!(record.field("name"), Some(&json!("Acme")));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Built-in field names that resolve to record metadata rather than domain fields.
pub const FIELD_ID: &str = "id";
pub const FIELD_ROW_VERSION: &str = "rowVersion";
pub const FIELD_IS_ACTIVE: &str = "isActive";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_MODIFIED_AT: &str = "modifiedAt";

/// Current time in epoch millis.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn default_active() -> bool {
    true
}

/// A row of one entity table.
///
/// Domain fields are flattened on the wire, so the remote JSON
/// `{"id": "..", "rowVersion": 3, "name": "Acme"}` maps directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Primary key, unique within its table (typically a GUID)
    pub id: String,
    /// Server-managed version, non-decreasing across updates of the same key
    #[serde(default)]
    pub row_version: u64,
    /// Soft-delete marker. Inactive rows are hidden from normal reads.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Creation timestamp (epoch millis)
    #[serde(default)]
    pub created_at: i64,
    /// Last modification timestamp (epoch millis)
    #[serde(default)]
    pub modified_at: i64,
    /// Domain fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an active record with version 0 and both timestamps set to now.
    pub fn new(id: String, fields: Map<String, Value>) -> Self {
        let now = now_millis();
        Self {
            id,
            row_version: 0,
            is_active: true,
            created_at: now,
            modified_at: now,
            fields,
        }
    }

    /// Create a record from a JSON object. Non-object values yield no fields.
    pub fn from_json(id: String, value: Value) -> Self {
        match value {
            Value::Object(fields) => Self::new(id, fields),
            _ => Self::new(id, Map::new()),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a domain field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Resolve a field for filtering or sorting, including built-in metadata.
    ///
    /// Domain fields shadow nothing: `id`, `rowVersion`, `isActive`,
    /// `createdAt` and `modifiedAt` always resolve to the metadata.
    pub fn value_of(&self, name: &str) -> Option<Value> {
        match name {
            FIELD_ID => Some(Value::String(self.id.clone())),
            FIELD_ROW_VERSION => Some(Value::from(self.row_version)),
            FIELD_IS_ACTIVE => Some(Value::Bool(self.is_active)),
            FIELD_CREATED_AT => Some(Value::from(self.created_at)),
            FIELD_MODIFIED_AT => Some(Value::from(self.modified_at)),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Compare everything a client controls (id, fields, active flag),
    /// ignoring server-managed version and timestamps.
    #[must_use]
    pub fn same_content(&self, other: &Record) -> bool {
        self.id == other.id && self.is_active == other.is_active && self.fields == other.fields
    }
}

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server-side mutation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    /// Server-assigned, strictly increasing
    pub sequence: u64,
    pub table: String,
    pub record_id: String,
    pub op: ChangeOp,
    /// Row snapshot after the change (absent for deletes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Record>,
    #[serde(default)]
    pub row_version: u64,
    #[serde(default)]
    pub created_at: i64,
}

/// A local mutation waiting in the outbox to be pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedMutation {
    pub mutation_id: String,
    pub table: String,
    pub record_id: String,
    pub op: ChangeOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Record>,
    /// Row version the local edit started from (server-side conflict check)
    pub base_version: u64,
    pub staged_at: i64,
}

impl StagedMutation {
    pub fn new(table: &str, op: ChangeOp, record: &Record) -> Self {
        Self {
            mutation_id: uuid::Uuid::new_v4().to_string(),
            table: table.to_string(),
            record_id: record.id.clone(),
            op,
            payload: match op {
                ChangeOp::Delete => None,
                _ => Some(record.clone()),
            },
            base_version: record.row_version,
            staged_at: now_millis(),
        }
    }
}

/// Sync bookkeeping for one (client, table) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSyncState {
    pub client_id: String,
    pub table: String,
    /// Highest change-log sequence applied locally
    pub last_sequence: u64,
    pub last_synced_at: Option<i64>,
    /// Staged mutations not yet accepted by the server
    pub pending_changes: u64,
}

impl ClientSyncState {
    pub fn new(client_id: &str, table: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            table: table.to_string(),
            last_sequence: 0,
            last_synced_at: None,
            pending_changes: 0,
        }
    }

    /// Advance the cursor. Never moves backwards.
    pub fn advance_to(&mut self, sequence: u64) -> bool {
        if sequence > self.last_sequence {
            self.last_sequence = sequence;
            true
        } else {
            false
        }
    }
}
