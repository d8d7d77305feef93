//! Guest registry - read-only lookup of guests by canonical code
//!
//! The registry document comes in one of two shapes:
//! - a list of rows: `[{"codigo": "A1", "nome": "Ana", "presenca": "sim"}, ...]`
//! - a map keyed by code: `{"A1": {"name": "Ana"}, ...}`
//!
//! Both normalize to the same map. A registry is built once and never
//! mutated; reloading produces a new one that replaces the old wholesale.

use crate::domain::error::RegistryError;
use crate::domain::types::{AttendanceMarker, GuestRecord};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

/// Field names accepted for each attribute, first match wins
const CODE_FIELDS: [&str; 2] = ["codigo", "code"];
const NAME_FIELDS: [&str; 2] = ["nome", "name"];
const ATTENDANCE_FIELDS: [&str; 2] = ["presenca", "attendance"];

/// Guest records keyed by canonical code
#[derive(Debug, Clone, Default)]
pub struct Registry {
    guests: FxHashMap<String, GuestRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and normalize a raw registry document
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RegistryError> {
        let document: Value = serde_json::from_slice(bytes)?;
        Self::from_document(&document)
    }

    /// Normalize a registry document of either accepted shape
    pub fn from_document(document: &Value) -> Result<Self, RegistryError> {
        let mut guests = FxHashMap::default();
        let mut dropped = 0usize;

        match document {
            Value::Array(rows) => {
                for row in rows {
                    let code = first_field(row, &CODE_FIELDS).map(scalar_to_string).unwrap_or_default();
                    match record_from_fields(code.trim(), row) {
                        Some(record) => {
                            guests.insert(record.code.clone(), record);
                        }
                        None => dropped += 1,
                    }
                }
            }
            Value::Object(map) => {
                for (code, value) in map {
                    if value.is_null() {
                        dropped += 1;
                        continue;
                    }
                    match record_from_fields(code.trim(), value) {
                        Some(record) => {
                            guests.insert(record.code.clone(), record);
                        }
                        None => dropped += 1,
                    }
                }
            }
            other => return Err(RegistryError::Shape(json_kind(other))),
        }

        debug!(guests = %guests.len(), dropped = %dropped, "registry_normalized");
        Ok(Self { guests })
    }

    /// Build a registry directly from records (later duplicates win)
    pub fn from_records(records: impl IntoIterator<Item = GuestRecord>) -> Self {
        let guests = records
            .into_iter()
            .filter(|r| !r.code.trim().is_empty())
            .map(|r| (r.code.clone(), r))
            .collect();
        Self { guests }
    }

    /// Look up a guest by canonical code
    #[inline]
    pub fn lookup(&self, code: &str) -> Option<&GuestRecord> {
        self.guests.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.guests.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }

    /// All canonical codes, in no particular order
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.guests.keys().map(String::as_str)
    }
}

/// Build a record from a row or map value; `None` for blank codes
fn record_from_fields(code: &str, value: &Value) -> Option<GuestRecord> {
    if code.is_empty() {
        return None;
    }

    // A bare string value in the map shape is taken as the display name
    let name = match value {
        Value::String(name) => name.clone(),
        _ => first_field(value, &NAME_FIELDS).map(scalar_to_string).unwrap_or_default(),
    };
    let attendance = AttendanceMarker::from_json(first_field(value, &ATTENDANCE_FIELDS));

    Some(GuestRecord::new(code, name).with_attendance(attendance))
}

/// First field among `names` that is neither null nor a blank string
fn first_field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    let object = value.as_object()?;
    names.iter().find_map(|name| object.get(*name).filter(|v| !is_blank(v)))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
