//! Metadata schema registry and typed attribute (de)serialization.
//!
//! # Responsibility
//! - Own the typed attribute declarations of one tier class.
//! - Convert persisted raw values to logical values and back.
//! - Emit the structural schema shown to clients.
//!
//! # Invariants
//! - An attribute name is declared at most once per registry.
//! - `decode(encode(v)) == v` for every supported logical type.
//! - Reserved keys are never reported as additional metadata.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

/// Metadata keys handled by dedicated serializer fields, never surfaced as
/// additional metadata.
pub const RESERVED_META_KEYS: &[&str] = &["name", "started", "description", "conclusion"];

pub type MetaResult<T> = Result<T, MetaError>;

/// Shared handle to a registry, allowing a detachable registry to be extended
/// after the fact and connected to classes its author does not own.
pub type SchemaHandle = Arc<RwLock<SchemaRegistry>>;

/// Errors from attribute declaration and value conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaError {
    /// A raw value cannot be converted to the declared logical type.
    TypeMismatch {
        attr: String,
        expected: &'static str,
        raw: Value,
    },
    /// A required value is absent and has no declared default.
    Missing(String),
    /// The attribute name is already declared in this registry.
    DuplicateAttr(String),
    /// The attribute name is not declared in this registry.
    UnknownAttr(String),
}

impl Display for MetaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch {
                attr,
                expected,
                raw,
            } => write!(f, "attribute `{attr}` expected {expected}, got {raw}"),
            Self::Missing(attr) => write!(f, "attribute `{attr}` has no value and no default"),
            Self::DuplicateAttr(attr) => write!(f, "attribute `{attr}` is already declared"),
            Self::UnknownAttr(attr) => write!(f, "attribute `{attr}` is not declared"),
        }
    }
}

impl Error for MetaError {}

/// Logical value type of one metadata attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalType {
    Str,
    Int,
    Float,
    Bool,
    Date,
    DateTime,
    /// Closed set of accepted string literals.
    Literal(Vec<String>),
}

impl LogicalType {
    /// Short name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Str => "string",
            Self::Int => "integer",
            Self::Float => "float",
            Self::Bool => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Literal(_) => "literal",
        }
    }

    /// The representation persisted for this logical type.
    pub fn storage(&self) -> StorageType {
        match self {
            Self::Str | Self::Date | Self::DateTime | Self::Literal(_) => StorageType::Text,
            Self::Int => StorageType::Integer,
            Self::Float => StorageType::Number,
            Self::Bool => StorageType::Boolean,
        }
    }

    fn json_type(&self) -> &'static str {
        match self {
            Self::Str | Self::Date | Self::DateTime | Self::Literal(_) => "string",
            Self::Int => "integer",
            Self::Float => "number",
            Self::Bool => "boolean",
        }
    }

    fn format(&self) -> Option<&'static str> {
        match self {
            Self::Date => Some("date"),
            Self::DateTime => Some("date-time"),
            _ => None,
        }
    }
}

/// Persisted representation of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Text,
    Integer,
    Number,
    Boolean,
}

/// Visibility tag emitted with every schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Always shown to clients.
    Core,
    /// Internal only; clients hide it.
    Private,
}

/// Declaration of one typed metadata attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDescriptor {
    /// Display title shown by clients.
    pub title: String,
    pub logical: LogicalType,
    pub storage: StorageType,
    /// Raw (storage-form) default used when no value is persisted.
    pub default: Option<Value>,
    pub visibility: Visibility,
}

impl AttrDescriptor {
    /// Creates a descriptor with the storage type derived from the logical type.
    pub fn new(title: impl Into<String>, logical: LogicalType, visibility: Visibility) -> Self {
        let storage = logical.storage();
        Self {
            title: title.into(),
            logical,
            storage,
            default: None,
            visibility,
        }
    }

    /// Sets the raw default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Decoded logical value of one metadata attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl MetaValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
        }
    }
}

/// Structural schema of one registry, as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaSchema {
    pub properties: IndexMap<String, PropertySchema>,
}

/// One field of a [`MetaSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(rename = "x-cas-field", skip_serializing_if = "Option::is_none")]
    pub field: Option<Visibility>,
}

/// Owner of the typed attribute declarations of one tier class.
///
/// Supports two registration styles: built up front and handed to a class at
/// construction, or created standalone, registered into after the fact and
/// connected to one or more cooperating classes through a [`SchemaHandle`].
/// Both styles produce identical [`MetaSchema`] output.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    attrs: IndexMap<String, AttrDescriptor>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares one attribute.
    pub fn register(&mut self, name: impl Into<String>, attr: AttrDescriptor) -> MetaResult<()> {
        let name = name.into();
        if self.attrs.contains_key(name.as_str()) {
            return Err(MetaError::DuplicateAttr(name));
        }
        self.attrs.insert(name, attr);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn attr(&self, name: &str) -> Option<&AttrDescriptor> {
        self.attrs.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Wraps this registry in a shared handle for post-hoc extension.
    pub fn into_handle(self) -> SchemaHandle {
        Arc::new(RwLock::new(self))
    }

    /// Emits the structural schema in declaration order.
    pub fn describe(&self) -> MetaSchema {
        let mut properties = IndexMap::with_capacity(self.attrs.len());
        for (name, attr) in &self.attrs {
            let options = match &attr.logical {
                LogicalType::Literal(values) => Some(values.clone()),
                _ => None,
            };
            properties.insert(
                name.clone(),
                PropertySchema {
                    title: Some(attr.title.clone()),
                    kind: Some(attr.logical.json_type().to_string()),
                    default: attr.default.clone(),
                    format: attr.logical.format().map(str::to_string),
                    options,
                    field: Some(attr.visibility),
                },
            );
        }
        MetaSchema { properties }
    }

    /// Converts a persisted raw value to its logical value.
    ///
    /// Falls back to the declared default when `raw` is absent.
    ///
    /// # Errors
    /// - `UnknownAttr` when the attribute is not declared.
    /// - `Missing` when no value and no default exist.
    /// - `TypeMismatch` when the raw value cannot be converted.
    pub fn decode(&self, name: &str, raw: Option<&Value>) -> MetaResult<MetaValue> {
        let attr = self
            .attrs
            .get(name)
            .ok_or_else(|| MetaError::UnknownAttr(name.to_string()))?;
        let raw = match raw.or(attr.default.as_ref()) {
            Some(raw) => raw,
            None => return Err(MetaError::Missing(name.to_string())),
        };
        decode_value(name, &attr.logical, raw)
    }

    /// Converts a logical value to its persisted raw form.
    ///
    /// # Errors
    /// - `UnknownAttr` when the attribute is not declared.
    /// - `TypeMismatch` when the value does not match the declared type.
    pub fn encode(&self, name: &str, value: &MetaValue) -> MetaResult<Value> {
        let attr = self
            .attrs
            .get(name)
            .ok_or_else(|| MetaError::UnknownAttr(name.to_string()))?;
        encode_value(name, &attr.logical, value)
    }

    /// Returns the persisted keys not covered by any declared attribute and
    /// not in the reserved set, preserving input order.
    pub fn additional_keys<'a, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter()
            .filter(|key| !self.attrs.contains_key(*key) && !RESERVED_META_KEYS.contains(key))
            .map(str::to_string)
            .collect()
    }
}

fn mismatch(name: &str, logical: &LogicalType, raw: &Value) -> MetaError {
    MetaError::TypeMismatch {
        attr: name.to_string(),
        expected: logical.name(),
        raw: raw.clone(),
    }
}

fn decode_value(name: &str, logical: &LogicalType, raw: &Value) -> MetaResult<MetaValue> {
    match logical {
        LogicalType::Str => raw
            .as_str()
            .map(|s| MetaValue::Str(s.to_string()))
            .ok_or_else(|| mismatch(name, logical, raw)),
        LogicalType::Int => raw
            .as_i64()
            .map(MetaValue::Int)
            .ok_or_else(|| mismatch(name, logical, raw)),
        LogicalType::Float => raw
            .as_f64()
            .map(MetaValue::Float)
            .ok_or_else(|| mismatch(name, logical, raw)),
        LogicalType::Bool => raw
            .as_bool()
            .map(MetaValue::Bool)
            .ok_or_else(|| mismatch(name, logical, raw)),
        LogicalType::Date => raw
            .as_str()
            .and_then(|s| s.parse::<NaiveDate>().ok())
            .map(MetaValue::Date)
            .ok_or_else(|| mismatch(name, logical, raw)),
        LogicalType::DateTime => raw
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| MetaValue::DateTime(dt.with_timezone(&Utc)))
            .ok_or_else(|| mismatch(name, logical, raw)),
        LogicalType::Literal(options) => match raw.as_str() {
            Some(s) if options.iter().any(|option| option == s) => {
                Ok(MetaValue::Str(s.to_string()))
            }
            _ => Err(mismatch(name, logical, raw)),
        },
    }
}

fn encode_value(name: &str, logical: &LogicalType, value: &MetaValue) -> MetaResult<Value> {
    let raw = match (logical, value) {
        (LogicalType::Str, MetaValue::Str(s)) => Value::String(s.clone()),
        (LogicalType::Int, MetaValue::Int(i)) => Value::from(*i),
        (LogicalType::Float, MetaValue::Float(x)) => Value::from(*x),
        (LogicalType::Bool, MetaValue::Bool(b)) => Value::Bool(*b),
        (LogicalType::Date, MetaValue::Date(d)) => Value::String(d.to_string()),
        (LogicalType::DateTime, MetaValue::DateTime(dt)) => {
            Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        (LogicalType::Literal(options), MetaValue::Str(s)) => {
            if !options.iter().any(|option| option == s) {
                return Err(MetaError::TypeMismatch {
                    attr: name.to_string(),
                    expected: logical.name(),
                    raw: Value::String(s.clone()),
                });
            }
            Value::String(s.clone())
        }
        (_, other) => {
            return Err(MetaError::TypeMismatch {
                attr: name.to_string(),
                expected: logical.name(),
                raw: Value::String(other.type_name().to_string()),
            })
        }
    };
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                "started",
                AttrDescriptor::new("Started", LogicalType::DateTime, Visibility::Core),
            )
            .unwrap();
        registry
            .register(
                "run_count",
                AttrDescriptor::new("Run Count", LogicalType::Int, Visibility::Core)
                    .with_default(json!(0)),
            )
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register(
                "started",
                AttrDescriptor::new("Started", LogicalType::DateTime, Visibility::Core),
            )
            .unwrap_err();
        assert_eq!(err, MetaError::DuplicateAttr("started".to_string()));
    }

    #[test]
    fn decode_uses_declared_default() {
        let registry = registry();
        let value = registry.decode("run_count", None).unwrap();
        assert_eq!(value, MetaValue::Int(0));
    }

    #[test]
    fn decode_missing_without_default_fails() {
        let registry = registry();
        let err = registry.decode("started", None).unwrap_err();
        assert_eq!(err, MetaError::Missing("started".to_string()));
    }

    #[test]
    fn decode_rejects_non_iso_datetime() {
        let registry = registry();
        let err = registry
            .decode("started", Some(&json!("yesterday at noon")))
            .unwrap_err();
        assert!(matches!(err, MetaError::TypeMismatch { attr, .. } if attr == "started"));
    }

    #[test]
    fn datetime_round_trips_through_one_representation() {
        let registry = registry();
        let value = MetaValue::DateTime(Utc.with_ymd_and_hms(2024, 10, 10, 18, 48, 54).unwrap());
        let raw = registry.encode("started", &value).unwrap();
        assert_eq!(registry.decode("started", Some(&raw)).unwrap(), value);
    }

    #[test]
    fn additional_keys_skip_declared_and_reserved() {
        let registry = registry();
        let keys = registry.additional_keys(
            ["started", "description", "name", "operator", "run_count", "batch"].into_iter(),
        );
        assert_eq!(keys, vec!["operator".to_string(), "batch".to_string()]);
    }

    #[test]
    fn describe_marks_visibility_and_format() {
        let mut registry = registry();
        registry
            .register(
                "cache_seed",
                AttrDescriptor::new("Cache Seed", LogicalType::Str, Visibility::Private),
            )
            .unwrap();
        let schema = registry.describe();

        let started = &schema.properties["started"];
        assert_eq!(started.kind.as_deref(), Some("string"));
        assert_eq!(started.format.as_deref(), Some("date-time"));
        assert_eq!(started.field, Some(Visibility::Core));

        let seed = &schema.properties["cache_seed"];
        assert_eq!(seed.field, Some(Visibility::Private));

        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            json["properties"]["cache_seed"]["x-cas-field"],
            json!("private")
        );
    }
}
