//! Tagged value union for semi-structured events.
//!
//! Events arrive as arbitrary string-keyed maps. They are converted into
//! `Event` (name → `Value`) at the boundary and validated against a fieldset
//! before being formatted into a `Record` for the processor.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Error, Result};
use crate::schema::FieldType;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

/// A generic, schema-less event as received from clients.
pub type Event = BTreeMap<String, Value>;

impl Value {
    /// The type a fresh field would be inferred as, `None` for null.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(FieldType::Boolean),
            Value::Int(_) => Some(FieldType::Int),
            Value::Long(_) => Some(FieldType::Long),
            Value::Float(_) => Some(FieldType::Float),
            Value::Double(_) => Some(FieldType::Double),
            Value::String(_) => Some(FieldType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_label(&self) -> &'static str {
        self.field_type().map(FieldType::as_str).unwrap_or("null")
    }

    /// Convert into `target` when the value is safely representable there.
    ///
    /// Integers widen into any numeric type; integral floating values narrow
    /// into integer types when in range. Strings and booleans never change type.
    pub fn coerce(&self, target: FieldType) -> Option<Value> {
        use FieldType as T;
        match (self, target) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Bool(b), T::Boolean) => Some(Value::Bool(*b)),
            (Value::String(s), T::String) => Some(Value::String(s.clone())),
            (Value::Int(i), T::Int) => Some(Value::Int(*i)),
            (Value::Int(i), T::Long) => Some(Value::Long(i64::from(*i))),
            (Value::Int(i), T::Float) => Some(Value::Float(*i as f32)),
            (Value::Int(i), T::Double) => Some(Value::Double(f64::from(*i))),
            (Value::Long(l), T::Int) => i32::try_from(*l).ok().map(Value::Int),
            (Value::Long(l), T::Long) => Some(Value::Long(*l)),
            (Value::Long(l), T::Float) => Some(Value::Float(*l as f32)),
            (Value::Long(l), T::Double) => Some(Value::Double(*l as f64)),
            (Value::Float(f), T::Float) => Some(Value::Float(*f)),
            (Value::Float(f), T::Double) => Some(Value::Double(f64::from(*f))),
            (Value::Float(f), T::Int | T::Long) => integral(f64::from(*f), target),
            (Value::Double(d), T::Double) => Some(Value::Double(*d)),
            (Value::Double(d), T::Float) => Some(Value::Float(*d as f32)),
            (Value::Double(d), T::Int | T::Long) => integral(*d, target),
            _ => None,
        }
    }

    /// Convert a JSON scalar. Objects and arrays are not representable.
    pub fn from_json(v: &serde_json::Value) -> Result<Value> {
        match v {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Long(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Double(f))
                } else {
                    Err(Error::InvalidEvent(format!("unrepresentable number {n}")))
                }
            }
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(
                Error::InvalidEvent("nested arrays and objects are not supported".into()),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Long(l) => serde_json::Value::from(*l),
            Value::Float(f) => serde_json::Value::from(f64::from(*f)),
            Value::Double(d) => serde_json::Value::from(*d),
            Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

fn integral(v: f64, target: FieldType) -> Option<Value> {
    if v.fract() != 0.0 || !v.is_finite() {
        return None;
    }
    match target {
        FieldType::Int if v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) => {
            Some(Value::Int(v as i32))
        }
        FieldType::Long if v >= i64::MIN as f64 && v < i64::MAX as f64 => Some(Value::Long(v as i64)),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Double(v) => write!(f, "{v:?}"),
            Value::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i32(*i),
            Value::Long(l) => serializer.serialize_i64(*l),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Convert a JSON object into an `Event`. JSON nulls are dropped: a null
/// field is indistinguishable from an absent one.
pub fn event_from_json(v: &serde_json::Value) -> Result<Event> {
    let obj = v
        .as_object()
        .ok_or_else(|| Error::InvalidEvent("event must be a JSON object".into()))?;
    let mut event = Event::new();
    for (k, v) in obj {
        if k.is_empty() {
            return Err(Error::InvalidEvent("empty field name".into()));
        }
        let value = Value::from_json(v).map_err(|e| match e {
            Error::InvalidEvent(msg) => Error::InvalidEvent(format!("field '{k}': {msg}")),
            other => other,
        })?;
        if !value.is_null() {
            event.insert(k.clone(), value);
        }
    }
    Ok(event)
}

/// A processor-native record: values laid out in a fieldset's declared order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            fields: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Back to a generic event; null entries are dropped.
    pub fn to_event(&self) -> Event {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(n, v)| (n.clone(), v.clone()))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (n, v) in &self.fields {
            map.serialize_entry(n, v)?;
        }
        map.end()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
