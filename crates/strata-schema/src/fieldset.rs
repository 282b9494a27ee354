//! FieldSet: a leveled, named set of typed fields.
//!
//! Fields are kept sorted by name, which is also the layout order of the
//! records `format` produces. A fieldset gets its type name from `bind`;
//! after that it is only ever replaced through `rebind`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use strata_core::error::{Error, Result};
use strata_core::hash::hash_parts;
use strata_core::schema::Field;
use strata_core::value::{Event, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Base,
    Query,
    Data,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Base => "base",
            Level::Query => "query",
            Level::Data => "data",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    target: String,
    level: Level,
    fields: BTreeMap<String, Field>,
    type_name: Option<String>,
    generation: u64,
    digest_len: usize,
}

impl FieldSet {
    pub fn new(target: impl Into<String>, level: Level, fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            target: target.into(),
            level,
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
            type_name: None,
            generation: 0,
            digest_len: 16,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Registered type name; empty until `bind`.
    pub fn type_name(&self) -> &str {
        self.type_name.as_deref().unwrap_or("")
    }

    pub fn is_bound(&self) -> bool {
        self.type_name.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Field definitions in record layout order.
    pub fn definition(&self) -> Vec<Field> {
        self.fields.values().cloned().collect()
    }

    /// Names of non-nullable fields, sorted.
    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.fields
            .values()
            .filter(|f| !f.nullable)
            .map(|f| f.name.as_str())
    }

    pub fn nullable_marks(&self) -> Vec<&str> {
        self.fields
            .values()
            .filter(|f| f.nullable)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Order-independent fingerprint over (name, type) pairs, ignoring
    /// nullability.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .fields
            .values()
            .map(|f| format!("{}:{}", f.name, f.data_type))
            .collect();
        hash_parts(&parts).to_hex()
    }

    /// Deduplication key within one level: summary plus nullable marks.
    pub fn identity(&self) -> (String, Vec<String>) {
        (
            self.summary(),
            self.nullable_marks().into_iter().map(str::to_string).collect(),
        )
    }

    /// Every field of `other` is present here with the same type.
    pub fn is_superset_of(&self, other: &FieldSet) -> bool {
        other.fields.values().all(|f| {
            self.fields
                .get(&f.name)
                .is_some_and(|mine| mine.data_type == f.data_type)
        })
    }

    /// Fields of `other` that this set lacks, as nullable definitions.
    pub fn nullable_diff(&self, other: &FieldSet) -> Vec<Field> {
        other
            .fields
            .values()
            .filter(|f| !self.fields.contains_key(&f.name))
            .map(|f| Field::nullable(f.name.clone(), f.data_type))
            .collect()
    }

    /// Add fields before binding. Existing names are left untouched.
    pub fn update(&mut self, fields: &[Field], nullable: bool) -> Result<()> {
        if self.is_bound() {
            return Err(Error::Invariant(format!(
                "fieldset {} is bound; use rebind to change it",
                self.type_name()
            )));
        }
        self.add(fields, nullable);
        Ok(())
    }

    fn add(&mut self, fields: &[Field], nullable: bool) {
        for f in fields {
            self.fields.entry(f.name.clone()).or_insert_with(|| Field {
                nullable: nullable || f.nullable,
                ..f.clone()
            });
        }
    }

    /// Assign the first type name.
    pub fn bind(mut self, digest_len: usize) -> FieldSet {
        self.digest_len = digest_len;
        self.type_name = Some(self.compute_type_name());
        self
    }

    /// A successor of this fieldset. Fields of `parent` missing here are
    /// added as nullable; with `update_type_name` the successor gets a fresh
    /// type name. `self` is left as it was.
    pub fn rebind(&self, update_type_name: bool, parent: Option<&FieldSet>) -> FieldSet {
        let mut next = self.clone();
        if let Some(p) = parent {
            let diff = next.nullable_diff(p);
            next.add(&diff, true);
        }
        if update_type_name {
            next.generation += 1;
            next.type_name = Some(next.compute_type_name());
        }
        next
    }

    fn compute_type_name(&self) -> String {
        let (summary, marks) = self.identity();
        let generation = self.generation.to_string();
        let mut parts = vec![
            self.target.as_str(),
            self.level.as_str(),
            summary.as_str(),
            generation.as_str(),
        ];
        parts.extend(marks.iter().map(String::as_str));
        let digest = hash_parts(&parts).short_hex(self.digest_len);
        format!("{}_{}_{}", self.target, self.level, digest)
    }

    /// Lay `event` out as a record of this fieldset.
    ///
    /// Values are coerced into the declared types where that is lossless;
    /// absent nullable fields become null.
    pub fn format(&self, event: &Event) -> Result<Record> {
        let mut record = Record::with_capacity(self.fields.len());
        for f in self.fields.values() {
            let value = match event.get(&f.name) {
                Some(v) if !v.is_null() => v.coerce(f.data_type).ok_or_else(|| Error::TypeMismatch {
                    field: f.name.clone(),
                    expected: f.data_type,
                    found: v.type_label().to_string(),
                })?,
                _ if f.nullable => Value::Null,
                _ => {
                    return Err(Error::MissingField {
                        target: self.target.clone(),
                        field: f.name.clone(),
                    })
                }
            };
            record.push(f.name.clone(), value);
        }
        Ok(record)
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.type_name())?;
        for (i, field) in self.fields.values().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str("]")
    }
}
