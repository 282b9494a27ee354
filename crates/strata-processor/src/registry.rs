//! Event type registry with supertypes.

use std::collections::BTreeMap;

use strata_core::error::{Error, Result};
use strata_core::schema::Field;

#[derive(Debug, Clone, PartialEq)]
pub struct EventType {
    pub name: String,
    pub fields: Vec<Field>,
    pub supertypes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, EventType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subtype must carry every field of each supertype with the same type.
    pub fn register(&mut self, name: &str, fields: &[Field], supertypes: &[String]) -> Result<()> {
        if self.types.contains_key(name) {
            return Err(Error::Processor(format!("type '{name}' is already registered")));
        }
        for sup in supertypes {
            let parent = self.types.get(sup).ok_or_else(|| {
                Error::Processor(format!("supertype '{sup}' of '{name}' is not registered"))
            })?;
            for pf in &parent.fields {
                let matches = fields
                    .iter()
                    .any(|f| f.name == pf.name && f.data_type == pf.data_type);
                if !matches {
                    return Err(Error::Processor(format!(
                        "type '{name}' lacks field '{}' of supertype '{sup}'",
                        pf.name
                    )));
                }
            }
        }
        self.types.insert(
            name.to_string(),
            EventType {
                name: name.to_string(),
                fields: fields.to_vec(),
                supertypes: supertypes.to_vec(),
            },
        );
        Ok(())
    }

    /// Fails while another type still lists `name` as a supertype.
    pub fn unregister(&mut self, name: &str) -> Result<bool> {
        if !self.types.contains_key(name) {
            return Ok(false);
        }
        if let Some(child) = self
            .types
            .values()
            .find(|t| t.supertypes.iter().any(|s| s == name))
        {
            return Err(Error::Processor(format!(
                "type '{name}' is still a supertype of '{}'",
                child.name
            )));
        }
        self.types.remove(name);
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<&EventType> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// `name` is `ancestor` or inherits from it, transitively.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        if name == ancestor {
            return true;
        }
        let mut stack = vec![name];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(t) = self.types.get(current) {
                for s in &t.supertypes {
                    if s == ancestor {
                        return true;
                    }
                    stack.push(s);
                }
            }
        }
        false
    }
}
