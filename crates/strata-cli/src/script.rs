//! YAML session scripts: a list of admin operations replayed against an
//! `Engine`.
//!
//! Example:
//! ```yaml
//! config:
//!   default_auto_field: true
//! steps:
//!   - op: open
//!     target: access
//!     fields: [ {name: status, type: long} ]
//!   - op: register
//!     name: errors
//!     expression: "select path from access where status >= 500"
//!   - op: send
//!     target: access
//!     events: [ {status: 503, path: "/"}, {status: 200, path: "/ok"} ]
//!   - op: pop
//!     query: errors
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use strata_core::config::EngineConfig;
use strata_core::error::Result;
use strata_core::schema::{Field, FieldType};
use strata_core::value::event_from_json;
use strata_engine::Engine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub config: ScriptConfig,
    pub steps: Vec<Entry>,
}

/// Engine settings a script may carry. Applied over the environment and
/// under command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub default_auto_field: Option<bool>,
    pub max_loopback_rounds: Option<usize>,
    pub output_pool_limit: Option<usize>,
    pub type_name_digest_len: Option<usize>,
}

impl ScriptConfig {
    pub fn apply(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.default_auto_field {
            cfg.default_auto_field = v;
        }
        if let Some(v) = self.max_loopback_rounds {
            cfg.max_loopback_rounds = v;
        }
        if let Some(v) = self.output_pool_limit {
            cfg.output_pool_limit = Some(v);
        }
        if let Some(v) = self.type_name_digest_len {
            cfg.type_name_digest_len = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    #[serde(flatten)]
    pub step: Step,
    /// The step must fail with a client error; the script goes on.
    #[serde(default)]
    pub expect_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum Step {
    Open {
        target: String,
        #[serde(default)]
        fields: Option<Vec<FieldDef>>,
        #[serde(default = "default_true")]
        auto_field: bool,
    },
    Close {
        target: String,
    },
    Modify {
        target: String,
        auto_field: bool,
    },
    Reserve {
        target: String,
        field: String,
        #[serde(rename = "type")]
        data_type: String,
    },
    Register {
        name: String,
        #[serde(default)]
        group: Option<String>,
        expression: String,
    },
    Deregister {
        name: String,
    },
    Replace {
        name: String,
        #[serde(default)]
        group: Option<String>,
        expression: String,
    },
    Suspend {
        name: String,
    },
    Resume {
        name: String,
    },
    Send {
        target: String,
        events: Vec<Json>,
    },
    Fields {
        target: String,
    },
    Targets,
    Queries,
    Pop {
        query: String,
    },
    Sweep {
        #[serde(default)]
        group: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDef {
    fn to_field(&self) -> Result<Field> {
        let data_type: FieldType = self.data_type.parse()?;
        Ok(Field::new(self.name.clone(), data_type, self.nullable))
    }
}

pub fn parse_script(src: &str) -> std::result::Result<Script, serde_yaml::Error> {
    serde_yaml::from_str(src)
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::Open { .. } => "open",
            Step::Close { .. } => "close",
            Step::Modify { .. } => "modify",
            Step::Reserve { .. } => "reserve",
            Step::Register { .. } => "register",
            Step::Deregister { .. } => "deregister",
            Step::Replace { .. } => "replace",
            Step::Suspend { .. } => "suspend",
            Step::Resume { .. } => "resume",
            Step::Send { .. } => "send",
            Step::Fields { .. } => "fields",
            Step::Targets => "targets",
            Step::Queries => "queries",
            Step::Pop { .. } => "pop",
            Step::Sweep { .. } => "sweep",
        }
    }

    /// Run against `engine`; the JSON result is what the step reports.
    pub fn execute(&self, engine: &Engine) -> Result<Json> {
        Ok(match self {
            Step::Open {
                target,
                fields,
                auto_field,
            } => {
                let fields = fields
                    .as_ref()
                    .map(|defs| defs.iter().map(FieldDef::to_field).collect::<Result<Vec<_>>>())
                    .transpose()?;
                json!(engine.open(target, fields.as_deref(), *auto_field)?)
            }
            Step::Close { target } => json!(engine.close(target)?),
            Step::Modify { target, auto_field } => json!(engine.modify(target, *auto_field)?),
            Step::Reserve {
                target,
                field,
                data_type,
            } => json!(engine.reserve(target, field, data_type.parse()?)?),
            Step::Register {
                name,
                group,
                expression,
            } => serde_json::to_value(engine.register(name, group.as_deref(), expression)?)?,
            Step::Deregister { name } => json!(engine.deregister(name)?),
            Step::Replace {
                name,
                group,
                expression,
            } => {
                let (replaced, state) = engine.replace(name, group.as_deref(), expression)?;
                json!({ "replaced": replaced, "state": state })
            }
            Step::Suspend { name } => json!(engine.suspend(name)?),
            Step::Resume { name } => json!(engine.resume(name)?),
            Step::Send { target, events } => {
                let events = events
                    .iter()
                    .map(event_from_json)
                    .collect::<Result<Vec<_>>>()?;
                serde_json::to_value(engine.send(target, &events)?)?
            }
            Step::Fields { target } => serde_json::to_value(engine.fields(target))?,
            Step::Targets => serde_json::to_value(engine.targets())?,
            Step::Queries => serde_json::to_value(engine.queries())?,
            Step::Pop { query } => serde_json::to_value(engine.output().pop(query))?,
            Step::Sweep { group } => serde_json::to_value(engine.output().sweep(group.as_deref()))?,
        })
    }
}
