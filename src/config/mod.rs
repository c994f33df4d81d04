//! Configuration state records.
//!
//! A [`Config`] declares a name and typed fields. IR references
//! configuration state through `ReadConfig`/`WriteConfig`; the scheduling
//! ops `bind_config`, `write_config` and `delete_config` operate on
//! `(config, field)` pairs. `has_field` and `lookup` are the only
//! interfaces the engine consumes.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::ir::types::LoopType;

#[derive(Debug, Clone)]
pub struct Config {
    name: String,
    fields: IndexMap<String, LoopType>,
}

impl Config {
    pub fn new(name: &str, fields: impl IntoIterator<Item = (String, LoopType)>) -> Rc<Config> {
        Rc::new(Config {
            name: name.to_string(),
            fields: fields.into_iter().collect(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn lookup(&self, field: &str) -> Option<&LoopType> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &LoopType)> {
        self.fields.iter()
    }
}

/// Configs are compared by name: a config record is a named global, and
/// two records with the same name denote the same state.
impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup() {
        let cfg = Config::new("prec_cfg", [("p".to_string(), LoopType::Index)]);
        assert!(cfg.has_field("p"));
        assert_eq!(cfg.lookup("p"), Some(&LoopType::Index));
        assert!(!cfg.has_field("q"));
    }
}
