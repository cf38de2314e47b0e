// src/engine/loc.rs

use super::error::{EngineError, Result};
use super::mdataframe::MDataFrame;
use crate::core::frame::ROWID;
use crate::core::value::{Document, Value};
use serde_json::json;

/// Label selector for one index level (or, past the index levels, a column)
#[derive(Debug, Clone, PartialEq)]
pub enum Loc {
    At(Value),
    In(Vec<Value>),
    /// Inclusive on both ends
    Between(Value, Value),
    All,
}

impl From<Value> for Loc {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Loc::In(items),
            other => Loc::At(other),
        }
    }
}

impl From<&str> for Loc {
    fn from(value: &str) -> Self {
        Loc::At(Value::from(value))
    }
}

impl From<i64> for Loc {
    fn from(value: i64) -> Self {
        Loc::At(Value::from(value))
    }
}

impl From<std::ops::RangeInclusive<i64>> for Loc {
    fn from(range: std::ops::RangeInclusive<i64>) -> Self {
        Loc::Between(Value::from(*range.start()), Value::from(*range.end()))
    }
}

impl MDataFrame {
    /// Select rows by index labels, one selector per index level in order.
    /// Selectors beyond the index levels select columns.
    pub fn loc(&self, specs: &[Loc]) -> Result<MDataFrame> {
        let levels = self.index_fields();
        let mut criteria = Document::new();
        for (field, spec) in levels.iter().zip(specs) {
            let condition = match spec {
                Loc::At(v) => v.clone(),
                Loc::In(values) => json!({ "$in": values }),
                Loc::Between(lo, hi) => json!({ "$gte": lo, "$lte": hi }),
                Loc::All => continue,
            };
            criteria.insert(field.clone(), condition);
        }
        let mut view = self.clone();
        view.narrow(criteria);
        if specs.len() <= levels.len() {
            return Ok(view);
        }
        let mut columns = Vec::new();
        for spec in &specs[levels.len()..] {
            match spec {
                Loc::At(Value::String(c)) => columns.push(c.clone()),
                Loc::In(items) => {
                    for item in items {
                        match item {
                            Value::String(c) => columns.push(c.clone()),
                            other => {
                                return Err(EngineError::InvalidOp(format!(
                                    "{} is not a column name",
                                    other
                                )))
                            }
                        }
                    }
                }
                Loc::All => {}
                other => {
                    return Err(EngineError::InvalidOp(format!(
                        "{:?} does not select columns",
                        other
                    )))
                }
            }
        }
        if columns.is_empty() {
            return Ok(view);
        }
        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        view.select(&names)
    }

    /// Select rows by position, `stop` exclusive
    pub fn iloc(&self, start: usize, stop: Option<usize>) -> Result<MDataFrame> {
        if let Some(stop) = stop {
            if stop < start {
                return Err(EngineError::InvalidOp(format!(
                    "iloc stop {} is before start {}",
                    stop, start
                )));
            }
        }
        if self.has_rowid && self.filter_criteria.is_empty() && self.skip_topn.is_none() {
            let mut range = Document::new();
            range.insert("$gte".to_string(), Value::from(start as u64));
            if let Some(stop) = stop {
                range.insert("$lt".to_string(), Value::from(stop as u64));
            }
            let mut criteria = Document::new();
            criteria.insert(ROWID.to_string(), Value::Object(range));
            let mut view = self.clone();
            view.narrow(criteria);
            return Ok(view);
        }
        let view = self.clone().skip(self.skip_topn.unwrap_or(0) + start);
        Ok(match stop {
            Some(stop) => view.head(stop - start),
            None => view,
        })
    }

    /// Stored fields addressed by `loc`: explicit index columns, the stored
    /// multi-index, or the row id
    pub(crate) fn index_fields(&self) -> Vec<String> {
        if !self.index_columns.is_empty() {
            self.index_columns.clone()
        } else if !self.stored_index.is_empty() {
            self.stored_index.clone()
        } else {
            vec![ROWID.to_string()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::store::{doc, Collection, Database, MemoryDatabase};
    use std::sync::Arc;

    fn view() -> MDataFrame {
        let db = MemoryDatabase::new("test").handle();
        let coll = db.collection("l");
        coll.insert_many(
            (0..10)
                .map(|i| doc(json!({"_om#rowid": i, "k": format!("k{}", i), "x": i * 10})))
                .collect(),
        )
        .unwrap();
        MDataFrame::new(coll, Arc::new(EngineConfig::default())).unwrap()
    }

    #[test]
    fn test_loc_on_set_index() {
        let mdf = view().set_index(&["k"]);
        let frame = mdf.loc(&[Loc::from("k3")]).unwrap().value().unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.get(0, "x"), Some(&json!(30)));
        let many = mdf.loc(&[Loc::from(json!(["k1", "k2"])), Loc::from("x")]).unwrap();
        assert_eq!(many.columns(), &["x".to_string()]);
        assert_eq!(many.len().unwrap(), 2);
    }

    #[test]
    fn test_loc_defaults_to_rowid() {
        let frame = view().loc(&[Loc::from(2..=4)]).unwrap().value().unwrap();
        assert_eq!(frame.column("k").unwrap(), vec![json!("k2"), json!("k3"), json!("k4")]);
    }

    #[test]
    fn test_iloc() {
        let mdf = view();
        assert_eq!(mdf.iloc(7, None).unwrap().len().unwrap(), 3);
        let frame = mdf.iloc(1, Some(3)).unwrap().value().unwrap();
        assert_eq!(frame.column("x").unwrap(), vec![json!(10), json!(20)]);
        assert!(mdf.iloc(3, Some(1)).is_err());
    }
}
