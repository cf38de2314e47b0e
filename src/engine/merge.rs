// src/engine/merge.rs

use super::error::{EngineError, Result};
use super::mdataframe::MDataFrame;
use crate::core::value::{Document, Value};
use crate::query::ops::{self, UnwindOptions};
use crate::store::Database;

/// Which side's unmatched rows survive a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Key present on both sides
    pub on: Option<String>,
    pub left_on: Option<String>,
    pub right_on: Option<String>,
    pub how: JoinKind,
    /// Output collection, a fresh temporary one when unset
    pub target: Option<String>,
    /// Appended to left and right columns present on both sides
    pub suffixes: (String, String),
    /// Order the output by the left key
    pub sort: bool,
    /// Filter applied to the joined rows
    pub filter: Option<Document>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            on: None,
            left_on: None,
            right_on: None,
            how: JoinKind::Inner,
            target: None,
            suffixes: ("_x".to_string(), "_y".to_string()),
            sort: true,
            filter: None,
        }
    }
}

impl MergeOptions {
    pub fn on(mut self, key: &str) -> Self {
        self.on = Some(key.to_string());
        self
    }

    pub fn left_on(mut self, key: &str) -> Self {
        self.left_on = Some(key.to_string());
        self
    }

    pub fn right_on(mut self, key: &str) -> Self {
        self.right_on = Some(key.to_string());
        self
    }

    pub fn how(mut self, how: JoinKind) -> Self {
        self.how = how;
        self
    }

    pub fn target(mut self, name: &str) -> Self {
        self.target = Some(name.to_string());
        self
    }

    pub fn suffixes(mut self, left: &str, right: &str) -> Self {
        self.suffixes = (left.to_string(), right.to_string());
        self
    }

    pub fn sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    pub fn filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl MDataFrame {
    /// Join with another view of the same database into a new collection
    /// and return a view of it.
    ///
    /// Rows of `self` are filtered and windowed as usual; the right side is
    /// joined on its whole collection.
    pub fn merge(&self, right: &MDataFrame, options: MergeOptions) -> Result<MDataFrame> {
        if options.how == JoinKind::Right {
            let swapped = MergeOptions {
                left_on: options.right_on.clone(),
                right_on: options.left_on.clone(),
                how: JoinKind::Left,
                suffixes: (options.suffixes.1.clone(), options.suffixes.0.clone()),
                ..options
            };
            return right.merge(self, swapped);
        }
        let db = self.database();
        if db.name() != right.database().name() {
            return Err(EngineError::InvalidOp(format!(
                "cannot merge {} with {} from another database",
                self.name(),
                right.name()
            )));
        }
        let left_key = options
            .left_on
            .clone()
            .or_else(|| options.on.clone())
            .unwrap_or_else(|| "_id".to_string());
        let right_key = options
            .right_on
            .clone()
            .or_else(|| options.on.clone())
            .unwrap_or_else(|| "_id".to_string());
        let joined = format!("{}_{}", right.name().replace('.', "_"), right_key);

        let mut stages = self.window_stages()?;
        stages.push(ops::lookup(right.name(), &left_key, &right_key, Some(&joined)));
        stages.push(ops::unwind(
            &joined,
            UnwindOptions {
                preserve_null_and_empty: options.how == JoinKind::Left,
                include_index: false,
            },
        ));
        if options.sort {
            let mut order = Document::new();
            order.insert(left_key.clone(), Value::from(1));
            stages.push(ops::sort(order));
        }

        let on = options.on.as_deref();
        let mut projection = Document::new();
        let mut columns = Vec::new();
        for col in &self.columns {
            let name = if right.columns.contains(col) && Some(col.as_str()) != on {
                format!("{}{}", col, options.suffixes.0)
            } else {
                col.clone()
            };
            projection.insert(name.clone(), Value::String(format!("${}", col)));
            columns.push(name);
        }
        for col in &right.columns {
            if Some(col.as_str()) == on {
                continue;
            }
            let name = if self.columns.contains(col) {
                format!("{}{}", col, options.suffixes.1)
            } else {
                col.clone()
            };
            projection.insert(name.clone(), Value::String(format!("${}.{}", joined, col)));
            columns.push(name);
        }
        if !projection.contains_key("_id") {
            projection.insert("_id".to_string(), Value::from(0));
        }
        stages.push(ops::StageKind::Project.stage(Value::Object(projection)));
        if let Some(filter) = options.filter {
            stages.push(ops::match_stage(filter));
        }
        let target = options
            .target
            .unwrap_or_else(|| format!("_temp.merge.{}", uuid::Uuid::new_v4().simple()));
        stages.push(ops::out(&target));

        tracing::debug!(left = %self.name(), right = %right.name(), target = %target, "merge");
        self.aggregate(&stages)?;

        let names: Vec<&str> = columns.iter().map(String::as_str).collect();
        Ok(MDataFrame::new(db.collection(&target), self.config.clone())?.force_columns(&names))
    }
}
