// src/apply/context.rs

use crate::core::config::Capability;
use crate::core::value::{Document, Value};
use crate::engine::error::{EngineError, Result};
use crate::query::ops::{self, stage_body, stage_body_mut, StageKind};

/// What an apply function hands back to the view
#[derive(Debug, Clone)]
pub enum ApplyOutput {
    /// Use the stages accumulated on the context
    Context,
    /// A literal pipeline
    Pipeline(Vec<Document>),
    /// One `$facet` branch per output column, evaluated in parallel by the store
    Facets(Vec<(String, FacetBranch)>),
}

#[derive(Debug, Clone)]
pub enum FacetBranch {
    /// A detached context; its first column is projected as the branch column
    Context(ApplyContext),
    Pipeline(Vec<Document>),
}

/// Group key selector for accumulator stages
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GroupKey {
    /// Reuse the most recent `$group` whatever its key, or group everything
    Last,
    By(Value),
}

#[derive(Debug, Clone)]
enum ContextStage {
    Stage(Document),
    Nested(ApplyContext),
}

/// Declarative pipeline builder handed to apply functions.
///
/// The context holds no data. Every call appends to or amends the stage list,
/// which the view executes on materialization.
///
/// ```ignore
/// mdf.apply(|ctx| {
///     ctx.project(doc(json!({"x2": {"$multiply": ["$x", 2]}})));
///     Ok(ApplyOutput::Context)
/// });
/// ```
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub columns: Vec<String>,
    pub index_columns: Vec<String>,
    /// Accumulator outputs that later projections must keep
    pub computed: Vec<String>,
    stages: Vec<ContextStage>,
    expressions: Vec<Document>,
    capabilities: Vec<Capability>,
}

impl ApplyContext {
    pub fn new(
        columns: Vec<String>,
        index_columns: Vec<String>,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            columns,
            index_columns,
            computed: Vec::new(),
            stages: Vec::new(),
            expressions: Vec::new(),
            capabilities,
        }
    }

    /// A detached context over some columns, e.g. for a facet branch
    pub fn branch(&self, columns: &[&str]) -> ApplyContext {
        ApplyContext::new(
            columns.iter().map(|c| c.to_string()).collect(),
            self.index_columns.clone(),
            self.capabilities.clone(),
        )
    }

    /// Build stages on a subset of columns; they run in place in this pipeline
    pub fn with_columns<F>(&mut self, columns: &[&str], f: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut ApplyContext) -> Result<()>,
    {
        let mut sub = self.branch(columns);
        f(&mut sub)?;
        self.stages.push(ContextStage::Nested(sub));
        Ok(self)
    }

    /// The pipeline built so far, nested contexts flattened in place
    pub fn stages(&self) -> Vec<Document> {
        let mut out = Vec::new();
        for stage in &self.stages {
            match stage {
                ContextStage::Stage(doc) => out.push(doc.clone()),
                ContextStage::Nested(ctx) => out.extend(ctx.stages()),
            }
        }
        out
    }

    /// Projection expressions in call order
    pub fn expressions(&self) -> &[Document] {
        &self.expressions
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub(crate) fn require(&self, capability: Capability) -> Result<()> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(EngineError::CapabilityDisabled(capability.name().to_string()))
        }
    }

    /// Append a raw stage
    pub fn add_stage(&mut self, stage: Document) -> &mut Self {
        self.stages.push(ContextStage::Stage(stage));
        self
    }

    /// Set one column to an expression
    pub fn assign(&mut self, column: &str, expr: Value) -> &mut Self {
        let mut mapping = Document::new();
        mapping.insert(column.to_string(), expr);
        self.project(mapping)
    }

    /// Add projections to the open `$project` stage.
    ///
    /// A key that the open stage already defines goes into a new `$project`
    /// stage, so later expressions see the values computed before them.
    pub fn project(&mut self, expr: Document) -> &mut Self {
        self.project_with(expr, false, false)
    }

    /// `project` with control over stage reuse: `append` always opens a new
    /// stage, `keep` skips keys that are already projected
    pub fn project_with(&mut self, expr: Document, append: bool, keep: bool) -> &mut Self {
        let mut idx = self.projection(append);
        self.expressions.push(expr.clone());
        for (key, value) in expr {
            let defined = self.project_body(idx).map_or(false, |p| p.contains_key(&key));
            if defined {
                if keep {
                    continue;
                }
                idx = self.projection(true);
            }
            if let Some(project) = self.project_body(idx) {
                project.insert(key, value);
            }
        }
        self
    }

    /// Re-project index and accumulator columns so they survive later stages
    pub fn project_keeper_columns(&mut self) -> &mut Self {
        let keep: Document = self
            .index_columns
            .iter()
            .chain(&self.computed)
            .map(|c| (c.clone(), Value::String(format!("${}", c))))
            .collect();
        self.project_with(keep, false, true)
    }

    /// Group by columns with the given accumulators, lift the group keys back
    /// to top-level columns and sort by them
    pub fn groupby(&mut self, by: &[&str], accumulators: Document) -> &mut Self {
        self.index_columns.extend(by.iter().map(|c| c.to_string()));
        let key = if by.is_empty() {
            Value::Null
        } else {
            Value::Object(
                by.iter()
                    .map(|c| (c.to_string(), Value::String(format!("${}", c))))
                    .collect(),
            )
        };
        let names: Vec<String> = accumulators.keys().cloned().collect();
        self.update_group(GroupKey::By(key), |group| group.extend(accumulators));

        let mut keep: Document = names
            .into_iter()
            .map(|name| (name, Value::from(1)))
            .collect();
        for col in by {
            keep.insert(col.to_string(), Value::String(format!("$_id.{}", col)));
        }
        self.project_with(keep, true, false);
        if !by.is_empty() {
            self.add_stage(ops::sort(
                by.iter().map(|c| (c.to_string(), Value::from(1))).collect(),
            ));
        }
        self
    }

    /// Amend the `$group` stage selected by `by`, opening one if needed
    pub(crate) fn update_group<F>(&mut self, by: GroupKey, f: F)
    where
        F: FnOnce(&mut Document),
    {
        let reuse = self.last_stage_of(StageKind::Group).filter(|&i| match &by {
            GroupKey::Last => true,
            GroupKey::By(key) => self
                .stage_doc(i)
                .and_then(|d| stage_body(d, StageKind::Group))
                .and_then(|body| body.get("_id"))
                == Some(key),
        });
        let idx = match reuse {
            Some(i) => i,
            None => {
                let id = match by {
                    GroupKey::Last => Value::Null,
                    GroupKey::By(key) => key,
                };
                let mut body = Document::new();
                body.insert("_id".to_string(), id);
                self.add_stage(StageKind::Group.stage(Value::Object(body)));
                self.stages.len() - 1
            }
        };
        if let Some(ContextStage::Stage(doc)) = self.stages.get_mut(idx) {
            if let Some(body) = stage_body_mut(doc, StageKind::Group) {
                f(body);
            }
        }
    }

    fn stage_doc(&self, idx: usize) -> Option<&Document> {
        match self.stages.get(idx) {
            Some(ContextStage::Stage(doc)) => Some(doc),
            _ => None,
        }
    }

    fn last_stage_of(&self, kind: StageKind) -> Option<usize> {
        self.stages.iter().rposition(|s| match s {
            ContextStage::Stage(doc) => StageKind::of(doc) == Some(kind),
            ContextStage::Nested(_) => false,
        })
    }

    /// Index of the projection to write to, reusing the most recent `$project`
    fn projection(&mut self, append: bool) -> usize {
        match self.last_stage_of(StageKind::Project) {
            Some(i) if !append => i,
            _ => {
                let mut body = Document::new();
                body.insert("_id".to_string(), Value::from(1));
                self.add_stage(StageKind::Project.stage(Value::Object(body)));
                self.stages.len() - 1
            }
        }
    }

    fn project_body(&mut self, idx: usize) -> Option<&mut Document> {
        match self.stages.get_mut(idx) {
            Some(ContextStage::Stage(doc)) => stage_body_mut(doc, StageKind::Project),
            _ => None,
        }
    }
}

/// `$col` reference to a column
pub(crate) fn column_ref(column: &str) -> Value {
    Value::String(format!("${}", column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::doc;
    use serde_json::json;

    fn ctx(columns: &[&str]) -> ApplyContext {
        ApplyContext::new(
            columns.iter().map(|c| c.to_string()).collect(),
            Vec::new(),
            Capability::all(),
        )
    }

    fn pipeline(ctx: &ApplyContext) -> Value {
        Value::Array(ctx.stages().into_iter().map(Value::Object).collect())
    }

    #[test]
    fn test_project_reuses_open_stage() {
        let mut c = ctx(&["x"]);
        c.project(doc(json!({"a": "$x"})));
        c.project(doc(json!({"b": "$x"})));
        assert_eq!(
            pipeline(&c),
            json!([{"$project": {"_id": 1, "a": "$x", "b": "$x"}}])
        );
    }

    #[test]
    fn test_project_opens_new_stage_for_defined_key() {
        let mut c = ctx(&["x"]);
        c.project(doc(json!({"x": {"$multiply": ["$x", 5]}})));
        c.project(doc(json!({"x": {"$add": ["$x", 1]}, "y": "$x"})));
        assert_eq!(
            pipeline(&c),
            json!([
                {"$project": {"_id": 1, "x": {"$multiply": ["$x", 5]}}},
                {"$project": {"_id": 1, "x": {"$add": ["$x", 1]}, "y": "$x"}}
            ])
        );
        assert_eq!(c.expressions().len(), 2);
    }

    #[test]
    fn test_keep_skips_defined_keys() {
        let mut c = ctx(&["x"]);
        c.project(doc(json!({"x": 1})));
        c.project_with(doc(json!({"x": "$x", "z": "$z"})), false, true);
        assert_eq!(pipeline(&c), json!([{"$project": {"_id": 1, "x": 1, "z": "$z"}}]));
    }

    #[test]
    fn test_groupby_restores_keys_and_sorts() {
        let mut c = ctx(&["x", "y"]);
        c.groupby(&["x"], doc(json!({"y_sum": {"$sum": "$y"}})));
        assert_eq!(
            pipeline(&c),
            json!([
                {"$group": {"_id": {"x": "$x"}, "y_sum": {"$sum": "$y"}}},
                {"$project": {"_id": 1, "y_sum": 1, "x": "$_id.x"}},
                {"$sort": {"x": 1}}
            ])
        );
        assert_eq!(c.index_columns, vec!["x".to_string()]);
    }

    #[test]
    fn test_accumulator_after_groupby_extends_key_projection() {
        let mut c = ctx(&["k", "x"]);
        c.groupby(&["k"], Document::new());
        c.update_group(GroupKey::Last, |g| {
            g.insert("x_max".to_string(), json!({"$max": "$x"}));
        });
        c.computed.push("x_max".to_string());
        c.project_keeper_columns();
        assert_eq!(
            pipeline(&c),
            json!([
                {"$group": {"_id": {"k": "$k"}, "x_max": {"$max": "$x"}}},
                {"$project": {"_id": 1, "k": "$_id.k", "x_max": "$x_max"}},
                {"$sort": {"k": 1}}
            ])
        );
    }

    #[test]
    fn test_update_group_reuses_last() {
        let mut c = ctx(&["x"]);
        c.update_group(GroupKey::Last, |g| {
            g.insert("a".to_string(), json!({"$sum": "$x"}));
        });
        c.update_group(GroupKey::Last, |g| {
            g.insert("b".to_string(), json!({"$max": "$x"}));
        });
        assert_eq!(
            pipeline(&c),
            json!([{"$group": {"_id": null, "a": {"$sum": "$x"}, "b": {"$max": "$x"}}}])
        );
    }

    #[test]
    fn test_nested_context_stages_flatten_in_place() {
        let mut c = ctx(&["x", "y"]);
        c.add_stage(doc(json!({"$match": {"x": {"$gt": 0}}})));
        c.with_columns(&["y"], |sub| {
            sub.assign("y", json!({"$abs": "$y"}));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            pipeline(&c),
            json!([
                {"$match": {"x": {"$gt": 0}}},
                {"$project": {"_id": 1, "y": {"$abs": "$y"}}}
            ])
        );
    }

    #[test]
    fn test_require_disabled_capability() {
        let c = ApplyContext::new(vec!["x".to_string()], Vec::new(), vec![Capability::Arithmetic]);
        assert!(c.require(Capability::Arithmetic).is_ok());
        assert!(matches!(
            c.require(Capability::Statistics),
            Err(EngineError::CapabilityDisabled(name)) if name == "statistics"
        ));
    }
}
