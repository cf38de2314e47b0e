// src/apply/accumulators.rs

use super::context::{column_ref, ApplyContext, GroupKey};
use crate::core::config::Capability;
use crate::core::value::{Document, Value};
use crate::engine::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatOp {
    Sum,
    Avg,
    Mean,
    Min,
    Max,
    Std,
}

/// (op, name accepted by `agg`, accumulator, output suffix)
const STAT_OPS: &[(StatOp, &str, &str)] = &[
    (StatOp::Sum, "sum", "$sum"),
    (StatOp::Avg, "avg", "$avg"),
    (StatOp::Mean, "mean", "$avg"),
    (StatOp::Min, "min", "$min"),
    (StatOp::Max, "max", "$max"),
    (StatOp::Std, "std", "$stdDevSamp"),
];

impl StatOp {
    pub fn from_name(name: &str) -> Option<StatOp> {
        STAT_OPS
            .iter()
            .find(|(_, n, _)| *n == name)
            .map(|(op, _, _)| *op)
    }

    /// Suffix of the output column, `<col>_<name>`
    pub fn name(self) -> &'static str {
        STAT_OPS
            .iter()
            .find(|(op, _, _)| *op == self)
            .map_or("sum", |(_, n, _)| n)
    }

    pub fn accumulator(self) -> &'static str {
        STAT_OPS
            .iter()
            .find(|(op, _, _)| *op == self)
            .map_or("$sum", |(_, _, acc)| acc)
    }
}

/// One `agg` specification for an output column
#[derive(Debug, Clone, PartialEq)]
pub enum AggSpec {
    /// An accumulator expression used as is, e.g. `{"$sum": "$y"}`
    Expr(Value),
    /// Named statistics of the column, e.g. `["sum", "max"]`
    Ops(Vec<String>),
}

/// Accumulators on the most recent `$group`, or on a new whole-collection group
pub trait ApplyAccumulators {
    fn stat(&mut self, op: StatOp, columns: Option<&[&str]>) -> Result<&mut Self>;

    fn agg(&mut self, specs: Vec<(String, AggSpec)>) -> Result<&mut Self>;

    fn sum(&mut self) -> Result<&mut Self> {
        self.stat(StatOp::Sum, None)
    }

    fn avg(&mut self) -> Result<&mut Self> {
        self.stat(StatOp::Avg, None)
    }

    fn mean(&mut self) -> Result<&mut Self> {
        self.stat(StatOp::Mean, None)
    }

    fn min(&mut self) -> Result<&mut Self> {
        self.stat(StatOp::Min, None)
    }

    fn max(&mut self) -> Result<&mut Self> {
        self.stat(StatOp::Max, None)
    }

    fn std(&mut self) -> Result<&mut Self> {
        self.stat(StatOp::Std, None)
    }
}

impl ApplyAccumulators for ApplyContext {
    fn stat(&mut self, op: StatOp, columns: Option<&[&str]>) -> Result<&mut Self> {
        self.require(Capability::Accumulators)?;
        let columns: Vec<String> = match columns {
            Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
            None => self.columns.clone(),
        };
        let mut computed = Vec::new();
        self.update_group(GroupKey::Last, |group| {
            for col in &columns {
                let mut acc = Document::new();
                acc.insert(op.accumulator().to_string(), column_ref(col));
                group.insert(format!("{}_{}", col, op.name()), Value::Object(acc));
            }
            computed.extend(group.keys().filter(|k| *k != "_id").cloned());
        });
        for name in computed {
            if !self.computed.contains(&name) {
                self.computed.push(name);
            }
        }
        Ok(self.project_keeper_columns())
    }

    fn agg(&mut self, specs: Vec<(String, AggSpec)>) -> Result<&mut Self> {
        self.require(Capability::Accumulators)?;
        for (col, spec) in specs {
            match spec {
                AggSpec::Expr(expr) => {
                    self.update_group(GroupKey::Last, |group| {
                        group.insert(col.clone(), expr);
                    });
                    if !self.computed.contains(&col) {
                        self.computed.push(col);
                    }
                }
                AggSpec::Ops(names) => {
                    for name in names {
                        let op = StatOp::from_name(&name).ok_or_else(|| {
                            EngineError::Compile(format!("{} is not a known statistic", name))
                        })?;
                        self.stat(op, Some(&[col.as_str()]))?;
                    }
                }
            }
        }
        Ok(self)
    }
}
