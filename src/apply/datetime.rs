// src/apply/datetime.rs

use super::context::{column_ref, ApplyContext};
use crate::core::config::Capability;
use crate::core::value::{Document, Value};
use crate::engine::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOp {
    Year,
    Month,
    Week,
    DayOfWeek,
    DayOfMonth,
    DayOfYear,
    Hour,
    Minute,
    Second,
    Millisecond,
    IsoDayOfWeek,
    IsoWeek,
    IsoWeekYear,
}

const DATE_OPS: &[(DateOp, &str)] = &[
    (DateOp::Year, "$year"),
    (DateOp::Month, "$month"),
    (DateOp::Week, "$week"),
    (DateOp::DayOfWeek, "$dayOfWeek"),
    (DateOp::DayOfMonth, "$dayOfMonth"),
    (DateOp::DayOfYear, "$dayOfYear"),
    (DateOp::Hour, "$hour"),
    (DateOp::Minute, "$minute"),
    (DateOp::Second, "$second"),
    (DateOp::Millisecond, "$millisecond"),
    (DateOp::IsoDayOfWeek, "$isoDayOfWeek"),
    (DateOp::IsoWeek, "$isoWeek"),
    (DateOp::IsoWeekYear, "$isoWeekYear"),
];

impl DateOp {
    pub fn operator(self) -> &'static str {
        DATE_OPS
            .iter()
            .find(|(op, _)| *op == self)
            .map_or("$year", |(_, name)| name)
    }
}

/// Date part extraction, `{col: {$op: "$col"}}` per column.
///
/// The accessors follow pandas' `.dt` names; `week` is the ISO week.
pub trait ApplyDateTime {
    fn date_part(&mut self, op: DateOp, columns: Option<&[&str]>) -> Result<&mut Self>;

    fn year(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::Year, None)
    }

    fn month(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::Month, None)
    }

    fn day(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::DayOfMonth, None)
    }

    fn hour(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::Hour, None)
    }

    fn minute(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::Minute, None)
    }

    fn second(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::Second, None)
    }

    fn millisecond(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::Millisecond, None)
    }

    fn week(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::IsoWeek, None)
    }

    fn dayofyear(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::DayOfYear, None)
    }

    fn dayofweek(&mut self) -> Result<&mut Self> {
        self.date_part(DateOp::DayOfWeek, None)
    }
}

impl ApplyDateTime for ApplyContext {
    fn date_part(&mut self, op: DateOp, columns: Option<&[&str]>) -> Result<&mut Self> {
        self.require(Capability::Datetime)?;
        let columns: Vec<String> = match columns {
            Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
            None => self.columns.clone(),
        };
        let mapping: Document = columns
            .iter()
            .map(|col| {
                let mut expr = Document::new();
                expr.insert(op.operator().to_string(), column_ref(col));
                (col.clone(), Value::Object(expr))
            })
            .collect();
        Ok(self.project(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_week_is_iso_week() {
        let mut c = ApplyContext::new(vec!["d".into()], Vec::new(), Capability::all());
        c.week().unwrap();
        assert_eq!(
            Value::Object(c.stages()[0].clone()),
            json!({"$project": {"_id": 1, "d": {"$isoWeek": "$d"}}})
        );
    }

    #[test]
    fn test_explicit_columns() {
        let mut c = ApplyContext::new(vec!["a".into(), "b".into()], Vec::new(), Capability::all());
        c.date_part(DateOp::Year, Some(&["b"])).unwrap();
        c.date_part(DateOp::Month, Some(&["a"])).unwrap();
        assert_eq!(
            Value::Object(c.stages()[0].clone()),
            json!({"$project": {"_id": 1, "b": {"$year": "$b"}, "a": {"$month": "$a"}}})
        );
    }
}
