// src/apply/strings.rs

use super::context::{column_ref, ApplyContext};
use crate::core::config::Capability;
use crate::core::value::{Document, Value};
use crate::engine::error::Result;
use crate::store::doc;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Concat,
    /// split into an array, then one row per element
    Split,
    /// split into an array column
    USplit,
    Upper,
    Lower,
    Substr,
    StrCaseCmp,
    Len,
    Index,
}

#[derive(Clone, Copy)]
enum StrKind {
    /// `{$op: ["$col", terms...]}`
    Expr { unwind: bool, max_terms: Option<usize> },
    /// `{$op: "$col"}`
    Unary,
}

const STR_OPS: &[(StrOp, &str, StrKind)] = &[
    (StrOp::Concat, "$concat", StrKind::Expr { unwind: false, max_terms: None }),
    (StrOp::Split, "$split", StrKind::Expr { unwind: true, max_terms: Some(2) }),
    (StrOp::USplit, "$split", StrKind::Expr { unwind: false, max_terms: Some(2) }),
    (StrOp::Upper, "$toUpper", StrKind::Unary),
    (StrOp::Lower, "$toLower", StrKind::Unary),
    (StrOp::Substr, "$substr", StrKind::Expr { unwind: false, max_terms: None }),
    (StrOp::StrCaseCmp, "$strcasecmp", StrKind::Expr { unwind: false, max_terms: None }),
    (StrOp::Len, "$strLenBytes", StrKind::Unary),
    (StrOp::Index, "$indexOfBytes", StrKind::Expr { unwind: false, max_terms: None }),
];

fn spec_of(op: StrOp) -> (&'static str, StrKind) {
    STR_OPS
        .iter()
        .find(|(o, _, _)| *o == op)
        .map_or(("$concat", StrKind::Unary), |(_, name, kind)| (*name, *kind))
}

/// String operators over every column of the context.
///
/// String arguments naming a column become `$col` references, `$$text`
/// forces the literal `text`.
pub trait ApplyString {
    fn str_op(&mut self, op: StrOp, args: &[Value], columns: Option<&[&str]>) -> Result<&mut Self>;

    fn concat(&mut self, args: &[Value]) -> Result<&mut Self> {
        self.str_op(StrOp::Concat, args, None)
    }

    /// Split on a separator and emit one row per part
    fn split(&mut self, separator: &str) -> Result<&mut Self> {
        self.str_op(StrOp::Split, &[Value::from(separator)], None)
    }

    /// Split on a separator into an array
    fn usplit(&mut self, separator: &str) -> Result<&mut Self> {
        self.str_op(StrOp::USplit, &[Value::from(separator)], None)
    }

    fn upper(&mut self) -> Result<&mut Self> {
        self.str_op(StrOp::Upper, &[], None)
    }

    fn lower(&mut self) -> Result<&mut Self> {
        self.str_op(StrOp::Lower, &[], None)
    }

    fn substr(&mut self, start: i64, length: i64) -> Result<&mut Self> {
        self.str_op(StrOp::Substr, &[Value::from(start), Value::from(length)], None)
    }

    fn strcasecmp(&mut self, other: &str) -> Result<&mut Self> {
        self.str_op(StrOp::StrCaseCmp, &[Value::from(other)], None)
    }

    /// Byte length
    fn len(&mut self) -> Result<&mut Self> {
        self.str_op(StrOp::Len, &[], None)
    }

    fn index(&mut self, substring: &str) -> Result<&mut Self> {
        self.str_op(StrOp::Index, &[Value::from(substring)], None)
    }

    /// Case-insensitive equality as a boolean column
    fn isequal(&mut self, other: &str) -> Result<&mut Self>;
}

impl ApplyContext {
    fn str_term(&self, term: &Value) -> Value {
        match term {
            Value::String(s) => {
                let s = if self.columns.iter().any(|c| c == s) {
                    format!("${}", s)
                } else {
                    s.clone()
                };
                Value::String(s.replace("$$", ""))
            }
            other => other.clone(),
        }
    }
}

impl ApplyString for ApplyContext {
    fn str_op(&mut self, op: StrOp, args: &[Value], columns: Option<&[&str]>) -> Result<&mut Self> {
        self.require(Capability::Strings)?;
        let (operator, kind) = spec_of(op);
        let columns: Vec<String> = match columns {
            Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
            None => self.columns.clone(),
        };
        let terms: Vec<Value> = args.iter().map(|t| self.str_term(t)).collect();
        let mut mapping = Document::new();
        let mut unwind = false;
        for col in &columns {
            let expr = match kind {
                StrKind::Unary => column_ref(col),
                StrKind::Expr {
                    unwind: u,
                    max_terms,
                } => {
                    unwind = u;
                    let mut all: Vec<Value> = std::iter::once(column_ref(col))
                        .chain(terms.iter().cloned())
                        .collect();
                    if let Some(max) = max_terms {
                        all.truncate(max);
                    }
                    Value::Array(all)
                }
            };
            let mut op_doc = Document::new();
            op_doc.insert(operator.to_string(), expr);
            mapping.insert(col.clone(), Value::Object(op_doc));
        }
        self.project(mapping);
        if unwind {
            for col in &columns {
                self.add_stage(doc(json!({ "$unwind": { "path": format!("${}", col) } })));
            }
        }
        Ok(self)
    }

    fn isequal(&mut self, other: &str) -> Result<&mut Self> {
        self.strcasecmp(other)?;
        let mapping: Document = self
            .columns
            .iter()
            .map(|col| {
                (
                    col.clone(),
                    json!({"$cond": {"if": {"$eq": [format!("${}", col), 0]}, "then": true, "else": false}}),
                )
            })
            .collect();
        Ok(self.project(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(columns: &[&str]) -> ApplyContext {
        ApplyContext::new(
            columns.iter().map(|c| c.to_string()).collect(),
            Vec::new(),
            Capability::all(),
        )
    }

    fn stages(c: &ApplyContext) -> Value {
        Value::Array(c.stages().into_iter().map(Value::Object).collect())
    }

    #[test]
    fn test_concat_terms() {
        let mut c = ctx(&["a", "b"]);
        c.str_op(StrOp::Concat, &[json!("-"), json!("b")], Some(&["a"])).unwrap();
        assert_eq!(
            stages(&c),
            json!([{"$project": {"_id": 1, "a": {"$concat": ["$a", "-", "$b"]}}}])
        );
    }

    #[test]
    fn test_literal_escape() {
        let mut c = ctx(&["a", "b"]);
        c.str_op(StrOp::Concat, &[json!("$$b")], Some(&["a"])).unwrap();
        assert_eq!(
            stages(&c),
            json!([{"$project": {"_id": 1, "a": {"$concat": ["$a", "b"]}}}])
        );
    }

    #[test]
    fn test_split_unwinds() {
        let mut c = ctx(&["s"]);
        c.split(",").unwrap();
        assert_eq!(
            stages(&c),
            json!([
                {"$project": {"_id": 1, "s": {"$split": ["$s", ","]}}},
                {"$unwind": {"path": "$s"}}
            ])
        );
        let mut u = ctx(&["s"]);
        u.usplit(",").unwrap();
        assert_eq!(u.stages().len(), 1);
    }

    #[test]
    fn test_unary_and_isequal() {
        let mut c = ctx(&["s"]);
        c.upper().unwrap();
        assert_eq!(
            stages(&c),
            json!([{"$project": {"_id": 1, "s": {"$toUpper": "$s"}}}])
        );
        let mut e = ctx(&["s"]);
        e.isequal("abc").unwrap();
        let all = e.stages();
        assert_eq!(all.len(), 2);
        assert_eq!(
            Value::Object(all[0].clone()),
            json!({"$project": {"_id": 1, "s": {"$strcasecmp": ["$s", "abc"]}}})
        );
    }
}
