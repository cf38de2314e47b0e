// src/apply/arith.rs

use super::context::{column_ref, ApplyContext};
use crate::core::config::Capability;
use crate::core::value::{Document, Value};
use crate::engine::error::Result;

/// A right-hand term of an arithmetic operator
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Value(Value),
}

impl Operand {
    fn term(&self) -> Value {
        match self {
            Operand::Column(c) => column_ref(c),
            Operand::Value(v) => v.clone(),
        }
    }
}

impl From<&str> for Operand {
    fn from(column: &str) -> Self {
        Operand::Column(column.to_string())
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Value(Value::from(v))
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Multiply,
    Add,
    Subtract,
    Divide,
    FloorDiv,
    Mod,
    Pow,
    Ceil,
    Floor,
    Trunc,
    Abs,
    Sqrt,
}

struct ArithSpec {
    op: ArithOp,
    operator: &'static str,
    unary: bool,
    wrap: Option<&'static str>,
}

const ARITH_OPS: &[ArithSpec] = &[
    ArithSpec { op: ArithOp::Multiply, operator: "$multiply", unary: false, wrap: None },
    ArithSpec { op: ArithOp::Add, operator: "$add", unary: false, wrap: None },
    ArithSpec { op: ArithOp::Subtract, operator: "$subtract", unary: false, wrap: None },
    ArithSpec { op: ArithOp::Divide, operator: "$divide", unary: false, wrap: None },
    ArithSpec { op: ArithOp::FloorDiv, operator: "$divide", unary: false, wrap: Some("$floor") },
    ArithSpec { op: ArithOp::Mod, operator: "$mod", unary: false, wrap: None },
    ArithSpec { op: ArithOp::Pow, operator: "$pow", unary: false, wrap: None },
    ArithSpec { op: ArithOp::Ceil, operator: "$ceil", unary: true, wrap: None },
    ArithSpec { op: ArithOp::Floor, operator: "$floor", unary: true, wrap: None },
    ArithSpec { op: ArithOp::Trunc, operator: "$trunc", unary: true, wrap: None },
    ArithSpec { op: ArithOp::Abs, operator: "$abs", unary: true, wrap: None },
    ArithSpec { op: ArithOp::Sqrt, operator: "$sqrt", unary: true, wrap: None },
];

fn spec_of(op: ArithOp) -> &'static ArithSpec {
    ARITH_OPS
        .iter()
        .find(|s| s.op == op)
        .unwrap_or(&ARITH_OPS[0])
}

/// Element-wise math over every column of the context.
///
/// Each call projects `{col: {$op: ["$col", terms...]}}` for all columns and
/// carries the index columns along.
pub trait ApplyArithmetic {
    fn arith(&mut self, op: ArithOp, terms: &[Operand]) -> Result<&mut Self>;

    fn mul(&mut self, other: impl Into<Operand>) -> Result<&mut Self> {
        self.arith(ArithOp::Multiply, &[other.into()])
    }

    fn add(&mut self, other: impl Into<Operand>) -> Result<&mut Self> {
        self.arith(ArithOp::Add, &[other.into()])
    }

    fn sub(&mut self, other: impl Into<Operand>) -> Result<&mut Self> {
        self.arith(ArithOp::Subtract, &[other.into()])
    }

    fn div(&mut self, other: impl Into<Operand>) -> Result<&mut Self> {
        self.arith(ArithOp::Divide, &[other.into()])
    }

    fn floordiv(&mut self, other: impl Into<Operand>) -> Result<&mut Self> {
        self.arith(ArithOp::FloorDiv, &[other.into()])
    }

    fn modulo(&mut self, other: impl Into<Operand>) -> Result<&mut Self> {
        self.arith(ArithOp::Mod, &[other.into()])
    }

    fn pow(&mut self, other: impl Into<Operand>) -> Result<&mut Self> {
        self.arith(ArithOp::Pow, &[other.into()])
    }

    fn ceil(&mut self) -> Result<&mut Self> {
        self.arith(ArithOp::Ceil, &[])
    }

    fn floor(&mut self) -> Result<&mut Self> {
        self.arith(ArithOp::Floor, &[])
    }

    fn trunc(&mut self) -> Result<&mut Self> {
        self.arith(ArithOp::Trunc, &[])
    }

    fn abs(&mut self) -> Result<&mut Self> {
        self.arith(ArithOp::Abs, &[])
    }

    fn sqrt(&mut self) -> Result<&mut Self> {
        self.arith(ArithOp::Sqrt, &[])
    }
}

impl ApplyArithmetic for ApplyContext {
    fn arith(&mut self, op: ArithOp, terms: &[Operand]) -> Result<&mut Self> {
        self.require(Capability::Arithmetic)?;
        let spec = spec_of(op);
        let mut mapping = Document::new();
        for col in &self.columns {
            let args = if spec.unary {
                column_ref(col)
            } else {
                Value::Array(
                    std::iter::once(column_ref(col))
                        .chain(terms.iter().map(Operand::term))
                        .collect(),
                )
            };
            let mut expr = Document::new();
            expr.insert(spec.operator.to_string(), args);
            let expr = match spec.wrap {
                Some(wrap) => {
                    let mut outer = Document::new();
                    outer.insert(wrap.to_string(), Value::Object(expr));
                    outer
                }
                None => expr,
            };
            mapping.insert(col.clone(), Value::Object(expr));
        }
        for col in &self.index_columns {
            mapping.insert(col.clone(), column_ref(col));
        }
        Ok(self.project(mapping))
    }
}
