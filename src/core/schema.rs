// src/core/schema.rs

use super::value::{DType, Value};
use serde::Serialize;
use std::collections::HashMap;

/// Column definition of a materialized frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }

    /// Check if a value is compatible with this field
    pub fn is_compatible(&self, value: &Value) -> bool {
        self.dtype.matches(value)
    }
}

/// Ordered set of fields with name lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
    #[serde(skip)]
    field_indices: HashMap<String, usize>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        let field_indices = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();

        Self {
            fields,
            field_indices,
        }
    }

    /// Get field by name
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.field_indices
            .get(name)
            .and_then(|&idx| self.fields.get(idx))
    }

    /// Get field index by name
    pub fn get_field_index(&self, name: &str) -> Option<usize> {
        self.field_indices.get(name).copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate that a row matches this schema
    pub fn validate(&self, values: &[Value]) -> Result<(), String> {
        if values.len() != self.fields.len() {
            return Err(format!(
                "Value count mismatch: expected {}, got {}",
                self.fields.len(),
                values.len()
            ));
        }

        for (i, (field, value)) in self.fields.iter().zip(values.iter()).enumerate() {
            if !field.is_compatible(value) {
                return Err(format!(
                    "Type mismatch at field '{}' (index {}): expected {}, got {}",
                    field.name,
                    i,
                    field.dtype,
                    DType::of(value)
                ));
            }
        }

        Ok(())
    }
}
