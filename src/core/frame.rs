// src/core/frame.rs

use super::schema::{Field, Schema};
use super::value::{compare_values, value_key, DType, Document, Value};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Insertion-order row id stamped on stored documents
pub const ROWID: &str = "_om#rowid";
/// Prefix of engine-internal columns, never surfaced as data
pub const OM_PREFIX: &str = "_om#";
/// Prefix of flattened index columns, `_idx#<n>_<name>`
pub const IDX_PREFIX: &str = "_idx#";

/// Name of the n-th flattened index column
pub fn idx_column(n: usize, name: &str) -> String {
    format!("{}{}_{}", IDX_PREFIX, n, name)
}

/// Split `_idx#<n>_<name>` into its position and name
pub fn parse_idx_column(column: &str) -> Option<(usize, String)> {
    let rest = column.strip_prefix(IDX_PREFIX)?;
    let (n, name) = rest.split_once('_')?;
    Some((n.parse().ok()?, name.to_string()))
}

/// Whether a stored column name is reserved by the engine
pub fn is_reserved(column: &str) -> bool {
    column == "_id" || column.starts_with(OM_PREFIX) || column.starts_with(IDX_PREFIX)
}

/// A materialized row: index values followed by column values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub index: Vec<Value>,
    pub values: Vec<Value>,
}

/// Options for rebuilding a frame from stored documents
#[derive(Debug, Clone, Default)]
pub struct FrameOptions {
    /// Index names to use instead of those encoded in `_idx#` columns
    pub index_names: Option<Vec<String>>,
    /// Restore insertion order from `_om#rowid`
    pub rowid_sort: bool,
    /// Keep `_id`
    pub raw: bool,
    /// Columns that must exist, filled with nulls when absent
    pub force_columns: Vec<String>,
}

/// Materialized tabular value: an optional (multi-)index plus typed columns.
///
/// An empty index schema means a positional index `0..len`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub index: Schema,
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl Frame {
    /// Create an empty frame with the given columns
    pub fn new(columns: &[&str]) -> Self {
        Self {
            index: Schema::default(),
            schema: Schema::new(columns.iter().map(|c| Field::new(*c, DType::Null)).collect()),
            rows: Vec::new(),
        }
    }

    /// Build a frame from explicit rows; dtypes are inferred
    pub fn from_rows(
        index_names: Vec<String>,
        columns: Vec<String>,
        rows: Vec<Row>,
    ) -> Result<Self, String> {
        for (i, row) in rows.iter().enumerate() {
            if row.index.len() != index_names.len() || row.values.len() != columns.len() {
                return Err(format!(
                    "Row {} has {} index and {} column values, expected {} and {}",
                    i,
                    row.index.len(),
                    row.values.len(),
                    index_names.len(),
                    columns.len()
                ));
            }
        }
        let index = infer_schema(&index_names, &rows, |r| &r.index);
        let schema = infer_schema(&columns, &rows, |r| &r.values);
        Ok(Self {
            index,
            schema,
            rows,
        })
    }

    /// Rebuild a frame from stored documents.
    ///
    /// `_id` is dropped unless `raw`, `_om#` columns are dropped after an
    /// optional insertion-order restore, and `_idx#<n>_<name>` columns become
    /// the index in `n` order.
    pub fn from_documents(docs: Vec<Document>, options: &FrameOptions) -> Self {
        let mut docs = docs;
        if options.rowid_sort && !docs.is_empty() && docs.iter().all(|d| d.contains_key(ROWID)) {
            docs.sort_by(|a, b| compare_values(&a[ROWID], &b[ROWID]));
        }

        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for doc in &docs {
            for key in doc.keys() {
                if (key == "_id" && !options.raw) || key.starts_with(OM_PREFIX) {
                    continue;
                }
                if seen.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }

        let mut idx_cols: Vec<(usize, String, String)> = names
            .iter()
            .filter_map(|n| parse_idx_column(n).map(|(pos, name)| (pos, name, n.clone())))
            .collect();
        idx_cols.sort_by_key(|(pos, _, _)| *pos);
        let mut columns: Vec<String> = names
            .into_iter()
            .filter(|n| !n.starts_with(IDX_PREFIX))
            .collect();
        for forced in &options.force_columns {
            if !columns.contains(forced) {
                columns.push(forced.clone());
            }
        }

        let index_names: Vec<String> = idx_cols
            .iter()
            .enumerate()
            .map(|(i, (_, name, _))| {
                options
                    .index_names
                    .as_ref()
                    .and_then(|names| names.get(i).cloned())
                    .unwrap_or_else(|| name.clone())
            })
            .collect();

        let rows: Vec<Row> = docs
            .iter()
            .map(|doc| Row {
                index: idx_cols
                    .iter()
                    .map(|(_, _, stored)| doc.get(stored).cloned().unwrap_or(Value::Null))
                    .collect(),
                values: columns
                    .iter()
                    .map(|c| doc.get(c).cloned().unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();

        let index = infer_schema(&index_names, &rows, |r| &r.index);
        let schema = infer_schema(&columns, &rows, |r| &r.values);
        Self {
            index,
            schema,
            rows,
        }
    }

    /// Flatten into storable documents: the index is unravelled into
    /// `_idx#` columns and every row is stamped with `_om#rowid`.
    pub fn to_documents(&self, row_offset: usize) -> Vec<Document> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut doc = Document::new();
                for (n, (field, value)) in self.index.fields.iter().zip(&row.index).enumerate() {
                    doc.insert(idx_column(n, &field.name), value.clone());
                }
                for (field, value) in self.schema.fields.iter().zip(&row.values) {
                    doc.insert(field.name.clone(), value.clone());
                }
                doc.insert(ROWID.to_string(), Value::from((row_offset + i) as u64));
                doc
            })
            .collect()
    }

    /// Rows as plain documents, index fields first, no engine columns
    pub fn to_records(&self) -> Vec<Document> {
        self.rows
            .iter()
            .map(|row| {
                self.index
                    .fields
                    .iter()
                    .zip(&row.index)
                    .chain(self.schema.fields.iter().zip(&row.values))
                    .map(|(f, v)| (f.name.clone(), v.clone()))
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.schema.len())
    }

    pub fn columns(&self) -> Vec<String> {
        self.schema.names()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.index.names()
    }

    pub fn dtype(&self, column: &str) -> Option<DType> {
        self.schema.get_field(column).map(|f| f.dtype)
    }

    /// Index values of a row; positional frames report the row number
    pub fn index_of(&self, row: usize) -> Vec<Value> {
        match self.rows.get(row) {
            Some(r) if !self.index.is_empty() => r.index.clone(),
            Some(_) => vec![Value::from(row as u64)],
            None => Vec::new(),
        }
    }

    /// Get one value by row position and column name
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.schema.get_field_index(column)?;
        self.rows.get(row).and_then(|r| r.values.get(idx))
    }

    /// Get all values of a column (or of an index level)
    pub fn column(&self, name: &str) -> Result<Vec<Value>, String> {
        if let Some(idx) = self.schema.get_field_index(name) {
            return Ok(self.rows.iter().map(|r| r.values[idx].clone()).collect());
        }
        if let Some(idx) = self.index.get_field_index(name) {
            return Ok(self.rows.iter().map(|r| r.index[idx].clone()).collect());
        }
        Err(format!("Column '{}' not found", name))
    }

    /// Numeric values of a column, skipping non-numbers
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>, String> {
        Ok(self
            .column(name)?
            .iter()
            .filter_map(super::value::as_f64)
            .collect())
    }

    /// Project to a subset of columns, keeping the index
    pub fn select(&self, columns: &[&str]) -> Result<Self, String> {
        let indices = columns
            .iter()
            .map(|c| {
                self.schema
                    .get_field_index(c)
                    .ok_or_else(|| format!("Column '{}' not found", c))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let schema = Schema::new(indices.iter().map(|&i| self.schema.fields[i].clone()).collect());
        let rows = self
            .rows
            .iter()
            .map(|r| Row {
                index: r.index.clone(),
                values: indices.iter().map(|&i| r.values[i].clone()).collect(),
            })
            .collect();
        Ok(Self {
            index: self.index.clone(),
            schema,
            rows,
        })
    }

    /// Move columns into the index, replacing the current one
    pub fn set_index(&self, columns: &[&str]) -> Result<Self, String> {
        let indices = columns
            .iter()
            .map(|c| {
                self.schema
                    .get_field_index(c)
                    .ok_or_else(|| format!("Column '{}' not found", c))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let keep: Vec<usize> = (0..self.schema.len()).filter(|i| !indices.contains(i)).collect();
        let index = Schema::new(indices.iter().map(|&i| self.schema.fields[i].clone()).collect());
        let schema = Schema::new(keep.iter().map(|&i| self.schema.fields[i].clone()).collect());
        let rows = self
            .rows
            .iter()
            .map(|r| Row {
                index: indices.iter().map(|&i| r.values[i].clone()).collect(),
                values: keep.iter().map(|&i| r.values[i].clone()).collect(),
            })
            .collect();
        Ok(Self {
            index,
            schema,
            rows,
        })
    }

    /// Turn the index back into leading columns
    pub fn reset_index(&self) -> Self {
        let fields = self
            .index
            .fields
            .iter()
            .chain(&self.schema.fields)
            .cloned()
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|r| Row {
                index: Vec::new(),
                values: r.index.iter().chain(&r.values).cloned().collect(),
            })
            .collect();
        Self {
            index: Schema::default(),
            schema: Schema::new(fields),
            rows,
        }
    }

    /// Take first n rows
    pub fn take(&self, n: usize) -> Self {
        self.with_rows(self.rows.iter().take(n).cloned().collect())
    }

    /// Skip first n rows
    pub fn skip(&self, n: usize) -> Self {
        self.with_rows(self.rows.iter().skip(n).cloned().collect())
    }

    /// Keep the last n rows
    pub fn tail(&self, n: usize) -> Self {
        self.skip(self.rows.len().saturating_sub(n))
    }

    /// Stable sort by a column or index level
    pub fn sort_by(&self, name: &str, ascending: bool) -> Result<Self, String> {
        let keys = self.column(name)?;
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| {
            let ord = compare_values(&keys[a], &keys[b]);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        Ok(self.with_rows(order.into_iter().map(|i| self.rows[i].clone()).collect()))
    }

    /// Keep rows whose value in `column` satisfies the predicate
    pub fn filter_by<F>(&self, column: &str, predicate: F) -> Result<Self, String>
    where
        F: Fn(&Value) -> bool,
    {
        let keys = self.column(column)?;
        Ok(self.with_rows(
            self.rows
                .iter()
                .zip(&keys)
                .filter(|(_, k)| predicate(k))
                .map(|(r, _)| r.clone())
                .collect(),
        ))
    }

    /// Apply a function to every column value
    pub fn map_values<F>(&self, f: F) -> Self
    where
        F: Fn(&Value) -> Value,
    {
        self.with_rows(
            self.rows
                .iter()
                .map(|r| Row {
                    index: r.index.clone(),
                    values: r.values.iter().map(&f).collect(),
                })
                .collect(),
        )
    }

    /// Append a column
    pub fn add_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), String> {
        if self.schema.get_field(name).is_some() {
            return Err(format!("Column '{}' already exists", name));
        }
        if values.len() != self.rows.len() {
            return Err(format!(
                "Column length mismatch: expected {}, got {}",
                self.rows.len(),
                values.len()
            ));
        }
        let dtype = DType::infer(&values);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.values.push(value);
        }
        let mut fields = self.schema.fields.clone();
        fields.push(Field::new(name, dtype));
        self.schema = Schema::new(fields);
        Ok(())
    }

    /// Concatenate columns of frames with the same number of rows
    pub fn concat_columns(&self, other: &Frame) -> Result<Self, String> {
        if self.rows.len() != other.rows.len() {
            return Err(format!(
                "Cannot align {} rows with {} rows",
                self.rows.len(),
                other.rows.len()
            ));
        }
        let fields = self
            .schema
            .fields
            .iter()
            .chain(&other.schema.fields)
            .cloned()
            .collect();
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(l, r)| Row {
                index: l.index.clone(),
                values: l.values.iter().chain(&r.values).cloned().collect(),
            })
            .collect();
        Ok(Self {
            index: self.index.clone(),
            schema: Schema::new(fields),
            rows,
        })
    }

    /// Stack frames with identical columns
    pub fn concat_rows(frames: Vec<Frame>) -> Result<Self, String> {
        let mut iter = frames.into_iter();
        let Some(mut first) = iter.next() else {
            return Ok(Frame::new(&[]));
        };
        for frame in iter {
            if frame.columns() != first.columns() {
                return Err(format!(
                    "Column mismatch: {:?} vs {:?}",
                    first.columns(),
                    frame.columns()
                ));
            }
            first.rows.extend(frame.rows);
        }
        let rows = std::mem::take(&mut first.rows);
        Ok(first.with_rows(rows))
    }

    /// Reshape long rows into a table: one row per distinct `index` value,
    /// one column per distinct `columns` value, cells from `values`
    pub fn pivot(&self, index: &str, columns: &str, values: &str) -> Result<Self, String> {
        let idx_values = self.column(index)?;
        let col_values = self.column(columns)?;
        let cell_values = self.column(values)?;

        let mut row_keys: Vec<Value> = Vec::new();
        let mut row_pos: HashMap<String, usize> = HashMap::new();
        let mut col_names: Vec<String> = Vec::new();
        let mut col_pos: HashMap<String, usize> = HashMap::new();
        for (r, c) in idx_values.iter().zip(&col_values) {
            row_pos.entry(value_key(r)).or_insert_with(|| {
                row_keys.push(r.clone());
                row_keys.len() - 1
            });
            let name = match c {
                Value::String(s) => s.clone(),
                other => value_key(other),
            };
            col_pos.entry(name.clone()).or_insert_with(|| {
                col_names.push(name);
                col_names.len() - 1
            });
        }

        let mut rows: Vec<Row> = row_keys
            .iter()
            .map(|k| Row {
                index: vec![k.clone()],
                values: vec![Value::Null; col_names.len()],
            })
            .collect();
        for ((r, c), v) in idx_values.iter().zip(&col_values).zip(cell_values) {
            let name = match c {
                Value::String(s) => s.clone(),
                other => value_key(other),
            };
            let (ri, ci) = (row_pos[&value_key(r)], col_pos[&name]);
            rows[ri].values[ci] = v;
        }
        Frame::from_rows(vec![index.to_string()], col_names, rows)
    }

    fn with_rows(&self, rows: Vec<Row>) -> Self {
        let index = retype(&self.index, &rows, |r| &r.index);
        let schema = retype(&self.schema, &rows, |r| &r.values);
        Self {
            index,
            schema,
            rows,
        }
    }
}

fn infer_schema<F>(names: &[String], rows: &[Row], part: F) -> Schema
where
    F: Fn(&Row) -> &Vec<Value>,
{
    Schema::new(
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Field::new(n.clone(), DType::infer(rows.iter().map(|r| &part(r)[i]))))
            .collect(),
    )
}

fn retype<F>(schema: &Schema, rows: &[Row], part: F) -> Schema
where
    F: Fn(&Row) -> &Vec<Value>,
{
    // an empty selection keeps the known dtypes
    if rows.is_empty() {
        return schema.clone();
    }
    infer_schema(&schema.names(), rows, part)
}
