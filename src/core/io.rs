// src/core/io.rs

use super::frame::Frame;
use super::value::{as_f64, DType, Value};
use crate::engine::error::Result;
use crate::engine::mdataframe::MDataFrame;
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs;
use std::path::Path;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// Arrow schema of a frame: index fields first, then columns.
/// Arrays, objects and untyped columns are written as JSON strings.
pub fn arrow_schema(frame: &Frame) -> SchemaRef {
    let fields: Vec<ArrowField> = frame
        .index
        .fields
        .iter()
        .chain(&frame.schema.fields)
        .map(|f| {
            let data_type = match f.dtype {
                DType::Int => DataType::Int64,
                DType::Float => DataType::Float64,
                DType::Bool => DataType::Boolean,
                _ => DataType::Utf8,
            };
            ArrowField::new(&f.name, data_type, true)
        })
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

/// Convert a frame to a record batch of `schema`, matching columns by name.
/// Values that do not fit a column's type are written as nulls.
pub fn record_batch(frame: &Frame, schema: SchemaRef) -> Result<RecordBatch> {
    let mut arrays: Vec<ArrayRef> = Vec::new();
    for field in schema.fields() {
        let column: Vec<&Value> = match column_position(frame, field.name()) {
            Some((true, i)) => frame.rows.iter().map(|r| &r.index[i]).collect(),
            Some((false, i)) => frame.rows.iter().map(|r| &r.values[i]).collect(),
            None => vec![&NULL; frame.len()],
        };
        let array: ArrayRef = match field.data_type() {
            DataType::Int64 => {
                let values: Vec<Option<i64>> = column
                    .iter()
                    .map(|v| match v {
                        Value::Number(n) => n
                            .as_i64()
                            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                        _ => None,
                    })
                    .collect();
                Arc::new(Int64Array::from(values))
            }
            DataType::Float64 => {
                let values: Vec<Option<f64>> = column.iter().map(|v| as_f64(v)).collect();
                Arc::new(Float64Array::from(values))
            }
            DataType::Boolean => {
                let values: Vec<Option<bool>> = column.iter().map(|v| v.as_bool()).collect();
                Arc::new(BooleanArray::from(values))
            }
            _ => {
                let values: Vec<Option<String>> = column
                    .iter()
                    .map(|v| match v {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect();
                Arc::new(StringArray::from(values))
            }
        };
        arrays.push(array);
    }
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// (is index, position) of a named field
fn column_position(frame: &Frame, name: &str) -> Option<(bool, usize)> {
    if let Some(i) = frame.index.get_field_index(name) {
        return Some((true, i));
    }
    frame.schema.get_field_index(name).map(|i| (false, i))
}

/// Write frames to one Parquet file. The schema is fixed by the first
/// non-empty frame, or by `fallback` when every frame is empty.
pub fn write_frames<I>(frames: I, path: impl AsRef<Path>, fallback: &Frame) -> Result<usize>
where
    I: IntoIterator<Item = Result<Frame>>,
{
    let mut frames = frames.into_iter();
    let mut pending = Vec::new();
    let mut schema = None;
    for frame in frames.by_ref() {
        let frame = frame?;
        if frame.is_empty() {
            continue;
        }
        schema = Some(arrow_schema(&frame));
        pending.push(frame);
        break;
    }
    let schema = schema.unwrap_or_else(|| arrow_schema(fallback));

    let file = fs::File::create(path.as_ref())?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
    let mut written = 0;
    for frame in pending.into_iter().map(Ok).chain(frames) {
        let frame = frame?;
        if frame.is_empty() {
            continue;
        }
        writer.write(&record_batch(&frame, schema.clone())?)?;
        written += frame.len();
        tracing::trace!(rows = frame.len(), "parquet chunk written");
    }
    writer.close()?;
    tracing::debug!(path = %path.as_ref().display(), rows = written, "parquet export");
    Ok(written)
}

/// Export a view to Parquet, reading it `chunksize` rows at a time
pub fn write_parquet(view: &MDataFrame, path: impl AsRef<Path>, chunksize: usize) -> Result<usize> {
    let columns: Vec<&str> = view.columns().iter().map(String::as_str).collect();
    write_frames(view.iterchunks(chunksize), path, &Frame::new(&columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::Row;
    use arrow::array::Array;
    use serde_json::json;

    fn frame() -> Frame {
        Frame::from_rows(
            vec!["k".to_string()],
            vec!["i".to_string(), "f".to_string(), "s".to_string(), "o".to_string()],
            vec![
                Row {
                    index: vec![json!("a")],
                    values: vec![json!(1), json!(1.5), json!("x"), json!({"n": 1})],
                },
                Row {
                    index: vec![json!("b")],
                    values: vec![json!(2), Value::Null, json!("y"), json!([1, 2])],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_schema_mapping() {
        let schema = arrow_schema(&frame());
        let types: Vec<&DataType> = schema.fields().iter().map(|f| f.data_type()).collect();
        assert_eq!(
            types,
            vec![
                &DataType::Utf8,
                &DataType::Int64,
                &DataType::Float64,
                &DataType::Utf8,
                &DataType::Utf8
            ]
        );
    }

    #[test]
    fn test_record_batch_values() {
        let f = frame();
        let batch = record_batch(&f, arrow_schema(&f)).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 5);
        let objects = batch
            .column(4)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(objects.value(0), r#"{"n":1}"#);
        let floats = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!(floats.is_null(1));
    }

    #[test]
    fn test_write_frames_skips_empty_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let chunks = vec![Ok(Frame::new(&["i"])), Ok(frame()), Ok(frame())];
        assert_eq!(write_frames(chunks, &path, &Frame::new(&["i"])).unwrap(), 4);
        assert!(path.exists());
    }
}
