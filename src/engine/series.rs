// src/engine/series.rs

use super::error::Result;
use super::mdataframe::MDataFrame;
use crate::apply::{ApplyContext, ApplyOutput};
use crate::core::frame::Frame;
use crate::core::value::Value;
use crate::query::mongoq::MongoQ;
use crate::store::CallFilter;

/// Single-column view. Same laziness as `MDataFrame`; materializes to a
/// one-column frame.
#[derive(Debug, Clone)]
pub struct MSeries {
    view: MDataFrame,
}

impl MSeries {
    pub(crate) fn new(view: MDataFrame) -> Self {
        Self { view }
    }

    pub fn name(&self) -> &str {
        self.view.columns.first().map_or("", String::as_str)
    }

    pub fn value(&self) -> Result<Frame> {
        self.view.value()
    }

    /// The column values in row order
    pub fn values(&self) -> Result<Vec<Value>> {
        let frame = self.value()?;
        Ok(frame
            .rows
            .into_iter()
            .filter_map(|row| row.values.into_iter().next())
            .collect())
    }

    /// Distinct values of the column under the view's filter
    pub fn unique(&self) -> Result<Vec<Value>> {
        let trace = self.view.config.query.trace;
        self.view
            .filtered()
            .distinct(self.name(), CallFilter::none())
            .map_err(|e| e.attributed(trace))
    }

    pub fn apply<F>(&self, f: F) -> MSeries
    where
        F: Fn(&mut ApplyContext) -> Result<ApplyOutput> + Send + Sync + 'static,
    {
        MSeries::new(self.view.apply(f))
    }

    pub fn query(&self, q: MongoQ) -> Result<MSeries> {
        self.view.query(q).map(MSeries::new)
    }

    pub fn head(&self, n: usize) -> MSeries {
        MSeries::new(self.view.clone().head(n))
    }

    pub fn skip(&self, n: usize) -> MSeries {
        MSeries::new(self.view.clone().skip(n))
    }

    pub fn sort(&self, ascending: bool) -> MSeries {
        let spec = format!("{}{}", if ascending { "+" } else { "-" }, self.name());
        MSeries::new(self.view.clone().sort(&[spec.as_str()]))
    }

    pub fn len(&self) -> Result<usize> {
        self.view.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.view.is_empty()
    }

    pub fn view(&self) -> &MDataFrame {
        &self.view
    }

    pub fn into_frame(self) -> MDataFrame {
        self.view
    }
}
