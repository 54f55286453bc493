use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Contextual defaults supplied by the caller for reference-data lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchContext {
    pub program_label: Option<String>,
    pub date: Option<NaiveDate>,
    /// Statistical rectangle label, e.g. `24E4`.
    pub rectangle_label: Option<String>,
    /// Country or fishing-area location id.
    pub location_id: Option<i64>,
}

impl BatchContext {
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_rectangle(mut self, label: impl Into<String>) -> Self {
        self.rectangle_label = Some(label.into());
        self
    }

    pub fn month(&self) -> Option<u32> {
        self.date.map(|d| d.month())
    }

    pub fn year(&self) -> Option<i32> {
        self.date.map(|d| d.year())
    }
}
