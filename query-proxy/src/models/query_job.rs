use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fmt;

/// Backend-assigned query execution id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" | "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "SUCCEEDED" => Ok(JobState::Succeeded),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" => Ok(JobState::Cancelled),
            other => Err(format!("Unknown query state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub reason: Option<String>,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    pub fn with_reason(state: JobState, reason: impl Into<String>) -> Self {
        Self {
            state,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySubmission {
    pub query: String,
    pub database: String,
    pub output_location: String,
    pub workgroup: Option<String>,
}

/// One page of raw rows. `None` cells are SQL NULLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultPage {
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed result row {row}: expected {expected} fields, found {found}")]
pub struct MalformedRow {
    pub row: usize,
    pub expected: usize,
    pub found: usize,
}

/// Normalized tabular output: header names plus textual rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ResultSet {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows; the header is never counted.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows as column-keyed records, serialized in column order.
    pub fn records(&self) -> Records<'_> {
        Records(self)
    }
}

/// Accumulates pages in order, treating the first row seen as the header.
#[derive(Debug, Default)]
pub struct ResultSetBuilder {
    columns: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl ResultSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&mut self, page: ResultPage) -> Result<(), MalformedRow> {
        for raw in page.rows {
            let mut row: Vec<String> = raw.into_iter().map(Option::unwrap_or_default).collect();

            let Some(columns) = &self.columns else {
                self.columns = Some(row);
                continue;
            };

            // Missing trailing cells read as empty; surplus cells have no column to land in.
            if row.len() > columns.len() {
                return Err(MalformedRow {
                    row: self.rows.len(),
                    expected: columns.len(),
                    found: row.len(),
                });
            }
            row.resize(columns.len(), String::new());
            self.rows.push(row);
        }
        Ok(())
    }

    pub fn finish(self) -> ResultSet {
        ResultSet {
            columns: self.columns.unwrap_or_default(),
            rows: self.rows,
        }
    }
}

pub struct Records<'a>(&'a ResultSet);

struct Record<'a> {
    columns: &'a [String],
    values: &'a [String],
}

impl Serialize for Records<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.rows.len()))?;
        for values in &self.0.rows {
            seq.serialize_element(&Record {
                columns: &self.0.columns,
                values,
            })?;
        }
        seq.end()
    }
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<Option<String>> {
        cells.iter().map(|c| Some(c.to_string())).collect()
    }

    #[test]
    fn test_header_stripped_once_across_pages() {
        let mut builder = ResultSetBuilder::new();
        builder
            .push_page(ResultPage {
                rows: vec![row(&["id", "name"]), row(&["1", "a"])],
                next_token: Some("t1".to_string()),
            })
            .unwrap();
        builder
            .push_page(ResultPage {
                rows: vec![row(&["2", "b"]), row(&["3", "c"])],
                next_token: Some("t2".to_string()),
            })
            .unwrap();
        builder
            .push_page(ResultPage {
                rows: vec![row(&["4", "d"])],
                next_token: None,
            })
            .unwrap();

        let result = builder.finish();
        assert_eq!(result.columns(), &["id".to_string(), "name".to_string()]);
        assert_eq!(result.row_count(), 4);
        assert_eq!(result.rows()[0], vec!["1".to_string(), "a".to_string()]);
        assert_eq!(result.rows()[3], vec!["4".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_null_cell_becomes_empty_string() {
        let mut builder = ResultSetBuilder::new();
        builder
            .push_page(ResultPage {
                rows: vec![row(&["a", "b"]), vec![Some("1".to_string()), None]],
                next_token: None,
            })
            .unwrap();

        let result = builder.finish();
        assert_eq!(result.rows()[0], vec!["1".to_string(), String::new()]);
    }

    #[test]
    fn test_short_row_is_padded() {
        let mut builder = ResultSetBuilder::new();
        builder
            .push_page(ResultPage {
                rows: vec![row(&["a", "b", "c"]), row(&["1"])],
                next_token: None,
            })
            .unwrap();

        let result = builder.finish();
        assert_eq!(result.rows()[0], vec!["1".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn test_surplus_fields_are_rejected() {
        let mut builder = ResultSetBuilder::new();
        let err = builder
            .push_page(ResultPage {
                rows: vec![row(&["a", "b"]), row(&["1", "2"]), row(&["3", "4", "5"])],
                next_token: None,
            })
            .unwrap_err();

        assert_eq!(
            err,
            MalformedRow {
                row: 1,
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_empty_result() {
        let result = ResultSetBuilder::new().finish();
        assert!(result.columns().is_empty());
        assert_eq!(result.row_count(), 0);
        assert_eq!(serde_json::to_value(result.records()).unwrap(), serde_json::json!([]));
    }

    #[test]
    fn test_records_serialize_as_objects() {
        let mut builder = ResultSetBuilder::new();
        builder
            .push_page(ResultPage {
                rows: vec![row(&["_col0"]), row(&["1"])],
                next_token: None,
            })
            .unwrap();

        let value = serde_json::to_value(builder.finish().records()).unwrap();
        assert_eq!(value, serde_json::json!([{"_col0": "1"}]));
    }

    #[test]
    fn test_job_state_parsing() {
        assert_eq!("QUEUED".parse::<JobState>().unwrap(), JobState::Pending);
        assert_eq!("SUCCEEDED".parse::<JobState>().unwrap(), JobState::Succeeded);
        assert!("succeeded".parse::<JobState>().is_err());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
