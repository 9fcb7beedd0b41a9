use serde::{Deserialize, Serialize};

use crate::jobs::{JobFilter, JobState};

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<String>,
    pub limit: Option<i64>,
}

impl ListJobsQuery {
    pub fn into_filter(self) -> crate::Result<JobFilter> {
        let state = self
            .state
            .as_deref()
            .map(str::parse::<JobState>)
            .transpose()?;
        Ok(JobFilter {
            state,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobLogResponse {
    pub job_id: String,
    /// `None` until the first attempt has started.
    pub log: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

/// `{"value": 3}` and `{"value": "3"}` are both accepted.
#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub value: serde_json::Value,
}

impl SetConfigRequest {
    pub fn value_string(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StopWorkersResponse {
    pub signalled: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
