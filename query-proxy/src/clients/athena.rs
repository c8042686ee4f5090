use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::Credentials;
use aws_sdk_athena::operation::get_query_results::GetQueryResultsOutput;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionStatus, ResultConfiguration};
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use super::sdk::{self, AwsError};
use crate::models::{JobId, JobState, JobStatus, QuerySubmission, ResultPage, RoleId, ScopedCredential};

const RESULTS_PAGE_SIZE: i32 = 1000;

/// Query execution backend bound to one set of scoped credentials.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn start_query(&self, submission: &QuerySubmission) -> Result<JobId, AwsError>;

    async fn get_status(&self, job_id: &JobId) -> Result<JobStatus, AwsError>;

    async fn get_results(
        &self,
        job_id: &JobId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, AwsError>;
}

/// Builds a backend that owns the credential it was given.
pub trait QueryBackendFactory: Send + Sync {
    fn connect(&self, credential: ScopedCredential) -> Box<dyn QueryBackend>;
}

pub struct AthenaBackend {
    client: aws_sdk_athena::Client,
}

fn into_page(response: &GetQueryResultsOutput) -> ResultPage {
    let rows = response.result_set().map(|set| set.rows()).unwrap_or_default();
    ResultPage {
        rows: rows
            .iter()
            .map(|row| {
                row.data()
                    .iter()
                    .map(|d| d.var_char_value().map(str::to_string))
                    .collect()
            })
            .collect(),
        next_token: sdk::next_token(response.next_token()),
    }
}

fn into_status(status: Option<&QueryExecutionStatus>) -> Result<JobStatus, AwsError> {
    let status = status.ok_or_else(|| AwsError::Decode("query execution has no status".to_string()))?;
    let state: JobState = status
        .state()
        .map(|s| s.as_str())
        .unwrap_or_default()
        .parse()
        .map_err(AwsError::Decode)?;
    Ok(JobStatus {
        state,
        reason: status.state_change_reason().map(str::to_string),
    })
}

#[async_trait]
impl QueryBackend for AthenaBackend {
    async fn start_query(&self, submission: &QuerySubmission) -> Result<JobId, AwsError> {
        let response = self
            .client
            .start_query_execution()
            .query_string(&submission.query)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(&submission.database)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&submission.output_location)
                    .build(),
            )
            .set_work_group(submission.workgroup.clone())
            .client_request_token(uuid::Uuid::new_v4().to_string())
            .send()
            .await?;

        response
            .query_execution_id()
            .map(JobId::new)
            .ok_or_else(|| AwsError::Decode("StartQueryExecution returned no id".to_string()))
    }

    async fn get_status(&self, job_id: &JobId) -> Result<JobStatus, AwsError> {
        let response = self
            .client
            .get_query_execution()
            .query_execution_id(job_id.as_str())
            .send()
            .await?;
        into_status(response.query_execution().and_then(|e| e.status()))
    }

    async fn get_results(
        &self,
        job_id: &JobId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, AwsError> {
        let response = self
            .client
            .get_query_results()
            .query_execution_id(job_id.as_str())
            .max_results(RESULTS_PAGE_SIZE)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await?;
        Ok(into_page(&response))
    }
}

/// Builds one Athena client per job, signed with that job's scoped credential
/// instead of the process credentials in the shared config.
pub struct AthenaBackendFactory {
    config: SdkConfig,
}

impl AthenaBackendFactory {
    pub fn new(config: SdkConfig) -> Self {
        Self { config }
    }
}

impl QueryBackendFactory for AthenaBackendFactory {
    fn connect(&self, credential: ScopedCredential) -> Box<dyn QueryBackend> {
        let credentials = Credentials::new(
            credential.access_key_id,
            credential.secret_access_key.expose_secret(),
            Some(credential.session_token.expose_secret().clone()),
            Some(SystemTime::from(credential.expires_at)),
            "scoped-credential",
        );
        let config = aws_sdk_athena::config::Builder::from(&self.config)
            .credentials_provider(credentials)
            .build();

        Box::new(AthenaBackend {
            client: aws_sdk_athena::Client::from_conf(config),
        })
    }
}

/// Shared script and recording for [`MockQueryBackend`].
#[derive(Default)]
pub struct MockQueryState {
    /// States returned by successive polls; the last one repeats.
    pub statuses: Mutex<VecDeque<JobStatus>>,
    /// Result pages in order; page `i` is requested with token `page-i`.
    pub pages: Mutex<Vec<ResultPage>>,
    pub submissions: Mutex<Vec<QuerySubmission>>,
    pub connected_roles: Mutex<Vec<RoleId>>,
    pub status_polls: Mutex<usize>,
    pub fail_submission: Mutex<Option<String>>,
    pub fail_status: Mutex<Option<String>>,
    /// Latency added before a submission is answered.
    pub submit_delay: Mutex<Option<Duration>>,
    /// Latency added before each status poll is answered.
    pub status_delay: Mutex<Option<Duration>>,
}

impl MockQueryState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_statuses(&self, statuses: Vec<JobStatus>) {
        if let Ok(mut s) = self.statuses.lock() {
            *s = statuses.into();
        }
    }

    pub fn script_pages(&self, pages: Vec<ResultPage>) {
        if let Ok(mut p) = self.pages.lock() {
            *p = pages;
        }
    }

    pub fn delay_submission(&self, delay: Duration) {
        if let Ok(mut d) = self.submit_delay.lock() {
            *d = Some(delay);
        }
    }

    pub fn delay_status(&self, delay: Duration) {
        if let Ok(mut d) = self.status_delay.lock() {
            *d = Some(delay);
        }
    }

    pub fn submissions(&self) -> Vec<QuerySubmission> {
        self.submissions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn connected_roles(&self) -> Vec<RoleId> {
        self.connected_roles.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.lock().map(|p| *p).unwrap_or_default()
    }

    fn poisoned() -> AwsError {
        AwsError::Transport("mock poisoned".to_string())
    }
}

pub struct MockQueryBackend {
    state: Arc<MockQueryState>,
}

async fn simulate_latency(delay: &Mutex<Option<Duration>>) {
    let delay = delay.lock().ok().and_then(|d| *d);
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl QueryBackend for MockQueryBackend {
    async fn start_query(&self, submission: &QuerySubmission) -> Result<JobId, AwsError> {
        simulate_latency(&self.state.submit_delay).await;
        if let Some(reason) = self
            .state
            .fail_submission
            .lock()
            .map_err(|_| MockQueryState::poisoned())?
            .clone()
        {
            return Err(AwsError::service("InvalidRequestException", reason));
        }

        self.state
            .submissions
            .lock()
            .map_err(|_| MockQueryState::poisoned())?
            .push(submission.clone());
        Ok(JobId::new(uuid::Uuid::new_v4().to_string()))
    }

    async fn get_status(&self, _job_id: &JobId) -> Result<JobStatus, AwsError> {
        simulate_latency(&self.state.status_delay).await;
        *self
            .state
            .status_polls
            .lock()
            .map_err(|_| MockQueryState::poisoned())? += 1;

        if let Some(reason) = self
            .state
            .fail_status
            .lock()
            .map_err(|_| MockQueryState::poisoned())?
            .clone()
        {
            return Err(AwsError::Transport(reason));
        }

        let mut statuses = self
            .state
            .statuses
            .lock()
            .map_err(|_| MockQueryState::poisoned())?;
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        Ok(status.unwrap_or_else(|| JobStatus::new(JobState::Succeeded)))
    }

    async fn get_results(
        &self,
        _job_id: &JobId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, AwsError> {
        let pages = self
            .state
            .pages
            .lock()
            .map_err(|_| MockQueryState::poisoned())?;

        // Page i is requested with token "page-i"; the first page has no token.
        let index = match next_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|i| i.parse::<usize>().ok())
                .ok_or_else(|| {
                    AwsError::service(
                        "InvalidRequestException",
                        format!("Invalid NextToken {}", token),
                    )
                })?,
        };

        let mut page = pages.get(index).cloned().unwrap_or_default();
        page.next_token = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
        Ok(page)
    }
}

pub struct MockQueryBackendFactory {
    state: Arc<MockQueryState>,
}

impl MockQueryBackendFactory {
    pub fn new(state: Arc<MockQueryState>) -> Self {
        Self { state }
    }
}

impl QueryBackendFactory for MockQueryBackendFactory {
    fn connect(&self, credential: ScopedCredential) -> Box<dyn QueryBackend> {
        if let Ok(mut roles) = self.state.connected_roles.lock() {
            roles.push(credential.role.clone());
        }
        Box::new(MockQueryBackend {
            state: self.state.clone(),
        })
    }
}
