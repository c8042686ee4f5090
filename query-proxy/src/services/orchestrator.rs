//! Query submission, bounded polling and result pagination.
//!
//! A job moves `SUBMITTED -> {PENDING, RUNNING}* -> {SUCCEEDED | FAILED | CANCELLED}`
//! as observed by polling. When neither the poll budget nor the request
//! deadline leaves room for another poll, or the cancellation token fires, the
//! run ends in a client-side `TIMEOUT`. The remote job is left running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clients::{QueryBackend, QueryBackendFactory};
use crate::config::PollBudget;
use crate::models::{
    JobId, JobState, JobStatus, MalformedRow, QuerySubmission, ResultSet, ResultSetBuilder,
    ScopedCredential,
};

#[derive(Error, Debug)]
pub enum QueryFailure {
    #[error("Failed to start query: {0}")]
    Submit(String),

    #[error("Failed to check query status: {0}")]
    Poll(String),

    #[error("Query {state}: {reason}")]
    Terminal { state: JobState, reason: String },

    #[error("Query timed out after {waited_secs} seconds")]
    Timeout { waited_secs: u64 },

    #[error("Failed to fetch query results: {0}")]
    Results(String),

    #[error("Failed to fetch query results: {0}")]
    MalformedRow(#[from] MalformedRow),
}

/// What to run and where its results land.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub database: String,
    pub output_location: String,
}

/// Poll schedule plus the outer limits imposed by the request.
#[derive(Debug, Clone)]
pub struct PollControl {
    pub budget: PollBudget,
    /// Hard deadline of the enclosing request, if any.
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl PollControl {
    pub fn new(budget: PollBudget, deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self {
            budget,
            deadline,
            cancel,
        }
    }

    fn deadline_from(&self, poll_start: Instant) -> Instant {
        let budget_deadline = poll_start + self.budget.max_wait;
        match self.deadline {
            Some(request_deadline) => budget_deadline.min(request_deadline),
            None => budget_deadline,
        }
    }
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub job_id: JobId,
    pub result: ResultSet,
}

#[derive(Clone)]
pub struct QueryOrchestrator {
    factory: Arc<dyn QueryBackendFactory>,
    workgroup: Option<String>,
}

impl QueryOrchestrator {
    pub fn new(factory: Arc<dyn QueryBackendFactory>, workgroup: Option<String>) -> Self {
        Self { factory, workgroup }
    }

    /// Run one query under `credential`, which is consumed by the backend connection.
    pub async fn run(
        &self,
        request: QueryRequest,
        credential: ScopedCredential,
        control: &PollControl,
    ) -> Result<QueryOutcome, QueryFailure> {
        let started = Instant::now();
        let backend = self.factory.connect(credential);

        let submission = QuerySubmission {
            query: request.query,
            database: request.database,
            output_location: request.output_location,
            workgroup: self.workgroup.clone(),
        };

        let job_id = bounded(backend.start_query(&submission), control, control.deadline)
            .await
            .ok_or_else(|| {
                tracing::warn!(database = %submission.database, "Query submission abandoned");
                timed_out(started)
            })?
            .map_err(|e| {
                tracing::error!(error = %e, database = %submission.database, "Query submission failed");
                QueryFailure::Submit(e.reason())
            })?;
        tracing::info!(job_id = %job_id, database = %submission.database, "Query submitted");

        let status = wait_for_completion(backend.as_ref(), &job_id, control).await?;
        if status.state != JobState::Succeeded {
            let reason = status
                .reason
                .unwrap_or_else(|| "Unknown error".to_string());
            tracing::warn!(job_id = %job_id, state = %status.state, reason = %reason, "Query did not succeed");
            return Err(QueryFailure::Terminal {
                state: status.state,
                reason,
            });
        }

        let result = fetch_results(backend.as_ref(), &job_id, control, started).await?;

        metrics::histogram!("query_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            job_id = %job_id,
            rows = result.row_count(),
            columns = result.columns().len(),
            "Query completed"
        );

        Ok(QueryOutcome { job_id, result })
    }
}

async fn wait_for_completion(
    backend: &dyn QueryBackend,
    job_id: &JobId,
    control: &PollControl,
) -> Result<JobStatus, QueryFailure> {
    let started = Instant::now();
    let deadline = control.deadline_from(started);

    let mut polls: u32 = 0;
    loop {
        let status = bounded(backend.get_status(job_id), control, Some(deadline))
            .await
            .ok_or_else(|| {
                tracing::warn!(job_id = %job_id, polls, "Query status poll abandoned");
                timed_out(started)
            })?
            .map_err(|e| {
                tracing::error!(job_id = %job_id, error = %e, "Query status poll failed");
                QueryFailure::Poll(e.reason())
            })?;
        polls += 1;
        metrics::counter!("query_poll_iterations").increment(1);
        tracing::debug!(job_id = %job_id, state = %status.state, polls, "Polled query status");

        if status.state.is_terminal() {
            return Ok(status);
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(job_id = %job_id, polls, "Query poll budget exhausted");
            return Err(timed_out(started));
        }

        let wake = (now + control.budget.interval.max(Duration::from_millis(1))).min(deadline);
        tokio::select! {
            _ = control.cancel.cancelled() => {
                tracing::warn!(job_id = %job_id, polls, "Query polling cancelled");
                return Err(timed_out(started));
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

async fn fetch_results(
    backend: &dyn QueryBackend,
    job_id: &JobId,
    control: &PollControl,
    started: Instant,
) -> Result<ResultSet, QueryFailure> {
    let mut builder = ResultSetBuilder::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = bounded(
            backend.get_results(job_id, next_token.as_deref()),
            control,
            control.deadline,
        )
        .await
        .ok_or_else(|| {
            tracing::warn!(job_id = %job_id, "Result fetch abandoned");
            timed_out(started)
        })?
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Fetching query results failed");
            QueryFailure::Results(e.reason())
        })?;

        let token = page.next_token.clone();
        builder.push_page(page)?;

        match token {
            Some(token) if next_token.as_deref() == Some(token.as_str()) => {
                return Err(QueryFailure::Results(
                    "pagination token did not advance".to_string(),
                ));
            }
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    Ok(builder.finish())
}

fn timed_out(since: Instant) -> QueryFailure {
    QueryFailure::Timeout {
        waited_secs: since.elapsed().as_secs(),
    }
}

/// Drive one backend call until it answers, the token is cancelled or
/// `deadline` passes. `None` means the call was abandoned.
async fn bounded<T>(
    call: impl Future<Output = T>,
    control: &PollControl,
    deadline: Option<Instant>,
) -> Option<T> {
    let expiry = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        out = call => Some(out),
        _ = control.cancel.cancelled() => None,
        _ = expiry => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::athena::{MockQueryBackendFactory, MockQueryState};
    use crate::models::{ResultPage, RoleId};
    use chrono::Utc;
    use secrecy::Secret;

    fn credential() -> ScopedCredential {
        ScopedCredential {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: Secret::new("secret".to_string()),
            session_token: Secret::new("token".to_string()),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            role: RoleId::new("arn:aws:iam::123456789012:role/lf-dev"),
        }
    }

    fn request() -> QueryRequest {
        QueryRequest {
            query: "SELECT 1".to_string(),
            database: "analytics".to_string(),
            output_location: "s3://results/oauth-queries/".to_string(),
        }
    }

    fn control(interval_ms: u64, max_wait_secs: u64) -> PollControl {
        PollControl::new(
            PollBudget::new(
                Duration::from_millis(interval_ms),
                Duration::from_secs(max_wait_secs),
            ),
            None,
            CancellationToken::new(),
        )
    }

    fn orchestrator(state: &Arc<MockQueryState>) -> QueryOrchestrator {
        QueryOrchestrator::new(
            Arc::new(MockQueryBackendFactory::new(state.clone())),
            Some("primary".to_string()),
        )
    }

    fn page(rows: &[&[&str]]) -> ResultPage {
        ResultPage {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| Some(c.to_string())).collect())
                .collect(),
            next_token: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_succeeded_then_reads_results() {
        let state = MockQueryState::new();
        state.script_statuses(vec![
            JobStatus::new(JobState::Pending),
            JobStatus::new(JobState::Running),
            JobStatus::new(JobState::Succeeded),
        ]);
        state.script_pages(vec![page(&[&["_col0"], &["1"]])]);

        let outcome = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap();

        assert_eq!(outcome.result.columns(), &["_col0".to_string()]);
        assert_eq!(outcome.result.row_count(), 1);
        assert_eq!(state.status_polls(), 3);

        let submissions = state.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].query, "SELECT 1");
        assert_eq!(submissions[0].workgroup.as_deref(), Some("primary"));
        assert_eq!(
            state.connected_roles(),
            vec![RoleId::new("arn:aws:iam::123456789012:role/lf-dev")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_budget_plus_one_interval() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Running)]);

        let started = Instant::now();
        let err = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::Timeout { waited_secs: 30 }));
        assert!(started.elapsed() <= Duration::from_secs(31));
        assert_eq!(state.status_polls(), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_caps_budget() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Running)]);

        let mut control = control(2000, 60);
        control.deadline = Some(Instant::now() + Duration::from_secs(5));

        let started = Instant::now();
        let err = orchestrator(&state)
            .run(request(), credential(), &control)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::Timeout { waited_secs: 5 }));
        assert!(started.elapsed() <= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_polling_as_timeout() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Running)]);

        let control = control(1000, 30);
        control.cancel.cancel();

        let err = orchestrator(&state)
            .run(request(), credential(), &control)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::Timeout { waited_secs: 0 }));
        assert_eq!(state.status_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_slow_status_poll() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Running)]);
        state.delay_status(Duration::from_secs(20));

        let control = control(1000, 5);
        let cancel = control.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = orchestrator(&state)
            .run(request(), credential(), &control)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::Timeout { waited_secs: 2 }));
        assert!(started.elapsed() <= Duration::from_secs(6));
        assert_eq!(state.status_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_bounds_slow_status_poll() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Running)]);
        state.delay_status(Duration::from_secs(20));

        let started = Instant::now();
        let err = orchestrator(&state)
            .run(request(), credential(), &control(1000, 5))
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::Timeout { waited_secs: 5 }));
        assert!(started.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_deadline_bounds_slow_submission() {
        let state = MockQueryState::new();
        state.delay_submission(Duration::from_secs(20));

        let mut control = control(1000, 30);
        control.deadline = Some(Instant::now() + Duration::from_secs(3));

        let started = Instant::now();
        let err = orchestrator(&state)
            .run(request(), credential(), &control)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::Timeout { waited_secs: 3 }));
        assert!(started.elapsed() <= Duration::from_secs(4));
        assert!(state.submissions().is_empty());
        assert_eq!(state.status_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_surfaces_reason() {
        let state = MockQueryState::new();
        state.script_statuses(vec![
            JobStatus::new(JobState::Running),
            JobStatus::with_reason(JobState::Failed, "SYNTAX_ERROR: line 1:8"),
        ]);

        let err = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Query FAILED: SYNTAX_ERROR: line 1:8");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_job_without_reason() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Cancelled)]);

        let err = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Query CANCELLED: Unknown error");
    }

    #[tokio::test]
    async fn test_status_poll_error_is_not_retried() {
        let state = MockQueryState::new();
        *state.fail_status.lock().unwrap() = Some("throttled".to_string());

        let err = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::Poll(_)));
        assert_eq!(state.status_polls(), 1);
    }

    #[tokio::test]
    async fn test_submission_error() {
        let state = MockQueryState::new();
        *state.fail_submission.lock().unwrap() = Some("Database analytics not found".to_string());

        let err = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to start query: Database analytics not found"
        );
        assert_eq!(state.status_polls(), 0);
    }

    #[tokio::test]
    async fn test_three_pages_strip_header_once() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Succeeded)]);
        state.script_pages(vec![
            page(&[&["id", "name"], &["1", "a"], &["2", "b"]]),
            page(&[&["3", "c"], &["4", "d"]]),
            page(&[&["5", "e"]]),
        ]);

        let outcome = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap();

        let total_rows = 6;
        assert_eq!(outcome.result.row_count(), total_rows - 1);
        let ids: Vec<&str> = outcome.result.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_row_wider_than_header_fails() {
        let state = MockQueryState::new();
        state.script_statuses(vec![JobStatus::new(JobState::Succeeded)]);
        state.script_pages(vec![page(&[&["a", "b"], &["1", "2", "3"]])]);

        let err = orchestrator(&state)
            .run(request(), credential(), &control(1000, 30))
            .await
            .unwrap_err();

        assert!(matches!(err, QueryFailure::MalformedRow(_)));
    }
}
