use crate::dtos::{QueryResponse, ResultRecords};
use crate::models::AuthStrategy;
use crate::services::pipeline::PipelineOutcome;

/// Success envelope for a completed pipeline run.
///
/// Identity fields depend on the strategy: password callers see their user
/// name and groups, client-credential callers their client id and scopes, and
/// API-key callers the key owner.
pub fn format_success(outcome: PipelineOutcome) -> QueryResponse {
    let PipelineOutcome {
        identity,
        role,
        job_id,
        query,
        result,
    } = outcome;

    let (authenticated_user, user_groups, client_id, scopes) = match identity.strategy {
        AuthStrategy::Password => (Some(identity.principal), Some(identity.groups), None, None),
        AuthStrategy::ClientCredentials => (None, None, identity.client_id, Some(identity.scopes)),
        AuthStrategy::ApiKey => (Some(identity.principal), None, None, None),
    };

    QueryResponse {
        success: true,
        auth_method: identity.strategy.auth_method().to_string(),
        authenticated_user,
        user_groups,
        client_id,
        scopes,
        lf_role: role.to_string(),
        query_execution_id: job_id.to_string(),
        query,
        columns: result.columns().to_vec(),
        row_count: result.row_count(),
        data: ResultRecords(result),
    }
}
