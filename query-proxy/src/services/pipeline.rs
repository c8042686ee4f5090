//! The verify -> map -> assume -> run sequence shared by every entry point.

use std::sync::Arc;

use crate::clients::{
    IdentityProvider, KeySource, MappingStore, QueryBackendFactory, RoleAssumer, SecretStore,
};
use crate::config::ProxyConfig;
use crate::models::{Credential, JobId, ResultSet, RoleId, VerifiedIdentity};
use crate::services::broker::CredentialBroker;
use crate::services::error::ProxyError;
use crate::services::identity_cache::IdentityCache;
use crate::services::metrics::record_pipeline_request;
use crate::services::orchestrator::{PollControl, QueryOrchestrator, QueryRequest};
use crate::services::role_mapper::RoleMapper;
use crate::services::verifier::{
    ApiKeyVerifier, BearerVerifier, CredentialVerifier, PasswordVerifier,
};

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub key_source: Arc<dyn KeySource>,
    pub secret_store: Arc<dyn SecretStore>,
    pub mapping_store: Arc<dyn MappingStore>,
    pub role_assumer: Arc<dyn RoleAssumer>,
    pub backend_factory: Arc<dyn QueryBackendFactory>,
}

/// One request's worth of input. Owned so the credential is dropped as soon
/// as verification is over.
#[derive(Debug)]
pub struct PipelineRequest {
    pub credential: Credential,
    pub query: QueryRequest,
    pub control: PollControl,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub identity: VerifiedIdentity,
    pub role: RoleId,
    pub job_id: JobId,
    pub query: String,
    pub result: ResultSet,
}

pub struct QueryPipeline {
    verifier: CredentialVerifier,
    mapper: RoleMapper,
    broker: CredentialBroker,
    orchestrator: QueryOrchestrator,
}

impl QueryPipeline {
    pub fn new(config: &ProxyConfig, collaborators: Collaborators) -> Self {
        let mut password = PasswordVerifier::new(
            collaborators.identity_provider,
            &config.cognito.client_id,
            config.cognito.client_secret.clone(),
        )
        .require_group_lookup(config.cognito.group_lookup_required);
        if config.cognito.identity_cache_enabled {
            password = password.with_cache(IdentityCache::new());
        }

        let bearer = BearerVerifier::new(collaborators.key_source, config.cognito.issuer());
        let api_key = ApiKeyVerifier::new(
            collaborators.secret_store,
            collaborators.mapping_store,
            &config.api_keys.environment,
            config.api_keys.scan_fallback,
        );

        Self {
            verifier: CredentialVerifier::new(password, bearer, api_key),
            mapper: RoleMapper::new(config.roles.binding_table()),
            broker: CredentialBroker::new(collaborators.role_assumer),
            orchestrator: QueryOrchestrator::new(
                collaborators.backend_factory,
                config.athena.workgroup.clone(),
            ),
        }
    }

    pub async fn execute(&self, request: PipelineRequest) -> Result<PipelineOutcome, ProxyError> {
        let entry_point = request.credential.strategy().to_string();
        let result = self.run(request).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        record_pipeline_request(&entry_point, outcome);
        result
    }

    #[tracing::instrument(skip_all, fields(strategy = %request.credential.strategy()))]
    async fn run(&self, request: PipelineRequest) -> Result<PipelineOutcome, ProxyError> {
        let PipelineRequest {
            credential,
            query,
            control,
        } = request;

        let identity = self.verifier.verify(&credential).await?;
        drop(credential);

        let role = self.mapper.map_to_role(&identity)?;
        tracing::info!(principal = %identity.principal, role = %role, "Identity mapped to role");

        let scoped = self
            .broker
            .assume_role(&role, identity.strategy, identity.session_hint())
            .await?;

        let query_text = query.query.clone();
        let outcome = self.orchestrator.run(query, scoped, &control).await?;

        Ok(PipelineOutcome {
            identity,
            role,
            job_id: outcome.job_id,
            query: query_text,
            result: outcome.result,
        })
    }
}
