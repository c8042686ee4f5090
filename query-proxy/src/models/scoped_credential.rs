use chrono::{DateTime, Utc};
use secrecy::Secret;

use super::role::RoleId;

/// Temporary credentials for one role, valid for a single query job.
///
/// Deliberately not `Clone`: the value is moved into the query backend that
/// runs the job and dropped with it.
#[derive(Debug)]
pub struct ScopedCredential {
    pub access_key_id: String,
    pub secret_access_key: Secret<String>,
    pub session_token: Secret<String>,
    pub expires_at: DateTime<Utc>,
    pub role: RoleId,
}

impl ScopedCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
