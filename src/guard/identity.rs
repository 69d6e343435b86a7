use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::SessionMetadata;

/// Request-scoped identity handed to handlers once a token has passed every
/// guard stage. Values come from the session record, not the token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub user_tenant_id: Uuid,
    pub role_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
    pub role_names: Vec<String>,
    pub permission_names: Vec<String>,
    pub permission_resources: Vec<String>,
    pub permission_actions: Vec<String>,
    /// Expiry of the access token that authenticated this request.
    pub token_expires_at: i64,
}

impl Identity {
    pub(super) fn from_session(session: SessionMetadata, token_expires_at: i64) -> Self {
        Self {
            user_id: session.user_id,
            tenant_id: session.tenant_id,
            user_tenant_id: session.user_tenant_id,
            role_id: session.role_id,
            email: session.email,
            session_id: session.session_id,
            role_names: session.role_names,
            permission_names: session.permission_names,
            permission_resources: session.permission_resources,
            permission_actions: session.permission_actions,
            token_expires_at,
        }
    }
}
