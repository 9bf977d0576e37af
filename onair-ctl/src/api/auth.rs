//! API key authentication and role checks
//!
//! Keys arrive in the `X-API-Key` header and are matched by SHA-256 digest
//! against `[[auth.api_keys]]`. With no keys configured every request runs
//! as an anonymous admin (local development).

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use onair_common::auth::{digest_api_key, Role};
use onair_common::config::ApiKeyConfig;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::error::ApiError;
use super::server::AppContext;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Authenticated identity, inserted as a request extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub role: Role,
    pub user_id: Option<String>,
}

impl Caller {
    pub fn anonymous_admin() -> Self {
        Self {
            role: Role::Admin,
            user_id: None,
        }
    }

    /// Fail with 403 unless the caller holds one of `roles`
    pub fn require(&self, roles: &[Role]) -> Result<(), ApiError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("role '{}' may not call this endpoint", self.role)))
        }
    }

    /// Admins and managers act for anyone; other roles only for themselves
    pub fn may_act_for(&self, user_id: &str) -> bool {
        match self.role {
            Role::Admin | Role::Manager => true,
            _ => self.user_id.as_deref() == Some(user_id),
        }
    }
}

/// Accepted API keys by digest
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: HashMap<String, Caller>,
}

impl KeyRing {
    pub fn new(configured: &[ApiKeyConfig]) -> Self {
        let keys = configured
            .iter()
            .map(|k| {
                (
                    k.key_sha256.to_ascii_lowercase(),
                    Caller {
                        role: k.role,
                        user_id: k.user_id.clone(),
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// No keys configured: authentication disabled
    pub fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn identify(&self, api_key: &str) -> Option<&Caller> {
        self.keys.get(&digest_api_key(api_key))
    }
}

/// Resolve the caller and attach it to the request
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller = if ctx.keys.is_open() {
        Caller::anonymous_admin()
    } else {
        let presented = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        match ctx.keys.identify(presented) {
            Some(caller) => caller.clone(),
            None => {
                warn!(path = %request.uri().path(), "rejected unknown API key");
                return Err(ApiError::Unauthenticated);
            }
        }
    };

    debug!(role = %caller.role, path = %request.uri().path(), "request authenticated");
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}
