//! Token issue, source authorization and connect/disconnect tracking

use chrono::{DateTime, Utc};
use onair_common::auth;
use onair_common::events::OnAirEvent;
use onair_common::models::{LiveSession, LiveToken, Metadata, PriorityLevel};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::LiveService;
use crate::error::{Error, Result};
use crate::store::RedeemOutcome;

/// Request for a single-use DJ source token
#[derive(Debug, Clone)]
pub struct GenerateTokenRequest {
    pub station_id: String,
    pub mount_id: String,
    pub user_id: String,
    pub username: String,
    pub priority: PriorityLevel,
    /// Zero selects the configured default
    pub ttl: Duration,
}

/// Token handed to the DJ client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Source connection reported by the ingest server
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    pub station_id: String,
    pub mount_id: String,
    pub token: String,
    pub source_ip: Option<String>,
    pub source_port: Option<u16>,
    pub user_agent: Option<String>,
}

impl LiveService {
    /// Issue a token for a live priority level
    pub async fn generate_token(&self, req: GenerateTokenRequest) -> Result<IssuedToken> {
        if !req.priority.is_live() {
            return Err(Error::InvalidPriority(format!(
                "{} ({}) is not a live priority",
                req.priority.name(),
                req.priority.as_i64()
            )));
        }

        let ttl = if req.ttl.is_zero() {
            self.settings.default_token_ttl
        } else {
            req.ttl
        };
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::InvalidPriority(format!("token ttl out of range: {}", e)))?;

        let now = Utc::now();
        let token = LiveToken {
            token: auth::generate_token(),
            session_id: Uuid::new_v4(),
            station_id: req.station_id,
            mount_id: req.mount_id,
            user_id: req.user_id,
            username: req.username,
            priority: req.priority,
            expires_at: now + ttl,
            used: false,
            used_at: None,
            created_at: now,
        };

        self.store
            .insert_token(&token)
            .await
            .map_err(|e| Error::store("create live token", e))?;

        info!(
            station_id = %token.station_id,
            mount_id = %token.mount_id,
            user_id = %token.user_id,
            session_id = %token.session_id,
            priority = token.priority.as_i64(),
            expires_at = %token.expires_at,
            "live token issued"
        );

        Ok(IssuedToken {
            token: token.token,
            session_id: token.session_id,
            expires_at: token.expires_at,
        })
    }

    /// Redeem a token for a source connection
    ///
    /// Exactly one caller can win for a given token; every later attempt gets
    /// `TokenAlreadyUsed`.
    pub async fn authorize_source(&self, station_id: &str, mount_id: &str, token: &str) -> Result<bool> {
        self.redeem(station_id, mount_id, token).await?;
        Ok(true)
    }

    async fn redeem(&self, station_id: &str, mount_id: &str, token: &str) -> Result<LiveToken> {
        let outcome = self
            .store
            .redeem_token(station_id, mount_id, token, Utc::now())
            .await
            .map_err(|e| Error::store("redeem live token", e))?;

        match outcome {
            RedeemOutcome::Redeemed(token) => {
                info!(
                    station_id,
                    mount_id,
                    session_id = %token.session_id,
                    user_id = %token.user_id,
                    "live source authorized"
                );
                Ok(token)
            }
            RedeemOutcome::AlreadyUsed => {
                warn!(station_id, mount_id, "live token replayed");
                Err(Error::TokenAlreadyUsed)
            }
            RedeemOutcome::Invalid => {
                warn!(station_id, mount_id, "live token rejected");
                Err(Error::InvalidToken)
            }
        }
    }

    /// Record a source connection against its token's session id
    ///
    /// Does not touch priority; the DJ takes the air through a handover.
    pub async fn handle_connect(&self, req: ConnectRequest) -> Result<LiveSession> {
        let found = self
            .store
            .find_token(&req.station_id, &req.mount_id, &req.token)
            .await
            .map_err(|e| Error::store("query live token", e))?;

        let token = match found {
            None => {
                warn!(station_id = %req.station_id, mount_id = %req.mount_id, "connect with unknown token");
                return Err(Error::SessionNotFound(format!(
                    "no token on {}/{}",
                    req.station_id, req.mount_id
                )));
            }
            Some(token) if token.used => token,
            Some(_) => self.redeem(&req.station_id, &req.mount_id, &req.token).await?,
        };

        let session = LiveSession {
            id: token.session_id,
            station_id: token.station_id,
            mount_id: token.mount_id,
            user_id: token.user_id,
            username: token.username,
            priority: token.priority,
            token: token.token,
            source_ip: req.source_ip,
            source_port: req.source_port,
            user_agent: req.user_agent,
            active: true,
            connected_at: Utc::now(),
            disconnected_at: None,
            metadata: Metadata::new(),
        };

        let created = self
            .store
            .create_session(&session)
            .await
            .map_err(|e| Error::store("create live session", e))?;
        if !created {
            warn!(session_id = %session.id, "token already bound to a session");
            return Err(Error::TokenAlreadyUsed);
        }

        info!(
            session_id = %session.id,
            station_id = %session.station_id,
            mount_id = %session.mount_id,
            user_id = %session.user_id,
            source_ip = session.source_ip.as_deref().unwrap_or("-"),
            "DJ connected"
        );

        self.events.emit_lossy(OnAirEvent::DjConnect {
            session_id: session.id,
            station_id: session.station_id.clone(),
            mount_id: session.mount_id.clone(),
            user_id: session.user_id.clone(),
            username: session.username.clone(),
            priority: session.priority,
            timestamp: session.connected_at,
        });

        Ok(session)
    }

    /// End a session; any priority it holds stays until released
    pub async fn handle_disconnect(&self, session_id: Uuid) -> Result<LiveSession> {
        let mut session = self.load_session(session_id).await?;
        if !session.is_active() {
            debug!(%session_id, "disconnect for session already ended");
            return Ok(session);
        }

        let now = Utc::now();
        session.disconnect(now);
        self.store
            .update_session(&session)
            .await
            .map_err(|e| Error::store("update live session", e))?;

        let duration_secs = session.duration(now).num_seconds();
        info!(
            %session_id,
            station_id = %session.station_id,
            user_id = %session.user_id,
            duration_secs,
            "DJ disconnected"
        );

        self.events.emit_lossy(OnAirEvent::DjDisconnect {
            session_id,
            station_id: session.station_id.clone(),
            mount_id: session.mount_id.clone(),
            user_id: session.user_id.clone(),
            duration_secs,
            timestamp: now,
        });

        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<LiveSession> {
        self.load_session(session_id).await
    }

    /// Connected sessions, newest first
    pub async fn active_sessions(&self, station_id: Option<&str>) -> Result<Vec<LiveSession>> {
        self.store
            .active_sessions(station_id)
            .await
            .map_err(|e| Error::store("list live sessions", e))
    }

    pub(super) async fn load_session(&self, session_id: Uuid) -> Result<LiveSession> {
        self.store
            .get_session(session_id)
            .await
            .map_err(|e| Error::store("query live session", e))?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }
}
