//! Live DJ tokens and sessions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Metadata, PriorityLevel};

/// Single-use bearer token scoped to station + mount + priority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveToken {
    pub token: String,
    /// Session id the connection will be recorded under
    pub session_id: Uuid,
    pub station_id: String,
    pub mount_id: String,
    pub user_id: String,
    pub username: String,
    pub priority: PriorityLevel,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LiveToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this token may be redeemed for the given scope at `now`
    pub fn is_redeemable(&self, station_id: &str, mount_id: &str, now: DateTime<Utc>) -> bool {
        !self.used
            && !self.is_expired_at(now)
            && self.station_id == station_id
            && self.mount_id == mount_id
    }
}

/// One DJ connection
///
/// Sessions are ended, never deleted. Network lifecycle and priority
/// lifecycle are independent: disconnecting does not release priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSession {
    pub id: Uuid,
    pub station_id: String,
    pub mount_id: String,
    pub user_id: String,
    pub username: String,
    pub priority: PriorityLevel,
    pub token: String,
    pub source_ip: Option<String>,
    pub source_port: Option<u16>,
    pub user_agent: Option<String>,
    pub active: bool,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl LiveSession {
    pub fn is_active(&self) -> bool {
        self.active && self.disconnected_at.is_none()
    }

    pub fn disconnect(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.disconnected_at = Some(now);
    }

    /// Connected time, up to `now` while still connected
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.disconnected_at.unwrap_or(now) - self.connected_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: Duration) -> LiveToken {
        let now = Utc::now();
        LiveToken {
            token: "abc".to_string(),
            session_id: Uuid::new_v4(),
            station_id: "station-1".to_string(),
            mount_id: "mount-1".to_string(),
            user_id: "user-1".to_string(),
            username: "dj".to_string(),
            priority: PriorityLevel::LiveOverride,
            expires_at: now + expires_in,
            used: false,
            used_at: None,
            created_at: now,
        }
    }

    #[test]
    fn test_token_scope_and_expiry() {
        let now = Utc::now();
        let t = token(Duration::hours(1));
        assert!(t.is_redeemable("station-1", "mount-1", now));
        assert!(!t.is_redeemable("station-2", "mount-1", now));
        assert!(!t.is_redeemable("station-1", "mount-2", now));
        assert!(!t.is_redeemable("station-1", "mount-1", now + Duration::hours(2)));
    }

    #[test]
    fn test_used_token_not_redeemable() {
        let mut t = token(Duration::hours(1));
        t.used = true;
        assert!(!t.is_redeemable("station-1", "mount-1", Utc::now()));
    }

    #[test]
    fn test_session_duration() {
        let start = Utc::now();
        let mut session = LiveSession {
            id: Uuid::new_v4(),
            station_id: "station-1".to_string(),
            mount_id: "mount-1".to_string(),
            user_id: "user-1".to_string(),
            username: "dj".to_string(),
            priority: PriorityLevel::LiveScheduled,
            token: "abc".to_string(),
            source_ip: None,
            source_port: None,
            user_agent: None,
            active: true,
            connected_at: start,
            disconnected_at: None,
            metadata: Metadata::new(),
        };
        assert_eq!(session.duration(start + Duration::seconds(30)), Duration::seconds(30));

        session.disconnect(start + Duration::seconds(90));
        assert!(!session.is_active());
        assert_eq!(session.duration(start + Duration::hours(5)), Duration::seconds(90));
    }
}
