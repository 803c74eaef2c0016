// ABOUTME: The User record: tenant identity and subscription state.
// ABOUTME: Subscription gating feeds the orchestrator and the reaper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Email,
    Google,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Inactive,
    Active,
    Expired,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Starter,
}

/// A tenant account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub auth_provider: AuthProvider,
    pub subscription_status: SubscriptionStatus,
    pub tier: Option<Tier>,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub expiry_reminder_sent: bool,
    pub max_agents: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: UserId, email: impl Into<String>, auth_provider: AuthProvider) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.into().to_lowercase(),
            password_hash: None,
            google_id: None,
            auth_provider,
            subscription_status: SubscriptionStatus::Inactive,
            tier: None,
            subscription_expires_at: None,
            expiry_reminder_sent: false,
            max_agents: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the subscription window has closed as of `now`.
    pub fn subscription_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status == SubscriptionStatus::Active
            && self.subscription_expires_at.is_some_and(|at| at <= now)
    }
}

/// Store update for a user.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub subscription_status: Option<SubscriptionStatus>,
    pub tier: Option<Option<Tier>>,
    pub subscription_expires_at: Option<Option<DateTime<Utc>>>,
    pub expiry_reminder_sent: Option<bool>,
    pub max_agents: Option<u32>,
}

impl UserPatch {
    /// The expiry cascade: status expired, fleet allowance revoked.
    pub fn expired() -> Self {
        Self {
            subscription_status: Some(SubscriptionStatus::Expired),
            max_agents: Some(0),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn email_lowercased() {
        let u = User::new(UserId::new("u1"), "Alice@Example.COM", AuthProvider::Email);
        assert_eq!(u.email, "alice@example.com");
    }

    #[test]
    fn lapse_requires_active_and_past_expiry() {
        let now = Utc::now();
        let mut u = User::new(UserId::new("u1"), "a@b.c", AuthProvider::Email);
        assert!(!u.subscription_lapsed(now));

        u.subscription_status = SubscriptionStatus::Active;
        u.subscription_expires_at = Some(now - Duration::seconds(1));
        assert!(u.subscription_lapsed(now));

        u.subscription_expires_at = Some(now + Duration::days(1));
        assert!(!u.subscription_lapsed(now));

        u.subscription_status = SubscriptionStatus::Canceled;
        u.subscription_expires_at = Some(now - Duration::seconds(1));
        assert!(!u.subscription_lapsed(now));
    }
}
