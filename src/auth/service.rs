use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::code::generate_code;
use crate::auth::rate_limit::{limit_reached, window_start, IdentityGate};
use crate::auth::session::{Claims, SessionIssuer};
use crate::db;
use crate::db::models::{OtpChallenge, PublicUser, User};
use crate::db::otp_store::OtpStore;
use crate::db::user_store::UserStore;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;

/// Tunables for challenge issuance and verification.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub code_length: usize,
    pub otp_lifetime: Duration,
    pub max_requests: u32,
    pub rate_window: Duration,
    /// Serialize generation per phone number so the limit is exact.
    pub strict_rate_limit: bool,
    pub session_lifetime: Duration,
    /// Deadline for every individual store call.
    pub store_timeout: std::time::Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            code_length: 6,
            otp_lifetime: Duration::minutes(2),
            max_requests: 3,
            rate_window: Duration::minutes(10),
            strict_rate_limit: false,
            session_lifetime: Duration::hours(24),
            store_timeout: std::time::Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeIssued {
    pub message: String,
    pub expires_in_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginOutcome {
    Registered,
    LoggedIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: PublicUser,
    pub expires_at: DateTime<Utc>,
    pub outcome: LoginOutcome,
}

/// The OTP login state machine.
///
/// Per phone number a challenge moves `PENDING -> CONSUMED` on a successful
/// verification or `PENDING -> EXPIRED` with time. A newer pending challenge
/// hides older ones because only the newest valid row is ever read.
pub struct AuthService {
    otps: Arc<dyn OtpStore>,
    users: Arc<dyn UserStore>,
    issuer: SessionIssuer,
    policy: AuthPolicy,
    gate: IdentityGate,
}

impl AuthService {
    pub fn new(
        otps: Arc<dyn OtpStore>,
        users: Arc<dyn UserStore>,
        jwt_secret: &[u8],
        policy: AuthPolicy,
    ) -> Self {
        Self {
            otps,
            users,
            issuer: SessionIssuer::new(jwt_secret, policy.session_lifetime),
            policy,
            gate: IdentityGate::new(),
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    pub async fn generate_challenge(&self, phone_number: &str) -> Result<ChallengeIssued> {
        let _serialized = if self.policy.strict_rate_limit {
            Some(self.gate.acquire(phone_number).await)
        } else {
            None
        };

        let since = window_start(Utc::now(), self.policy.rate_window);
        let count = self.bounded(self.otps.count_since(phone_number, since)).await?;
        if limit_reached(count, self.policy.max_requests) {
            warn!("Rate limit reached for {} ({} requests in window)", phone_number, count);
            return Err(AuthError::RateLimited.into());
        }

        let code = generate_code(self.policy.code_length)?;
        let challenge = OtpChallenge::new(phone_number, code, self.policy.otp_lifetime);
        let stored = self.bounded(self.otps.create(&challenge)).await?;

        // Stand-in for SMS delivery: operators read codes from this target.
        info!(
            target: "otp_delivery",
            phone_number = %stored.phone_number,
            code = %stored.code,
            expires_at = %stored.expires_at,
            "OTP issued"
        );

        Ok(ChallengeIssued {
            message: "OTP sent successfully".to_string(),
            expires_in_minutes: self.policy.otp_lifetime.num_minutes(),
        })
    }

    pub async fn verify_challenge(&self, phone_number: &str, code: &str) -> Result<AuthSession> {
        let challenge = self
            .bounded(self.otps.latest_valid(phone_number))
            .await?
            .ok_or(AuthError::NoActiveChallenge)?;

        if !codes_match(&challenge.code, code) {
            return Err(AuthError::CodeMismatch.into());
        }

        if !challenge.is_valid_at(Utc::now()) {
            return Err(AuthError::ChallengeExpired.into());
        }

        // From here on the challenge stays consumed even if a later step fails.
        let consumed = self.bounded(self.otps.consume(&challenge)).await?;
        if consumed == 0 {
            warn!("Lost consume race for {}", phone_number);
            return match self.bounded(self.otps.latest_valid(phone_number)).await? {
                None => Err(AuthError::NoActiveChallenge.into()),
                Some(_) => Err(AuthError::ChallengeExpired.into()),
            };
        }

        let (mut user, outcome) = match self.bounded(self.users.get_by_phone(phone_number)).await? {
            Some(user) => (user, LoginOutcome::LoggedIn),
            None => self.register(phone_number).await?,
        };

        user.record_login(Utc::now());
        self.bounded(self.users.update(&user)).await?;

        let (token, expires_at) = self.issuer.mint(&user)?;
        info!("User {} authenticated ({:?})", user.id, outcome);

        Ok(AuthSession {
            token,
            user: user.to_public(),
            expires_at,
            outcome,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        self.issuer.validate(token)
    }

    /// Housekeeping: deletes expired challenges and idle strict-mode locks.
    pub async fn purge_expired(&self) -> Result<u64> {
        let purged = self.bounded(self.otps.purge_expired()).await?;
        self.gate.cleanup().await;
        Ok(purged)
    }

    async fn register(&self, phone_number: &str) -> Result<(User, LoginOutcome)> {
        match self.bounded(self.users.create(&User::new(phone_number))).await {
            Ok(user) => {
                info!("Registered new user {} for {}", user.id, phone_number);
                Ok((user, LoginOutcome::Registered))
            }
            // Another request registered the number first.
            Err(AppError::DatabaseError(DatabaseError::Duplicate)) => {
                let user = self
                    .bounded(self.users.get_by_phone(phone_number))
                    .await?
                    .ok_or_else(|| {
                        AppError::InternalError("user missing after duplicate insert".to_string())
                    })?;
                Ok((user, LoginOutcome::LoggedIn))
            }
            Err(e) => Err(e),
        }
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        db::bounded(self.policy.store_timeout, operation).await
    }
}

fn codes_match(expected: &str, submitted: &str) -> bool {
    let (expected, submitted) = (expected.as_bytes(), submitted.as_bytes());
    expected.len() == submitted.len()
        && expected
            .iter()
            .zip(submitted)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}
