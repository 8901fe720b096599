use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(phone_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            phone_number: phone_number.into(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    pub fn record_login(&mut self, at: DateTime<Utc>) {
        self.last_login_at = Some(at);
        self.updated_at = at;
    }

    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            phone_number: self.phone_number.clone(),
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        }
    }
}

/// The user fields exposed to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// One issued OTP. Rows are only ever mutated by flipping `used`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OtpChallenge {
    pub id: i64,
    pub phone_number: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used: bool,
}

impl OtpChallenge {
    /// A fresh, unsaved challenge. The store assigns `id` on insert.
    pub fn new(phone_number: impl Into<String>, code: String, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            phone_number: phone_number.into(),
            code,
            expires_at: now + lifetime,
            created_at: now,
            used: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

impl PaginationQuery {
    pub fn page(&self) -> i64 {
        self.page.filter(|p| *p >= 1).unwrap_or(1)
    }

    pub fn page_size(&self) -> i64 {
        match self.page_size {
            Some(size) if size >= 1 => size.min(MAX_PAGE_SIZE),
            _ => DEFAULT_PAGE_SIZE,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.page_size()
    }

    /// Trimmed search term; blank input means no filter.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPage {
    pub users: Vec<PublicUser>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl UserPage {
    pub fn new(users: Vec<PublicUser>, total: i64, query: &PaginationQuery) -> Self {
        let page_size = query.page_size();
        Self {
            users,
            total,
            page: query.page(),
            page_size,
            total_pages: (total + page_size - 1) / page_size,
        }
    }
}
