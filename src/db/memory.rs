//! In-process stores with the same semantics as the Postgres ones.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{OtpChallenge, PaginationQuery, User, UserPage};
use crate::db::otp_store::OtpStore;
use crate::db::user_store::UserStore;
use crate::error::DatabaseError;
use crate::Result;

#[derive(Default)]
struct OtpTable {
    next_id: i64,
    rows: Vec<OtpChallenge>,
}

#[derive(Default)]
pub struct MemoryOtpStore {
    table: RwLock<OtpTable>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row for a phone number, oldest first.
    pub async fn challenges_for(&self, phone_number: &str) -> Vec<OtpChallenge> {
        let table = self.table.read().await;
        table
            .rows
            .iter()
            .filter(|row| row.phone_number == phone_number)
            .cloned()
            .collect()
    }
}

fn newest_valid<'a>(
    rows: &'a [OtpChallenge],
    phone_number: &str,
    now: DateTime<Utc>,
) -> Option<&'a OtpChallenge> {
    rows.iter()
        .filter(|row| row.phone_number == phone_number && row.is_valid_at(now))
        .max_by_key(|row| (row.created_at, row.id))
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn create(&self, challenge: &OtpChallenge) -> Result<OtpChallenge> {
        let mut table = self.table.write().await;
        table.next_id += 1;
        let stored = OtpChallenge {
            id: table.next_id,
            ..challenge.clone()
        };
        table.rows.push(stored.clone());
        Ok(stored)
    }

    async fn latest_valid(&self, phone_number: &str) -> Result<Option<OtpChallenge>> {
        let table = self.table.read().await;
        Ok(newest_valid(&table.rows, phone_number, Utc::now()).cloned())
    }

    async fn consume(&self, challenge: &OtpChallenge) -> Result<u64> {
        let now = Utc::now();
        let mut table = self.table.write().await;

        let claimable = table
            .rows
            .iter()
            .any(|row| row.id == challenge.id && row.is_valid_at(now));
        if !claimable {
            return Ok(0);
        }

        let mut consumed = 0;
        for row in table
            .rows
            .iter_mut()
            .filter(|row| row.phone_number == challenge.phone_number && !row.used)
        {
            row.used = true;
            consumed += 1;
        }
        Ok(consumed)
    }

    async fn count_since(&self, phone_number: &str, since: DateTime<Utc>) -> Result<i64> {
        let table = self.table.read().await;
        let count = table
            .rows
            .iter()
            .filter(|row| row.phone_number == phone_number && row.created_at >= since)
            .count();
        Ok(count as i64)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut table = self.table.write().await;
        let before = table.rows.len();
        table.rows.retain(|row| !row.is_expired_at(now));
        Ok((before - table.rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id)
            || users.values().any(|u| u.phone_number == user.phone_number)
        {
            return Err(DatabaseError::Duplicate.into());
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_by_phone(&self, phone_number: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.phone_number == phone_number).cloned())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        if let Some(existing) = users.get_mut(&user.id) {
            existing.phone_number = user.phone_number.clone();
            existing.updated_at = user.updated_at;
            existing.last_login_at = user.last_login_at;
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.users.write().await.remove(&id).is_some())
    }

    async fn list(&self, query: &PaginationQuery) -> Result<UserPage> {
        let users = self.users.read().await;
        let needle = query.search_term().map(str::to_lowercase);

        let mut matching: Vec<&User> = users
            .values()
            .filter(|u| match &needle {
                Some(needle) => u.phone_number.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size() as usize)
            .map(User::to_public)
            .collect();

        Ok(UserPage::new(page, total, query))
    }
}
