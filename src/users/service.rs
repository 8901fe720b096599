use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::db;
use crate::db::models::{PaginationQuery, PublicUser, UserPage};
use crate::db::user_store::UserStore;
use crate::error::AppError;
use crate::Result;

pub struct UserService {
    users: Arc<dyn UserStore>,
    store_timeout: Duration,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>, store_timeout: Duration) -> Self {
        Self { users, store_timeout }
    }

    pub async fn get(&self, id: Uuid) -> Result<PublicUser> {
        db::bounded(self.store_timeout, self.users.get_by_id(id))
            .await?
            .map(|user| user.to_public())
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    pub async fn list(&self, query: &PaginationQuery) -> Result<UserPage> {
        db::bounded(self.store_timeout, self.users.list(query)).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !db::bounded(self.store_timeout, self.users.delete(id)).await? {
            return Err(AppError::NotFound("User".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryUserStore;
    use crate::db::models::User;
    use crate::error::DatabaseError;

    #[tokio::test]
    async fn test_get_and_delete() {
        let store = Arc::new(MemoryUserStore::new());
        let user = store.create(&User::new("+1555000111")).await.unwrap();
        let service = UserService::new(store.clone(), Duration::from_secs(5));

        assert_eq!(service.get(user.id).await.unwrap().phone_number, "+1555000111");

        service.delete(user.id).await.unwrap();
        assert!(store.is_empty().await);

        assert!(matches!(service.get(user.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(service.delete(user.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_slow_store_fails_fast() {
        let service = UserService::new(Arc::new(StalledUserStore), Duration::from_millis(20));

        let started = std::time::Instant::now();
        for result in [
            service.get(Uuid::new_v4()).await.map(|_| ()),
            service.list(&PaginationQuery::default()).await.map(|_| ()),
            service.delete(Uuid::new_v4()).await,
        ] {
            assert!(matches!(result, Err(AppError::DatabaseError(DatabaseError::Timeout))));
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    struct StalledUserStore;

    #[async_trait::async_trait]
    impl UserStore for StalledUserStore {
        async fn create(&self, user: &User) -> Result<User> {
            Ok(user.clone())
        }

        async fn get_by_id(&self, _id: Uuid) -> Result<Option<User>> {
            stall().await
        }

        async fn get_by_phone(&self, _phone_number: &str) -> Result<Option<User>> {
            stall().await
        }

        async fn update(&self, _user: &User) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _id: Uuid) -> Result<bool> {
            stall().await
        }

        async fn list(&self, _query: &PaginationQuery) -> Result<UserPage> {
            stall().await
        }
    }

    async fn stall<T>() -> Result<T> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(AppError::InternalError("stalled store returned".into()))
    }
}
