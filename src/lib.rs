pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod users;

use std::sync::Arc;
use actix_web::{web, HttpResponse};
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthPolicy, AuthService, AuthSession, Claims, LoginOutcome};
pub use db::{MemoryOtpStore, MemoryUserStore, OtpStore, PgOtpStore, PgUserStore, User, UserStore};
pub use users::UserService;

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Registers every HTTP route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/auth/otp")
                        .route("/generate", web::post().to(auth::handlers::generate_otp))
                        .route("/verify", web::post().to(auth::handlers::verify_otp)),
                )
                .service(
                    web::scope("/users")
                        .route("", web::get().to(users::handlers::list_users))
                        .route("/{id}", web::get().to(users::handlers::get_user))
                        .route("/{id}", web::delete().to(users::handlers::delete_user)),
                ),
        );
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth: Arc<AuthService>,
    pub users: Arc<UserService>,
}

impl AppState {
    /// Connects to Postgres and runs migrations, or falls back to the
    /// in-process stores when `database.url` is `memory`.
    pub async fn new(config: Settings) -> Result<Self> {
        if config.database.is_memory() {
            info!("Using in-memory stores; data is lost on restart");
            return Ok(Self::with_stores(
                config,
                Arc::new(MemoryOtpStore::new()),
                Arc::new(MemoryUserStore::new()),
            ));
        }

        let pool = Arc::new(db::connect(&config.database).await?);
        db::migrate(&pool).await?;

        Ok(Self::with_stores(
            config,
            Arc::new(PgOtpStore::new(pool.clone())),
            Arc::new(PgUserStore::new(pool)),
        ))
    }

    pub fn with_stores(
        config: Settings,
        otps: Arc<dyn OtpStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let policy = config.auth_policy();
        let store_timeout = policy.store_timeout;
        let auth = AuthService::new(otps, users.clone(), config.auth.jwt_secret.as_bytes(), policy);

        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            users: Arc::new(UserService::new(users, store_timeout)),
        }
    }
}
