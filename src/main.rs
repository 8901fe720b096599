use actix_web::{web, App, HttpServer};
use actix_cors::Cors;
use otp_auth_server::{AppState, Settings, AppError};
use otp_auth_server::config::CorsConfig;
use dotenv::dotenv;
use std::net::TcpListener;
use tracing::{info, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use std::time::Duration;

fn build_cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        // CORS disabled - use most restrictive settings
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
    } else {
        Cors::default()
            .allowed_origin("http://localhost:8080")
            .allowed_origin("http://127.0.0.1:8080")
            .allowed_methods(vec!["GET", "POST", "DELETE"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
    };

    cors.max_age(config.max_age as usize)
}

/// Periodically deletes expired challenges. Failures are logged and retried
/// on the next tick.
fn spawn_purge_loop(state: web::Data<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.auth.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!("Purged {} expired OTP challenges", purged),
                Err(e) => error!("Failed to purge expired OTP challenges: {}", e),
            }
        }
    });
}

#[actix_web::main]
async fn main() -> otp_auth_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully ({})", config.environment);

    let state = web::Data::new(AppState::new(config).await?);
    let settings = state.config.clone();

    spawn_purge_loop(
        state.clone(),
        Duration::from_secs(settings.maintenance.purge_interval_secs.max(1)),
    );

    let listener = TcpListener::bind(format!("{}:{}", settings.server.host, settings.server.port))?;
    info!("Starting server at {}:{}", settings.server.host, settings.server.port);

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&state.config.cors))
            .app_data(state.clone())
            .configure(otp_auth_server::configure)
    })
    .listen(listener)?
    .workers(settings.server.workers.max(1) as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    info!("Server exited");
    Ok(())
}
