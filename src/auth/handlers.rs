use actix_web::{web, HttpResponse};
use serde::Deserialize;
use crate::AppState;
use crate::error::AppError;
use tracing::{info, warn, error, Level};

/// `users.phone_number` and `otps.phone_number` are VARCHAR(20).
pub const MAX_PHONE_LENGTH: usize = 20;

#[derive(Debug, Deserialize)]
pub struct GenerateOtpRequest {
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub phone_number: String,
    pub code: String,
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::ValidationError(format!("{} is required", field)));
    }
    Ok(value)
}

fn phone_number(value: &str) -> Result<&str, AppError> {
    let value = required(value, "phone_number")?;
    if value.chars().count() > MAX_PHONE_LENGTH {
        return Err(AppError::ValidationError(format!(
            "phone_number must be at most {} characters",
            MAX_PHONE_LENGTH
        )));
    }
    Ok(value)
}

/// Rejected challenges are routine client outcomes; only server faults are errors.
fn failure_level(e: &AppError) -> Level {
    match e {
        e if e.is_internal() => Level::ERROR,
        AppError::AuthError(_) => Level::WARN,
        _ => Level::INFO,
    }
}

fn log_failure(action: &str, phone_number: &str, e: &AppError) {
    let level = failure_level(e);
    if level == Level::ERROR {
        error!("{} failed for {}: {}", action, phone_number, e);
    } else if level == Level::WARN {
        warn!("{} rejected for {}: {}", action, phone_number, e);
    } else {
        info!("{} rejected for {}: {}", action, phone_number, e);
    }
}

pub async fn generate_otp(
    req: web::Json<GenerateOtpRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let phone_number = phone_number(&req.phone_number)?;
    info!("Received OTP request for {}", phone_number);

    match state.auth.generate_challenge(phone_number).await {
        Ok(issued) => Ok(HttpResponse::Ok().json(issued)),
        Err(e) => {
            log_failure("OTP generation", phone_number, &e);
            Err(e)
        }
    }
}

pub async fn verify_otp(
    req: web::Json<VerifyOtpRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let phone_number = phone_number(&req.phone_number)?;
    let code = required(&req.code, "code")?;
    info!("Received OTP verification for {}", phone_number);

    match state.auth.verify_challenge(phone_number, code).await {
        Ok(session) => {
            info!("Verification successful for {}", phone_number);
            Ok(HttpResponse::Ok().json(session))
        }
        Err(e) => {
            log_failure("Verification", phone_number, &e);
            Err(e)
        }
    }
}
