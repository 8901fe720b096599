use actix_web::{web, HttpResponse};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db::models::PaginationQuery;
use crate::error::AppError;
use crate::AppState;

fn parse_user_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::ValidationError("invalid user id".to_string()))
}

pub async fn list_users(
    _caller: AuthenticatedUser,
    query: web::Query<PaginationQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let page = state.users.list(&query).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn get_user(
    _caller: AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let id = parse_user_id(&path)?;
    let user = state.users.get(id).await?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn delete_user(
    AuthenticatedUser(caller): AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let id = parse_user_id(&path)?;
    state.users.delete(id).await?;
    info!("User {} deleted by {}", id, caller.user_id);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "User deleted successfully"
    })))
}
