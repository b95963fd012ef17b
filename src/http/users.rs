//! Account, alert inbox and problem-report routes.

use actix_web::{HttpResponse, get, post, put, web};
use chrono::Local;
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::http::AppState;
use crate::http::error::ApiError;
use crate::services::accounts::{
    AccountError, LoginRequest, Profile, SignupRequest, ToggleZoneRequest, UpdateRequest, check_login,
};
use crate::zones;

const INBOX_LIMIT: i64 = 50;

fn user_not_found() -> ApiError {
    ApiError::NotFound(AccountError::UnknownUser.to_string())
}

#[post("/signup")]
pub async fn signup(state: web::Data<AppState>, body: web::Json<SignupRequest>) -> Result<HttpResponse, ApiError> {
    let new_user = body.into_inner().into_new_user()?;
    state.ensure_ready()?;
    let st = state.clone();
    let user = web::block(move || st.store.insert_user(&new_user)).await??;
    info!("Account created: {} (id {})", user.username, user.id);
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[post("/login")]
pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let LoginRequest { username, password } = body.into_inner();
    state.ensure_ready()?;
    let st = state.clone();
    let account = web::block(move || st.store.find_user_by_username(&username)).await??;
    let profile = Profile::from(check_login(account, &password)?);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "user": profile })))
}

#[get("/utilisateurs")]
pub async fn list_users(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state.ensure_ready()?;
    let st = state.clone();
    let users = web::block(move || st.store.list_users()).await??;
    Ok(HttpResponse::Ok().json(users))
}

#[put("/users/{id}")]
pub async fn update_user(
    state: web::Data<AppState>,
    id: web::Path<i32>,
    body: web::Json<UpdateRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    let changes = body.into_inner().into_changes()?;
    state.ensure_ready()?;
    let st = state.clone();
    let user = web::block(move || st.store.update_user(id, &changes))
        .await??
        .ok_or_else(user_not_found)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Profil mis à jour",
        "user": { "id": user.id, "username": user.username, "email": user.email, "langue": user.langue },
    })))
}

#[post("/users/{id}/toggle-zone")]
pub async fn toggle_zone(
    state: web::Data<AppState>,
    id: web::Path<i32>,
    body: web::Json<ToggleZoneRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    let zone = body.into_inner().zone_name;
    if !zones::is_known(&zone) {
        return Err(ApiError::unknown_zone());
    }
    state.ensure_ready()?;
    let st = state.clone();
    let zones = web::block(move || st.store.toggle_zone(id, &zone))
        .await??
        .ok_or_else(user_not_found)?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "newZones": zones })))
}

/// Unread alerts, newest first.
#[get("/users/{id}/alerts")]
pub async fn user_alerts(state: web::Data<AppState>, id: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    state.ensure_ready()?;
    let st = state.clone();
    let alerts = web::block(move || st.store.unread_alerts(id, INBOX_LIMIT)).await??;
    Ok(HttpResponse::Ok().json(alerts))
}

#[put("/alerts/{id}/read")]
pub async fn mark_alert_read(state: web::Data<AppState>, id: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let id = id.into_inner();
    state.ensure_ready()?;
    let st = state.clone();
    if !web::block(move || st.store.mark_alert_read(id)).await?? {
        return Err(ApiError::NotFound("Alerte introuvable".to_string()));
    }
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub user_email: Option<String>,
}

fn report_body(kind: &str, author: &str, description: &str) -> String {
    format!(
        "Nouveau rapport reçu depuis l'application.\n\n\
         Type : {}\n\
         Auteur : {}\n\
         Date : {}\n\n\
         -----------------------------------------\n\
         Message :\n{}\n",
        kind,
        author,
        Local::now().format("%d/%m/%Y %H:%M:%S"),
        description
    )
}

/// Forward a user's problem report to the operators' mailbox.
#[post("/submit-report")]
pub async fn submit_report(state: web::Data<AppState>, body: web::Json<ReportRequest>) -> Result<HttpResponse, ApiError> {
    let ReportRequest {
        kind,
        description,
        user_email,
    } = body.into_inner();
    let non_blank = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
    let (Some(kind), Some(description)) = (non_blank(kind), non_blank(description)) else {
        return Err(ApiError::BadRequest("Champs manquants.".to_string()));
    };
    let to = state
        .report_email_to
        .clone()
        .ok_or_else(|| ApiError::Unavailable("Envoi de rapports non configuré".to_string()))?;
    let author = user_email.unwrap_or_else(|| "anonyme".to_string());
    let subject = format!("[Rapport {}] Nouveau message de l'app", kind);
    let text = report_body(&kind, &author, &description);

    let st = state.clone();
    web::block(move || st.notifier.send(&to, &subject, &text))
        .await?
        .map_err(|e| ApiError::Internal(format!("report delivery failed: {}", e)))?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Email envoyé !" })))
}
