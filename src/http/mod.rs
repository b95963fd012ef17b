//! Thin JSON API over the stores and the collector.
//!
//! Database work is blocking Diesel code and always runs through
//! `web::block`; database-backed routes answer 503 until the readiness gate
//! opens.

pub mod error;
pub mod users;
pub mod weather;

use actix_web::{HttpResponse, get, http::header, web};
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::client::WeatherSource;
use crate::db::pool::Readiness;
use crate::db::store::PgStore;
use crate::http::error::{ApiError, DATABASE_NOT_READY};
use crate::services::history::HistoryStore;
use crate::services::notifier::Notifier;

/// Dependency bundle shared by all handlers.
pub struct AppState {
    pub store: PgStore,
    pub history: Arc<HistoryStore>,
    pub weather: Arc<dyn WeatherSource>,
    pub notifier: Arc<dyn Notifier>,
    pub readiness: Arc<Readiness>,
    pub collector_concurrency: NonZeroUsize,
    pub report_email_to: Option<String>,
}

impl AppState {
    pub fn ensure_ready(&self) -> Result<(), ApiError> {
        if self.readiness.is_ready() {
            Ok(())
        } else {
            Err(ApiError::Unavailable(DATABASE_NOT_READY.to_string()))
        }
    }
}

fn probe_response(ok: bool) -> HttpResponse {
    let mut response = if ok {
        HttpResponse::Ok()
    } else {
        HttpResponse::ServiceUnavailable()
    };
    response.insert_header((header::CACHE_CONTROL, "no-store")).finish()
}

/// 200 once the database has been reached at least once.
#[get("/health/ready")]
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    probe_response(state.readiness.is_ready())
}

#[get("/health/live")]
pub async fn live() -> HttpResponse {
    probe_response(true)
}

/// Malformed JSON bodies get the same `{"error"}` shape as other failures.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| ApiError::BadRequest(format!("JSON invalide : {}", err)).into())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config()).service(ready).service(live).service(
        web::scope("/api")
            .service(weather::list_zones)
            .service(weather::history)
            .service(weather::sensor_history)
            .service(weather::latest_sensors)
            .service(weather::fetch_now)
            .service(users::signup)
            .service(users::login)
            .service(users::list_users)
            .service(users::update_user)
            .service(users::toggle_zone)
            .service(users::user_alerts)
            .service(users::mark_alert_read)
            .service(users::submit_report),
    );
}


#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test};

    #[actix_web::test]
    async fn readiness_probe_follows_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = testing::state(&dir);
        let readiness = state.readiness.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health/ready").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.mark_ready();
        let req = test::TestRequest::get().uri("/health/ready").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/health/live").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn database_routes_wait_for_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = testing::state(&dir);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

        for uri in ["/api/utilisateurs", "/api/users/1/alerts", "/api/latest-sensors"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        }
    }
}
