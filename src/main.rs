pub mod models {
    pub mod meteoblue;
    pub mod weather;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
    pub mod pool;
    pub mod store;
}
pub mod http;
pub mod schema;
pub mod utils;
pub mod zones;
pub mod services {
    pub mod accounts;
    pub mod alerts;
    pub mod collector;
    pub mod history;
    pub mod notifier;
    pub mod risk;
    pub mod sensors;
}

use crate::client::{WeatherClient, WeatherSource};
use crate::config::Config;
use crate::db::pool::{Readiness, build_pool, wait_for_database};
use crate::db::store::PgStore;
use crate::http::AppState;
use crate::services::alerts::{AlertPolicy, AlertScheduler};
use crate::services::collector;
use crate::services::history::HistoryStore;
use crate::services::notifier::{LogNotifier, Notifier, SmtpNotifier};
use actix_web::{App, HttpServer, middleware, web};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

fn spawn_named<F>(name: &str, f: F) -> Result<(), String>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map(|_| ())
        .map_err(|e| format!("failed to start {} thread: {}", name, e))
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (bind={}, history={}, alert_interval={}s, dedup_window={}s, push_dedup={}, daily_fetch={}, collector_concurrency={}, retention={}, mail={})",
        cfg.http_bind,
        cfg.history_path.display(),
        cfg.alert_interval.as_secs(),
        cfg.dedup_window.as_secs(),
        cfg.push_dedup,
        cfg.daily_fetch_time.format("%H:%M"),
        cfg.collector_concurrency.get(),
        cfg.alert_retention_days
            .map(|d| format!("{}d", d))
            .unwrap_or_else(|| "-".to_string()),
        cfg.smtp
            .as_ref()
            .map(|s| format!("smtp {}:{}", s.server, s.port))
            .unwrap_or_else(|| "log-only".to_string())
    );
    if cfg.meteoblue_api_key.is_none() {
        info!("METEOBLUE_API_KEY is not set; weather collection will fail until it is configured");
    }

    // 2) Connection pools (lazy; the database may still be starting)
    let accounts_pool = build_pool(&cfg.database_url, cfg.db_pool_size);
    let sensors_pool = build_pool(&cfg.sensor_database_url, cfg.db_pool_size);
    let store = PgStore::new(accounts_pool.clone(), sensors_pool);
    let readiness = Arc::new(Readiness::new());

    // 3) Weather history file
    let history = Arc::new(HistoryStore::new(cfg.history_path.clone()));
    history.ensure()?;

    // 4) Outbound clients
    let weather: Arc<dyn WeatherSource> = Arc::new(WeatherClient::new(
        cfg.meteoblue_base_url.clone(),
        cfg.meteoblue_api_key.clone(),
        cfg.http_timeout,
    ));
    let notifier: Arc<dyn Notifier> = match &cfg.smtp {
        Some(smtp) => Arc::new(
            SmtpNotifier::new(smtp, &cfg.mail_from, cfg.http_timeout)
                .map_err(|e| format!("SMTP setup failed: {}", e))?,
        ),
        None => Arc::new(LogNotifier),
    };

    // 5) Wait for the database, migrate, open the readiness gate
    {
        let readiness = readiness.clone();
        let delay = cfg.db_retry_delay;
        spawn_named("db-readiness", move || {
            match wait_for_database(&accounts_pool, &readiness, delay) {
                Ok(()) => info!("Database ready; alerting enabled"),
                Err(e) => error!("{}; database-backed features stay disabled", e),
            }
        })?;
    }

    // 6) Alert scheduler
    {
        let policy = AlertPolicy {
            dedup_window: chrono::Duration::from_std(cfg.dedup_window)
                .map_err(|e| format!("ALERT_DEDUP_WINDOW_SECS out of range: {}", e))?,
            push_dedup: cfg.push_dedup,
        };
        let scheduler = AlertScheduler::new(store.clone(), history.clone(), notifier.clone(), policy, zones::all());
        let readiness = readiness.clone();
        let interval = cfg.alert_interval;
        info!("Starting alert scheduler: zones={}, interval={}s", zones::all().len(), interval.as_secs());
        spawn_named("alerts", move || scheduler.run_loop(&readiness, interval))?;
    }

    // 7) Daily collector
    {
        let weather = weather.clone();
        let history = history.clone();
        let store = store.clone();
        let at = cfg.daily_fetch_time;
        let concurrency = cfg.collector_concurrency;
        let retention_days = cfg.alert_retention_days;
        spawn_named("collector", move || {
            let retention = retention_days.map(|days| (&store, days));
            collector::run_daily_loop(weather.as_ref(), &history, zones::all(), at, concurrency, retention);
        })?;
    }

    // 8) HTTP API (serves immediately; database routes answer 503 until ready)
    let state = web::Data::new(AppState {
        store,
        history,
        weather,
        notifier,
        readiness,
        collector_concurrency: cfg.collector_concurrency,
        report_email_to: cfg.report_email_to.clone(),
    });
    let bind = cfg.http_bind.clone();
    info!("Listening on http://{}", bind);
    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .wrap(middleware::Logger::default())
                    .app_data(state.clone())
                    .configure(crate::http::configure)
            })
            .bind(&bind)?
            .run()
            .await
        })
        .map_err(|e| format!("HTTP server on {} failed: {}", cfg.http_bind, e))
}

/// Value of `--env-file <path>` / `--env-file=<path>`, the only accepted flag.
fn env_file_arg(mut args: impl Iterator<Item = std::ffi::OsString>) -> Result<Option<PathBuf>, String> {
    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let value = match arg.to_str() {
            Some("--") => break,
            Some("--env-file") => args.next().map(PathBuf::from),
            Some(s) => match s.strip_prefix("--env-file=") {
                Some(v) if !v.is_empty() => Some(PathBuf::from(v)),
                Some(_) => None,
                None => return Err(format!("unrecognised argument: {}", s)),
            },
            None => return Err("argument contains invalid UTF-8".to_string()),
        };
        let value = value.ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
        if env_file.replace(value).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }
    Ok(env_file)
}

/// Load the env file; variables already present in the process environment win.
fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    match env_file_arg(std::env::args_os().skip(1))? {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            dotenv::from_path(&path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
            Ok(Some(LoadedEnvFile { path, explicit: true }))
        }
        None => match dotenv::dotenv() {
            Ok(path) => Ok(Some(LoadedEnvFile { path, explicit: false })),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(format!("failed to load .env: {}", e)),
        },
    }
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "risk-watch {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn args(list: &[&str]) -> impl Iterator<Item = OsString> {
        list.iter().map(OsString::from).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn env_file_flag_forms() {
        assert_eq!(env_file_arg(args(&[])).unwrap(), None);
        assert_eq!(env_file_arg(args(&["--env-file", "a.env"])).unwrap(), Some(PathBuf::from("a.env")));
        assert_eq!(env_file_arg(args(&["--env-file=b.env"])).unwrap(), Some(PathBuf::from("b.env")));
        assert!(env_file_arg(args(&["--env-file"])).is_err());
        assert!(env_file_arg(args(&["--env-file="])).is_err());
        assert!(env_file_arg(args(&["--env-file=a", "--env-file=b"])).is_err());
        assert!(env_file_arg(args(&["--verbose"])).is_err());
    }
}
