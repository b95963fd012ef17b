//! Connection pools and the database readiness gate.
//!
//! Pools are built lazily so the process can start while PostgreSQL is still
//! booting; [`wait_for_database`] blocks until a connection succeeds, applies
//! the embedded migrations and opens the [`Readiness`] gate for good.

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{info, warn};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_JITTER_MS: u64 = 500;

pub fn build_pool(database_url: &str, max_size: u32) -> PgPool {
    Pool::builder()
        .max_size(max_size.max(1))
        .min_idle(Some(0))
        .connection_timeout(CHECKOUT_TIMEOUT)
        .build_unchecked(ConnectionManager::new(database_url))
}

/// One-way flag: closed at startup, opened once the database has answered.
#[derive(Debug, Default)]
pub struct Readiness {
    ready: AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

/// Retry until the account database answers, migrate it, then open the gate.
///
/// Connection failures are retried forever with a fixed delay (plus a little
/// jitter); a migration failure is fatal for the caller.
pub fn wait_for_database(pool: &PgPool, readiness: &Readiness, delay: Duration) -> Result<(), String> {
    let mut attempts: u32 = 0;
    let mut conn = loop {
        attempts += 1;
        match pool.get() {
            Ok(conn) => break conn,
            Err(e) => {
                let jitter = Duration::from_millis(rand::rng().random_range(0..=RETRY_JITTER_MS));
                warn!(
                    "Waiting for database (attempt {}): {}; retrying in {}s",
                    attempts,
                    e,
                    delay.as_secs()
                );
                thread::sleep(delay + jitter);
            }
        }
    };
    info!("Connected to database after {} attempt(s)", attempts);

    apply_database_migrations(&mut conn)?;
    readiness.mark_ready();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_starts_closed_and_stays_open() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());
        readiness.mark_ready();
        readiness.mark_ready();
        assert!(readiness.is_ready());
    }
}
