use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::{info, warn};

/// Connect to the store and synchronize the schema, creating the tables on
/// first boot if absent.
pub async fn init_db(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    opt.max_connections(25)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(5 * 60))
        .max_lifetime(Duration::from_secs(30 * 60))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    db.get_schema_registry("pipeline::entity::*")
        .sync(&db)
        .await?;

    Ok(db)
}

/// Connect with a fixed number of attempts, sleeping between failures.
/// Exhausting the attempts is fatal to the caller.
pub async fn connect_with_retry(db_url: &str, attempts: u32) -> Result<DatabaseConnection, DbErr> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        match init_db(db_url).await {
            Ok(db) => {
                info!("Connected to the database");
                return Ok(db);
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "Database connection failed");
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| DbErr::Custom("no connection attempts made".into())))
}

/// Errors worth retrying: serialization failures, deadlocks and dropped
/// connections. Syntactic and constraint errors are not.
pub fn is_retryable(err: &DbErr) -> bool {
    const RETRYABLE: &[&str] = &[
        "40001", // serialization_failure
        "40p01", // deadlock_detected
        "could not serialize",
        "deadlock detected",
        "connection refused",
        "connection reset",
        "connection timed out",
    ];

    let message = err.to_string().to_lowercase();
    RETRYABLE.iter().any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_failure_is_retryable() {
        let err = DbErr::Custom(
            "ERROR: could not serialize access due to concurrent update (SQLSTATE 40001)".into(),
        );
        assert!(is_retryable(&err));
    }

    #[test]
    fn test_deadlock_is_retryable() {
        let err = DbErr::Custom("ERROR: deadlock detected (SQLSTATE 40P01)".into());
        assert!(is_retryable(&err));
    }

    #[test]
    fn test_connection_reset_is_retryable() {
        let err = DbErr::Custom("connection reset by peer".into());
        assert!(is_retryable(&err));
    }

    #[test]
    fn test_constraint_violation_is_not_retryable() {
        let err = DbErr::Custom(
            "ERROR: duplicate key value violates unique constraint (SQLSTATE 23505)".into(),
        );
        assert!(!is_retryable(&err));
    }

    #[test]
    fn test_syntax_error_is_not_retryable() {
        let err = DbErr::Custom("ERROR: syntax error at or near \"SELEC\"".into());
        assert!(!is_retryable(&err));
    }
}
