//! Best-effort rollback after a failed statement batch.
//!
//! When a batch that opened a transaction fails part-way, a `ROLLBACK;` is
//! issued on the same driver session. Its outcome is discarded: the caller
//! only ever sees the original failure, so after a failed rollback the
//! session's transaction state is unknown to the caller.

use std::future::Future;

use crate::error::AppResult;

pub const ROLLBACK: &str = "ROLLBACK;";

/// Whether the batch text opens an explicit transaction.
pub fn opens_transaction(sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    upper.contains("BEGIN;") || upper.contains("BEGIN TRANSACTION;")
}

/// Runs `rollback` if `failed_sql` opened a transaction. `rollback` is only
/// polled in that case.
pub async fn attempt(failed_sql: &str, rollback: impl Future<Output = AppResult<()>>) {
    if !opens_transaction(failed_sql) {
        return;
    }
    match rollback.await {
        Ok(()) => tracing::debug!("rolled back failed batch"),
        Err(e) => tracing::debug!(error = %e, "rollback after failed batch failed; ignored"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::AppError;

    #[test]
    fn transaction_markers() {
        assert!(opens_transaction("BEGIN;\nINSERT INTO t VALUES (1);\nCOMMIT;"));
        assert!(opens_transaction("begin transaction; delete from t;"));
        assert!(!opens_transaction("INSERT INTO t VALUES (1);"));
        assert!(!opens_transaction("BEGIN\nSELECT 1;"));
    }

    #[tokio::test]
    async fn rollback_runs_only_for_transactions() {
        let ran = AtomicBool::new(false);
        attempt("DELETE FROM t;", async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(!ran.load(Ordering::SeqCst));

        attempt("BEGIN; DELETE FROM t;", async {
            ran.store(true, Ordering::SeqCst);
            Err(AppError::Execution("no transaction is active".into()))
        })
        .await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
