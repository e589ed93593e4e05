use error_common::{EngineError, EngineResult};
use sqlx::{Database, MySql, Pool, Postgres, Transaction};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Slot holding the ambient transaction. `None` inside the mutex means
/// the transaction was already consumed (committed or rolled back).
pub(crate) type TxSlot<DB> = Arc<Mutex<Option<Transaction<'static, DB>>>>;

/// Request-scoped database context.
///
/// Carries the process pool and, inside a [`with_tx`] closure, the
/// ambient transaction every repository call transparently joins.
/// Repositories never touch the slot; they go through the executor
/// helpers, which pick the transaction when one is installed and the
/// pool otherwise.
pub struct DbContext<DB: Database> {
    pool: Option<Pool<DB>>,
    slot: Option<TxSlot<DB>>,
}

pub type PgContext = DbContext<Postgres>;
pub type MySqlContext = DbContext<MySql>;

impl<DB: Database> Clone for DbContext<DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<DB: Database> DbContext<DB> {
    pub fn new(pool: Pool<DB>) -> Self {
        Self {
            pool: Some(pool),
            slot: None,
        }
    }

    /// Context with no backing pool. [`with_tx`] degrades to plain
    /// closure execution; every real query fails with `Internal`. Meant
    /// for driving use-case wiring against in-memory repositories.
    pub fn detached() -> Self {
        Self {
            pool: None,
            slot: None,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.slot.is_some()
    }

    pub(crate) fn pool(&self) -> Option<&Pool<DB>> {
        self.pool.as_ref()
    }

    pub(crate) fn slot(&self) -> Option<&TxSlot<DB>> {
        self.slot.as_ref()
    }

    fn child(&self, slot: TxSlot<DB>) -> Self {
        Self {
            pool: self.pool.clone(),
            slot: Some(slot),
        }
    }
}

/// Run `f` inside a transaction installed in a child context.
///
/// On `Ok` the transaction commits; on `Err` it rolls back, and a
/// rollback failure supersedes the closure error. Nested calls are a
/// programming error and are rejected before any I/O; the engine never
/// silently re-uses an outer transaction.
pub async fn with_tx<DB, T, F, Fut>(ctx: &DbContext<DB>, f: F) -> EngineResult<T>
where
    DB: Database,
    F: FnOnce(DbContext<DB>) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    if ctx.in_transaction() {
        return Err(EngineError::internal("nested with_tx is not supported"));
    }

    let Some(pool) = ctx.pool() else {
        // Detached context: no transaction to open, but the child is
        // still marked transactional so nesting rules hold.
        let child = ctx.child(Arc::new(Mutex::new(None)));
        return f(child).await;
    };

    let tx = pool
        .begin()
        .await
        .map_err(|e| EngineError::internal("failed to begin transaction").with_source(e))?;
    debug!("transaction begun");

    let slot: TxSlot<DB> = Arc::new(Mutex::new(Some(tx)));
    let child = ctx.child(slot.clone());

    match f(child).await {
        Ok(value) => {
            let tx = slot
                .lock()
                .await
                .take()
                .ok_or_else(|| EngineError::internal("transaction consumed inside closure"))?;
            tx.commit()
                .await
                .map_err(|e| EngineError::internal("failed to commit transaction").with_source(e))?;
            debug!("transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Some(tx) = slot.lock().await.take() {
                if let Err(rollback_err) = tx.rollback().await {
                    return Err(EngineError::internal("failed to roll back transaction")
                        .with_source(rollback_err));
                }
            }
            debug!("transaction rolled back");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_common::ErrorKind;

    #[tokio::test]
    async fn test_detached_with_tx_runs_closure() {
        let ctx = PgContext::detached();
        let result = with_tx(&ctx, |child| async move {
            assert!(child.in_transaction());
            Ok::<_, EngineError>(7)
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test]
    async fn test_nested_with_tx_rejected() {
        let ctx = PgContext::detached();
        let result = with_tx(&ctx, |child| async move {
            with_tx(&child, |_inner| async move { Ok::<_, EngineError>(()) }).await
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().contains("nested"));
    }

    #[tokio::test]
    async fn test_closure_error_propagates() {
        let ctx = PgContext::detached();
        let result: EngineResult<()> = with_tx(&ctx, |_child| async move {
            Err(EngineError::validation("bad input"))
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_root_context_not_transactional() {
        let ctx = PgContext::detached();
        assert!(!ctx.in_transaction());
    }
}
