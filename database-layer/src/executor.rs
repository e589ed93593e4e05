//! The single polymorphic query executor.
//!
//! Every repository method builds a query and hands it to one of these
//! helpers; the helper runs it on the ambient transaction when the
//! context carries one and on the pool otherwise. This is the entire
//! mechanism behind `with_tx` participation; repositories contain no
//! transaction logic of their own.

use crate::context::DbContext;
use crate::error::{detached, map_sqlx};
use error_common::{EngineError, EngineResult};

macro_rules! dialect_executor {
    ($mod_name:ident, $db:ty, $arguments:ty, $row:ty, $query_result:ty) => {
        pub(crate) mod $mod_name {
            use super::*;
            use sqlx::query::{Query, QueryAs};

            pub(crate) async fn fetch_one<O>(
                ctx: &DbContext<$db>,
                what: &str,
                query: QueryAs<'_, $db, O, $arguments>,
            ) -> EngineResult<O>
            where
                O: Send + Unpin + for<'r> sqlx::FromRow<'r, $row>,
            {
                let result = match ctx.slot() {
                    Some(slot) => {
                        let mut guard = slot.lock().await;
                        let tx = guard.as_mut().ok_or_else(|| no_open_tx(what))?;
                        query.fetch_one(&mut **tx).await
                    }
                    None => {
                        let pool = ctx.pool().ok_or_else(|| detached(what))?;
                        query.fetch_one(pool).await
                    }
                };
                result.map_err(|e| map_sqlx(e, what))
            }

            pub(crate) async fn fetch_optional<O>(
                ctx: &DbContext<$db>,
                what: &str,
                query: QueryAs<'_, $db, O, $arguments>,
            ) -> EngineResult<Option<O>>
            where
                O: Send + Unpin + for<'r> sqlx::FromRow<'r, $row>,
            {
                let result = match ctx.slot() {
                    Some(slot) => {
                        let mut guard = slot.lock().await;
                        let tx = guard.as_mut().ok_or_else(|| no_open_tx(what))?;
                        query.fetch_optional(&mut **tx).await
                    }
                    None => {
                        let pool = ctx.pool().ok_or_else(|| detached(what))?;
                        query.fetch_optional(pool).await
                    }
                };
                result.map_err(|e| map_sqlx(e, what))
            }

            pub(crate) async fn fetch_all<O>(
                ctx: &DbContext<$db>,
                what: &str,
                query: QueryAs<'_, $db, O, $arguments>,
            ) -> EngineResult<Vec<O>>
            where
                O: Send + Unpin + for<'r> sqlx::FromRow<'r, $row>,
            {
                let result = match ctx.slot() {
                    Some(slot) => {
                        let mut guard = slot.lock().await;
                        let tx = guard.as_mut().ok_or_else(|| no_open_tx(what))?;
                        query.fetch_all(&mut **tx).await
                    }
                    None => {
                        let pool = ctx.pool().ok_or_else(|| detached(what))?;
                        query.fetch_all(pool).await
                    }
                };
                result.map_err(|e| map_sqlx(e, what))
            }

            pub(crate) async fn execute(
                ctx: &DbContext<$db>,
                what: &str,
                query: Query<'_, $db, $arguments>,
            ) -> EngineResult<$query_result> {
                let result = match ctx.slot() {
                    Some(slot) => {
                        let mut guard = slot.lock().await;
                        let tx = guard.as_mut().ok_or_else(|| no_open_tx(what))?;
                        query.execute(&mut **tx).await
                    }
                    None => {
                        let pool = ctx.pool().ok_or_else(|| detached(what))?;
                        query.execute(pool).await
                    }
                };
                result.map_err(|e| map_sqlx(e, what))
            }
        }
    };
}

fn no_open_tx(what: &str) -> EngineError {
    EngineError::internal(format!("no open transaction in context for {what}"))
}

dialect_executor!(
    pg,
    sqlx::Postgres,
    sqlx::postgres::PgArguments,
    sqlx::postgres::PgRow,
    sqlx::postgres::PgQueryResult
);

dialect_executor!(
    my,
    sqlx::MySql,
    sqlx::mysql::MySqlArguments,
    sqlx::mysql::MySqlRow,
    sqlx::mysql::MySqlQueryResult
);
