//! Database collaborator: runs a built statement on one request-scoped connection.

use crate::error::AppError;
use crate::service::rows::row_to_map;
use crate::sql::{PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Executes a built query and returns ordered rows as label → value maps.
#[async_trait]
pub trait Executor: Send {
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError>;
}

/// Race `fut` against the timeout and the cancellation signal.
pub async fn guarded<T, F>(timeout: Duration, cancel: &CancellationToken, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        r = tokio::time::timeout(timeout, fut) => match r {
            Ok(v) => v,
            Err(_) => Err(AppError::Timeout(timeout.as_millis() as u64)),
        },
    }
}

/// One pooled connection for the lifetime of a request.
///
/// After a timeout or cancellation the connection is closed instead of returned to the pool,
/// since the aborted statement may still be running on it.
pub struct PgSession {
    conn: Option<PoolConnection<Postgres>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl PgSession {
    pub async fn acquire(pool: &PgPool, timeout: Duration, cancel: CancellationToken) -> Result<Self, AppError> {
        let conn = guarded(timeout, &cancel, async { pool.acquire().await.map_err(AppError::from) }).await?;
        Ok(PgSession {
            conn: Some(conn),
            timeout,
            cancel,
        })
    }
}

#[async_trait]
impl Executor for PgSession {
    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let conn = self.conn.as_mut().ok_or(AppError::Cancelled)?;
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let result = guarded(self.timeout, &self.cancel, async {
            query.fetch_all(&mut **conn).await.map_err(AppError::from)
        })
        .await;
        match result {
            Ok(rows) => Ok(rows.iter().map(row_to_map).collect()),
            Err(e @ (AppError::Timeout(_) | AppError::Cancelled)) => {
                tracing::warn!(error = %e, "statement aborted; discarding connection");
                if let Some(mut conn) = self.conn.take() {
                    conn.close_on_drop();
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording executor returning canned results in call order.

    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct RecordingExecutor {
        pub responses: VecDeque<Result<Vec<Map<String, Value>>, AppError>>,
        pub queries: Vec<QueryBuf>,
    }

    impl RecordingExecutor {
        pub fn with(responses: Vec<Vec<Value>>) -> Self {
            RecordingExecutor {
                responses: responses
                    .into_iter()
                    .map(|rows| Ok(rows.into_iter().map(|r| r.as_object().cloned().unwrap_or_default()).collect()))
                    .collect(),
                queries: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError> {
            self.queries.push(q.clone());
            self.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}
