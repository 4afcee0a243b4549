use std::{sync::Arc, time::Duration};

use sqlx::{
    Database, Error, IntoArguments, PgPool, Postgres,
    postgres::{PgPoolOptions, PgRow},
};
use tokio::runtime::Runtime;

use crate::utils::block_on;

/// Blocking facade over a sqlx pool, driven on the engine's runtime.
#[derive(Debug, Clone)]
pub struct SynClient {
    pool: PgPool,

    runtime: Arc<Runtime>,
}

impl SynClient {
    pub fn connect(
        db_url: &str,
        runtime: Arc<Runtime>,
    ) -> Result<Self, Error> {
        let pool = block_on(&runtime, async move { PgPoolOptions::new().acquire_timeout(Duration::from_secs(5)).max_connections(64).connect(db_url).await })?;

        Ok(Self {
            pool,
            runtime,
        })
    }

    pub fn query_one<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<PgRow, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.runtime, async move { sqlx::query_with(sql, params).fetch_one(&self.pool).await })
    }

    pub fn query_opt<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<Option<PgRow>, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.runtime, async move { sqlx::query_with(sql, params).fetch_optional(&self.pool).await })
    }

    pub fn query<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<Vec<PgRow>, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.runtime, async move { sqlx::query_with(sql, params).fetch_all(&self.pool).await })
    }

    pub fn execute<'q, A>(
        &self,
        sql: &'q str,
        params: A,
    ) -> Result<<Postgres as Database>::QueryResult, Error>
    where
        A: IntoArguments<'q, Postgres> + 'q,
    {
        block_on(&self.runtime, async move { sqlx::query_with(sql, params).execute(&self.pool).await })
    }

    pub fn batch_execute(
        &self,
        sqls: &[String],
    ) -> Result<(), Error> {
        block_on(&self.runtime, async move {
            let mut tx = self.pool.begin().await?;

            for sql in sqls {
                sqlx::query(sql).execute(&mut *tx).await?;
            }
            tx.commit().await
        })
    }
}
