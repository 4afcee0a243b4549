use std::str::FromStr;

use sea_query::{ColumnDef, Iden, Index, OnConflict, PostgresQueryBuilder, Query as SeaQuery, Table};
use sea_query_binder::SqlxBinder;
use sqlx::{Error as DbError, Row, postgres::PgRow};

use crate::{
    FlowError, Result,
    store::{
        DbCollection, PageData,
        data::{self, StepOutcome},
        db::postgres::{DbInit, DbRow},
        query,
    },
};

use super::{DbConnection, count_by_id, delete_by_id, map_db_err, select_one, select_page};

/// Step records. Append-only: updates are refused.
#[derive(Debug)]
pub struct StepCollection {
    conn: DbConnection,
}

#[derive(Iden, Clone, Copy)]
#[iden = "steps"]
enum CollectionIden {
    Table,

    Id,
    RunId,
    Seq,
    NodeId,
    Attempt,
    Outcome,
    Detail,
    Warnings,
    StartedAt,
    FinishedAt,
}

const COLUMNS: [CollectionIden; 10] = [
    CollectionIden::Id,
    CollectionIden::RunId,
    CollectionIden::Seq,
    CollectionIden::NodeId,
    CollectionIden::Attempt,
    CollectionIden::Outcome,
    CollectionIden::Detail,
    CollectionIden::Warnings,
    CollectionIden::StartedAt,
    CollectionIden::FinishedAt,
];

impl StepCollection {
    pub fn new(conn: &DbConnection) -> Self {
        Self {
            conn: conn.clone(),
        }
    }
}

impl DbCollection for StepCollection {
    type Item = data::Step;

    fn exists(
        &self,
        id: &str,
    ) -> Result<bool> {
        count_by_id(&self.conn, CollectionIden::Table, CollectionIden::Id, id)
    }

    fn find(
        &self,
        id: &str,
    ) -> Result<Self::Item> {
        select_one(&self.conn, CollectionIden::Table, CollectionIden::Id, &COLUMNS, id)
    }

    fn query(
        &self,
        q: &query::Query,
    ) -> Result<PageData<Self::Item>> {
        select_page(&self.conn, CollectionIden::Table, &COLUMNS, q)
    }

    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        let warnings = serde_json::to_string(&data.warnings)?;
        let data = data.clone();
        let (sql, sql_values) = SeaQuery::insert()
            .into_table(CollectionIden::Table)
            .columns(COLUMNS)
            .values([
                data.id.into(),
                data.run_id.into(),
                data.seq.into(),
                data.node_id.into(),
                data.attempt.into(),
                data.outcome.as_ref().into(),
                data.detail.into(),
                warnings.into(),
                data.started_at.into(),
                data.finished_at.into(),
            ])
            .map_err(map_db_err)?
            .on_conflict(OnConflict::column(CollectionIden::Id).do_nothing().to_owned())
            .build_sqlx(PostgresQueryBuilder);

        let result = self.conn.execute(sql.as_str(), sql_values).map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        Err(FlowError::Store(format!("step {} is append-only", data.id)))
    }

    fn update_if(
        &self,
        data: &Self::Item,
        _field: &str,
        _cond: &query::Cond,
    ) -> Result<bool> {
        self.update(data)
    }

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool> {
        delete_by_id(&self.conn, CollectionIden::Table, CollectionIden::Id, id)
    }
}

impl DbRow for data::Step {
    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &PgRow) -> std::result::Result<Self, DbError>
    where
        Self: Sized,
    {
        let outcome: String = row.try_get("outcome")?;
        let warnings: String = row.try_get("warnings")?;
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            seq: row.try_get("seq")?,
            node_id: row.try_get("node_id")?,
            attempt: row.try_get("attempt")?,
            outcome: StepOutcome::from_str(&outcome).map_err(|e| DbError::Decode(Box::new(e)))?,
            detail: row.try_get("detail")?,
            warnings: serde_json::from_str(&warnings).map_err(|e| DbError::Decode(Box::new(e)))?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

impl DbInit for StepCollection {
    fn init(&self) -> Result<()> {
        let sql = [
            Table::create()
                .table(CollectionIden::Table)
                .if_not_exists()
                .col(ColumnDef::new(CollectionIden::Id).string().not_null().primary_key())
                .col(ColumnDef::new(CollectionIden::RunId).string().not_null())
                .col(ColumnDef::new(CollectionIden::Seq).integer().not_null())
                .col(ColumnDef::new(CollectionIden::NodeId).string().not_null())
                .col(ColumnDef::new(CollectionIden::Attempt).integer().not_null().default(1))
                .col(ColumnDef::new(CollectionIden::Outcome).string().not_null())
                .col(ColumnDef::new(CollectionIden::Detail).text().not_null().default(""))
                .col(ColumnDef::new(CollectionIden::Warnings).text().not_null().default("[]"))
                .col(ColumnDef::new(CollectionIden::StartedAt).big_integer().default(0))
                .col(ColumnDef::new(CollectionIden::FinishedAt).big_integer().default(0))
                .build(PostgresQueryBuilder),
            Index::create().name("idx_steps_run_id").if_not_exists().table(CollectionIden::Table).col(CollectionIden::RunId).build(PostgresQueryBuilder),
        ];
        self.conn.batch_execute(&sql).map_err(map_db_err)
    }
}
