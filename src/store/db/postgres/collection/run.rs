use std::str::FromStr;

use sea_query::{ColumnDef, Expr as SeaExpr, Iden, Index, OnConflict, PostgresQueryBuilder, Query as SeaQuery, SimpleExpr, Table};
use sea_query_binder::SqlxBinder;
use sqlx::{Error as DbError, Row, postgres::PgRow};

use crate::{
    Result,
    store::{
        DbCollection, PageData,
        data::{self, RunStatus},
        db::postgres::{DbInit, DbRow},
        query,
    },
};

use super::{DbConnection, count_by_id, delete_by_id, into_expr, map_db_err, select_one, select_page};

#[derive(Debug)]
pub struct RunCollection {
    conn: DbConnection,
}

#[derive(Iden, Clone, Copy)]
#[iden = "runs"]
enum CollectionIden {
    Table,

    Id,
    Wid,
    GraphVersion,
    Status,
    Trigger,
    EntityId,
    Context,
    CurrentNodeId,
    Attempt,
    ResumesAt,
    ClaimedBy,
    ClaimedUntil,
    Revision,
    Error,
    CreatedAt,
    UpdatedAt,
    EndedAt,
}

const COLUMNS: [CollectionIden; 17] = [
    CollectionIden::Id,
    CollectionIden::Wid,
    CollectionIden::GraphVersion,
    CollectionIden::Status,
    CollectionIden::Trigger,
    CollectionIden::EntityId,
    CollectionIden::Context,
    CollectionIden::CurrentNodeId,
    CollectionIden::Attempt,
    CollectionIden::ResumesAt,
    CollectionIden::ClaimedBy,
    CollectionIden::ClaimedUntil,
    CollectionIden::Revision,
    CollectionIden::Error,
    CollectionIden::CreatedAt,
    CollectionIden::UpdatedAt,
    CollectionIden::EndedAt,
];

impl RunCollection {
    pub fn new(conn: &DbConnection) -> Self {
        Self {
            conn: conn.clone(),
        }
    }

    /// Mutable columns; identity, trigger and context are fixed at creation.
    fn update_values(data: &data::Run) -> Vec<(CollectionIden, SimpleExpr)> {
        let model = data.clone();
        vec![
            (CollectionIden::Status, model.status.as_ref().into()),
            (CollectionIden::CurrentNodeId, model.current_node_id.into()),
            (CollectionIden::Attempt, model.attempt.into()),
            (CollectionIden::ResumesAt, model.resumes_at.into()),
            (CollectionIden::ClaimedBy, model.claimed_by.into()),
            (CollectionIden::ClaimedUntil, model.claimed_until.into()),
            (CollectionIden::Revision, model.revision.into()),
            (CollectionIden::Error, model.error.into()),
            (CollectionIden::UpdatedAt, model.updated_at.into()),
            (CollectionIden::EndedAt, model.ended_at.into()),
        ]
    }
}

impl DbCollection for RunCollection {
    type Item = data::Run;

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
        let data = data.clone();
        let (sql, sql_values) = SeaQuery::insert()
            .into_table(CollectionIden::Table)
            .columns(COLUMNS)
            .values([
                data.id.into(),
                data.wid.into(),
                data.graph_version.into(),
                data.status.as_ref().into(),
                data.trigger.into(),
                data.entity_id.into(),
                data.context.into(),
                data.current_node_id.into(),
                data.attempt.into(),
                data.resumes_at.into(),
                data.claimed_by.into(),
                data.claimed_until.into(),
                data.revision.into(),
                data.error.into(),
                data.created_at.into(),
                data.updated_at.into(),
                data.ended_at.into(),
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
        let (sql, sql_values) = SeaQuery::update()
            .table(CollectionIden::Table)
            .values(Self::update_values(data))
            .and_where(SeaExpr::col(CollectionIden::Id).eq(data.id()))
            .build_sqlx(PostgresQueryBuilder);

        let result = self.conn.execute(sql.as_str(), sql_values).map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    fn update_if(
        &self,
        data: &Self::Item,
        field: &str,
        cond: &query::Cond,
    ) -> Result<bool> {
        let (sql, sql_values) = SeaQuery::update()
            .table(CollectionIden::Table)
            .values(Self::update_values(data))
            .and_where(SeaExpr::col(CollectionIden::Id).eq(data.id()))
            .and_where(into_expr(field, cond))
            .build_sqlx(PostgresQueryBuilder);

        let result = self.conn.execute(sql.as_str(), sql_values).map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool> {
        delete_by_id(&self.conn, CollectionIden::Table, CollectionIden::Id, id)
    }
}

impl DbRow for data::Run {
    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &PgRow) -> std::result::Result<Self, DbError>
    where
        Self: Sized,
    {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            wid: row.try_get("wid")?,
            graph_version: row.try_get("graph_version")?,
            status: RunStatus::from_str(&status).map_err(|e| DbError::Decode(Box::new(e)))?,
            trigger: row.try_get("trigger")?,
            entity_id: row.try_get("entity_id")?,
            context: row.try_get("context")?,
            current_node_id: row.try_get("current_node_id")?,
            attempt: row.try_get("attempt")?,
            resumes_at: row.try_get("resumes_at")?,
            claimed_by: row.try_get("claimed_by")?,
            claimed_until: row.try_get("claimed_until")?,
            revision: row.try_get("revision")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }
}

impl DbInit for RunCollection {
    fn init(&self) -> Result<()> {
        let sql = [
            Table::create()
                .table(CollectionIden::Table)
                .if_not_exists()
                .col(ColumnDef::new(CollectionIden::Id).string().not_null().primary_key())
                .col(ColumnDef::new(CollectionIden::Wid).string().not_null())
                .col(ColumnDef::new(CollectionIden::GraphVersion).integer().not_null())
                .col(ColumnDef::new(CollectionIden::Status).string().not_null())
                .col(ColumnDef::new(CollectionIden::Trigger).string().not_null())
                .col(ColumnDef::new(CollectionIden::EntityId).string().not_null().default(""))
                .col(ColumnDef::new(CollectionIden::Context).text().not_null())
                .col(ColumnDef::new(CollectionIden::CurrentNodeId).string().not_null().default(""))
                .col(ColumnDef::new(CollectionIden::Attempt).integer().not_null().default(0))
                .col(ColumnDef::new(CollectionIden::ResumesAt).big_integer().not_null().default(0))
                .col(ColumnDef::new(CollectionIden::ClaimedBy).string().not_null().default(""))
                .col(ColumnDef::new(CollectionIden::ClaimedUntil).big_integer().not_null().default(0))
                .col(ColumnDef::new(CollectionIden::Revision).big_integer().not_null().default(0))
                .col(ColumnDef::new(CollectionIden::Error).text())
                .col(ColumnDef::new(CollectionIden::CreatedAt).big_integer().default(0))
                .col(ColumnDef::new(CollectionIden::UpdatedAt).big_integer().default(0))
                .col(ColumnDef::new(CollectionIden::EndedAt).big_integer().default(0))
                .build(PostgresQueryBuilder),
            Index::create().name("idx_runs_status").if_not_exists().table(CollectionIden::Table).col(CollectionIden::Status).build(PostgresQueryBuilder),
            Index::create().name("idx_runs_wid").if_not_exists().table(CollectionIden::Table).col(CollectionIden::Wid).build(PostgresQueryBuilder),
            Index::create()
                .name("idx_runs_resumes_at")
                .if_not_exists()
                .table(CollectionIden::Table)
                .col(CollectionIden::ResumesAt)
                .build(PostgresQueryBuilder),
        ];
        self.conn.batch_execute(&sql).map_err(map_db_err)
    }
}
