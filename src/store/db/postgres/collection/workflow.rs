use sea_query::{ColumnDef, Expr as SeaExpr, Iden, Index, OnConflict, PostgresQueryBuilder, Query as SeaQuery, SimpleExpr, Table};
use sea_query_binder::SqlxBinder;
use sqlx::{Error as DbError, Row, postgres::PgRow};

use crate::{
    Result,
    store::{
        DbCollection, PageData, data,
        db::postgres::{DbInit, DbRow},
        query,
    },
};

use super::{DbConnection, count_by_id, delete_by_id, into_expr, map_db_err, select_one, select_page};

#[derive(Debug)]
pub struct WorkflowCollection {
    conn: DbConnection,
}

#[derive(Iden, Clone, Copy)]
#[iden = "workflows"]
enum CollectionIden {
    Table,

    Id,
    Name,
    Description,
    GraphVersion,
    IsActive,
    IsTemplate,
    Draft,
    Deleted,
    Revision,
    CreatedAt,
    UpdatedAt,
}

const COLUMNS: [CollectionIden; 11] = [
    CollectionIden::Id,
    CollectionIden::Name,
    CollectionIden::Description,
    CollectionIden::GraphVersion,
    CollectionIden::IsActive,
    CollectionIden::IsTemplate,
    CollectionIden::Draft,
    CollectionIden::Deleted,
    CollectionIden::Revision,
    CollectionIden::CreatedAt,
    CollectionIden::UpdatedAt,
];

impl WorkflowCollection {
    pub fn new(conn: &DbConnection) -> Self {
        Self {
            conn: conn.clone(),
        }
    }

    fn update_values(data: &data::Workflow) -> Vec<(CollectionIden, SimpleExpr)> {
        let model = data.clone();
        vec![
            (CollectionIden::Name, model.name.into()),
            (CollectionIden::Description, model.description.into()),
            (CollectionIden::GraphVersion, model.graph_version.into()),
            (CollectionIden::IsActive, model.is_active.into()),
            (CollectionIden::IsTemplate, model.is_template.into()),
            (CollectionIden::Draft, model.draft.into()),
            (CollectionIden::Deleted, model.deleted.into()),
            (CollectionIden::Revision, model.revision.into()),
            (CollectionIden::UpdatedAt, model.updated_at.into()),
        ]
    }
}

impl DbCollection for WorkflowCollection {
    type Item = data::Workflow;

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
                data.name.into(),
                data.description.into(),
                data.graph_version.into(),
                data.is_active.into(),
                data.is_template.into(),
                data.draft.into(),
                data.deleted.into(),
                data.revision.into(),
                data.created_at.into(),
                data.updated_at.into(),
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

impl DbRow for data::Workflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &PgRow) -> std::result::Result<Self, DbError>
    where
        Self: Sized,
    {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            graph_version: row.try_get("graph_version")?,
            is_active: row.try_get("is_active")?,
            is_template: row.try_get("is_template")?,
            draft: row.try_get("draft")?,
            deleted: row.try_get("deleted")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl DbInit for WorkflowCollection {
    fn init(&self) -> Result<()> {
        let sql = [
            Table::create()
                .table(CollectionIden::Table)
                .if_not_exists()
                .col(ColumnDef::new(CollectionIden::Id).string().not_null().primary_key())
                .col(ColumnDef::new(CollectionIden::Name).string().not_null())
                .col(ColumnDef::new(CollectionIden::Description).text().not_null().default(""))
                .col(ColumnDef::new(CollectionIden::GraphVersion).integer().not_null().default(0))
                .col(ColumnDef::new(CollectionIden::IsActive).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::IsTemplate).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::Draft).text().not_null())
                .col(ColumnDef::new(CollectionIden::Deleted).boolean().not_null().default(false))
                .col(ColumnDef::new(CollectionIden::Revision).big_integer().not_null().default(0))
                .col(ColumnDef::new(CollectionIden::CreatedAt).big_integer().default(0))
                .col(ColumnDef::new(CollectionIden::UpdatedAt).big_integer().default(0))
                .build(PostgresQueryBuilder),
            Index::create()
                .name("idx_workflows_active")
                .if_not_exists()
                .table(CollectionIden::Table)
                .col(CollectionIden::IsActive)
                .col(CollectionIden::Deleted)
                .build(PostgresQueryBuilder),
        ];
        self.conn.batch_execute(&sql).map_err(map_db_err)
    }
}
