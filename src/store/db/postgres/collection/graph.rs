use sea_query::{ColumnDef, Iden, Index, OnConflict, PostgresQueryBuilder, Query as SeaQuery, Table};
use sea_query_binder::SqlxBinder;
use sqlx::{Error as DbError, Row, postgres::PgRow};

use crate::{
    FlowError, Result,
    store::{
        DbCollection, PageData, data,
        db::postgres::{DbInit, DbRow},
        query,
    },
};

use super::{DbConnection, count_by_id, delete_by_id, map_db_err, select_one, select_page};

/// Published graph versions. Rows are written once and never updated.
#[derive(Debug)]
pub struct GraphCollection {
    conn: DbConnection,
}

#[derive(Iden, Clone, Copy)]
#[iden = "graphs"]
enum CollectionIden {
    Table,

    Id,
    Wid,
    Version,
    Data,
    CreatedAt,
}

const COLUMNS: [CollectionIden; 5] = [CollectionIden::Id, CollectionIden::Wid, CollectionIden::Version, CollectionIden::Data, CollectionIden::CreatedAt];

impl GraphCollection {
    pub fn new(conn: &DbConnection) -> Self {
        Self {
            conn: conn.clone(),
        }
    }
}

impl DbCollection for GraphCollection {
    type Item = data::Graph;

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
            .values([data.id.into(), data.wid.into(), data.version.into(), data.data.into(), data.created_at.into()])
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
        Err(FlowError::Store(format!("graph {} is immutable", data.id)))
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

impl DbRow for data::Graph {
    fn id(&self) -> &str {
        &self.id
    }

    fn from_row(row: &PgRow) -> std::result::Result<Self, DbError>
    where
        Self: Sized,
    {
        Ok(Self {
            id: row.try_get("id")?,
            wid: row.try_get("wid")?,
            version: row.try_get("version")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl DbInit for GraphCollection {
    fn init(&self) -> Result<()> {
        let sql = [
            Table::create()
                .table(CollectionIden::Table)
                .if_not_exists()
                .col(ColumnDef::new(CollectionIden::Id).string().not_null().primary_key())
                .col(ColumnDef::new(CollectionIden::Wid).string().not_null())
                .col(ColumnDef::new(CollectionIden::Version).integer().not_null())
                .col(ColumnDef::new(CollectionIden::Data).text().not_null())
                .col(ColumnDef::new(CollectionIden::CreatedAt).big_integer().default(0))
                .build(PostgresQueryBuilder),
            Index::create().name("idx_graphs_wid").if_not_exists().table(CollectionIden::Table).col(CollectionIden::Wid).build(PostgresQueryBuilder),
        ];
        self.conn.batch_execute(&sql).map_err(map_db_err)
    }
}
