mod graph;
mod run;
mod step;
mod workflow;

use std::sync::Arc;

use sea_query::{
    Alias as SeaAlias, Condition, Expr as SeaExpr, Func as SeaFunc, Iden, Order as SeaOrder, PostgresQueryBuilder, Query as SeaQuery, SimpleExpr,
    Value as SeaValue,
};
use sea_query_binder::SqlxBinder;
use sqlx::Row;

use crate::{
    FlowError, Result,
    store::{
        PageData,
        db::postgres::{DbRow, synclient::SynClient},
        query::{Cond, Query, QueryValue},
    },
};

use crate::store::map_db_err;
pub use graph::GraphCollection;
pub use run::RunCollection;
pub use step::StepCollection;
pub use workflow::WorkflowCollection;

pub type DbConnection = Arc<SynClient>;

fn into_value(v: &QueryValue) -> SeaValue {
    match v {
        QueryValue::Str(s) => s.clone().into(),
        QueryValue::Int(i) => (*i).into(),
        QueryValue::Bool(b) => (*b).into(),
    }
}

/// Compiles one column predicate.
pub fn into_expr(
    key: &str,
    cond: &Cond,
) -> SimpleExpr {
    let col = SeaExpr::col(SeaAlias::new(key));
    match cond {
        Cond::Eq(v) => col.eq(into_value(v)),
        Cond::Ne(v) => col.ne(into_value(v)),
        Cond::Lt(v) => col.lt(into_value(v)),
        Cond::Le(v) => col.lte(into_value(v)),
        Cond::Gt(v) => col.gt(into_value(v)),
        Cond::Ge(v) => col.gte(into_value(v)),
        Cond::In(values) => col.is_in(values.iter().map(into_value)),
    }
}

/// Compiles the AND of all query filters.
pub fn into_query(q: &Query) -> Condition {
    q.filters().iter().fold(Condition::all(), |acc, (key, cond)| acc.add(into_expr(key, cond)))
}

/// Runs a filtered, ordered, paged select plus its count.
pub fn select_page<T, C>(
    conn: &DbConnection,
    table: C,
    columns: &[C],
    q: &Query,
) -> Result<PageData<T>>
where
    T: DbRow,
    C: Iden + Copy + 'static,
{
    let filter = into_query(q);

    let mut count_query = SeaQuery::select();
    count_query.from(table).expr(SeaFunc::count(SeaExpr::col(SeaAlias::new("id"))));

    let mut query = SeaQuery::select();
    query.columns(columns.iter().copied()).from(table);

    if !filter.is_empty() {
        count_query.cond_where(filter.clone());
        query.cond_where(filter);
    }

    for (order, rev) in q.order_by().iter() {
        query.order_by(
            SeaAlias::new(order.as_str()),
            if *rev {
                SeaOrder::Desc
            } else {
                SeaOrder::Asc
            },
        );
    }
    query.order_by(SeaAlias::new("id"), SeaOrder::Asc);
    let (sql, values) = query.limit(q.limit() as u64).offset(q.offset() as u64).build_sqlx(PostgresQueryBuilder);

    let (count_sql, count_values) = count_query.build_sqlx(PostgresQueryBuilder);
    let count = conn.query_one(count_sql.as_str(), count_values).map_err(map_db_err)?.get::<i64, usize>(0) as usize;
    let rows = conn.query(&sql, values).map_err(map_db_err)?.iter().map(T::from_row).collect::<std::result::Result<Vec<_>, _>>().map_err(map_db_err)?;

    Ok(PageData {
        count,
        page_size: q.limit(),
        page_num: q.offset() / q.limit() + 1,
        page_count: count.div_ceil(q.limit()),
        rows,
    })
}

/// Fetches one row by id, `NotFound` when absent.
pub fn select_one<T, C>(
    conn: &DbConnection,
    table: C,
    id_col: C,
    columns: &[C],
    id: &str,
) -> Result<T>
where
    T: DbRow,
    C: Iden + Copy + 'static,
{
    let (sql, values) = SeaQuery::select().from(table).columns(columns.iter().copied()).and_where(SeaExpr::col(id_col).eq(id)).build_sqlx(PostgresQueryBuilder);

    match conn.query_opt(&sql, values).map_err(map_db_err)? {
        Some(row) => T::from_row(&row).map_err(map_db_err),
        None => Err(FlowError::NotFound(format!("{} {}", table.to_string(), id))),
    }
}

pub fn count_by_id<C>(
    conn: &DbConnection,
    table: C,
    id_col: C,
    id: &str,
) -> Result<bool>
where
    C: Iden + Copy + 'static,
{
    let (sql, values) =
        SeaQuery::select().from(table).expr(SeaFunc::count(SeaExpr::col(id_col))).and_where(SeaExpr::col(id_col).eq(id)).build_sqlx(PostgresQueryBuilder);

    let count = conn.query_one(sql.as_str(), values).map(|row| row.get::<i64, usize>(0)).map_err(map_db_err)?;
    Ok(count > 0)
}

pub fn delete_by_id<C>(
    conn: &DbConnection,
    table: C,
    id_col: C,
    id: &str,
) -> Result<bool>
where
    C: Iden + Copy + 'static,
{
    let (sql, values) = SeaQuery::delete().from_table(table).and_where(SeaExpr::col(id_col).eq(id)).build_sqlx(PostgresQueryBuilder);

    let result = conn.execute(sql.as_str(), values).map_err(map_db_err)?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use sea_query::{PostgresQueryBuilder, Query as SeaQuery};

    use super::*;
    use crate::store::query::{Cond, Query};

    #[test]
    fn test_into_query_renders_all_filters() {
        let q = Query::new().filter("status", Cond::is_in(["pending", "waiting"])).filter("resumes_at", Cond::le(10));
        let sql = SeaQuery::select().expr(SeaExpr::val(1)).cond_where(into_query(&q)).to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#""status" IN ('pending', 'waiting')"#), "{sql}");
        assert!(sql.contains(r#""resumes_at" <= 10"#), "{sql}");
    }
}
