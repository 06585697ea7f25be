use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct ObjectStoreRunKey {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub run_id: i64,
    pub key: String,
    pub created: String,
}

impl From<&Row<'_>> for ObjectStoreRunKey {
    fn from(row: &Row) -> Self {
        Self {
            namespace_id: row.get_unwrap("namespace_id"),
            pipeline_id: row.get_unwrap("pipeline_id"),
            run_id: row.get_unwrap("run_id"),
            key: row.get_unwrap("key"),
            created: row.get_unwrap("created"),
        }
    }
}

#[derive(Iden)]
enum ObjectStoreRunKeyTable {
    #[iden = "object_store_run_keys"]
    Table,
    Id,
    NamespaceId,
    PipelineId,
    RunId,
    Key,
    Created,
}

pub fn insert(
    conn: &Connection,
    object_store_run_key: &ObjectStoreRunKey,
) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(ObjectStoreRunKeyTable::Table)
        .columns([
            ObjectStoreRunKeyTable::NamespaceId,
            ObjectStoreRunKeyTable::PipelineId,
            ObjectStoreRunKeyTable::RunId,
            ObjectStoreRunKeyTable::Key,
            ObjectStoreRunKeyTable::Created,
        ])
        .values_panic([
            object_store_run_key.namespace_id.clone().into(),
            object_store_run_key.pipeline_id.clone().into(),
            object_store_run_key.run_id.into(),
            object_store_run_key.key.clone().into(),
            object_store_run_key.created.clone().into(),
        ])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

pub fn list(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
) -> Result<Vec<ObjectStoreRunKey>, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            ObjectStoreRunKeyTable::NamespaceId,
            ObjectStoreRunKeyTable::PipelineId,
            ObjectStoreRunKeyTable::RunId,
            ObjectStoreRunKeyTable::Key,
            ObjectStoreRunKeyTable::Created,
        ])
        .from(ObjectStoreRunKeyTable::Table)
        .and_where(Expr::col(ObjectStoreRunKeyTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(ObjectStoreRunKeyTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(ObjectStoreRunKeyTable::RunId).eq(run_id))
        .order_by(ObjectStoreRunKeyTable::Id, Order::Asc)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<ObjectStoreRunKey> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(ObjectStoreRunKey::from(row));
    }

    Ok(objects)
}

pub fn delete(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
    key: &str,
) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(ObjectStoreRunKeyTable::Table)
        .and_where(Expr::col(ObjectStoreRunKeyTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(ObjectStoreRunKeyTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(ObjectStoreRunKeyTable::RunId).eq(run_id))
        .and_where(Expr::col(ObjectStoreRunKeyTable::Key).eq(key))
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}
