use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct ObjectStorePipelineKey {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub key: String,
    pub created: String,
}

impl From<&Row<'_>> for ObjectStorePipelineKey {
    fn from(row: &Row) -> Self {
        Self {
            namespace_id: row.get_unwrap("namespace_id"),
            pipeline_id: row.get_unwrap("pipeline_id"),
            key: row.get_unwrap("key"),
            created: row.get_unwrap("created"),
        }
    }
}

#[derive(Iden)]
enum ObjectStorePipelineKeyTable {
    #[iden = "object_store_pipeline_keys"]
    Table,
    Id,
    NamespaceId,
    PipelineId,
    Key,
    Created,
}

pub fn insert(
    conn: &Connection,
    object_store_pipeline_key: &ObjectStorePipelineKey,
) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(ObjectStorePipelineKeyTable::Table)
        .columns([
            ObjectStorePipelineKeyTable::NamespaceId,
            ObjectStorePipelineKeyTable::PipelineId,
            ObjectStorePipelineKeyTable::Key,
            ObjectStorePipelineKeyTable::Created,
        ])
        .values_panic([
            object_store_pipeline_key.namespace_id.clone().into(),
            object_store_pipeline_key.pipeline_id.clone().into(),
            object_store_pipeline_key.key.clone().into(),
            object_store_pipeline_key.created.clone().into(),
        ])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

/// Returns keys oldest-first. Insertion order is tracked by a hidden monotonically increasing
/// id so same-millisecond inserts still list deterministically.
pub fn list(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
) -> Result<Vec<ObjectStorePipelineKey>, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            ObjectStorePipelineKeyTable::NamespaceId,
            ObjectStorePipelineKeyTable::PipelineId,
            ObjectStorePipelineKeyTable::Key,
            ObjectStorePipelineKeyTable::Created,
        ])
        .from(ObjectStorePipelineKeyTable::Table)
        .and_where(Expr::col(ObjectStorePipelineKeyTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(ObjectStorePipelineKeyTable::PipelineId).eq(pipeline_id))
        .order_by(ObjectStorePipelineKeyTable::Id, Order::Asc)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<ObjectStorePipelineKey> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(ObjectStorePipelineKey::from(row));
    }

    Ok(objects)
}

pub fn delete(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(ObjectStorePipelineKeyTable::Table)
        .and_where(Expr::col(ObjectStorePipelineKeyTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(ObjectStorePipelineKeyTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(ObjectStorePipelineKeyTable::Key).eq(key))
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::TestHarness;

    fn setup() -> Result<
        (
            TestHarness,
            r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>,
        ),
        Box<dyn std::error::Error>,
    > {
        let harness = TestHarness::new();
        let conn = harness.write_conn().unwrap();

        let namespace = crate::storage::namespaces::Namespace {
            id: "some_id".into(),
            name: "some_name".into(),
            description: "some_description".into(),
            created: "some_time".into(),
            modified: "some_time_mod".into(),
        };

        crate::storage::namespaces::insert(&conn, &namespace)?;

        let pipeline_metadata = crate::storage::pipeline_metadata::PipelineMetadata {
            namespace_id: "some_id".into(),
            pipeline_id: "some_pipeline_id".into(),
            state: "active".into(),
            created: "some_time".into(),
            modified: "some_time_mod".into(),
        };

        crate::storage::pipeline_metadata::insert(&conn, &pipeline_metadata)?;

        Ok((harness, conn))
    }

    #[test]
    fn test_list_keys_in_insertion_order() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        for key in ["alpha", "beta", "gamma"] {
            insert(
                &conn,
                &ObjectStorePipelineKey {
                    namespace_id: "some_id".into(),
                    pipeline_id: "some_pipeline_id".into(),
                    key: key.into(),
                    created: "same_time".into(),
                },
            )
            .expect("Failed to insert object key");
        }

        let keys = list(&conn, "some_id", "some_pipeline_id").expect("Failed to list object keys");

        let ordered: Vec<String> = keys.into_iter().map(|k| k.key).collect();
        assert_eq!(ordered, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_insert_duplicate_key() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let object_key = ObjectStorePipelineKey {
            namespace_id: "some_id".into(),
            pipeline_id: "some_pipeline_id".into(),
            key: "alpha".into(),
            created: "some_time".into(),
        };

        insert(&conn, &object_key).expect("Failed to insert object key");
        assert_eq!(insert(&conn, &object_key).unwrap_err(), StorageError::Exists);
    }

    #[test]
    fn test_delete_key() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        insert(
            &conn,
            &ObjectStorePipelineKey {
                namespace_id: "some_id".into(),
                pipeline_id: "some_pipeline_id".into(),
                key: "alpha".into(),
                created: "some_time".into(),
            },
        )
        .expect("Failed to insert object key");

        delete(&conn, "some_id", "some_pipeline_id", "alpha").expect("Failed to delete object key");

        let keys = list(&conn, "some_id", "some_pipeline_id").expect("Failed to list object keys");
        assert!(keys.is_empty());
    }
}
