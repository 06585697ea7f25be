use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct SecretStorePipelineKey {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub key: String,
    pub created: String,
}

impl From<&Row<'_>> for SecretStorePipelineKey {
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
enum SecretStorePipelineKeyTable {
    #[iden = "secret_store_pipeline_keys"]
    Table,
    NamespaceId,
    PipelineId,
    Key,
    Created,
}

pub fn insert(
    conn: &Connection,
    secret_store_pipeline_key: &SecretStorePipelineKey,
) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(SecretStorePipelineKeyTable::Table)
        .columns([
            SecretStorePipelineKeyTable::NamespaceId,
            SecretStorePipelineKeyTable::PipelineId,
            SecretStorePipelineKeyTable::Key,
            SecretStorePipelineKeyTable::Created,
        ])
        .values_panic([
            secret_store_pipeline_key.namespace_id.clone().into(),
            secret_store_pipeline_key.pipeline_id.clone().into(),
            secret_store_pipeline_key.key.clone().into(),
            secret_store_pipeline_key.created.clone().into(),
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
) -> Result<Vec<SecretStorePipelineKey>, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            SecretStorePipelineKeyTable::NamespaceId,
            SecretStorePipelineKeyTable::PipelineId,
            SecretStorePipelineKeyTable::Key,
            SecretStorePipelineKeyTable::Created,
        ])
        .from(SecretStorePipelineKeyTable::Table)
        .and_where(Expr::col(SecretStorePipelineKeyTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(SecretStorePipelineKeyTable::PipelineId).eq(pipeline_id))
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<SecretStorePipelineKey> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(SecretStorePipelineKey::from(row));
    }

    Ok(objects)
}

pub fn get(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
) -> Result<SecretStorePipelineKey, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            SecretStorePipelineKeyTable::NamespaceId,
            SecretStorePipelineKeyTable::PipelineId,
            SecretStorePipelineKeyTable::Key,
            SecretStorePipelineKeyTable::Created,
        ])
        .from(SecretStorePipelineKeyTable::Table)
        .and_where(Expr::col(SecretStorePipelineKeyTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(SecretStorePipelineKeyTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(SecretStorePipelineKeyTable::Key).eq(key))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(SecretStorePipelineKey::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn delete(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(SecretStorePipelineKeyTable::Table)
        .and_where(Expr::col(SecretStorePipelineKeyTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(SecretStorePipelineKeyTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(SecretStorePipelineKeyTable::Key).eq(key))
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

        insert(
            &conn,
            &SecretStorePipelineKey {
                namespace_id: "some_id".into(),
                pipeline_id: "some_pipeline_id".into(),
                key: "some_key".into(),
                created: "some_time".into(),
            },
        )?;

        Ok((harness, conn))
    }

    #[test]
    fn test_get_pipeline_secret_key() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let key =
            get(&conn, "some_id", "some_pipeline_id", "some_key").expect("Failed to get key");
        assert_eq!(key.created, "some_time");
    }

    #[test]
    fn test_delete_pipeline_secret_key() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        delete(&conn, "some_id", "some_pipeline_id", "some_key").expect("Failed to delete key");

        assert_eq!(
            get(&conn, "some_id", "some_pipeline_id", "some_key").unwrap_err(),
            StorageError::NotFound
        );
    }
}
