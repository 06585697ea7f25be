use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct PipelineMetadata {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub state: String,
    pub created: String,
    pub modified: String,
}

impl From<&Row<'_>> for PipelineMetadata {
    fn from(row: &Row) -> Self {
        Self {
            namespace_id: row.get_unwrap("namespace_id"),
            pipeline_id: row.get_unwrap("pipeline_id"),
            state: row.get_unwrap("state"),
            created: row.get_unwrap("created"),
            modified: row.get_unwrap("modified"),
        }
    }
}

#[derive(Iden)]
enum PipelineMetadataTable {
    #[iden = "pipeline_metadata"]
    Table,
    NamespaceId,
    PipelineId,
    State,
    Created,
    Modified,
}

#[derive(Clone, Debug, Default)]
pub struct UpdatableFields {
    pub state: Option<String>,
    pub modified: Option<String>,
}

pub fn insert(conn: &Connection, pipeline_metadata: &PipelineMetadata) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(PipelineMetadataTable::Table)
        .columns([
            PipelineMetadataTable::NamespaceId,
            PipelineMetadataTable::PipelineId,
            PipelineMetadataTable::State,
            PipelineMetadataTable::Created,
            PipelineMetadataTable::Modified,
        ])
        .values_panic([
            pipeline_metadata.namespace_id.clone().into(),
            pipeline_metadata.pipeline_id.clone().into(),
            pipeline_metadata.state.clone().into(),
            pipeline_metadata.created.clone().into(),
            pipeline_metadata.modified.clone().into(),
        ])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

pub fn list(conn: &Connection, namespace_id: &str) -> Result<Vec<PipelineMetadata>, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            PipelineMetadataTable::NamespaceId,
            PipelineMetadataTable::PipelineId,
            PipelineMetadataTable::State,
            PipelineMetadataTable::Created,
            PipelineMetadataTable::Modified,
        ])
        .from(PipelineMetadataTable::Table)
        .and_where(Expr::col(PipelineMetadataTable::NamespaceId).eq(namespace_id))
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<PipelineMetadata> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(PipelineMetadata::from(row));
    }

    Ok(objects)
}

pub fn get(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
) -> Result<PipelineMetadata, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            PipelineMetadataTable::NamespaceId,
            PipelineMetadataTable::PipelineId,
            PipelineMetadataTable::State,
            PipelineMetadataTable::Created,
            PipelineMetadataTable::Modified,
        ])
        .from(PipelineMetadataTable::Table)
        .and_where(Expr::col(PipelineMetadataTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineMetadataTable::PipelineId).eq(pipeline_id))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(PipelineMetadata::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn update(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    fields: UpdatableFields,
) -> Result<(), StorageError> {
    let mut query = Query::update();
    query.table(PipelineMetadataTable::Table);

    if let Some(value) = fields.state {
        query.value(PipelineMetadataTable::State, value);
    }

    if let Some(value) = fields.modified {
        query.value(PipelineMetadataTable::Modified, value);
    }

    if query.get_values().is_empty() {
        return Err(StorageError::NoFieldsUpdated);
    }

    query
        .and_where(Expr::col(PipelineMetadataTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineMetadataTable::PipelineId).eq(pipeline_id));

    let (sql, values) = query.build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

pub fn delete(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(PipelineMetadataTable::Table)
        .and_where(Expr::col(PipelineMetadataTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineMetadataTable::PipelineId).eq(pipeline_id))
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

        let pipeline_metadata = PipelineMetadata {
            namespace_id: "some_id".into(),
            pipeline_id: "some_pipeline_id".into(),
            state: "active".into(),
            created: "some_time".into(),
            modified: "some_time_mod".into(),
        };

        insert(&conn, &pipeline_metadata)?;

        Ok((harness, conn))
    }

    #[test]
    fn test_get_pipeline_metadata() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let pipeline = get(&conn, "some_id", "some_pipeline_id").expect("Failed to get pipeline");
        assert_eq!(pipeline.state, "active");
    }

    #[test]
    fn test_update_pipeline_metadata() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        update(
            &conn,
            "some_id",
            "some_pipeline_id",
            UpdatableFields {
                state: Some("disabled".into()),
                modified: Some("updated_time".into()),
            },
        )
        .expect("Failed to update pipeline");

        let pipeline = get(&conn, "some_id", "some_pipeline_id").expect("Failed to get pipeline");
        assert_eq!(pipeline.state, "disabled");
        assert_eq!(pipeline.modified, "updated_time");
    }

    #[test]
    fn test_delete_pipeline_metadata() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        delete(&conn, "some_id", "some_pipeline_id").expect("Failed to delete pipeline");

        assert_eq!(
            get(&conn, "some_id", "some_pipeline_id").unwrap_err(),
            StorageError::NotFound
        );
    }
}
