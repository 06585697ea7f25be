use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub version: i64,
    pub parallelism: i64,
    pub name: String,
    pub description: String,
    pub registered: String,
    pub deprecated: String,
    pub state: String,
}

impl From<&Row<'_>> for PipelineConfig {
    fn from(row: &Row) -> Self {
        Self {
            namespace_id: row.get_unwrap("namespace_id"),
            pipeline_id: row.get_unwrap("pipeline_id"),
            version: row.get_unwrap("version"),
            parallelism: row.get_unwrap("parallelism"),
            name: row.get_unwrap("name"),
            description: row.get_unwrap("description"),
            registered: row.get_unwrap("registered"),
            deprecated: row.get_unwrap("deprecated"),
            state: row.get_unwrap("state"),
        }
    }
}

#[derive(Iden)]
enum PipelineConfigTable {
    #[iden = "pipeline_configs"]
    Table,
    NamespaceId,
    PipelineId,
    Version,
    Parallelism,
    Name,
    Description,
    Registered,
    Deprecated,
    State,
}

#[derive(Clone, Debug, Default)]
pub struct UpdatableFields {
    pub deprecated: Option<String>,
    pub state: Option<String>,
}

const SELECT_COLUMNS: [PipelineConfigTable; 9] = [
    PipelineConfigTable::NamespaceId,
    PipelineConfigTable::PipelineId,
    PipelineConfigTable::Version,
    PipelineConfigTable::Parallelism,
    PipelineConfigTable::Name,
    PipelineConfigTable::Description,
    PipelineConfigTable::Registered,
    PipelineConfigTable::Deprecated,
    PipelineConfigTable::State,
];

pub fn insert(conn: &Connection, pipeline_config: &PipelineConfig) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(PipelineConfigTable::Table)
        .columns(SELECT_COLUMNS)
        .values_panic([
            pipeline_config.namespace_id.clone().into(),
            pipeline_config.pipeline_id.clone().into(),
            pipeline_config.version.into(),
            pipeline_config.parallelism.into(),
            pipeline_config.name.clone().into(),
            pipeline_config.description.clone().into(),
            pipeline_config.registered.clone().into(),
            pipeline_config.deprecated.clone().into(),
            pipeline_config.state.clone().into(),
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
) -> Result<Vec<PipelineConfig>, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(PipelineConfigTable::Table)
        .and_where(Expr::col(PipelineConfigTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineConfigTable::PipelineId).eq(pipeline_id))
        .order_by(PipelineConfigTable::Version, Order::Asc)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<PipelineConfig> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(PipelineConfig::from(row));
    }

    Ok(objects)
}

pub fn get(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    version: i64,
) -> Result<PipelineConfig, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(PipelineConfigTable::Table)
        .and_where(Expr::col(PipelineConfigTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineConfigTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(PipelineConfigTable::Version).eq(version))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(PipelineConfig::from(row));
    }

    Err(StorageError::NotFound)
}

/// Return the currently deployed(live) config for a pipeline. Only one config can be live at
/// any point in time.
pub fn get_latest_live(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
) -> Result<PipelineConfig, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(PipelineConfigTable::Table)
        .and_where(Expr::col(PipelineConfigTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineConfigTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(PipelineConfigTable::State).eq("live"))
        .order_by(PipelineConfigTable::Version, Order::Desc)
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(PipelineConfig::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn update(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    version: i64,
    fields: UpdatableFields,
) -> Result<(), StorageError> {
    let mut query = Query::update();
    query.table(PipelineConfigTable::Table);

    if let Some(value) = fields.deprecated {
        query.value(PipelineConfigTable::Deprecated, value);
    }

    if let Some(value) = fields.state {
        query.value(PipelineConfigTable::State, value);
    }

    if query.get_values().is_empty() {
        return Err(StorageError::NoFieldsUpdated);
    }

    query
        .and_where(Expr::col(PipelineConfigTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineConfigTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(PipelineConfigTable::Version).eq(version));

    let (sql, values) = query.build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

pub fn delete(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    version: i64,
) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(PipelineConfigTable::Table)
        .and_where(Expr::col(PipelineConfigTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(PipelineConfigTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(PipelineConfigTable::Version).eq(version))
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}
