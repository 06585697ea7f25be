use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct Run {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub pipeline_config_version: i64,
    pub run_id: i64,
    pub started: String,
    pub ended: String,
    pub state: String,
    pub status: String,
    pub status_reason: String,
    pub initiator: String,
    pub variables: String,
    pub token_id: Option<String>,
    pub store_objects_expired: bool,
}

impl From<&Row<'_>> for Run {
    fn from(row: &Row) -> Self {
        Self {
            namespace_id: row.get_unwrap("namespace_id"),
            pipeline_id: row.get_unwrap("pipeline_id"),
            pipeline_config_version: row.get_unwrap("pipeline_config_version"),
            run_id: row.get_unwrap("run_id"),
            started: row.get_unwrap("started"),
            ended: row.get_unwrap("ended"),
            state: row.get_unwrap("state"),
            status: row.get_unwrap("status"),
            status_reason: row.get_unwrap("status_reason"),
            initiator: row.get_unwrap("initiator"),
            variables: row.get_unwrap("variables"),
            token_id: row.get_unwrap("token_id"),
            store_objects_expired: row.get_unwrap("store_objects_expired"),
        }
    }
}

#[derive(Iden)]
enum RunTable {
    #[iden = "runs"]
    Table,
    NamespaceId,
    PipelineId,
    PipelineConfigVersion,
    RunId,
    Started,
    Ended,
    State,
    Status,
    StatusReason,
    Initiator,
    Variables,
    TokenId,
    StoreObjectsExpired,
}

const SELECT_COLUMNS: [RunTable; 13] = [
    RunTable::NamespaceId,
    RunTable::PipelineId,
    RunTable::PipelineConfigVersion,
    RunTable::RunId,
    RunTable::Started,
    RunTable::Ended,
    RunTable::State,
    RunTable::Status,
    RunTable::StatusReason,
    RunTable::Initiator,
    RunTable::Variables,
    RunTable::TokenId,
    RunTable::StoreObjectsExpired,
];

#[derive(Clone, Debug, Default)]
pub struct UpdatableFields {
    pub started: Option<String>,
    pub ended: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub status_reason: Option<String>,
    pub variables: Option<String>,
    pub token_id: Option<String>,
    pub store_objects_expired: Option<bool>,
}

pub fn insert(conn: &Connection, run: &Run) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(RunTable::Table)
        .columns(SELECT_COLUMNS)
        .values_panic([
            run.namespace_id.clone().into(),
            run.pipeline_id.clone().into(),
            run.pipeline_config_version.into(),
            run.run_id.into(),
            run.started.clone().into(),
            run.ended.clone().into(),
            run.state.clone().into(),
            run.status.clone().into(),
            run.status_reason.clone().into(),
            run.initiator.clone().into(),
            run.variables.clone().into(),
            run.token_id.clone().into(),
            run.store_objects_expired.into(),
        ])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

/// Return runs for a given namespace/pipeline. Runs are listed by run id, ascending by
/// default; `reverse` returns the newest runs first.
pub fn list(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    offset: i64,
    limit: i64,
    reverse: bool,
) -> Result<Vec<Run>, StorageError> {
    let order = if reverse { Order::Desc } else { Order::Asc };

    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(RunTable::Table)
        .and_where(Expr::col(RunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(RunTable::PipelineId).eq(pipeline_id))
        .order_by(RunTable::RunId, order)
        .limit(limit as u64)
        .offset(offset as u64)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<Run> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(Run::from(row));
    }

    Ok(objects)
}

pub fn get(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
) -> Result<Run, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(RunTable::Table)
        .and_where(Expr::col(RunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(RunTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(RunTable::RunId).eq(run_id))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(Run::from(row));
    }

    Err(StorageError::NotFound)
}

/// Return the run with the highest id for a pipeline. Used during run id allocation.
pub fn get_latest(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
) -> Result<Run, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(RunTable::Table)
        .and_where(Expr::col(RunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(RunTable::PipelineId).eq(pipeline_id))
        .order_by(RunTable::RunId, Order::Desc)
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(Run::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn update(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
    fields: UpdatableFields,
) -> Result<(), StorageError> {
    let mut query = Query::update();
    query.table(RunTable::Table);

    if let Some(value) = fields.started {
        query.value(RunTable::Started, value);
    }

    if let Some(value) = fields.ended {
        query.value(RunTable::Ended, value);
    }

    if let Some(value) = fields.state {
        query.value(RunTable::State, value);
    }

    if let Some(value) = fields.status {
        query.value(RunTable::Status, value);
    }

    if let Some(value) = fields.status_reason {
        query.value(RunTable::StatusReason, value);
    }

    if let Some(value) = fields.variables {
        query.value(RunTable::Variables, value);
    }

    if let Some(value) = fields.token_id {
        query.value(RunTable::TokenId, value);
    }

    if let Some(value) = fields.store_objects_expired {
        query.value(RunTable::StoreObjectsExpired, value);
    }

    if query.get_values().is_empty() {
        return Err(StorageError::NoFieldsUpdated);
    }

    query
        .and_where(Expr::col(RunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(RunTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(RunTable::RunId).eq(run_id));

    let (sql, values) = query.build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

#[allow(dead_code)]
pub fn delete(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(RunTable::Table)
        .and_where(Expr::col(RunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(RunTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(RunTable::RunId).eq(run_id))
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}
