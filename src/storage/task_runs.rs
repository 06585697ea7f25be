use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct TaskRun {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub run_id: i64,
    pub task_run_id: String,
    pub task: String,
    pub created: String,
    pub started: String,
    pub ended: String,
    pub exit_code: Option<i64>,
    pub logs_expired: bool,
    pub logs_removed: bool,
    pub state: String,
    pub status: String,
    pub status_reason: String,
    pub variables: String,
}

impl From<&Row<'_>> for TaskRun {
    fn from(row: &Row) -> Self {
        Self {
            namespace_id: row.get_unwrap("namespace_id"),
            pipeline_id: row.get_unwrap("pipeline_id"),
            run_id: row.get_unwrap("run_id"),
            task_run_id: row.get_unwrap("task_run_id"),
            task: row.get_unwrap("task"),
            created: row.get_unwrap("created"),
            started: row.get_unwrap("started"),
            ended: row.get_unwrap("ended"),
            exit_code: row.get_unwrap("exit_code"),
            logs_expired: row.get_unwrap("logs_expired"),
            logs_removed: row.get_unwrap("logs_removed"),
            state: row.get_unwrap("state"),
            status: row.get_unwrap("status"),
            status_reason: row.get_unwrap("status_reason"),
            variables: row.get_unwrap("variables"),
        }
    }
}

#[derive(Iden)]
enum TaskRunTable {
    #[iden = "task_runs"]
    Table,
    NamespaceId,
    PipelineId,
    RunId,
    TaskRunId,
    Task,
    Created,
    Started,
    Ended,
    ExitCode,
    LogsExpired,
    LogsRemoved,
    State,
    Status,
    StatusReason,
    Variables,
}

const SELECT_COLUMNS: [TaskRunTable; 15] = [
    TaskRunTable::NamespaceId,
    TaskRunTable::PipelineId,
    TaskRunTable::RunId,
    TaskRunTable::TaskRunId,
    TaskRunTable::Task,
    TaskRunTable::Created,
    TaskRunTable::Started,
    TaskRunTable::Ended,
    TaskRunTable::ExitCode,
    TaskRunTable::LogsExpired,
    TaskRunTable::LogsRemoved,
    TaskRunTable::State,
    TaskRunTable::Status,
    TaskRunTable::StatusReason,
    TaskRunTable::Variables,
];

#[derive(Clone, Debug, Default)]
pub struct UpdatableFields {
    pub started: Option<String>,
    pub ended: Option<String>,
    pub exit_code: Option<i64>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub status_reason: Option<String>,
    pub logs_expired: Option<bool>,
    pub logs_removed: Option<bool>,
    pub variables: Option<String>,
}

pub fn insert(conn: &Connection, task_run: &TaskRun) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(TaskRunTable::Table)
        .columns(SELECT_COLUMNS)
        .values_panic([
            task_run.namespace_id.clone().into(),
            task_run.pipeline_id.clone().into(),
            task_run.run_id.into(),
            task_run.task_run_id.clone().into(),
            task_run.task.clone().into(),
            task_run.created.clone().into(),
            task_run.started.clone().into(),
            task_run.ended.clone().into(),
            task_run.exit_code.into(),
            task_run.logs_expired.into(),
            task_run.logs_removed.into(),
            task_run.state.clone().into(),
            task_run.status.clone().into(),
            task_run.status_reason.clone().into(),
            task_run.variables.clone().into(),
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
) -> Result<Vec<TaskRun>, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(TaskRunTable::Table)
        .and_where(Expr::col(TaskRunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(TaskRunTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(TaskRunTable::RunId).eq(run_id))
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<TaskRun> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(TaskRun::from(row));
    }

    Ok(objects)
}

pub fn get(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
    task_run_id: &str,
) -> Result<TaskRun, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(TaskRunTable::Table)
        .and_where(Expr::col(TaskRunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(TaskRunTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(TaskRunTable::RunId).eq(run_id))
        .and_where(Expr::col(TaskRunTable::TaskRunId).eq(task_run_id))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(TaskRun::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn update(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
    task_run_id: &str,
    fields: UpdatableFields,
) -> Result<(), StorageError> {
    let mut query = Query::update();
    query.table(TaskRunTable::Table);

    if let Some(value) = fields.started {
        query.value(TaskRunTable::Started, value);
    }

    if let Some(value) = fields.ended {
        query.value(TaskRunTable::Ended, value);
    }

    if let Some(value) = fields.exit_code {
        query.value(TaskRunTable::ExitCode, value);
    }

    if let Some(value) = fields.state {
        query.value(TaskRunTable::State, value);
    }

    if let Some(value) = fields.status {
        query.value(TaskRunTable::Status, value);
    }

    if let Some(value) = fields.status_reason {
        query.value(TaskRunTable::StatusReason, value);
    }

    if let Some(value) = fields.logs_expired {
        query.value(TaskRunTable::LogsExpired, value);
    }

    if let Some(value) = fields.logs_removed {
        query.value(TaskRunTable::LogsRemoved, value);
    }

    if let Some(value) = fields.variables {
        query.value(TaskRunTable::Variables, value);
    }

    if query.get_values().is_empty() {
        return Err(StorageError::NoFieldsUpdated);
    }

    query
        .and_where(Expr::col(TaskRunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(TaskRunTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(TaskRunTable::RunId).eq(run_id))
        .and_where(Expr::col(TaskRunTable::TaskRunId).eq(task_run_id));

    let (sql, values) = query.build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

// For now we don't allow deletion of task runs and there really shouldn't be a need for it,
// but in the future we might allow it through an admin route.
#[allow(dead_code)]
pub fn delete(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: i64,
    task_run_id: &str,
) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(TaskRunTable::Table)
        .and_where(Expr::col(TaskRunTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(TaskRunTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(TaskRunTable::RunId).eq(run_id))
        .and_where(Expr::col(TaskRunTable::TaskRunId).eq(task_run_id))
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

        let pipeline_config = crate::storage::pipeline_configs::PipelineConfig {
            namespace_id: "some_id".into(),
            pipeline_id: "some_pipeline_id".into(),
            version: 1,
            parallelism: 4,
            name: "Test Pipeline".into(),
            description: "A test pipeline".into(),
            registered: "some_time".into(),
            deprecated: "0".into(),
            state: "live".into(),
        };

        crate::storage::pipeline_configs::insert(&conn, &pipeline_config)?;

        let run = crate::storage::runs::Run {
            namespace_id: "some_id".into(),
            pipeline_id: "some_pipeline_id".into(),
            pipeline_config_version: 1,
            run_id: 1,
            started: "some_time".into(),
            ended: "0".into(),
            state: "running".into(),
            status: "unknown".into(),
            status_reason: "null".into(),
            initiator: "{}".into(),
            variables: "[]".into(),
            token_id: None,
            store_objects_expired: false,
        };

        crate::storage::runs::insert(&conn, &run)?;

        let task_run = TaskRun {
            namespace_id: "some_id".into(),
            pipeline_id: "some_pipeline_id".into(),
            run_id: 1,
            task_run_id: "task001".into(),
            task: "{}".into(),
            created: "some_time".into(),
            started: "0".into(),
            ended: "0".into(),
            exit_code: None,
            logs_expired: false,
            logs_removed: false,
            state: "processing".into(),
            status: "unknown".into(),
            status_reason: "null".into(),
            variables: "[]".into(),
        };

        insert(&conn, &task_run)?;

        Ok((harness, conn))
    }

    #[test]
    fn test_list_task_runs() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let task_runs =
            list(&conn, "some_id", "some_pipeline_id", 1).expect("Failed to list task_runs");

        assert!(!task_runs.is_empty(), "No task_runs returned");

        let some_task_run = task_runs
            .iter()
            .find(|n| n.task_run_id == "task001")
            .expect("TaskRun not found");
        assert_eq!(some_task_run.pipeline_id, "some_pipeline_id");
        assert_eq!(some_task_run.state, "processing");
    }

    #[test]
    fn test_get_task_run() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let task_run =
            get(&conn, "some_id", "some_pipeline_id", 1, "task001").expect("Failed to get task_run");

        assert_eq!(task_run.pipeline_id, "some_pipeline_id");
    }

    #[test]
    fn test_update_task_run() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let fields_to_update = UpdatableFields {
            started: Some("some_later_time".into()),
            ended: Some("some_even_later_time".into()),
            exit_code: Some(1),
            state: Some("complete".into()),
            status: Some("failed".into()),
            status_reason: Some("some_reason".into()),
            logs_expired: Some(true),
            logs_removed: Some(false),
            variables: Some("[]".into()),
        };

        update(
            &conn,
            "some_id",
            "some_pipeline_id",
            1,
            "task001",
            fields_to_update,
        )
        .expect("Failed to update task_run");

        let updated_task_run = get(&conn, "some_id", "some_pipeline_id", 1, "task001")
            .expect("Failed to retrieve updated task_run");

        assert_eq!(updated_task_run.state, "complete");
        assert_eq!(updated_task_run.exit_code, Some(1));
    }

    #[test]
    fn test_delete_task_run() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        delete(&conn, "some_id", "some_pipeline_id", 1, "task001")
            .expect("Failed to delete task_run");

        assert!(
            get(&conn, "some_id", "some_pipeline_id", 1, "task001").is_err(),
            "TaskRun was not deleted"
        );
    }
}
