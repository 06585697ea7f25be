use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct Task {
    pub namespace_id: String,
    pub pipeline_id: String,
    pub pipeline_config_version: i64,
    pub task_id: String,
    pub description: String,
    pub image: String,
    pub registry_auth: String,
    pub depends_on: String,
    pub variables: String,
    pub entrypoint: String,
    pub command: String,
    pub always_pull: bool,
    pub inject_api_token: bool,
}

impl From<&Row<'_>> for Task {
    fn from(row: &Row) -> Self {
        Self {
            namespace_id: row.get_unwrap("namespace_id"),
            pipeline_id: row.get_unwrap("pipeline_id"),
            pipeline_config_version: row.get_unwrap("pipeline_config_version"),
            task_id: row.get_unwrap("task_id"),
            description: row.get_unwrap("description"),
            image: row.get_unwrap("image"),
            registry_auth: row.get_unwrap("registry_auth"),
            depends_on: row.get_unwrap("depends_on"),
            variables: row.get_unwrap("variables"),
            entrypoint: row.get_unwrap("entrypoint"),
            command: row.get_unwrap("command"),
            always_pull: row.get_unwrap("always_pull"),
            inject_api_token: row.get_unwrap("inject_api_token"),
        }
    }
}

#[derive(Iden)]
enum TaskTable {
    #[iden = "tasks"]
    Table,
    NamespaceId,
    PipelineId,
    PipelineConfigVersion,
    TaskId,
    Description,
    Image,
    RegistryAuth,
    DependsOn,
    Variables,
    Entrypoint,
    Command,
    AlwaysPull,
    InjectApiToken,
}

const SELECT_COLUMNS: [TaskTable; 13] = [
    TaskTable::NamespaceId,
    TaskTable::PipelineId,
    TaskTable::PipelineConfigVersion,
    TaskTable::TaskId,
    TaskTable::Description,
    TaskTable::Image,
    TaskTable::RegistryAuth,
    TaskTable::DependsOn,
    TaskTable::Variables,
    TaskTable::Entrypoint,
    TaskTable::Command,
    TaskTable::AlwaysPull,
    TaskTable::InjectApiToken,
];

pub fn insert(conn: &Connection, task: &Task) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(TaskTable::Table)
        .columns(SELECT_COLUMNS)
        .values_panic([
            task.namespace_id.clone().into(),
            task.pipeline_id.clone().into(),
            task.pipeline_config_version.into(),
            task.task_id.clone().into(),
            task.description.clone().into(),
            task.image.clone().into(),
            task.registry_auth.clone().into(),
            task.depends_on.clone().into(),
            task.variables.clone().into(),
            task.entrypoint.clone().into(),
            task.command.clone().into(),
            task.always_pull.into(),
            task.inject_api_token.into(),
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
    pipeline_config_version: i64,
) -> Result<Vec<Task>, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(TaskTable::Table)
        .and_where(Expr::col(TaskTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(TaskTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(TaskTable::PipelineConfigVersion).eq(pipeline_config_version))
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<Task> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(Task::from(row));
    }

    Ok(objects)
}

pub fn get(
    conn: &Connection,
    namespace_id: &str,
    pipeline_id: &str,
    pipeline_config_version: i64,
    task_id: &str,
) -> Result<Task, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(TaskTable::Table)
        .and_where(Expr::col(TaskTable::NamespaceId).eq(namespace_id))
        .and_where(Expr::col(TaskTable::PipelineId).eq(pipeline_id))
        .and_where(Expr::col(TaskTable::PipelineConfigVersion).eq(pipeline_config_version))
        .and_where(Expr::col(TaskTable::TaskId).eq(task_id))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(Task::from(row));
    }

    Err(StorageError::NotFound)
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

        let task = Task {
            namespace_id: "some_id".into(),
            pipeline_id: "some_pipeline_id".into(),
            pipeline_config_version: 1,
            task_id: "some_task_id".into(),
            description: "some_description".into(),
            image: "ubuntu:latest".into(),
            registry_auth: "null".into(),
            depends_on: "{}".into(),
            variables: "[]".into(),
            entrypoint: "null".into(),
            command: "null".into(),
            always_pull: false,
            inject_api_token: false,
        };

        insert(&conn, &task)?;

        Ok((harness, conn))
    }

    #[test]
    fn test_list_tasks() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let tasks = list(&conn, "some_id", "some_pipeline_id", 1).expect("Failed to list tasks");

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "some_task_id");
        assert_eq!(tasks[0].image, "ubuntu:latest");
    }

    #[test]
    fn test_get_task() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let task = get(&conn, "some_id", "some_pipeline_id", 1, "some_task_id")
            .expect("Failed to get task");
        assert_eq!(task.image, "ubuntu:latest");
    }
}
