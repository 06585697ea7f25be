use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created: String,
    pub modified: String,
}

impl From<&Row<'_>> for Namespace {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get_unwrap("id"),
            name: row.get_unwrap("name"),
            description: row.get_unwrap("description"),
            created: row.get_unwrap("created"),
            modified: row.get_unwrap("modified"),
        }
    }
}

#[derive(Iden)]
enum NamespaceTable {
    #[iden = "namespaces"]
    Table,
    Id,
    Name,
    Description,
    Created,
    Modified,
}

pub fn insert(conn: &Connection, namespace: &Namespace) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(NamespaceTable::Table)
        .columns([
            NamespaceTable::Id,
            NamespaceTable::Name,
            NamespaceTable::Description,
            NamespaceTable::Created,
            NamespaceTable::Modified,
        ])
        .values_panic([
            namespace.id.clone().into(),
            namespace.name.clone().into(),
            namespace.description.clone().into(),
            namespace.created.clone().into(),
            namespace.modified.clone().into(),
        ])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

pub fn list(conn: &Connection) -> Result<Vec<Namespace>, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            NamespaceTable::Id,
            NamespaceTable::Name,
            NamespaceTable::Description,
            NamespaceTable::Created,
            NamespaceTable::Modified,
        ])
        .from(NamespaceTable::Table)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<Namespace> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(Namespace::from(row));
    }

    Ok(objects)
}

pub fn get(conn: &Connection, id: &str) -> Result<Namespace, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            NamespaceTable::Id,
            NamespaceTable::Name,
            NamespaceTable::Description,
            NamespaceTable::Created,
            NamespaceTable::Modified,
        ])
        .from(NamespaceTable::Table)
        .and_where(Expr::col(NamespaceTable::Id).eq(id))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(Namespace::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn delete(conn: &Connection, id: &str) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(NamespaceTable::Table)
        .and_where(Expr::col(NamespaceTable::Id).eq(id))
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

        let namespace = Namespace {
            id: "some_id".into(),
            name: "some_name".into(),
            description: "some_description".into(),
            created: "some_time".into(),
            modified: "some_time_mod".into(),
        };

        insert(&conn, &namespace)?;

        Ok((harness, conn))
    }

    #[test]
    fn test_list_namespaces() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let namespaces = list(&conn).expect("Failed to list namespaces");

        assert!(!namespaces.is_empty(), "No namespaces returned");

        let some_namespace = namespaces
            .iter()
            .find(|n| n.id == "some_id")
            .expect("Namespace not found");
        assert_eq!(some_namespace.name, "some_name");
    }

    #[test]
    fn test_get_namespace() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let namespace = get(&conn, "some_id").expect("Failed to get namespace");
        assert_eq!(namespace.name, "some_name");
    }

    #[test]
    fn test_insert_namespace_duplicate() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        let namespace = Namespace {
            id: "some_id".into(),
            ..Default::default()
        };

        let result = insert(&conn, &namespace);
        assert_eq!(result.unwrap_err(), StorageError::Exists);
    }

    #[test]
    fn test_delete_namespace() {
        let (_harness, conn) = setup().expect("Failed to set up DB");

        delete(&conn, "some_id").expect("Failed to delete namespace");

        assert_eq!(get(&conn, "some_id").unwrap_err(), StorageError::NotFound);
    }
}
