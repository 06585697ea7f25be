use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct SecretStoreGlobalKey {
    pub key: String,
    pub namespaces: String,
    pub created: String,
}

impl From<&Row<'_>> for SecretStoreGlobalKey {
    fn from(row: &Row) -> Self {
        Self {
            key: row.get_unwrap("key"),
            namespaces: row.get_unwrap("namespaces"),
            created: row.get_unwrap("created"),
        }
    }
}

#[derive(Iden)]
enum SecretStoreGlobalKeyTable {
    #[iden = "secret_store_global_keys"]
    Table,
    Key,
    Namespaces,
    Created,
}

pub fn insert(
    conn: &Connection,
    secret_store_global_key: &SecretStoreGlobalKey,
) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(SecretStoreGlobalKeyTable::Table)
        .columns([
            SecretStoreGlobalKeyTable::Key,
            SecretStoreGlobalKeyTable::Namespaces,
            SecretStoreGlobalKeyTable::Created,
        ])
        .values_panic([
            secret_store_global_key.key.clone().into(),
            secret_store_global_key.namespaces.clone().into(),
            secret_store_global_key.created.clone().into(),
        ])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

pub fn list(conn: &Connection) -> Result<Vec<SecretStoreGlobalKey>, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            SecretStoreGlobalKeyTable::Key,
            SecretStoreGlobalKeyTable::Namespaces,
            SecretStoreGlobalKeyTable::Created,
        ])
        .from(SecretStoreGlobalKeyTable::Table)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<SecretStoreGlobalKey> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(SecretStoreGlobalKey::from(row));
    }

    Ok(objects)
}

pub fn get(conn: &Connection, key: &str) -> Result<SecretStoreGlobalKey, StorageError> {
    let (sql, values) = Query::select()
        .columns([
            SecretStoreGlobalKeyTable::Key,
            SecretStoreGlobalKeyTable::Namespaces,
            SecretStoreGlobalKeyTable::Created,
        ])
        .from(SecretStoreGlobalKeyTable::Table)
        .and_where(Expr::col(SecretStoreGlobalKeyTable::Key).eq(key))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(SecretStoreGlobalKey::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn delete(conn: &Connection, key: &str) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(SecretStoreGlobalKeyTable::Table)
        .and_where(Expr::col(SecretStoreGlobalKeyTable::Key).eq(key))
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::TestHarness;

    #[test]
    fn test_global_secret_key_crud() {
        let harness = TestHarness::new();
        let conn = harness.write_conn().unwrap();

        insert(
            &conn,
            &SecretStoreGlobalKey {
                key: "some_key".into(),
                namespaces: "[\"default\"]".into(),
                created: "some_time".into(),
            },
        )
        .expect("Failed to insert global secret key");

        let key = get(&conn, "some_key").expect("Failed to get global secret key");
        assert_eq!(key.namespaces, "[\"default\"]");

        delete(&conn, "some_key").expect("Failed to delete global secret key");

        assert_eq!(get(&conn, "some_key").unwrap_err(), StorageError::NotFound);
    }
}
