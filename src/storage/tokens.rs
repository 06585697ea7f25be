use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct Token {
    pub id: String,
    pub hash: String,
    pub created: String,
    pub token_type: String,
    pub namespaces: String,
    pub metadata: String,
    pub expires: String,
    pub disabled: bool,
}

impl From<&Row<'_>> for Token {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get_unwrap("id"),
            hash: row.get_unwrap("hash"),
            created: row.get_unwrap("created"),
            token_type: row.get_unwrap("token_type"),
            namespaces: row.get_unwrap("namespaces"),
            metadata: row.get_unwrap("metadata"),
            expires: row.get_unwrap("expires"),
            disabled: row.get_unwrap("disabled"),
        }
    }
}

#[derive(Iden)]
enum TokenTable {
    #[iden = "tokens"]
    Table,
    Id,
    Hash,
    Created,
    TokenType,
    Namespaces,
    Metadata,
    Expires,
    Disabled,
}

const SELECT_COLUMNS: [TokenTable; 8] = [
    TokenTable::Id,
    TokenTable::Hash,
    TokenTable::Created,
    TokenTable::TokenType,
    TokenTable::Namespaces,
    TokenTable::Metadata,
    TokenTable::Expires,
    TokenTable::Disabled,
];

pub fn insert(conn: &Connection, token: &Token) -> Result<(), StorageError> {
    let (sql, values) = Query::insert()
        .into_table(TokenTable::Table)
        .columns(SELECT_COLUMNS)
        .values_panic([
            token.id.clone().into(),
            token.hash.clone().into(),
            token.created.clone().into(),
            token.token_type.clone().into(),
            token.namespaces.clone().into(),
            token.metadata.clone().into(),
            token.expires.clone().into(),
            token.disabled.into(),
        ])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Token, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(TokenTable::Table)
        .and_where(Expr::col(TokenTable::Id).eq(id))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(Token::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn get_by_hash(conn: &Connection, hash: &str) -> Result<Token, StorageError> {
    let (sql, values) = Query::select()
        .columns(SELECT_COLUMNS)
        .from(TokenTable::Table)
        .and_where(Expr::col(TokenTable::Hash).eq(hash))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(Token::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn delete(conn: &Connection, id: &str) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(TokenTable::Table)
        .and_where(Expr::col(TokenTable::Id).eq(id))
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::TestHarness;

    fn test_token() -> Token {
        Token {
            id: "some_token_id".into(),
            hash: "some_hash".into(),
            created: "some_time".into(),
            token_type: "run".into(),
            namespaces: "[\"default\"]".into(),
            metadata: "{}".into(),
            expires: "some_later_time".into(),
            disabled: false,
        }
    }

    #[test]
    fn test_get_token_by_id() {
        let harness = TestHarness::new();
        let conn = harness.write_conn().unwrap();

        insert(&conn, &test_token()).expect("Failed to insert token");

        let token = get_by_id(&conn, "some_token_id").expect("Failed to get token");
        assert_eq!(token.hash, "some_hash");
    }

    #[test]
    fn test_get_token_by_hash() {
        let harness = TestHarness::new();
        let conn = harness.write_conn().unwrap();

        insert(&conn, &test_token()).expect("Failed to insert token");

        let token = get_by_hash(&conn, "some_hash").expect("Failed to get token");
        assert_eq!(token.id, "some_token_id");
    }

    #[test]
    fn test_delete_token() {
        let harness = TestHarness::new();
        let conn = harness.write_conn().unwrap();

        insert(&conn, &test_token()).expect("Failed to insert token");
        delete(&conn, "some_token_id").expect("Failed to delete token");

        assert_eq!(
            get_by_id(&conn, "some_token_id").unwrap_err(),
            StorageError::NotFound
        );
    }
}
