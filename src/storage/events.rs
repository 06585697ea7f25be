use crate::storage::{map_rusqlite_error, StorageError};
use rusqlite::{Connection, Row};
use sea_query::{Expr, Iden, Order, Query, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;

#[derive(Clone, Debug, Default)]
pub struct Event {
    pub id: i64,
    pub kind: String,
    pub emitted: String,
}

impl From<&Row<'_>> for Event {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get_unwrap("id"),
            kind: row.get_unwrap("kind"),
            emitted: row.get_unwrap("emitted"),
        }
    }
}

#[derive(Iden)]
enum EventTable {
    #[iden = "events"]
    Table,
    Id,
    Kind,
    Emitted,
}

/// Insert a new event. The id column is assigned by sqlite and increases monotonically; the
/// assigned id is returned.
pub fn insert(conn: &Connection, event: &Event) -> Result<i64, StorageError> {
    let (sql, values) = Query::insert()
        .into_table(EventTable::Table)
        .columns([EventTable::Kind, EventTable::Emitted])
        .values_panic([event.kind.clone().into(), event.emitted.clone().into()])
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(conn.last_insert_rowid())
}

pub fn list(
    conn: &Connection,
    offset: i64,
    limit: i64,
    reverse: bool,
) -> Result<Vec<Event>, StorageError> {
    let order = if reverse { Order::Desc } else { Order::Asc };

    let (sql, values) = Query::select()
        .columns([EventTable::Id, EventTable::Kind, EventTable::Emitted])
        .from(EventTable::Table)
        .order_by(EventTable::Id, order)
        .limit(limit as u64)
        .offset(offset as u64)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut objects: Vec<Event> = vec![];

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        objects.push(Event::from(row));
    }

    Ok(objects)
}

pub fn get(conn: &Connection, id: i64) -> Result<Event, StorageError> {
    let (sql, values) = Query::select()
        .columns([EventTable::Id, EventTable::Kind, EventTable::Emitted])
        .from(EventTable::Table)
        .and_where(Expr::col(EventTable::Id).eq(id))
        .limit(1)
        .build_rusqlite(SqliteQueryBuilder);

    let mut statement = conn
        .prepare(sql.as_str())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    let mut rows = statement
        .query(&*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    while let Some(row) = rows.next().map_err(|e| map_rusqlite_error(e, &sql))? {
        return Ok(Event::from(row));
    }

    Err(StorageError::NotFound)
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), StorageError> {
    let (sql, values) = Query::delete()
        .from_table(EventTable::Table)
        .and_where(Expr::col(EventTable::Id).eq(id))
        .build_rusqlite(SqliteQueryBuilder);

    conn.execute(sql.as_str(), &*values.as_params())
        .map_err(|e| map_rusqlite_error(e, &sql))?;

    Ok(())
}
