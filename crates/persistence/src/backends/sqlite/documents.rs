//! [`DocumentStore`] implementation for SQLite.

use async_trait::async_trait;
use rusqlite::{Connection, params, params_from_iter};
use serde_json::Value;

use crate::core::{Document, DocumentStore, Filter, FindQuery, IndexSpec};
use crate::error::{BackendError, SerializationError, StorageError, StorageResult};
use crate::types::fields;

use super::SqliteBackend;
use super::query_builder::{
    FilterSql, SqlFragment, SqlParam, index_prefix, json_path, quote_ident, quote_literal,
};

fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

fn document_id(document: &Document) -> StorageResult<String> {
    match document.get(fields::ID) {
        Some(Value::String(id)) => Ok(id.clone()),
        _ => Err(StorageError::Backend(BackendError::QueryError {
            message: "document has no string _id".to_string(),
        })),
    }
}

fn encode_body(document: Document) -> StorageResult<String> {
    Ok(serde_json::to_string(&Value::Object(document))?)
}

fn decode_body(body: &str) -> StorageResult<Document> {
    match serde_json::from_str(body)? {
        Value::Object(map) => Ok(map),
        other => Err(SerializationError::Shape {
            message: format!("stored body is not an object: {}", other),
        }
        .into()),
    }
}

/// Turns a `(value, json type)` pair produced by SQLite's JSON functions
/// back into a JSON value.
fn decode_json_value(value: rusqlite::types::Value, json_type: &str) -> StorageResult<Value> {
    use rusqlite::types::Value as Sql;

    Ok(match (json_type, value) {
        ("null", _) | (_, Sql::Null) => Value::Null,
        ("true", _) => Value::Bool(true),
        ("false", _) => Value::Bool(false),
        ("object" | "array", Sql::Text(text)) => serde_json::from_str(&text)?,
        (_, Sql::Text(text)) => Value::String(text),
        (_, Sql::Integer(i)) => Value::from(i),
        (_, Sql::Real(f)) => Value::from(f),
        (_, Sql::Blob(_)) => {
            return Err(internal_error(
                "unexpected blob value in JSON document".to_string(),
            ));
        }
    })
}

fn insert(conn: &Connection, collection: &str, document: Document) -> StorageResult<()> {
    let id = document_id(&document)?;
    conn.execute(
        "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
        params![collection, id, encode_body(document)?],
    )?;
    Ok(())
}

fn scope(collection: &str, filter: &Filter) -> SqlFragment {
    let mut fragment = SqlFragment::new("d.collection = ?");
    fragment.params.push(SqlParam::string(collection));
    fragment.and(FilterSql::bound("d").filter(filter))
}

#[async_trait]
impl DocumentStore for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert_one(&self, collection: &str, document: Document) -> StorageResult<()> {
        let conn = self.get_connection()?;
        insert(&conn, collection, document)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StorageResult<()> {
        let conn = self.get_connection()?;
        for document in documents {
            insert(&conn, collection, document)?;
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, document: Document) -> StorageResult<()> {
        let id = document_id(&document)?;
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (collection, doc_id) DO UPDATE SET body = excluded.body",
            params![collection, id, encode_body(document)?],
        )?;
        Ok(())
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> StorageResult<Vec<Document>> {
        let where_clause = scope(collection, &query.filter);
        let order = match &query.sort {
            Some(sort) => {
                let direction = if sort.descending { "DESC" } else { "ASC" };
                format!(
                    "{} {}, d.rowid {}",
                    FilterSql::bound("d").field(&sort.field),
                    direction,
                    direction
                )
            }
            None => "d.rowid ASC".to_string(),
        };
        let limit = match query.limit {
            Some(limit) => format!(" LIMIT {}", limit),
            None => String::new(),
        };
        let sql = format!(
            "SELECT d.body FROM documents d WHERE {} ORDER BY {}{}",
            where_clause.sql, order, limit
        );

        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(where_clause.sql_values()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let document = decode_body(&row?)?;
            documents.push(query.projection.apply(document));
        }
        Ok(documents)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Document,
    ) -> StorageResult<u64> {
        if set.is_empty() {
            return Ok(0);
        }

        let mut assignments = SqlFragment::new("");
        let mut pairs = Vec::with_capacity(set.len());
        for (field, value) in set {
            let placeholder =
                assignments.add_param(SqlParam::string(serde_json::to_string(value)?));
            pairs.push(format!(
                "{}, json({})",
                quote_literal(&json_path(field)),
                placeholder
            ));
        }
        let where_clause = scope(collection, filter);
        let sql = format!(
            "UPDATE documents AS d SET body = json_set(d.body, {}) WHERE {}",
            pairs.join(", "),
            where_clause.sql
        );

        let mut values = assignments.sql_values();
        values.extend(where_clause.sql_values());

        let conn = self.get_connection()?;
        let updated = conn.execute(&sql, params_from_iter(values))?;
        Ok(updated as u64)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        let where_clause = scope(collection, filter);
        let sql = format!("DELETE FROM documents AS d WHERE {}", where_clause.sql);
        let conn = self.get_connection()?;
        let deleted = conn.execute(&sql, params_from_iter(where_clause.sql_values()))?;
        Ok(deleted as u64)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> StorageResult<Vec<Value>> {
        let where_clause = scope(collection, filter);
        let path = quote_literal(&json_path(field));
        // Arrays are unwound element by element; scalars and objects count as one value.
        let sql = format!(
            "SELECT j.value, j.type FROM documents d, json_each(d.body, {path}) j
             WHERE json_type(d.body, {path}) = 'array' AND {where_sql}
             UNION
             SELECT json_extract(d.body, {path}), json_type(d.body, {path}) FROM documents d
             WHERE json_type(d.body, {path}) NOT IN ('array') AND {where_sql}",
            path = path,
            where_sql = where_clause.sql
        );

        let mut values = where_clause.sql_values();
        values.extend(where_clause.sql_values());

        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, rusqlite::types::Value>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;

        let mut distinct: Vec<Value> = Vec::new();
        for row in rows {
            let (value, json_type) = row?;
            let value = decode_json_value(value, &json_type)?;
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        Ok(distinct)
    }

    async fn increment_counter(&self, collection: &str, id: &str) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let last = conn.query_row(
            "INSERT INTO documents (collection, doc_id, body)
             VALUES (?1, ?2, json_object('_id', ?2, 'last', 1))
             ON CONFLICT (collection, doc_id) DO UPDATE
                 SET body = json_set(body, '$.last', COALESCE(json_extract(body, '$.last'), 0) + 1)
             RETURNING json_extract(body, '$.last')",
            params![collection, id],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(last)
    }

    async fn raise_counter(&self, collection: &str, id: &str, floor: i64) -> StorageResult<i64> {
        let conn = self.get_connection()?;
        let last = conn.query_row(
            "INSERT INTO documents (collection, doc_id, body)
             VALUES (?1, ?2, json_object('_id', ?2, 'last', ?3))
             ON CONFLICT (collection, doc_id) DO UPDATE
                 SET body = json_set(body, '$.last', MAX(COALESCE(json_extract(body, '$.last'), 0), ?3))
             RETURNING json_extract(body, '$.last')",
            params![collection, id, floor],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(last)
    }

    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<()> {
        let sql = FilterSql::inline().create_index(collection, index);
        let conn = self.get_connection()?;
        conn.execute(&sql, []).map_err(|e| {
            StorageError::Backend(BackendError::MigrationError {
                message: format!("Failed to create index {}: {}", index.name, e),
            })
        })?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1",
            params![collection],
        )?;

        let prefix = index_prefix(collection);
        let names: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'index' AND tbl_name = 'documents'
                   AND substr(name, 1, length(?1)) = ?1",
            )?;
            let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
            let names = rows.collect::<Result<Vec<String>, rusqlite::Error>>()?;
            names
        };
        for name in names {
            conn.execute(&format!("DROP INDEX IF EXISTS {}", quote_ident(&name)), [])?;
        }
        Ok(())
    }
}
