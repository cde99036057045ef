use super::{Clause, Collection, DocumentStore, Filter, StoreError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite-backed store. Every operation opens its own connection so callers
/// on different threads never share a handle.
pub struct SqliteStore {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let store = Self {
            db_path: db_path.to_path_buf(),
            busy_timeout,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS documents (
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (collection, id)
                );

                CREATE INDEX IF NOT EXISTS idx_documents_collection_updated
                    ON documents(collection, updated_at DESC);
                ",
            )
            .map_err(|source| StoreError::Sql { source })
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection
            .busy_timeout(self.busy_timeout)
            .map_err(|source| StoreError::Sql { source })?;
        Ok(connection)
    }
}

impl DocumentStore for SqliteStore {
    fn find_by_id(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let connection = self.connect()?;
        let body: Option<String> = connection
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        body.map(|raw| decode_body(collection, id, &raw)).transpose()
    }

    fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let connection = self.connect()?;
        select_documents(&connection, collection, filter)
    }

    fn insert(&self, collection: Collection, id: &str, body: &Value) -> Result<(), StoreError> {
        let raw = encode_body(collection, id, body)?;
        let connection = self.connect()?;
        let inserted = connection
            .execute(
                "
                INSERT INTO documents (collection, id, body, updated_at)
                VALUES (?1, ?2, ?3, strftime('%s','now'))
                ON CONFLICT(collection, id) DO NOTHING
                ",
                params![collection.as_str(), id, raw],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if inserted == 0 {
            return Err(StoreError::Duplicate {
                collection,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn replace(&self, collection: Collection, id: &str, body: &Value) -> Result<(), StoreError> {
        let raw = encode_body(collection, id, body)?;
        let connection = self.connect()?;
        let updated = connection
            .execute(
                "
                UPDATE documents SET body = ?3, updated_at = strftime('%s','now')
                WHERE collection = ?1 AND id = ?2
                ",
                params![collection.as_str(), id, raw],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn modify(
        &self,
        collection: Collection,
        id: &str,
        apply: &mut dyn FnMut(&mut Value) -> Result<(), StoreError>,
    ) -> Result<Value, StoreError> {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| StoreError::Sql { source })?;
        let Some(raw) = raw else {
            return Err(StoreError::NotFound {
                collection,
                id: id.to_string(),
            });
        };

        let mut document = decode_body(collection, id, &raw)?;
        apply(&mut document)?;
        let encoded = encode_body(collection, id, &document)?;
        tx.execute(
            "
            UPDATE documents SET body = ?3, updated_at = strftime('%s','now')
            WHERE collection = ?1 AND id = ?2
            ",
            params![collection.as_str(), id, encoded],
        )
        .map_err(|source| StoreError::Sql { source })?;
        tx.commit().map_err(|source| StoreError::Sql { source })?;
        Ok(document)
    }

    fn insert_unless(
        &self,
        collection: Collection,
        id: &str,
        body: &Value,
        conflict: &Filter,
    ) -> Result<Option<Value>, StoreError> {
        let raw = encode_body(collection, id, body)?;
        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Sql { source })?;

        if let Some(existing) = select_documents(&tx, collection, conflict)?.into_iter().next() {
            return Ok(Some(existing));
        }
        let inserted = tx
            .execute(
                "
                INSERT INTO documents (collection, id, body, updated_at)
                VALUES (?1, ?2, ?3, strftime('%s','now'))
                ON CONFLICT(collection, id) DO NOTHING
                ",
                params![collection.as_str(), id, raw],
            )
            .map_err(|source| StoreError::Sql { source })?;
        if inserted == 0 {
            return Err(StoreError::Duplicate {
                collection,
                id: id.to_string(),
            });
        }
        tx.commit().map_err(|source| StoreError::Sql { source })?;
        Ok(None)
    }

    fn remove(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let connection = self.connect()?;
        let removed = connection
            .execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id],
            )
            .map_err(|source| StoreError::Sql { source })?;
        Ok(removed > 0)
    }
}

fn select_documents(
    connection: &Connection,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<Value>, StoreError> {
    let mut sql = "SELECT id, body FROM documents WHERE collection = ?".to_string();
    let mut bound = vec![SqlValue::Text(collection.as_str().to_string())];
    for clause in &filter.clauses {
        match clause {
            Clause::Eq(field, Value::Null) => {
                sql.push_str(" AND json_extract(body, ?) IS NULL");
                bound.push(SqlValue::Text(json_path(field)?));
            }
            Clause::Eq(field, value) => {
                sql.push_str(" AND json_extract(body, ?) = ?");
                bound.push(SqlValue::Text(json_path(field)?));
                bound.push(sql_value(field, value)?);
            }
            Clause::OneOf(field, values) => {
                if values.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                sql.push_str(&format!(" AND json_extract(body, ?) IN ({placeholders})"));
                bound.push(SqlValue::Text(json_path(field)?));
                for value in values {
                    bound.push(sql_value(field, value)?);
                }
            }
        }
    }
    sql.push_str(" ORDER BY id ASC");

    let mut statement = connection
        .prepare(&sql)
        .map_err(|source| StoreError::Sql { source })?;
    let rows = statement
        .query_map(params_from_iter(bound), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|source| StoreError::Sql { source })?;

    let mut documents = Vec::new();
    for row in rows {
        let (id, raw) = row.map_err(|source| StoreError::Sql { source })?;
        documents.push(decode_body(collection, &id, &raw)?);
    }
    Ok(documents)
}

fn json_path(field: &str) -> Result<String, StoreError> {
    let valid = !field.is_empty()
        && field
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        return Err(StoreError::UnsupportedFilter {
            field: field.to_string(),
            reason: "field must be dotted identifiers".to_string(),
        });
    }
    Ok(format!("$.{field}"))
}

fn sql_value(field: &str, value: &Value) -> Result<SqlValue, StoreError> {
    match value {
        Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Ok(SqlValue::Integer(int))
            } else if let Some(float) = number.as_f64() {
                Ok(SqlValue::Real(float))
            } else {
                Err(StoreError::UnsupportedFilter {
                    field: field.to_string(),
                    reason: "number out of range".to_string(),
                })
            }
        }
        Value::String(text) => Ok(SqlValue::Text(text.clone())),
        Value::Null => Ok(SqlValue::Null),
        Value::Array(_) | Value::Object(_) => Err(StoreError::UnsupportedFilter {
            field: field.to_string(),
            reason: "only scalar equality is supported".to_string(),
        }),
    }
}

fn encode_body(collection: Collection, id: &str, body: &Value) -> Result<String, StoreError> {
    serde_json::to_string(body).map_err(|source| StoreError::Encode {
        collection,
        id: id.to_string(),
        source,
    })
}

fn decode_body(collection: Collection, id: &str, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Decode {
        collection,
        id: id.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> SqliteStore {
        SqliteStore::open(&dir.join("tensor.db"), Duration::from_secs(1)).expect("open store")
    }

    #[test]
    fn insert_find_and_remove_by_id() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        store
            .insert(Collection::Projects, "p1", &json!({"id": "p1", "name": "web"}))
            .expect("insert");

        let found = store
            .find_by_id(Collection::Projects, "p1")
            .expect("find")
            .expect("present");
        assert_eq!(found["name"], "web");
        assert!(store
            .find_by_id(Collection::Inventories, "p1")
            .expect("find other collection")
            .is_none());

        let dup = store
            .insert(Collection::Projects, "p1", &json!({"id": "p1"}))
            .expect_err("duplicate");
        assert!(matches!(dup, StoreError::Duplicate { .. }));

        assert!(store.remove(Collection::Projects, "p1").expect("remove"));
        assert!(!store.remove(Collection::Projects, "p1").expect("remove again"));
    }

    #[test]
    fn find_filters_on_strings_bools_and_nested_fields() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        store
            .insert(
                Collection::Jobs,
                "j1",
                &json!({"id": "j1", "status": "new", "failed": false, "meta": {"tpl": "t1"}}),
            )
            .expect("insert j1");
        store
            .insert(
                Collection::Jobs,
                "j2",
                &json!({"id": "j2", "status": "running", "failed": false, "meta": {"tpl": "t1"}}),
            )
            .expect("insert j2");
        store
            .insert(
                Collection::Jobs,
                "j3",
                &json!({"id": "j3", "status": "failed", "failed": true, "meta": {"tpl": "t2"}}),
            )
            .expect("insert j3");

        let active = store
            .find(
                Collection::Jobs,
                &Filter::new()
                    .eq("meta.tpl", "t1")
                    .one_of("status", ["new", "pending", "running"]),
            )
            .expect("find active");
        let ids: Vec<&str> = active.iter().filter_map(|doc| doc["id"].as_str()).collect();
        assert_eq!(ids, vec!["j1", "j2"]);

        let failed = store
            .find(Collection::Jobs, &Filter::new().eq("failed", true))
            .expect("find failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["id"], "j3");

        let none = store
            .find(Collection::Jobs, &Filter::new().one_of::<&str>("status", []))
            .expect("empty one_of");
        assert!(none.is_empty());
    }

    #[test]
    fn filter_rejects_injection_shaped_field_names() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let err = store
            .find(Collection::Jobs, &Filter::new().eq("status') OR 1=1 --", "x"))
            .expect_err("invalid field");
        assert!(matches!(err, StoreError::UnsupportedFilter { .. }));
    }

    #[test]
    fn modify_is_atomic_and_rejection_keeps_original() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        store
            .insert(Collection::Jobs, "j1", &json!({"id": "j1", "status": "new"}))
            .expect("insert");

        let updated = store
            .modify(Collection::Jobs, "j1", &mut |doc| {
                doc["status"] = json!("pending");
                Ok(())
            })
            .expect("modify");
        assert_eq!(updated["status"], "pending");

        let err = store
            .modify(Collection::Jobs, "j1", &mut |doc| {
                doc["status"] = json!("bogus");
                Err(StoreError::Rejected("not allowed".to_string()))
            })
            .expect_err("rejected");
        assert!(matches!(err, StoreError::Rejected(_)));
        let stored = store
            .find_by_id(Collection::Jobs, "j1")
            .expect("find")
            .expect("present");
        assert_eq!(stored["status"], "pending");

        let missing = store
            .modify(Collection::Jobs, "nope", &mut |_| Ok(()))
            .expect_err("missing");
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }

    #[test]
    fn insert_unless_skips_when_a_conflict_exists() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let active = Filter::new()
            .eq("template_id", "t1")
            .one_of("status", ["new", "pending", "running"]);

        let first = store
            .insert_unless(
                Collection::Jobs,
                "j1",
                &json!({"id": "j1", "template_id": "t1", "status": "new"}),
                &active,
            )
            .expect("first insert");
        assert!(first.is_none());

        let blocked = store
            .insert_unless(
                Collection::Jobs,
                "j2",
                &json!({"id": "j2", "template_id": "t1", "status": "new"}),
                &active,
            )
            .expect("second insert")
            .expect("conflict reported");
        assert_eq!(blocked["id"], "j1");
        assert!(store
            .find_by_id(Collection::Jobs, "j2")
            .expect("find")
            .is_none());

        let other_template = store
            .insert_unless(
                Collection::Jobs,
                "j3",
                &json!({"id": "j3", "template_id": "t2", "status": "new"}),
                &active,
            )
            .expect("other template");
        assert!(other_template.is_none());
    }

    #[test]
    fn concurrent_conditional_inserts_admit_one_writer() {
        let dir = tempdir().expect("tempdir");
        let store = std::sync::Arc::new(open_store(dir.path()));
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|index| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let id = format!("j{index}");
                    barrier.wait();
                    store
                        .insert_unless(
                            Collection::Jobs,
                            &id,
                            &json!({"id": id, "template_id": "t1", "status": "new"}),
                            &Filter::new().eq("template_id", "t1").eq("status", "new"),
                        )
                        .expect("insert_unless")
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(Option::is_none)
            .count();
        assert_eq!(admitted, 1);
        let stored = store
            .find(Collection::Jobs, &Filter::new().eq("template_id", "t1"))
            .expect("find");
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn replace_requires_existing_document() {
        let dir = tempdir().expect("tempdir");
        let store = open_store(dir.path());
        let err = store
            .replace(Collection::Teams, "t1", &json!({"id": "t1"}))
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
