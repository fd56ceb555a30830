use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use crate::error::{StoreError, SyncError};
use crate::merge::UpdateSet;
use crate::script::functions::FunctionDef;

pub type Extension = BTreeMap<String, Value>;

/// One stored card. `extension` holds fields owned by other writers
/// (cached card info, prices, ...) and is never touched by a sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardDocument {
    pub id: i64,
    pub name_local: Option<String>,
    pub name_alt: Option<String>,
    pub raw_text: Option<String>,
    pub functions: BTreeMap<String, FunctionDef>,
    pub meta: Option<Value>,
    pub extension: Extension,
}

/// Keyed card collection the pipelines read and write through.
pub trait DocumentStore {
    /// Declare the unique key on `id`. Safe to call any number of times.
    fn ensure_unique_key(&self) -> Result<(), StoreError>;

    fn find_card(&self, id: i64) -> Result<Option<CardDocument>, StoreError>;

    /// Insert or partially update: only fields present in `update` are written.
    fn upsert_fields(&self, id: i64, update: &UpdateSet) -> Result<(), StoreError>;

    fn find_cards(&self, ids: &[i64]) -> Result<Vec<CardDocument>, StoreError>;

    /// Merge keys into the extension map of an existing card.
    /// Returns false when no card with `id` exists.
    fn merge_extension(&self, id: i64, fields: &Extension) -> Result<bool, StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
}

pub fn connect(path: &Path) -> Result<SqliteStore, SyncError> {
    let open = || -> Result<Connection, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    };
    let conn = open().map_err(|source| SyncError::Connection {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(SqliteStore { conn })
}

impl SqliteStore {
    #[cfg(test)]
    pub fn in_memory() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        let store = SqliteStore { conn };
        store.init_schema().unwrap();
        store
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cards (
                id          INTEGER PRIMARY KEY,
                name_local  TEXT,
                name_alt    TEXT,
                raw_text    TEXT,
                meta        TEXT,
                extension   TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at  TEXT
            );

            CREATE TABLE IF NOT EXISTS card_functions (
                id          INTEGER PRIMARY KEY,
                card_id     INTEGER NOT NULL REFERENCES cards(id),
                name        TEXT NOT NULL,
                parameters  TEXT NOT NULL,
                body        TEXT NOT NULL,
                UNIQUE(card_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_functions_card ON card_functions(card_id);

            CREATE TABLE IF NOT EXISTS sync_runs (
                id           INTEGER PRIMARY KEY,
                started_at   TEXT NOT NULL,
                finished_at  TEXT NOT NULL,
                source       TEXT NOT NULL,
                inserted     INTEGER NOT NULL,
                updated      INTEGER NOT NULL,
                skipped      INTEGER NOT NULL,
                errors       INTEGER NOT NULL
            );
            ",
        )?;
        self.ensure_unique_key()
    }

    // ── Runs ──

    pub fn record_run(&self, run: &RunRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO sync_runs (started_at, finished_at, source, inserted, updated, skipped, errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.started_at, run.finished_at, run.source,
                run.inserted, run.updated, run.skipped, run.errors,
            ],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT started_at, finished_at, source, inserted, updated, skipped, errors
             FROM sync_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(RunRow {
                    started_at: row.get(0)?,
                    finished_at: row.get(1)?,
                    source: row.get(2)?,
                    inserted: row.get(3)?,
                    updated: row.get(4)?,
                    skipped: row.get(5)?,
                    errors: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Stats ──

    pub fn get_stats(&self) -> Result<Stats, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
        };
        Ok(Stats {
            cards: count("SELECT COUNT(*) FROM cards")?,
            named: count("SELECT COUNT(*) FROM cards WHERE COALESCE(name_alt, '') != ''")?,
            functions: count("SELECT COUNT(*) FROM card_functions")?,
            enriched: count("SELECT COUNT(*) FROM cards WHERE extension != '{}'")?,
            runs: count("SELECT COUNT(*) FROM sync_runs")?,
        })
    }

    fn load_functions(&self, id: i64) -> Result<BTreeMap<String, FunctionDef>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, parameters, body FROM card_functions WHERE card_id = ?1")?;
        let rows = stmt
            .query_map([id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut functions = BTreeMap::new();
        for (name, parameters, body) in rows {
            let parameters: Vec<String> = serde_json::from_str(&parameters)?;
            functions.insert(name, FunctionDef { parameters, body });
        }
        Ok(functions)
    }
}

const CARD_COLUMNS: &str = "id, name_local, name_alt, raw_text, meta, extension";

struct CardRow {
    id: i64,
    name_local: Option<String>,
    name_alt: Option<String>,
    raw_text: Option<String>,
    meta: Option<String>,
    extension: String,
}

fn read_card_row(row: &rusqlite::Row) -> rusqlite::Result<CardRow> {
    Ok(CardRow {
        id: row.get(0)?,
        name_local: row.get(1)?,
        name_alt: row.get(2)?,
        raw_text: row.get(3)?,
        meta: row.get(4)?,
        extension: row.get(5)?,
    })
}

impl CardRow {
    fn into_document(
        self,
        functions: BTreeMap<String, FunctionDef>,
    ) -> Result<CardDocument, StoreError> {
        let meta = self.meta.as_deref().map(serde_json::from_str).transpose()?;
        Ok(CardDocument {
            id: self.id,
            name_local: self.name_local,
            name_alt: self.name_alt,
            raw_text: self.raw_text,
            functions,
            meta,
            extension: serde_json::from_str(&self.extension)?,
        })
    }
}

impl DocumentStore for SqliteStore {
    fn ensure_unique_key(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch("CREATE UNIQUE INDEX IF NOT EXISTS idx_cards_id ON cards(id);")?;
        Ok(())
    }

    fn find_card(&self, id: i64) -> Result<Option<CardDocument>, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM cards WHERE id = ?1", CARD_COLUMNS),
                [id],
                read_card_row,
            )
            .optional()?;
        match row {
            Some(row) => {
                let functions = self.load_functions(id)?;
                Ok(Some(row.into_document(functions)?))
            }
            None => Ok(None),
        }
    }

    fn upsert_fields(&self, id: i64, update: &UpdateSet) -> Result<(), StoreError> {
        let mut columns = vec!["id"];
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(id)];

        if let Some(v) = &update.name_local {
            columns.push("name_local");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.name_alt {
            columns.push("name_alt");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.raw_text {
            columns.push("raw_text");
            values.push(Box::new(v.clone()));
        }
        if let Some(v) = &update.meta {
            columns.push("meta");
            values.push(Box::new(serde_json::to_string(v)?));
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let assignments: Vec<String> = columns[1..]
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .chain(std::iter::once("updated_at = datetime('now')".to_string()))
            .collect();
        let sql = format!(
            "INSERT INTO cards ({}) VALUES ({})
             ON CONFLICT(id) DO UPDATE SET {}",
            columns.join(", "),
            placeholders.join(", "),
            assignments.join(", "),
        );

        let tx = self.conn.unchecked_transaction()?;
        {
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|p| p.as_ref()).collect();
            tx.execute(&sql, param_refs.as_slice())?;

            let mut f_stmt = tx.prepare(
                "INSERT INTO card_functions (card_id, name, parameters, body)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(card_id, name) DO UPDATE SET
                    parameters = excluded.parameters,
                    body = excluded.body",
            )?;
            for (name, def) in &update.functions {
                f_stmt.execute(params![
                    id,
                    name,
                    serde_json::to_string(&def.parameters)?,
                    def.body,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn find_cards(&self, ids: &[i64]) -> Result<Vec<CardDocument>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM cards WHERE id IN ({}) ORDER BY id",
            CARD_COLUMNS,
            placeholders.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), read_card_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let functions = self.load_functions(row.id)?;
            docs.push(row.into_document(functions)?);
        }
        Ok(docs)
    }

    fn merge_extension(&self, id: i64, fields: &Extension) -> Result<bool, StoreError> {
        let current: Option<String> = self
            .conn
            .query_row("SELECT extension FROM cards WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };

        let mut merged: Extension = serde_json::from_str(&current)?;
        merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.conn.execute(
            "UPDATE cards SET extension = ?1 WHERE id = ?2",
            params![serde_json::to_string(&merged)?, id],
        )?;
        Ok(true)
    }
}

// ── Runs / stats rows ──

pub struct RunRow {
    pub started_at: String,
    pub finished_at: String,
    pub source: String,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct Stats {
    pub cards: usize,
    pub named: usize,
    pub functions: usize,
    pub enriched: usize,
    pub runs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_with(name: &str) -> UpdateSet {
        let mut update = UpdateSet {
            name_local: Some(name.to_string()),
            raw_text: Some("--x".to_string()),
            meta: Some(serde_json::json!({"has_count_limit": true})),
            ..Default::default()
        };
        update.functions.insert(
            "target".to_string(),
            FunctionDef { parameters: vec!["e".into(), "tp".into()], body: "return true".into() },
        );
        update
    }

    #[test]
    fn connect_reports_unusable_parent_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("data");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = match connect(&blocker.join("cards.sqlite")) {
            Err(e) => e,
            Ok(_) => panic!("store opened under a regular file"),
        };
        assert!(matches!(
            err,
            SyncError::Connection { source: StoreError::Io(_), .. }
        ));

        let store = connect(&tmp.path().join("nested/dir/cards.sqlite")).unwrap();
        store.init_schema().unwrap();
    }

    #[test]
    fn schema_setup_is_repeatable() {
        let store = SqliteStore::in_memory();
        store.init_schema().unwrap();
        store.ensure_unique_key().unwrap();
        store.ensure_unique_key().unwrap();
    }

    #[test]
    fn upsert_then_read_back() {
        let store = SqliteStore::in_memory();
        assert!(store.find_card(7).unwrap().is_none());

        store.upsert_fields(7, &update_with("Seven")).unwrap();
        let doc = store.find_card(7).unwrap().unwrap();
        assert_eq!(doc.name_local.as_deref(), Some("Seven"));
        assert_eq!(doc.name_alt, None);
        assert_eq!(doc.functions["target"].parameters, vec!["e", "tp"]);
        assert_eq!(doc.meta, Some(serde_json::json!({"has_count_limit": true})));
        assert!(doc.extension.is_empty());
    }

    #[test]
    fn partial_update_leaves_other_columns() {
        let store = SqliteStore::in_memory();
        store.upsert_fields(7, &update_with("Seven")).unwrap();

        let only_alt = UpdateSet { name_alt: Some("Alt".into()), ..Default::default() };
        store.upsert_fields(7, &only_alt).unwrap();

        let doc = store.find_card(7).unwrap().unwrap();
        assert_eq!(doc.name_local.as_deref(), Some("Seven"));
        assert_eq!(doc.name_alt.as_deref(), Some("Alt"));
        assert_eq!(doc.raw_text.as_deref(), Some("--x"));
        assert!(doc.functions.contains_key("target"));
    }

    #[test]
    fn extension_merge_requires_existing_card() {
        let store = SqliteStore::in_memory();
        let mut fields = Extension::new();
        fields.insert("price".into(), serde_json::json!(1.5));

        assert!(!store.merge_extension(9, &fields).unwrap());
        assert!(store.find_card(9).unwrap().is_none());

        store.upsert_fields(9, &update_with("Nine")).unwrap();
        assert!(store.merge_extension(9, &fields).unwrap());

        let mut more = Extension::new();
        more.insert("image".into(), serde_json::json!("https://img/9.jpg"));
        store.merge_extension(9, &more).unwrap();

        let doc = store.find_card(9).unwrap().unwrap();
        assert_eq!(doc.extension["price"], serde_json::json!(1.5));
        assert_eq!(doc.extension["image"], serde_json::json!("https://img/9.jpg"));
    }

    #[test]
    fn batch_lookup_skips_missing_ids() {
        let store = SqliteStore::in_memory();
        store.upsert_fields(3, &update_with("Three")).unwrap();
        store.upsert_fields(1, &update_with("One")).unwrap();

        let docs = store.find_cards(&[3, 2, 1, 3]).unwrap();
        let ids: Vec<i64> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(store.find_cards(&[]).unwrap().is_empty());
    }

    #[test]
    fn runs_and_stats() {
        let store = SqliteStore::in_memory();
        store.upsert_fields(1, &update_with("One")).unwrap();
        store
            .record_run(&RunRow {
                started_at: "2026-01-01T00:00:00Z".into(),
                finished_at: "2026-01-01T00:01:00Z".into(),
                source: "CardScripts/official".into(),
                inserted: 1,
                updated: 0,
                skipped: 2,
                errors: 0,
            })
            .unwrap();

        let runs = store.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].skipped, 2);

        let s = store.get_stats().unwrap();
        assert_eq!(s.cards, 1);
        assert_eq!(s.named, 0);
        assert_eq!(s.functions, 1);
        assert_eq!(s.enriched, 0);
        assert_eq!(s.runs, 1);
    }
}
