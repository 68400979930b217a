//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::entry::{CachedEntry, RequestKey, StoredResponse};

/// Trait for cache storage backends.
///
/// Every method is atomic on its own. Writes replace any existing entry under
/// the same key wholesale.
pub trait CacheStorage: Send + Sync {
  /// Names of all existing generations, oldest first.
  fn generations(&self) -> Result<Vec<String>>;

  /// Store one entry, creating the generation if needed.
  fn put(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()>;

  /// Store a batch of entries atomically: either all of them land or none do.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, StoredResponse)]) -> Result<()>;

  /// Look up one entry in one generation.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Keys stored in a generation.
  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>>;

  /// Remove a generation and all of its entries. Returns whether it existed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Recorded lifecycle states, keyed by shell generation name.
  fn lifecycle_states(&self) -> Result<Vec<(String, String)>>;

  /// Record the lifecycle state of the version owning `generation`.
  fn record_lifecycle(&self, generation: &str, state: &str) -> Result<()>;

  /// Look up a key across all generations, oldest generation first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    for generation in self.generations()? {
      if let Some(entry) = self.get(&generation, key)? {
        return Ok(Some(entry));
      }
    }
    Ok(None)
  }
}

/// In-memory storage for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
  inner: Mutex<MemoryInner>,
}

#[cfg(test)]
#[derive(Default)]
struct MemoryInner {
  generations: Vec<(String, std::collections::BTreeMap<RequestKey, CachedEntry>)>,
  lifecycle: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[cfg(test)]
impl MemoryInner {
  fn generation_mut(
    &mut self,
    name: &str,
  ) -> &mut std::collections::BTreeMap<RequestKey, CachedEntry> {
    let index = match self.generations.iter().position(|(n, _)| n == name) {
      Some(index) => index,
      None => {
        self.generations.push((name.to_string(), Default::default()));
        self.generations.len() - 1
      }
    };
    &mut self.generations[index].1
  }
}

#[cfg(test)]
impl CacheStorage for MemoryStorage {
  fn generations(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.generations.iter().map(|(n, _)| n.clone()).collect())
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    self.put_all(generation, &[(key.clone(), response.clone())])
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, StoredResponse)]) -> Result<()> {
    if entries.is_empty() {
      return Ok(());
    }
    let mut inner = self.lock()?;
    let store = inner.generation_mut(generation);
    for (key, response) in entries {
      store.insert(
        key.clone(),
        CachedEntry {
          generation: generation.to_string(),
          response: response.clone(),
          cached_at: Utc::now(),
        },
      );
    }
    Ok(())
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .lock()?
        .generations
        .iter()
        .find(|(n, _)| n == generation)
        .and_then(|(_, store)| store.get(key).cloned()),
    )
  }

  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
    Ok(
      self
        .lock()?
        .generations
        .iter()
        .find(|(n, _)| n == generation)
        .map(|(_, store)| store.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut inner = self.lock()?;
    let before = inner.generations.len();
    inner.generations.retain(|(n, _)| n != generation);
    Ok(inner.generations.len() != before)
  }

  fn lifecycle_states(&self) -> Result<Vec<(String, String)>> {
    Ok(
      self
        .lock()?
        .lifecycle
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  fn record_lifecycle(&self, generation: &str, state: &str) -> Result<()> {
    self
      .lock()?
      .lifecycle
      .insert(generation.to_string(), state.to_string());
    Ok(())
  }
}

/// Storage whose every operation fails, for exercising degraded paths.
#[cfg(test)]
pub struct BrokenStorage;

#[cfg(test)]
impl CacheStorage for BrokenStorage {
  fn generations(&self) -> Result<Vec<String>> {
    Err(eyre!("disk on fire"))
  }
  fn put(&self, _: &str, _: &RequestKey, _: &StoredResponse) -> Result<()> {
    Err(eyre!("disk on fire"))
  }
  fn put_all(&self, _: &str, _: &[(RequestKey, StoredResponse)]) -> Result<()> {
    Err(eyre!("disk on fire"))
  }
  fn get(&self, _: &str, _: &RequestKey) -> Result<Option<CachedEntry>> {
    Err(eyre!("disk on fire"))
  }
  fn keys(&self, _: &str) -> Result<Vec<RequestKey>> {
    Err(eyre!("disk on fire"))
  }
  fn delete_generation(&self, _: &str) -> Result<bool> {
    Err(eyre!("disk on fire"))
  }
  fn lifecycle_states(&self) -> Result<Vec<(String, String)>> {
    Err(eyre!("disk on fire"))
  }
  fn record_lifecycle(&self, _: &str, _: &str) -> Result<()> {
    Err(eyre!("disk on fire"))
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Generations in creation order (rowid)
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One stored response per (generation, request key)
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key_hash);

-- Controller version lifecycle, keyed by shell generation name
CREATE TABLE IF NOT EXISTS lifecycle (
    generation TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &RequestKey,
  response: &StoredResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (generation, key_hash, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        key.cache_hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key, generation, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation: {}", e))?;

    Ok(names)
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &StoredResponse) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_entry(&tx, generation, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, StoredResponse)]) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // Dropping the transaction on error rolls back every insert
    for (key, response) in entries {
      insert_entry(&tx, generation, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE generation = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, generation, e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntry {
          generation: generation.to_string(),
          response: StoredResponse {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE generation = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![generation], |row| {
        Ok(RequestKey::from_parts(row.get(0)?, row.get(1)?))
      })
      .map_err(|e| eyre!("Failed to list keys of {}: {}", generation, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", generation, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![generation])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn lifecycle_states(&self) -> Result<Vec<(String, String)>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT generation, state FROM lifecycle ORDER BY generation")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let states = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to read lifecycle: {}", e))?
      .collect::<rusqlite::Result<Vec<(String, String)>>>()
      .map_err(|e| eyre!("Failed to read lifecycle row: {}", e))?;

    Ok(states)
  }

  fn record_lifecycle(&self, generation: &str, state: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO lifecycle (generation, state, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![generation, state],
      )
      .map_err(|e| eyre!("Failed to record lifecycle of {}: {}", generation, e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse(&format!("https://example.com{}", path)).unwrap())
  }

  fn stored(body: &str) -> StoredResponse {
    StoredResponse {
      status: 200,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  fn backends() -> Vec<Box<dyn Fn() -> Box<dyn CacheStorage>>> {
    vec![
      Box::new(|| -> Box<dyn CacheStorage> { Box::new(MemoryStorage::new()) }),
      Box::new(|| -> Box<dyn CacheStorage> { Box::new(SqliteStorage::open_in_memory().unwrap()) }),
    ]
  }

  #[test]
  fn test_put_replaces_entry() {
    for make in backends() {
      let storage = make();
      storage.put("shell-v1", &key("/a"), &stored("first")).unwrap();
      storage.put("shell-v1", &key("/a"), &stored("second")).unwrap();

      let entry = storage.get("shell-v1", &key("/a")).unwrap().unwrap();
      assert_eq!(entry.response.body, b"second");
      assert_eq!(storage.keys("shell-v1").unwrap().len(), 1);
    }
  }

  #[test]
  fn test_generations_listed_in_creation_order() {
    for make in backends() {
      let storage = make();
      storage.put("b-gen", &key("/x"), &stored("x")).unwrap();
      storage.put("a-gen", &key("/y"), &stored("y")).unwrap();
      assert_eq!(storage.generations().unwrap(), vec!["b-gen", "a-gen"]);
    }
  }

  #[test]
  fn test_match_any_prefers_oldest_generation() {
    for make in backends() {
      let storage = make();
      storage.put("old", &key("/a"), &stored("old")).unwrap();
      storage.put("new", &key("/a"), &stored("new")).unwrap();

      let entry = storage.match_any(&key("/a")).unwrap().unwrap();
      assert_eq!(entry.generation, "old");
      assert!(storage.match_any(&key("/missing")).unwrap().is_none());
    }
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    for make in backends() {
      let storage = make();
      storage.put("gone", &key("/a"), &stored("a")).unwrap();
      storage.put("kept", &key("/b"), &stored("b")).unwrap();

      assert!(storage.delete_generation("gone").unwrap());
      assert!(!storage.delete_generation("gone").unwrap());
      assert_eq!(storage.generations().unwrap(), vec!["kept"]);
      assert!(storage.match_any(&key("/a")).unwrap().is_none());
    }
  }

  #[test]
  fn test_lifecycle_is_recorded_per_generation() {
    for make in backends() {
      let storage = make();
      storage.record_lifecycle("shell-v1", "installed").unwrap();
      storage.record_lifecycle("shell-v1", "active").unwrap();
      storage.record_lifecycle("shell-v2", "redundant").unwrap();

      let states = storage.lifecycle_states().unwrap();
      assert_eq!(
        states,
        vec![
          ("shell-v1".to_string(), "active".to_string()),
          ("shell-v2".to_string(), "redundant".to_string()),
        ]
      );
      // Lifecycle rows are not generations
      assert!(storage.generations().unwrap().is_empty());
    }
  }

  #[test]
  fn test_sqlite_round_trips_headers() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("shell-v1", &key("/a"), &stored("a")).unwrap();

    let entry = storage.get("shell-v1", &key("/a")).unwrap().unwrap();
    assert_eq!(entry.response, stored("a"));
    assert_eq!(storage.keys("shell-v1").unwrap(), vec![key("/a")]);
  }
}
