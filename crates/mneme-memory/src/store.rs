use chrono::{DateTime, SecondsFormat, Utc};
use mneme_core::{AgentId, Category, MemoryId, MnemeError, Result, Tier};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entry::{EntryUpdate, MemoryEntry, clamp_unit, now};

/// Durable record store for memory entries. Pure persistence, no policy.
///
/// Entries are independent rows: every method is atomic for the row(s) it
/// touches and nothing spans several entries transactionally.
pub trait RecordStore: Send + Sync {
    /// Persist a new entry. Rejects invalid entries with `InvalidEntry`.
    fn put(&self, entry: &MemoryEntry) -> Result<MemoryId>;

    /// Fetch one entry, or `NotFound`.
    fn get(&self, id: MemoryId) -> Result<MemoryEntry>;

    /// Entries matching `filter`, ordered by importance desc then `created_at` desc.
    fn query(&self, filter: &MemoryFilter) -> Result<Vec<MemoryEntry>>;

    /// Physically remove an entry, or `NotFound`.
    fn delete(&self, id: MemoryId) -> Result<()>;

    /// Single-row read-modify-write of the mutable bookkeeping fields.
    fn update_importance_and_access(&self, id: MemoryId, update: &EntryUpdate) -> Result<()>;

    /// Up to `limit` entries created before `created_before`, ordered by id and
    /// starting after `after`. Used to walk the store in bounded batches.
    fn scan_batch(
        &self,
        created_before: DateTime<Utc>,
        after: Option<MemoryId>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;

    /// Per-tier counts and average importance for one agent.
    fn stats(&self, owner: &str) -> Result<MemoryStats>;

    /// Agents that own at least one memory.
    fn owners(&self) -> Result<Vec<AgentId>>;

    /// Resolve `related_memory_ids`, skipping targets that no longer exist.
    fn related(&self, entry: &MemoryEntry) -> Result<Vec<MemoryEntry>> {
        let mut out = Vec::with_capacity(entry.related_memory_ids.len());
        for id in &entry.related_memory_ids {
            match self.get(*id) {
                Ok(related) => out.push(related),
                Err(MnemeError::NotFound(_)) => {
                    debug!(memory_id = %entry.id, related_id = %id, "related memory no longer exists");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

/// Selection criteria for [`RecordStore::query`]. Unset fields don't filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    pub owner_agent_id: Option<AgentId>,
    pub tier: Option<Tier>,
    pub category: Option<Category>,
    /// Matches entries carrying at least one of these tags.
    pub tags_any: Vec<String>,
    /// Matches entries whose content contains any of the query words,
    /// case-insensitively for any script.
    pub text: Option<String>,
    /// OR the tag and text criteria together instead of AND.
    pub match_any: bool,
    /// Inclusive lower bound on importance.
    pub min_importance: Option<f64>,
    /// Exclusive upper bound on importance.
    pub max_importance: Option<f64>,
    pub created_before: Option<DateTime<Utc>>,
    /// Matches entries that link to this memory.
    pub related_to: Option<MemoryId>,
    pub limit: Option<usize>,
}

impl MemoryFilter {
    pub fn for_owner(owner: impl Into<AgentId>) -> Self {
        Self {
            owner_agent_id: Some(owner.into()),
            ..Self::default()
        }
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags_any.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn match_any(mut self) -> Self {
        self.match_any = true;
        self
    }

    pub fn min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn max_importance(mut self, max: f64) -> Self {
        self.max_importance = Some(max);
        self
    }

    pub fn related_to(mut self, id: MemoryId) -> Self {
        self.related_to = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Memory statistics for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub owner_agent_id: AgentId,
    pub working: usize,
    pub episodic: usize,
    pub semantic: usize,
    pub total: usize,
    pub average_importance: f64,
}

/// Split free text into lowercase search words, skipping one-letter noise.
/// Falls back to the whole trimmed string when every word is that short.
pub(crate) fn search_terms(text: &str) -> Vec<String> {
    let lower = text.trim().to_lowercase();
    let words: Vec<String> = lower
        .split_whitespace()
        .filter(|w| w.chars().count() >= 2)
        .map(String::from)
        .collect();
    if words.is_empty() && !lower.is_empty() {
        return vec![lower];
    }
    words
}

/// SQLite's LOWER and LIKE only fold ASCII, so words are matched here.
fn mentions_any(content: &str, terms: &[String]) -> bool {
    let content = content.to_lowercase();
    terms.iter().any(|t| content.contains(t.as_str()))
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MnemeError::invalid(field, format!("bad timestamp '{raw}': {e}")))
}

fn unavailable(e: rusqlite::Error) -> MnemeError {
    MnemeError::StoreUnavailable(e.to_string())
}

const COLUMNS: &str = "id, owner_agent_id, tier, category, content, context, tags, importance, \
     confidence, access_count, created_at, accessed_at, last_consolidated_at, related_memory_ids";

/// Column values as stored, before conversion into a [`MemoryEntry`].
struct RawRow {
    id: String,
    owner_agent_id: String,
    tier: String,
    category: String,
    content: String,
    context: String,
    tags: String,
    importance: f64,
    confidence: f64,
    access_count: i64,
    created_at: String,
    accessed_at: String,
    last_consolidated_at: Option<String>,
    related_memory_ids: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_agent_id: row.get(1)?,
            tier: row.get(2)?,
            category: row.get(3)?,
            content: row.get(4)?,
            context: row.get(5)?,
            tags: row.get(6)?,
            importance: row.get(7)?,
            confidence: row.get(8)?,
            access_count: row.get(9)?,
            created_at: row.get(10)?,
            accessed_at: row.get(11)?,
            last_consolidated_at: row.get(12)?,
            related_memory_ids: row.get(13)?,
        })
    }

    fn into_entry(self) -> Result<MemoryEntry> {
        let id = self
            .id
            .parse::<Uuid>()
            .map_err(|e| MnemeError::invalid("id", e.to_string()))?;
        let tags: BTreeSet<String> = serde_json::from_str(&self.tags)?;
        let related_memory_ids: BTreeSet<MemoryId> = serde_json::from_str(&self.related_memory_ids)?;
        let last_consolidated_at = self
            .last_consolidated_at
            .as_deref()
            .map(|raw| parse_ts("last_consolidated_at", raw))
            .transpose()?;

        Ok(MemoryEntry {
            id,
            owner_agent_id: self.owner_agent_id,
            tier: self.tier.parse()?,
            category: self.category.parse()?,
            content: self.content,
            context: serde_json::from_str(&self.context)?,
            tags,
            importance: self.importance,
            confidence: self.confidence,
            access_count: self.access_count.max(0) as u64,
            created_at: parse_ts("created_at", &self.created_at)?,
            accessed_at: parse_ts("accessed_at", &self.accessed_at)?,
            last_consolidated_at,
            related_memory_ids,
        })
    }
}

/// Convert fetched rows, dropping (and logging) any that fail to decode.
fn decode_rows(rows: Vec<RawRow>) -> Vec<MemoryEntry> {
    rows.into_iter()
        .filter_map(|raw| {
            let id = raw.id.clone();
            match raw.into_entry() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(memory_id = %id, error = %e, "skipping undecodable memory row");
                    None
                }
            }
        })
        .collect()
}

/// SQLite-backed record store.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the memory database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening memory store");

        let conn = Connection::open(path).map_err(unavailable)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(unavailable)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                owner_agent_id TEXT NOT NULL,
                tier TEXT NOT NULL,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                context TEXT NOT NULL DEFAULT 'null',
                tags TEXT NOT NULL DEFAULT '[]',
                importance REAL NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                accessed_at TEXT NOT NULL,
                last_consolidated_at TEXT,
                related_memory_ids TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_memories_owner ON memories(owner_agent_id, tier, category);
            CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
            CREATE INDEX IF NOT EXISTS idx_memories_importance ON memories(importance);
            ",
        )
        .map_err(unavailable)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Total number of stored entries across all agents.
    pub fn count(&self) -> Result<usize> {
        let db = self.db.lock();
        let n: i64 = db
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(n as usize)
    }

    fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<MemoryEntry>> {
        let rows: Vec<RawRow> = {
            let db = self.db.lock();
            let mut stmt = db.prepare(sql).map_err(unavailable)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), RawRow::from_row)
                .map_err(unavailable)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(unavailable)?;
            rows
        };
        Ok(decode_rows(rows))
    }
}

impl RecordStore for SqliteStore {
    fn put(&self, entry: &MemoryEntry) -> Result<MemoryId> {
        entry.validate()?;

        let tags_json = serde_json::to_string(&entry.tags)?;
        let related_json = serde_json::to_string(&entry.related_memory_ids)?;
        let context_json = serde_json::to_string(&entry.context)?;

        let db = self.db.lock();
        db.execute(
            &format!("INSERT INTO memories ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"),
            rusqlite::params![
                entry.id.to_string(),
                &entry.owner_agent_id,
                entry.tier.as_str(),
                entry.category.as_str(),
                &entry.content,
                context_json,
                tags_json,
                entry.importance,
                entry.confidence,
                entry.access_count as i64,
                ts(&entry.created_at),
                ts(&entry.accessed_at),
                entry.last_consolidated_at.as_ref().map(ts),
                related_json,
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                MnemeError::invalid("id", format!("{} already exists", entry.id))
            }
            _ => unavailable(e),
        })?;

        debug!(
            memory_id = %entry.id,
            owner = %entry.owner_agent_id,
            tier = %entry.tier,
            category = %entry.category,
            importance = entry.importance,
            "stored memory"
        );
        Ok(entry.id)
    }

    fn get(&self, id: MemoryId) -> Result<MemoryEntry> {
        let raw = {
            let db = self.db.lock();
            let raw = db
                .query_row(
                    &format!("SELECT {COLUMNS} FROM memories WHERE id = ?1"),
                    rusqlite::params![id.to_string()],
                    RawRow::from_row,
                )
                .optional()
                .map_err(unavailable)?;
            raw
        };
        raw.ok_or(MnemeError::NotFound(id))?.into_entry()
    }

    fn query(&self, filter: &MemoryFilter) -> Result<Vec<MemoryEntry>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(ref owner) = filter.owner_agent_id {
            clauses.push("owner_agent_id = ?".into());
            params.push(SqlValue::Text(owner.clone()));
        }
        if let Some(tier) = filter.tier {
            clauses.push("tier = ?".into());
            params.push(SqlValue::Text(tier.as_str().into()));
        }
        if let Some(category) = filter.category {
            clauses.push("category = ?".into());
            params.push(SqlValue::Text(category.as_str().into()));
        }
        if let Some(min) = filter.min_importance {
            clauses.push("importance >= ?".into());
            params.push(SqlValue::Real(min));
        }
        if let Some(max) = filter.max_importance {
            clauses.push("importance < ?".into());
            params.push(SqlValue::Real(max));
        }
        if let Some(ref before) = filter.created_before {
            clauses.push("created_at < ?".into());
            params.push(SqlValue::Text(ts(before)));
        }

        if let Some(related) = filter.related_to {
            clauses.push(
                "EXISTS (SELECT 1 FROM json_each(memories.related_memory_ids) WHERE json_each.value = ?)"
                    .into(),
            );
            params.push(SqlValue::Text(related.to_string()));
        }

        // Text relevance is checked after the fetch. The tag clause stays in
        // SQL unless it is OR'd with text.
        let terms = filter.text.as_deref().map(search_terms).unwrap_or_default();
        let tags_in_sql = terms.is_empty() || !filter.match_any;
        if tags_in_sql && !filter.tags_any.is_empty() {
            let placeholders = vec!["?"; filter.tags_any.len()].join(", ");
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value IN ({placeholders}))"
            ));
            params.extend(filter.tags_any.iter().cloned().map(SqlValue::Text));
        }

        let mut sql = format!("SELECT {COLUMNS} FROM memories");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY importance DESC, created_at DESC");
        if terms.is_empty() {
            if let Some(limit) = filter.limit {
                sql.push_str(" LIMIT ?");
                params.push(SqlValue::Integer(limit as i64));
            }
            return self.fetch(&sql, &params);
        }

        let mut entries: Vec<MemoryEntry> = self
            .fetch(&sql, &params)?
            .into_iter()
            .filter(|e| {
                mentions_any(&e.content, &terms)
                    || (!tags_in_sql && e.has_any_tag(&filter.tags_any))
            })
            .collect();
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn delete(&self, id: MemoryId) -> Result<()> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "DELETE FROM memories WHERE id = ?1",
                rusqlite::params![id.to_string()],
            )
            .map_err(unavailable)?;
        if rows == 0 {
            return Err(MnemeError::NotFound(id));
        }
        debug!(memory_id = %id, "deleted memory");
        Ok(())
    }

    fn update_importance_and_access(&self, id: MemoryId, update: &EntryUpdate) -> Result<()> {
        let importance = update.importance.map(clamp_unit);
        let touch: i64 = if update.touch_access { 1 } else { 0 };
        let db = self.db.lock();
        let rows = db
            .execute(
                "UPDATE memories SET
                    importance = COALESCE(?2, importance),
                    access_count = access_count + ?3,
                    accessed_at = CASE WHEN ?3 > 0 THEN ?4 ELSE accessed_at END,
                    last_consolidated_at = COALESCE(?5, last_consolidated_at)
                 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    importance,
                    touch,
                    ts(&now()),
                    update.consolidated_at.as_ref().map(ts),
                ],
            )
            .map_err(unavailable)?;
        if rows == 0 {
            return Err(MnemeError::NotFound(id));
        }
        Ok(())
    }

    fn scan_batch(
        &self,
        created_before: DateTime<Utc>,
        after: Option<MemoryId>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        self.fetch(
            &format!(
                "SELECT {COLUMNS} FROM memories
                 WHERE created_at < ? AND (? IS NULL OR id > ?)
                 ORDER BY id LIMIT ?"
            ),
            &[
                SqlValue::Text(ts(&created_before)),
                after.map_or(SqlValue::Null, |id| SqlValue::Text(id.to_string())),
                after.map_or(SqlValue::Null, |id| SqlValue::Text(id.to_string())),
                SqlValue::Integer(limit as i64),
            ],
        )
    }

    fn stats(&self, owner: &str) -> Result<MemoryStats> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT tier, COUNT(*) FROM memories WHERE owner_agent_id = ?1 GROUP BY tier",
            )
            .map_err(unavailable)?;
        let counts = stmt
            .query_map(rusqlite::params![owner], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;

        let mut stats = MemoryStats {
            owner_agent_id: owner.to_string(),
            ..MemoryStats::default()
        };
        for (tier, count) in counts {
            let count = count as usize;
            match tier.parse::<Tier>() {
                Ok(Tier::Working) => stats.working = count,
                Ok(Tier::Episodic) => stats.episodic = count,
                Ok(Tier::Semantic) => stats.semantic = count,
                Err(e) => warn!(owner, error = %e, "ignoring rows with unknown tier"),
            }
        }
        stats.total = stats.working + stats.episodic + stats.semantic;

        let avg: Option<f64> = db
            .query_row(
                "SELECT AVG(importance) FROM memories WHERE owner_agent_id = ?1",
                rusqlite::params![owner],
                |row| row.get(0),
            )
            .map_err(unavailable)?;
        stats.average_importance = (avg.unwrap_or(0.0) * 1000.0).round() / 1000.0;
        Ok(stats)
    }

    fn owners(&self) -> Result<Vec<AgentId>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT DISTINCT owner_agent_id FROM memories ORDER BY owner_agent_id")
            .map_err(unavailable)?;
        let owners = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;
        Ok(owners)
    }
}
