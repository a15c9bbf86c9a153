//! SQLite-backed store with migrations
//!
//! Provides document, chunk and embedding storage plus search analytics, and
//! answers the three branch queries with exact scans.

use super::{
    decode_vector, encode_vector, BranchContext, ChunkStore, DocumentRecord, SearchEvent, SearchStore,
    SearchTracker, StoreError, StoredChunk, UpsertOutcome,
};
use crate::embedding::cosine_similarity;
use crate::retrieval::{normalize_tags, rank_branch, tokenize, BranchHit, ChunkId};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

type Result<T> = std::result::Result<T, StoreError>;

/// Rows scanned between deadline checks
const DEADLINE_CHECK_INTERVAL: usize = 256;

const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

/// Columns shared by every branch query, in `CandidateRow` order
const CANDIDATE_COLUMNS: &str = "c.id, c.content, c.document_id, d.source_type, d.created_at";

/// SQLite store implementing every storage trait
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager =
            SqliteConnectionManager::file(db_path).with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

        let pool = Pool::builder().max_size(16).build(manager)?;

        let store = Self { pool };
        store.migrate()?;

        debug!("Opened store at {}", db_path.display());
        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Row counts per table
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreStats {
            document_count: count("documents")?,
            chunk_count: count("chunks")?,
            embedding_count: count("embeddings")?,
            search_count: count("search_events")?,
            click_count: count("search_clicks")?,
        })
    }

    /// Load a document with its tags
    pub fn document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.get_conn()?;

        let row = conn
            .query_row(
                "SELECT id, title, source_type, created_at, content_hash, metadata
                 FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, title, source_type, created_at, content_hash, metadata)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT tag FROM document_tags WHERE document_id = ?1 ORDER BY tag")?;
        let tags = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let metadata = match metadata {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::Value::Null,
        };

        Ok(Some(DocumentRecord {
            id,
            title,
            source_type,
            tags,
            created_at: from_unix(created_at)?,
            content_hash,
            metadata,
        }))
    }

    /// Delete a document and, by cascade, its chunks and embeddings
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Number of stored chunks for a document
    pub fn chunk_count(&self, document_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Most recent search events, newest first
    pub fn recent_searches(&self, limit: usize) -> Result<Vec<SearchEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, query, result_count, duration_ms, timeframe, created_at
             FROM search_events ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, query, result_count, duration_ms, timeframe, created_at)| -> Result<SearchEvent> {
                Ok(SearchEvent {
                    id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    query,
                    result_count: result_count as usize,
                    duration_ms: duration_ms as u64,
                    timeframe: timeframe.map(|raw| serde_json::from_str(&raw)).transpose()?,
                    created_at: from_unix(created_at)?,
                })
            })
            .collect()
    }

    /// Documents allowed by the tag filter, or `None` when it is not set
    fn tagged_documents(conn: &Connection, ctx: &BranchContext) -> Result<Option<AHashSet<String>>> {
        if ctx.filters.tags_any.is_empty() {
            return Ok(None);
        }
        let tags = normalize_tags(&ctx.filters.tags_any);
        let sql = format!(
            "SELECT DISTINCT document_id FROM document_tags WHERE tag IN ({})",
            placeholders(tags.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(tags.iter()), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<AHashSet<_>, _>>()?;
        Ok(Some(ids))
    }
}

/// Row counts per table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedding_count: usize,
    pub search_count: usize,
    pub click_count: usize,
}

/// A chunk row with the document fields filters need
struct CandidateRow {
    id: ChunkId,
    content: String,
    document_id: String,
    source_type: Option<String>,
    created_at: i64,
}

impl CandidateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            document_id: row.get(2)?,
            source_type: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Structured and time filters evaluated per row
struct RowFilter<'a> {
    ctx: &'a BranchContext,
    tagged_documents: Option<AHashSet<String>>,
}

impl<'a> RowFilter<'a> {
    fn prepare(conn: &Connection, ctx: &'a BranchContext) -> Result<Self> {
        Ok(Self {
            ctx,
            tagged_documents: SqliteStore::tagged_documents(conn, ctx)?,
        })
    }

    fn admits(&self, row: &CandidateRow) -> bool {
        let filters = &self.ctx.filters;

        if !filters.document_ids.is_empty() && !filters.document_ids.contains(&row.document_id) {
            return false;
        }
        if let Some(wanted) = &filters.source_type {
            if row.source_type.as_deref() != Some(wanted.as_str()) {
                return false;
            }
        }
        if let Some(allowed) = &self.tagged_documents {
            if !allowed.contains(&row.document_id) {
                return false;
            }
        }
        if let Some(time_filter) = &self.ctx.time_filter {
            match DateTime::from_timestamp(row.created_at, 0) {
                Some(created_at) if time_filter.contains(created_at) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Sort by native score and cut to the branch limit
fn finish(hits: Vec<BranchHit>, limit: usize) -> Vec<BranchHit> {
    let mut ranked = rank_branch(hits);
    ranked.truncate(limit);
    ranked
}

impl SearchStore for SqliteStore {
    fn vector_search(&self, embedding: &[f32], threshold: f32, ctx: &BranchContext) -> Result<Vec<BranchHit>> {
        if embedding.is_empty() || ctx.limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let filter = RowFilter::prepare(&conn, ctx)?;

        let sql = format!(
            "SELECT {}, e.vector FROM chunks c
             JOIN documents d ON d.id = c.document_id
             JOIN embeddings e ON e.chunk_id = c.id",
            CANDIDATE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut hits = Vec::new();
        let mut scanned = 0usize;
        while let Some(row) = rows.next()? {
            scanned += 1;
            if scanned % DEADLINE_CHECK_INTERVAL == 0 && ctx.deadline_passed() {
                debug!("Vector scan stopped at deadline after {} rows", scanned);
                break;
            }

            let candidate = CandidateRow::from_row(row)?;
            if !filter.admits(&candidate) {
                continue;
            }

            let blob: Vec<u8> = row.get(5)?;
            let vector = match decode_vector(&blob) {
                Ok(vector) => vector,
                Err(e) => {
                    warn!("Skipping chunk {}: {}", candidate.id, e);
                    continue;
                }
            };

            let similarity = cosine_similarity(embedding, &vector).max(0.0);
            if similarity >= threshold {
                hits.push(BranchHit::vector(candidate.id, candidate.content, similarity));
            }
        }

        debug!("Vector scan: {} rows, {} above threshold", scanned, hits.len());
        Ok(finish(hits, ctx.limit))
    }

    fn fulltext_search(&self, terms: &[String], ctx: &BranchContext) -> Result<Vec<BranchHit>> {
        let terms: Vec<String> = terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() || ctx.limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let filter = RowFilter::prepare(&conn, ctx)?;

        // SQLite's lower() and LIKE fold ASCII only; matching happens on
        // Unicode-lowercased tokens below.
        let sql = format!(
            "SELECT {} FROM chunks c
             JOIN documents d ON d.id = c.document_id",
            CANDIDATE_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut hits = Vec::new();
        let mut scanned = 0usize;
        while let Some(row) = rows.next()? {
            scanned += 1;
            if scanned % DEADLINE_CHECK_INTERVAL == 0 && ctx.deadline_passed() {
                debug!("Full-text scan stopped at deadline after {} rows", scanned);
                break;
            }

            let candidate = CandidateRow::from_row(row)?;
            if !filter.admits(&candidate) {
                continue;
            }

            let words: AHashSet<String> = tokenize(&candidate.content).collect();
            let matched = terms.iter().filter(|t| words.contains(t.as_str())).count();
            if matched == 0 {
                continue;
            }

            let text_rank = matched as f32 / terms.len() as f32;
            hits.push(BranchHit::fulltext(candidate.id, candidate.content, text_rank));
        }

        debug!("Full-text scan: {} candidates, {} matched", scanned, hits.len());
        Ok(finish(hits, ctx.limit))
    }

    fn tag_search(&self, tags: &[String], ctx: &BranchContext) -> Result<Vec<BranchHit>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() || ctx.limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let filter = RowFilter::prepare(&conn, ctx)?;

        let mut matched_by_document: AHashMap<String, Vec<String>> = AHashMap::new();
        {
            let sql = format!(
                "SELECT document_id, tag FROM document_tags WHERE tag IN ({}) ORDER BY tag",
                placeholders(tags.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(tags.iter()))?;
            while let Some(row) = rows.next()? {
                let document_id: String = row.get(0)?;
                let tag: String = row.get(1)?;
                matched_by_document.entry(document_id).or_default().push(tag);
            }
        }

        if matched_by_document.is_empty() {
            return Ok(Vec::new());
        }

        let document_ids: Vec<&String> = matched_by_document.keys().collect();
        let sql = format!(
            "SELECT {} FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.document_id IN ({})",
            CANDIDATE_COLUMNS,
            placeholders(document_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(document_ids.iter()))?;

        let mut hits = Vec::new();
        let mut scanned = 0usize;
        while let Some(row) = rows.next()? {
            scanned += 1;
            if scanned % DEADLINE_CHECK_INTERVAL == 0 && ctx.deadline_passed() {
                debug!("Tag scan stopped at deadline after {} rows", scanned);
                break;
            }

            let candidate = CandidateRow::from_row(row)?;
            if !filter.admits(&candidate) {
                continue;
            }
            if let Some(matched) = matched_by_document.get(&candidate.document_id) {
                hits.push(BranchHit::tag(candidate.id, candidate.content, matched.clone()));
            }
        }

        debug!("Tag search: {} documents, {} chunks", matched_by_document.len(), hits.len());
        Ok(finish(hits, ctx.limit))
    }
}

impl ChunkStore for SqliteStore {
    fn upsert_document(&self, document: &DocumentRecord) -> Result<UpsertOutcome> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp();

        let metadata = if document.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&document.metadata)?)
        };

        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT indexed_hash FROM documents WHERE id = ?1",
                params![document.id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO documents (id, title, source_type, content_hash, metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        document.id,
                        document.title,
                        document.source_type,
                        document.content_hash,
                        metadata,
                        document.created_at.timestamp(),
                        now
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some(indexed) => {
                let unchanged = indexed.as_deref() == Some(document.content_hash.as_str());
                tx.execute(
                    "UPDATE documents
                     SET title = ?2, source_type = ?3, content_hash = ?4, metadata = ?5,
                         created_at = ?6, updated_at = ?7
                     WHERE id = ?1",
                    params![
                        document.id,
                        document.title,
                        document.source_type,
                        document.content_hash,
                        metadata,
                        document.created_at.timestamp(),
                        now
                    ],
                )?;

                if unchanged {
                    UpsertOutcome::Unchanged
                } else {
                    tx.execute(
                        "UPDATE documents SET indexed_hash = NULL WHERE id = ?1",
                        params![document.id],
                    )?;
                    let removed =
                        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![document.id])?;
                    debug!("Document {} needs indexing; removed {} old chunks", document.id, removed);
                    UpsertOutcome::Updated
                }
            }
        };

        tx.execute("DELETE FROM document_tags WHERE document_id = ?1", params![document.id])?;
        for tag in normalize_tags(&document.tags) {
            tx.execute(
                "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                params![document.id, tag],
            )?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn store_chunk(&self, chunk: &StoredChunk) -> Result<ChunkId> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![chunk.document_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::DocumentNotFound(chunk.document_id.clone()));
        }

        let content_hash = blake3::hash(chunk.content.as_bytes()).to_hex().to_string();
        let chunk_id: ChunkId = tx.query_row(
            "INSERT INTO chunks (document_id, chunk_index, content, content_hash, start_offset, end_offset)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (document_id, chunk_index) DO UPDATE SET
                 content = excluded.content,
                 content_hash = excluded.content_hash,
                 start_offset = excluded.start_offset,
                 end_offset = excluded.end_offset
             RETURNING id",
            params![
                chunk.document_id,
                chunk.chunk_index as i64,
                chunk.content,
                content_hash,
                chunk.start_offset as i64,
                chunk.end_offset as i64
            ],
            |row| row.get(0),
        )?;

        match &chunk.embedding {
            Some(vector) => {
                tx.execute(
                    "INSERT OR REPLACE INTO embeddings (chunk_id, vector, dimension, model, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        chunk_id,
                        encode_vector(vector),
                        vector.len() as i64,
                        chunk.model,
                        Utc::now().timestamp()
                    ],
                )?;
            }
            None => {
                tx.execute("DELETE FROM embeddings WHERE chunk_id = ?1", params![chunk_id])?;
            }
        }

        tx.commit()?;
        Ok(chunk_id)
    }

    fn mark_indexed(&self, document_id: &str, content_hash: &str) -> Result<()> {
        let conn = self.get_conn()?;
        // A newer upsert may have replaced the content in the meantime.
        let updated = conn.execute(
            "UPDATE documents SET indexed_hash = ?2 WHERE id = ?1 AND content_hash = ?2",
            params![document_id, content_hash],
        )?;
        if updated == 0 {
            debug!("Document {} changed before indexing finished", document_id);
        }
        Ok(())
    }
}

impl SearchTracker for SqliteStore {
    fn record_search(&self, event: &SearchEvent) -> Result<()> {
        let conn = self.get_conn()?;
        let timeframe = event.timeframe.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO search_events (id, query, result_count, duration_ms, timeframe, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id.to_string(),
                event.query,
                event.result_count as i64,
                event.duration_ms as i64,
                timeframe,
                event.created_at.timestamp()
            ],
        )?;
        Ok(())
    }

    fn record_click(&self, search_id: Uuid, chunk_id: ChunkId, position: usize) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO search_clicks (search_id, chunk_id, position, clicked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                search_id.to_string(),
                chunk_id,
                position as i64,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn from_unix(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} out of range", seconds)))
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: documents, chunks and vectors
    r#"
    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        title TEXT,
        source_type TEXT,
        content_hash TEXT NOT NULL,
        indexed_hash TEXT,  -- set once every chunk is stored with a vector
        metadata TEXT,  -- JSON metadata
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE INDEX idx_documents_created_at ON documents(created_at);
    CREATE INDEX idx_documents_source_type ON documents(source_type);

    CREATE TABLE document_tags (
        document_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (document_id, tag),
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_document_tags_tag ON document_tags(tag);

    CREATE TABLE chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        UNIQUE (document_id, chunk_index),
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_document ON chunks(document_id);

    -- Little-endian f32 vectors
    CREATE TABLE embeddings (
        chunk_id INTEGER PRIMARY KEY,
        vector BLOB NOT NULL,
        dimension INTEGER NOT NULL,
        model TEXT,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
    );
    "#,
    // Migration 2: search analytics
    r#"
    CREATE TABLE search_events (
        id TEXT PRIMARY KEY,
        query TEXT NOT NULL,
        result_count INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL,
        timeframe TEXT,  -- JSON time filter
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_search_events_created_at ON search_events(created_at);

    -- Clicks may arrive before the search event is written
    CREATE TABLE search_clicks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        search_id TEXT NOT NULL,
        chunk_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        clicked_at INTEGER NOT NULL
    );

    CREATE INDEX idx_search_clicks_search ON search_clicks(search_id);
    "#,
];
