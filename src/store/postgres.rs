//! Postgres + pgvector chunk store.
//!
//! One transaction per write call, serialized per repository with
//! `pg_advisory_xact_lock` (released automatically at commit/rollback).
//! Cosine search runs against an ivfflat index using the `<=>` distance
//! operator; `vector_score = 1 − distance`.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{RagError, Result};
use crate::models::{Chunk, EmbeddedChunk, IndexStatus, RepoIndexRecord, WriteStrategy};

use super::{
    decide_strategy, normalize, ChunkStore, PriorIndex, SearchHit, WriteMeta, WriteOutcome,
    CHUNK_SCHEMA_VERSION,
};

/// Rows per bulk-insert statement. 11 binds per row keeps this far below
/// the Postgres bind limit.
const INSERT_BATCH_ROWS: usize = 500;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Idempotent startup migration.
    async fn migrate(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repo_index (
                repo_id         TEXT PRIMARY KEY,
                status          TEXT NOT NULL,
                commit_hash     TEXT,
                default_branch  TEXT,
                embedding_model TEXT,
                chunk_count     BIGINT NOT NULL DEFAULT 0,
                schema_version  INT NOT NULL DEFAULT 1,
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS code_chunks (
                id          UUID PRIMARY KEY,
                repo_id     TEXT NOT NULL,
                file_path   TEXT NOT NULL,
                language    TEXT NOT NULL,
                content     TEXT NOT NULL,
                start_line  BIGINT NOT NULL,
                end_line    BIGINT NOT NULL,
                symbol_name TEXT,
                chunk_index BIGINT NOT NULL,
                embedding   vector(768),
                embedded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (repo_id, file_path, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS code_chunks_repo_idx ON code_chunks (repo_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS code_chunks_embedding_idx ON code_chunks \
             USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Stable 64-bit key for the advisory lock, derived from the repo id.
fn advisory_key(repo_id: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    repo_id.hash(&mut hasher);
    hasher.finish() as i64
}

fn parse_status(s: &str) -> IndexStatus {
    match s {
        "pending" => IndexStatus::Pending,
        "indexing" => IndexStatus::Indexing,
        "ready" => IndexStatus::Ready,
        _ => IndexStatus::Failed,
    }
}

fn chunk_from_row(row: &sqlx::postgres::PgRow) -> Result<Chunk> {
    Ok(Chunk {
        id: row.try_get("id")?,
        repo_id: row.try_get("repo_id")?,
        file_path: row.try_get("file_path")?,
        language: row.try_get("language")?,
        symbol_name: row.try_get("symbol_name")?,
        start_line: row.try_get::<i64, _>("start_line")? as usize,
        end_line: row.try_get::<i64, _>("end_line")? as usize,
        content: row.try_get("content")?,
        chunk_index: row.try_get::<i64, _>("chunk_index")? as usize,
    })
}

#[async_trait]
impl ChunkStore for PostgresStore {
    async fn get_index(&self, repo_id: &str) -> Result<Option<RepoIndexRecord>> {
        let row = sqlx::query(
            "SELECT status, commit_hash, default_branch, embedding_model, chunk_count, updated_at \
             FROM repo_index WHERE repo_id = $1",
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(RepoIndexRecord {
            repo_id: repo_id.to_string(),
            status: parse_status(row.try_get::<String, _>("status")?.as_str()),
            commit_hash: row.try_get("commit_hash")?,
            default_branch: row.try_get("default_branch")?,
            embedding_model: row.try_get("embedding_model")?,
            chunk_count: row.try_get::<i64, _>("chunk_count")? as usize,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn mark_indexing(&self, repo_id: &str, default_branch: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repo_index (repo_id, status, default_branch, schema_version, updated_at)
            VALUES ($1, 'indexing', $2, $3, now())
            ON CONFLICT (repo_id) DO UPDATE SET
                status = 'indexing',
                default_branch = excluded.default_branch,
                updated_at = now()
            "#,
        )
        .bind(repo_id)
        .bind(default_branch)
        .bind(CHUNK_SCHEMA_VERSION)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, repo_id: &str) -> Result<()> {
        // Status only; the prior ready snapshot stays available.
        sqlx::query("UPDATE repo_index SET status = 'failed', updated_at = now() WHERE repo_id = $1")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn write(&self, embedded: Vec<EmbeddedChunk>, meta: &WriteMeta) -> Result<WriteOutcome> {
        let mut tx = self.pool.begin().await?;

        // Per-repo serialization for the life of this transaction.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_key(&meta.repo_id))
            .execute(&mut *tx)
            .await?;

        let prior = sqlx::query(
            "SELECT status, commit_hash, embedding_model, schema_version \
             FROM repo_index WHERE repo_id = $1",
        )
        .bind(&meta.repo_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| -> Result<PriorIndex> {
            Ok(PriorIndex {
                status: parse_status(row.try_get::<String, _>("status")?.as_str()),
                commit_hash: row.try_get("commit_hash")?,
                model: row.try_get("embedding_model")?,
                schema_version: row.try_get("schema_version")?,
            })
        })
        .transpose()?;

        let strategy = decide_strategy(prior.as_ref(), &meta.commit_hash, &meta.model);
        if strategy == WriteStrategy::Skipped {
            tx.commit().await?;
            tracing::info!(repo = %meta.repo_id, commit = %meta.commit_hash, "write skipped: commit already indexed");
            return Ok(WriteOutcome {
                strategy,
                chunks_written: 0,
            });
        }

        match strategy {
            WriteStrategy::FullReindex => {
                sqlx::query("DELETE FROM code_chunks WHERE repo_id = $1")
                    .bind(&meta.repo_id)
                    .execute(&mut *tx)
                    .await?;
            }
            WriteStrategy::Upsert => {
                // Drop rows absent from the new snapshot; surviving keys are
                // overwritten by the ON CONFLICT below.
                let paths: Vec<String> =
                    embedded.iter().map(|e| e.chunk.file_path.clone()).collect();
                let indexes: Vec<i64> =
                    embedded.iter().map(|e| e.chunk.chunk_index as i64).collect();
                sqlx::query(
                    r#"
                    DELETE FROM code_chunks
                    WHERE repo_id = $1
                      AND NOT EXISTS (
                          SELECT 1 FROM unnest($2::text[], $3::bigint[]) AS keep(file_path, chunk_index)
                          WHERE keep.file_path = code_chunks.file_path
                            AND keep.chunk_index = code_chunks.chunk_index
                      )
                    "#,
                )
                .bind(&meta.repo_id)
                .bind(&paths)
                .bind(&indexes)
                .execute(&mut *tx)
                .await?;
            }
            WriteStrategy::Skipped => unreachable!("handled above"),
        }

        let chunks_written = embedded.len();
        let mut embedded = embedded;
        for e in &mut embedded {
            normalize(&mut e.embedding);
        }

        for batch in embedded.chunks(INSERT_BATCH_ROWS) {
            let mut builder = sqlx::QueryBuilder::new(
                "INSERT INTO code_chunks \
                 (id, repo_id, file_path, language, content, start_line, end_line, \
                  symbol_name, chunk_index, embedding, embedded_at) ",
            );
            builder.push_values(batch, |mut b, e| {
                b.push_bind(e.chunk.id)
                    .push_bind(&e.chunk.repo_id)
                    .push_bind(&e.chunk.file_path)
                    .push_bind(&e.chunk.language)
                    .push_bind(&e.chunk.content)
                    .push_bind(e.chunk.start_line as i64)
                    .push_bind(e.chunk.end_line as i64)
                    .push_bind(&e.chunk.symbol_name)
                    .push_bind(e.chunk.chunk_index as i64)
                    .push_bind(Vector::from(e.embedding.clone()))
                    .push("now()");
            });
            builder.push(
                " ON CONFLICT (repo_id, file_path, chunk_index) DO UPDATE SET \
                 content = excluded.content, \
                 language = excluded.language, \
                 start_line = excluded.start_line, \
                 end_line = excluded.end_line, \
                 symbol_name = excluded.symbol_name, \
                 embedding = excluded.embedding, \
                 embedded_at = excluded.embedded_at",
            );
            builder.build().execute(&mut *tx).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO repo_index
                (repo_id, status, commit_hash, default_branch, embedding_model,
                 chunk_count, schema_version, updated_at)
            VALUES ($1, 'ready', $2, $3, $4, $5, $6, now())
            ON CONFLICT (repo_id) DO UPDATE SET
                status = 'ready',
                commit_hash = excluded.commit_hash,
                default_branch = excluded.default_branch,
                embedding_model = excluded.embedding_model,
                chunk_count = excluded.chunk_count,
                schema_version = excluded.schema_version,
                updated_at = now()
            "#,
        )
        .bind(&meta.repo_id)
        .bind(&meta.commit_hash)
        .bind(&meta.default_branch)
        .bind(&meta.model)
        .bind(chunks_written as i64)
        .bind(CHUNK_SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            repo = %meta.repo_id,
            strategy = strategy.as_str(),
            chunks = chunks_written,
            "write complete"
        );

        Ok(WriteOutcome {
            strategy,
            chunks_written,
        })
    }

    async fn search(
        &self,
        repo_id: &str,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
        file_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if query_embedding.is_empty() {
            return Err(RagError::bad_input("empty query embedding"));
        }

        let query_vector = Vector::from(query_embedding.to_vec());
        let rows = sqlx::query(
            r#"
            SELECT id, repo_id, file_path, language, content, start_line, end_line,
                   symbol_name, chunk_index,
                   1 - (embedding <=> $2) AS vector_score
            FROM code_chunks
            WHERE repo_id = $1
              AND ($4::text IS NULL OR file_path LIKE $4 || '%')
              AND 1 - (embedding <=> $2) >= $5
            ORDER BY embedding <=> $2
            LIMIT $3
            "#,
        )
        .bind(repo_id)
        .bind(&query_vector)
        .bind(limit as i64)
        .bind(file_filter)
        .bind(min_score as f64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            hits.push(SearchHit {
                chunk: chunk_from_row(row)?,
                vector_score: (row.try_get::<f64, _>("vector_score")? as f32).clamp(0.0, 1.0),
            });
        }
        Ok(hits)
    }
}
