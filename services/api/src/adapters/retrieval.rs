//! services/api/src/adapters/retrieval.rs
//!
//! Implements the `RetrievalService` port with PostgreSQL full-text ranking over
//! the `document_chunks` table. The ingestion pipeline owns writing that table.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use tutor_core::domain::TenantTag;
use tutor_core::ports::{PortError, PortResult, RetrievalQuery, RetrievalService, RetrievedPassage};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgRetrievalAdapter {
    pool: PgPool,
}

impl PgRetrievalAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ChunkRecord {
    source_id: Uuid,
    chunk_index: i32,
    tenant_tag: String,
    content: String,
}
impl ChunkRecord {
    fn to_domain(self) -> RetrievedPassage {
        RetrievedPassage {
            source_id: self.source_id,
            chunk_index: self.chunk_index.max(0) as usize,
            text: self.content,
            tenant_tag: TenantTag::from_raw(self.tenant_tag),
        }
    }
}

#[async_trait]
impl RetrievalService for PgRetrievalAdapter {
    /// Ranks the tenant's chunks against the query text. Chunks that share no
    /// terms with the query still come back, in document order, after the matches.
    async fn query(&self, query: &RetrievalQuery) -> PortResult<Vec<RetrievedPassage>> {
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let records = sqlx::query_as::<_, ChunkRecord>(
            "SELECT source_id, chunk_index, tenant_tag, content \
             FROM document_chunks \
             WHERE tenant_tag = $1 AND ($2::uuid IS NULL OR source_id = $2) \
             ORDER BY ts_rank(search_vector, plainto_tsquery('english', $3)) DESC, source_id, chunk_index \
             LIMIT $4",
        )
        .bind(query.tenant_tag.as_str())
        .bind(query.source_id)
        .bind(&query.text)
        .bind(query.top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(tenant = %query.tenant_tag, hits = records.len(), "retrieval query");
        Ok(records.into_iter().map(ChunkRecord::to_domain).collect())
    }
}
