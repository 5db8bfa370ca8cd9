use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::RwLock;

use super::model::SourceSummary;
use crate::modules::jobs::store::StoreError;

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Inserts or replaces the summary for its source.
    async fn upsert(&self, summary: &SourceSummary) -> Result<(), StoreError>;

    async fn get(&self, source_ref: &str) -> Result<Option<SourceSummary>, StoreError>;
}

#[derive(Clone)]
pub struct PgSummaryStore {
    pool: PgPool,
}

impl PgSummaryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SummaryStore for PgSummaryStore {
    async fn upsert(&self, summary: &SourceSummary) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO source_summaries (source_ref, summary)
            VALUES ($1, $2)
            ON CONFLICT (source_ref)
            DO UPDATE SET summary = EXCLUDED.summary, updated_at = NOW()
            ",
        )
        .bind(&summary.source_ref)
        .bind(Json(summary))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, source_ref: &str) -> Result<Option<SourceSummary>, StoreError> {
        let summary = sqlx::query_scalar::<_, Json<SourceSummary>>(
            "SELECT summary FROM source_summaries WHERE source_ref = $1",
        )
        .bind(source_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(summary.map(|s| s.0))
    }
}

#[derive(Default)]
pub struct InMemorySummaryStore {
    summaries: RwLock<HashMap<String, SourceSummary>>,
}

impl InMemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryStore for InMemorySummaryStore {
    async fn upsert(&self, summary: &SourceSummary) -> Result<(), StoreError> {
        self.summaries
            .write()
            .await
            .insert(summary.source_ref.clone(), summary.clone());
        Ok(())
    }

    async fn get(&self, source_ref: &str) -> Result<Option<SourceSummary>, StoreError> {
        Ok(self.summaries.read().await.get(source_ref).cloned())
    }
}
