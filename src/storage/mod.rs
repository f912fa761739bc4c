//! Durable fact persistence
//!
//! Responsible for storing and loading user facts. The in-memory store backs
//! development and tests; the Postgres store is the durable backend.

use crate::error::CompanionError;
use crate::models::Fact;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;

/// Trait for fact persistence
///
/// `select_and_touch` is retrieval-with-feedback: the returned facts have
/// `last_used_at` and `usage_count` updated as part of the same operation.
#[async_trait::async_trait]
pub trait FactRepository: Send + Sync {
    async fn list_facts(&self, user_id: Uuid) -> Result<Vec<Fact>>;
    async fn insert_fact(&self, fact: Fact) -> Result<()>;
    async fn update_fact(&self, fact: &Fact) -> Result<()>;
    async fn count_facts(&self, user_id: Uuid) -> Result<u64>;
    async fn select_and_touch(
        &self,
        user_id: Uuid,
        limit: usize,
        categories: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>>;
}

/// Ranking order shared by both backends:
/// confidence DESC, last_used_at ASC with never-used first, usage_count ASC.
fn ranking_order(a: &Fact, b: &Fact) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.last_used_at.cmp(&b.last_used_at))
        .then_with(|| a.usage_count.cmp(&b.usage_count))
}

/// In-memory fact store for development and tests
pub struct InMemoryFactRepository {
    facts_by_user: Arc<RwLock<HashMap<Uuid, Vec<Fact>>>>,
}

impl InMemoryFactRepository {
    pub fn new() -> Self {
        Self {
            facts_by_user: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryFactRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FactRepository for InMemoryFactRepository {
    async fn list_facts(&self, user_id: Uuid) -> Result<Vec<Fact>> {
        let facts = self.facts_by_user.read().await;
        Ok(facts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn insert_fact(&self, fact: Fact) -> Result<()> {
        let mut facts = self.facts_by_user.write().await;
        facts.entry(fact.user_id).or_insert_with(Vec::new).push(fact);
        Ok(())
    }

    async fn update_fact(&self, fact: &Fact) -> Result<()> {
        let mut facts = self.facts_by_user.write().await;
        let user_facts = facts.get_mut(&fact.user_id).ok_or_else(|| {
            CompanionError::DatabaseError(format!("no facts stored for user {}", fact.user_id))
        })?;

        let slot = user_facts
            .iter_mut()
            .find(|f| f.id == fact.id)
            .ok_or_else(|| {
                CompanionError::DatabaseError(format!("fact {} not found", fact.id))
            })?;
        *slot = fact.clone();
        Ok(())
    }

    async fn count_facts(&self, user_id: Uuid) -> Result<u64> {
        let facts = self.facts_by_user.read().await;
        Ok(facts.get(&user_id).map(|v| v.len() as u64).unwrap_or(0))
    }

    async fn select_and_touch(
        &self,
        user_id: Uuid,
        limit: usize,
        categories: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        // Single write-lock section so the rank + usage touch is atomic.
        let mut facts = self.facts_by_user.write().await;
        let Some(user_facts) = facts.get_mut(&user_id) else {
            return Ok(Vec::new());
        };

        let mut eligible: Vec<usize> = user_facts
            .iter()
            .enumerate()
            .filter(|(_, f)| match categories {
                Some(cats) => cats.iter().any(|c| c == &f.category),
                None => true,
            })
            .map(|(i, _)| i)
            .collect();

        eligible.sort_by(|&a, &b| ranking_order(&user_facts[a], &user_facts[b]));
        eligible.truncate(limit);

        let mut selected = Vec::with_capacity(eligible.len());
        for i in eligible {
            let fact = &mut user_facts[i];
            fact.last_used_at = Some(now);
            fact.usage_count += 1;
            selected.push(fact.clone());
        }

        Ok(selected)
    }
}

/// Postgres-backed fact store
pub struct PostgresFactRepository {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresFactRepository {
    /// Connects lazily; the pool is established on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                CompanionError::DatabaseError(format!("Failed to configure pool: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: OnceCell::new(),
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS user_facts (
                      id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      fact TEXT NOT NULL,
                      confidence DOUBLE PRECISION NOT NULL,
                      category TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      last_used_at TIMESTAMPTZ,
                      usage_count INTEGER NOT NULL DEFAULT 0,
                      source_message_id UUID
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_user_facts_user_category
                    ON user_facts (user_id, category);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                CompanionError::DatabaseError(format!("Failed to initialize fact schema: {}", e))
            })?;

        Ok(())
    }

    fn fact_from_row(row: &sqlx::postgres::PgRow) -> Result<Fact> {
        let usage_count: i32 = row
            .try_get("usage_count")
            .map_err(|e| CompanionError::DatabaseError(format!("Bad fact row: {}", e)))?;

        Ok(Fact {
            id: row
                .try_get("id")
                .map_err(|e| CompanionError::DatabaseError(format!("Bad fact row: {}", e)))?,
            user_id: row
                .try_get("user_id")
                .map_err(|e| CompanionError::DatabaseError(format!("Bad fact row: {}", e)))?,
            text: row
                .try_get("fact")
                .map_err(|e| CompanionError::DatabaseError(format!("Bad fact row: {}", e)))?,
            confidence: row
                .try_get("confidence")
                .map_err(|e| CompanionError::DatabaseError(format!("Bad fact row: {}", e)))?,
            category: row
                .try_get("category")
                .map_err(|e| CompanionError::DatabaseError(format!("Bad fact row: {}", e)))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| CompanionError::DatabaseError(format!("Bad fact row: {}", e)))?,
            last_used_at: row.try_get("last_used_at").ok(),
            usage_count: usage_count.max(0) as u32,
            source_message_id: row.try_get("source_message_id").ok(),
        })
    }
}

#[async_trait::async_trait]
impl FactRepository for PostgresFactRepository {
    async fn list_facts(&self, user_id: Uuid) -> Result<Vec<Fact>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, fact, confidence, category,
                   created_at, last_used_at, usage_count, source_message_id
            FROM user_facts
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CompanionError::DatabaseError(format!("Failed to load facts: {}", e)))?;

        rows.iter().map(Self::fact_from_row).collect()
    }

    async fn insert_fact(&self, fact: Fact) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO user_facts
              (id, user_id, fact, confidence, category, created_at, last_used_at, usage_count, source_message_id)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(fact.id)
        .bind(fact.user_id)
        .bind(&fact.text)
        .bind(fact.confidence)
        .bind(&fact.category)
        .bind(fact.created_at)
        .bind(fact.last_used_at)
        .bind(fact.usage_count as i32)
        .bind(fact.source_message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CompanionError::DatabaseError(format!("Failed to insert fact: {}", e)))?;

        Ok(())
    }

    async fn update_fact(&self, fact: &Fact) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            UPDATE user_facts
            SET fact = $1, confidence = $2, category = $3, created_at = $4,
                last_used_at = $5, usage_count = $6, source_message_id = $7
            WHERE id = $8
            "#,
        )
        .bind(&fact.text)
        .bind(fact.confidence)
        .bind(&fact.category)
        .bind(fact.created_at)
        .bind(fact.last_used_at)
        .bind(fact.usage_count as i32)
        .bind(fact.source_message_id)
        .bind(fact.id)
        .execute(&self.pool)
        .await
        .map_err(|e| CompanionError::DatabaseError(format!("Failed to update fact: {}", e)))?;

        Ok(())
    }

    async fn count_facts(&self, user_id: Uuid) -> Result<u64> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT COUNT(*) AS n FROM user_facts WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CompanionError::DatabaseError(format!("Failed to count facts: {}", e)))?;

        let count: i64 = row
            .try_get("n")
            .map_err(|e| CompanionError::DatabaseError(format!("Bad count row: {}", e)))?;

        Ok(count.max(0) as u64)
    }

    async fn select_and_touch(
        &self,
        user_id: Uuid,
        limit: usize,
        categories: Option<&[String]>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Fact>> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            CompanionError::DatabaseError(format!("Failed to begin selection transaction: {}", e))
        })?;

        let query = match categories {
            Some(_) => {
                r#"
                SELECT id, user_id, fact, confidence, category,
                       created_at, last_used_at, usage_count, source_message_id
                FROM user_facts
                WHERE user_id = $1 AND category = ANY($3)
                ORDER BY confidence DESC, last_used_at ASC NULLS FIRST, usage_count ASC
                LIMIT $2
                FOR UPDATE
                "#
            }
            None => {
                r#"
                SELECT id, user_id, fact, confidence, category,
                       created_at, last_used_at, usage_count, source_message_id
                FROM user_facts
                WHERE user_id = $1
                ORDER BY confidence DESC, last_used_at ASC NULLS FIRST, usage_count ASC
                LIMIT $2
                FOR UPDATE
                "#
            }
        };

        let mut select = sqlx::query(query).bind(user_id).bind(limit as i64);
        if let Some(cats) = categories {
            select = select.bind(cats.to_vec());
        }

        let rows = select.fetch_all(&mut *tx).await.map_err(|e| {
            CompanionError::DatabaseError(format!("Failed to select facts: {}", e))
        })?;

        let mut selected: Vec<Fact> = rows
            .iter()
            .map(Self::fact_from_row)
            .collect::<Result<_>>()?;

        if !selected.is_empty() {
            let ids: Vec<Uuid> = selected.iter().map(|f| f.id).collect();
            sqlx::query(
                r#"
                UPDATE user_facts
                SET last_used_at = $1, usage_count = usage_count + 1
                WHERE id = ANY($2)
                "#,
            )
            .bind(now)
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                CompanionError::DatabaseError(format!("Failed to touch selected facts: {}", e))
            })?;

            for fact in &mut selected {
                fact.last_used_at = Some(now);
                fact.usage_count += 1;
            }
        }

        tx.commit().await.map_err(|e| {
            CompanionError::DatabaseError(format!("Failed to commit selection: {}", e))
        })?;

        Ok(selected)
    }
}
