//! Postgres-backed document store: one JSONB row per document, scoped by
//! tenant project and collection.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;

use super::document::{
    generate_id, Authorization, Document, DocumentStore, Filter, StoreError, StoreResult,
};
use super::pool::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    project_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (project_id, collection, id)
)
"#;

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: DbPool,
    project_id: String,
}

impl PgDocumentStore {
    pub fn new(pool: DbPool, project_id: impl Into<String>) -> Self {
        Self {
            pool,
            project_id: project_id.into(),
        }
    }

    pub async fn ensure_schema(pool: &DbPool) -> StoreResult<()> {
        sqlx::query(SCHEMA).execute(pool).await?;
        Ok(())
    }

    fn row_to_document(id: String, data: Value) -> StoreResult<Document> {
        let mut document: Document = serde_json::from_value(data)?;
        document.id = id;
        Ok(document)
    }

    async fn fetch(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, data FROM documents WHERE project_id = $1 AND collection = $2 AND id = $3",
        )
        .bind(&self.project_id)
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let id: String = row.try_get("id")?;
                let Json(data): Json<Value> = row.try_get("data")?;
                Ok(Some(Self::row_to_document(id, data)?))
            }
            None => Ok(None),
        }
    }
}

fn filter_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(
        &self,
        auth: Authorization,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        Ok(self
            .fetch(collection, id)
            .await?
            .filter(|doc| doc.readable_by(auth)))
    }

    async fn find_one(
        &self,
        auth: Authorization,
        collection: &str,
        filters: &[Filter],
    ) -> StoreResult<Option<Document>> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, data FROM documents WHERE project_id = ");
        query.push_bind(self.project_id.clone());
        query.push(" AND collection = ");
        query.push_bind(collection.to_string());
        for filter in filters {
            if filter.field == "$id" {
                query.push(" AND id = ");
            } else {
                query.push(" AND data ->> ");
                query.push_bind(filter.field.clone());
                query.push(" = ");
            }
            query.push_bind(filter_text(&filter.value));
        }
        query.push(" ORDER BY created_at ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        for row in rows {
            let id: String = row.try_get("id")?;
            let Json(data): Json<Value> = row.try_get("data")?;
            let document = Self::row_to_document(id, data)?;
            if document.readable_by(auth) {
                return Ok(Some(document));
            }
        }
        Ok(None)
    }

    async fn create(
        &self,
        auth: Authorization,
        collection: &str,
        mut document: Document,
    ) -> StoreResult<Document> {
        if document.id.is_empty() {
            document.id = generate_id();
        }
        if !auth.is_elevated() {
            return Err(StoreError::Unauthorized {
                collection: collection.to_string(),
                id: document.id,
            });
        }

        let data = serde_json::to_value(&document.attributes)?;
        let inserted = sqlx::query(
            "INSERT INTO documents (project_id, collection, id, data) VALUES ($1, $2, $3, $4) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&self.project_id)
        .bind(collection)
        .bind(&document.id)
        .bind(Json(data))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: document.id,
            });
        }

        debug!(collection, id = %document.id, "Created document");
        Ok(document)
    }

    async fn update(
        &self,
        auth: Authorization,
        collection: &str,
        document: &Document,
    ) -> StoreResult<Document> {
        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id: document.id.clone(),
        };

        if !auth.is_elevated() {
            let current = self.fetch(collection, &document.id).await?.ok_or_else(not_found)?;
            if !current.writable_by(auth) {
                return Err(StoreError::Unauthorized {
                    collection: collection.to_string(),
                    id: document.id.clone(),
                });
            }
        }

        let data = serde_json::to_value(&document.attributes)?;
        let updated = sqlx::query(
            "UPDATE documents SET data = $4, updated_at = NOW() \
             WHERE project_id = $1 AND collection = $2 AND id = $3",
        )
        .bind(&self.project_id)
        .bind(collection)
        .bind(&document.id)
        .bind(Json(data))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(not_found());
        }
        Ok(document.clone())
    }

    async fn delete(&self, auth: Authorization, collection: &str, id: &str) -> StoreResult<bool> {
        if !auth.is_elevated() {
            match self.fetch(collection, id).await? {
                Some(current) if current.writable_by(auth) => {}
                Some(_) => {
                    return Err(StoreError::Unauthorized {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                None => return Ok(false),
            }
        }

        let deleted = sqlx::query(
            "DELETE FROM documents WHERE project_id = $1 AND collection = $2 AND id = $3",
        )
        .bind(&self.project_id)
        .bind(collection)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(deleted.rows_affected() > 0)
    }
}
