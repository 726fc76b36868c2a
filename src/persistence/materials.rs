//! Ingested source materials and slide-video mappings, staged per course
//! until a structure-generation request merges them. Tenant-scoped through
//! the owning course, same as [`crate::persistence::courses::CourseRepository`].

use crate::error::{CoreError, Result};
use crate::ingestion::SourceDocument;
use crate::merge::SlideVideoMapEntry;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct DocumentRow {
    document: Json<SourceDocument>,
}

#[derive(sqlx::FromRow)]
struct MappingRow {
    slide_number: i64,
    video_timecode: String,
}

pub struct MaterialRepository {
    pool: PgPool,
    tenant_id: Uuid,
}

impl MaterialRepository {
    pub fn new(pool: PgPool, tenant_id: Uuid) -> Self {
        Self { pool, tenant_id }
    }

    async fn assert_owned(&self, course_id: Uuid) -> Result<()> {
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM courses WHERE id = $1 AND tenant_id = $2")
                .bind(course_id)
                .bind(self.tenant_id)
                .fetch_optional(&self.pool)
                .await?;

        exists
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("course {course_id} not found")))
    }

    pub async fn add_document(&self, course_id: Uuid, document: &SourceDocument) -> Result<()> {
        self.assert_owned(course_id).await?;

        sqlx::query(
            "INSERT INTO course_materials (id, course_id, document, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(Json(document))
        .bind(document.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_documents(&self, course_id: Uuid) -> Result<Vec<SourceDocument>> {
        self.assert_owned(course_id).await?;

        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT document FROM course_materials WHERE course_id = $1 ORDER BY created_at",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.document.0).collect())
    }

    /// Replaces the course's slide-video mapping wholesale; the endpoint
    /// contract treats a mapping submission as authoritative, not additive.
    pub async fn set_slide_mappings(&self, course_id: Uuid, mappings: &[SlideVideoMapEntry]) -> Result<()> {
        self.assert_owned(course_id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM course_slide_mappings WHERE course_id = $1")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;

        for mapping in mappings {
            sqlx::query(
                "INSERT INTO course_slide_mappings (course_id, slide_number, video_timecode) VALUES ($1, $2, $3)",
            )
            .bind(course_id)
            .bind(mapping.slide_number)
            .bind(&mapping.video_timecode)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_slide_mappings(&self, course_id: Uuid) -> Result<Vec<SlideVideoMapEntry>> {
        self.assert_owned(course_id).await?;

        let rows = sqlx::query_as::<_, MappingRow>(
            "SELECT slide_number, video_timecode FROM course_slide_mappings WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| SlideVideoMapEntry { slide_number: r.slide_number, video_timecode: r.video_timecode })
            .collect())
    }
}
