//! Course/Module/Lesson persistence — the persisted counterpart of the
//! `CourseStructure` the architect returns. Unlike the ledger repository,
//! this one never accepts a tenant-less caller: every row it touches is
//! owned by exactly one tenant, and every predicate carries `tenant_id`.
//!
//! Concepts and exercises are stored as JSON columns on their owning lesson
//! row rather than further normalized tables — they are read and written
//! only as part of their lesson, never queried independently, so a fourth
//! and fifth join level would buy nothing.

use crate::architect::{CourseConcept, CourseExercise, CourseLesson, CourseModule, CourseStructure, SlideRange};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Course {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ModuleRow {
    id: Uuid,
    title: String,
    order_index: i64,
}

#[derive(sqlx::FromRow)]
struct LessonRow {
    id: Uuid,
    module_id: Uuid,
    title: String,
    order_index: i64,
    video_start_timecode: Option<String>,
    video_end_timecode: Option<String>,
    slide_range_start: Option<i64>,
    slide_range_end: Option<i64>,
    concepts: Json<Vec<CourseConcept>>,
    exercises: Json<Vec<CourseExercise>>,
}

impl LessonRow {
    fn into_lesson(self) -> CourseLesson {
        CourseLesson {
            title: self.title,
            order: self.order_index,
            video_start_timecode: self.video_start_timecode,
            video_end_timecode: self.video_end_timecode,
            slide_range: match (self.slide_range_start, self.slide_range_end) {
                (Some(start), Some(end)) => Some(SlideRange { start, end }),
                _ => None,
            },
            concepts: self.concepts.0,
            exercises: self.exercises.0,
        }
    }
}

/// A fully-assembled course with its modules/lessons, scoped to the caller's
/// tenant at every level.
#[derive(Debug, Clone, Serialize)]
pub struct CourseDetail {
    pub course: Course,
    pub structure: CourseStructure,
}

pub struct CourseRepository {
    pool: PgPool,
    tenant_id: Uuid,
}

impl CourseRepository {
    pub fn new(pool: PgPool, tenant_id: Uuid) -> Self {
        Self { pool, tenant_id }
    }

    pub async fn create_course(&self, title: &str, description: &str) -> Result<Course> {
        sqlx::query_as::<_, Course>(
            r#"
            INSERT INTO courses (id, tenant_id, title, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, tenant_id, title, description, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.tenant_id)
        .bind(title)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Replaces every module/lesson under `course_id` with the given
    /// structure, inside one transaction. Fails "not found" rather than
    /// "forbidden" if `course_id` belongs to another tenant.
    pub async fn save_structure(&self, course_id: Uuid, structure: &CourseStructure) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE courses SET title = $1, description = $2 WHERE id = $3 AND tenant_id = $4",
        )
        .bind(&structure.title)
        .bind(&structure.description)
        .bind(course_id)
        .bind(self.tenant_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("course {course_id} not found")));
        }

        sqlx::query(
            "DELETE FROM course_modules WHERE course_id = $1",
        )
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

        for module in &structure.modules {
            let module_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO course_modules (id, course_id, title, order_index)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(course_id)
            .bind(&module.title)
            .bind(module.order)
            .fetch_one(&mut *tx)
            .await?;

            for lesson in &module.lessons {
                let (slide_start, slide_end) = lesson
                    .slide_range
                    .as_ref()
                    .map(|r| (Some(r.start), Some(r.end)))
                    .unwrap_or((None, None));

                sqlx::query(
                    r#"
                    INSERT INTO course_lessons
                        (id, module_id, title, order_index, video_start_timecode,
                         video_end_timecode, slide_range_start, slide_range_end,
                         concepts, exercises)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(module_id)
                .bind(&lesson.title)
                .bind(lesson.order)
                .bind(&lesson.video_start_timecode)
                .bind(&lesson.video_end_timecode)
                .bind(slide_start)
                .bind(slide_end)
                .bind(Json(&lesson.concepts))
                .bind(Json(&lesson.exercises))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_course(&self, course_id: Uuid) -> Result<Option<CourseDetail>> {
        let Some(course) = sqlx::query_as::<_, Course>(
            "SELECT id, tenant_id, title, description, created_at FROM courses WHERE id = $1 AND tenant_id = $2",
        )
        .bind(course_id)
        .bind(self.tenant_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let modules = sqlx::query_as::<_, ModuleRow>(
            "SELECT id, title, order_index FROM course_modules WHERE course_id = $1 ORDER BY order_index",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        let mut course_modules = Vec::with_capacity(modules.len());
        for module in modules {
            let lessons = sqlx::query_as::<_, LessonRow>(
                r#"
                SELECT id, module_id, title, order_index, video_start_timecode, video_end_timecode,
                       slide_range_start, slide_range_end, concepts, exercises
                FROM course_lessons
                WHERE module_id = $1
                ORDER BY order_index
                "#,
            )
            .bind(module.id)
            .fetch_all(&self.pool)
            .await?;

            course_modules.push(CourseModule {
                title: module.title,
                order: module.order_index,
                lessons: lessons.into_iter().map(LessonRow::into_lesson).collect(),
            });
        }

        let structure = CourseStructure {
            title: course.title.clone(),
            description: course.description.clone(),
            modules: course_modules,
        };

        Ok(Some(CourseDetail { course, structure }))
    }

    /// Looks up a single lesson, scoped through its module's course to this
    /// repository's tenant. Returns `None` (not an error) both when the
    /// lesson truly doesn't exist and when it belongs to another tenant.
    pub async fn get_lesson(&self, course_id: Uuid, lesson_id: Uuid) -> Result<Option<CourseLesson>> {
        let row = sqlx::query_as::<_, LessonRow>(
            r#"
            SELECT l.id, l.module_id, l.title, l.order_index, l.video_start_timecode,
                   l.video_end_timecode, l.slide_range_start, l.slide_range_end,
                   l.concepts, l.exercises
            FROM course_lessons l
            JOIN course_modules m ON m.id = l.module_id
            JOIN courses c ON c.id = m.course_id
            WHERE l.id = $1 AND m.course_id = $2 AND c.tenant_id = $3
            "#,
        )
        .bind(lesson_id)
        .bind(course_id)
        .bind(self.tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LessonRow::into_lesson))
    }
}
