use anyhow::Context;
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::GradeError;
use crate::models::{FetchedRecord, GradedComponent, ModuleInfo};

const MAX_MODULE_ID_LEN: usize = 64;

/// Read-only source of module data. Implementations either return the
/// complete record set for a module or fail.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch_module(&self, module_id: &str) -> Result<ModuleInfo, GradeError>;

    async fn fetch_records(&self, module_id: &str) -> Result<Vec<FetchedRecord>, GradeError>;
}

pub fn validate_module_id(module_id: &str) -> Result<(), GradeError> {
    let well_formed = !module_id.is_empty()
        && module_id.len() <= MAX_MODULE_ID_LEN
        && module_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if well_formed {
        Ok(())
    } else {
        Err(GradeError::InvalidArgument(module_id.to_string()))
    }
}

/// Fetcher over any sqlx backend installed in the `Any` driver registry
/// (Postgres in production, SQLite for local files and tests).
#[derive(Clone)]
pub struct SqlRecordFetcher {
    pool: AnyPool,
}

impl SqlRecordFetcher {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordFetcher for SqlRecordFetcher {
    async fn fetch_module(&self, module_id: &str) -> Result<ModuleInfo, GradeError> {
        validate_module_id(module_id)?;

        let row = sqlx::query(
            r#"
            SELECT m.module_id, m.title, sec.section_name
            FROM modules m
            LEFT JOIN sections sec ON sec.section_id = m.section_id
            WHERE m.module_id = $1
            "#,
        )
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| GradeError::ModuleNotFound(module_id.to_string()))?;

        let components = sqlx::query(
            "SELECT component_id, category, weight FROM components \
             WHERE module_id = $1 ORDER BY component_id",
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<GradedComponent, sqlx::Error> {
            Ok(GradedComponent {
                component_id: row.try_get("component_id")?,
                category: row.try_get("category")?,
                weight: row.try_get("weight")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

        Ok(ModuleInfo {
            module_id: row.try_get("module_id")?,
            title: row.try_get("title")?,
            section: row.try_get("section_name")?,
            components,
        })
    }

    async fn fetch_records(&self, module_id: &str) -> Result<Vec<FetchedRecord>, GradeError> {
        validate_module_id(module_id)?;

        let rows = sqlx::query(
            r#"
            SELECT st.student_id, st.full_name, c.component_id, c.category, c.weight,
                   m.title, s.mark, s.attempt_seq
            FROM scores s
            JOIN components c ON c.component_id = s.component_id
            JOIN modules m ON m.module_id = c.module_id
            JOIN students st ON st.student_id = s.student_id
            WHERE c.module_id = $1
            "#,
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(FetchedRecord {
                student_id: row.try_get("student_id")?,
                student_name: row.try_get("full_name")?,
                component_id: row.try_get("component_id")?,
                category: row.try_get("category")?,
                weight: Some(row.try_get("weight")?),
                module_title: row.try_get("title")?,
                mark: row.try_get("mark")?,
                sequence: row.try_get("attempt_seq")?,
            });
        }

        debug!(module_id, count = records.len(), "fetched score records");
        Ok(records)
    }
}

pub async fn init_db(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &AnyPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sections (section_id, section_name)
        VALUES ($1, $2)
        ON CONFLICT (section_id) DO UPDATE SET section_name = excluded.section_name
        "#,
    )
    .bind("SEC1")
    .bind("Morning Session")
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO modules (module_id, title, section_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (module_id) DO UPDATE
        SET title = excluded.title, section_id = excluded.section_id
        "#,
    )
    .bind("CS101")
    .bind("Introduction to Programming")
    .bind("SEC1")
    .execute(pool)
    .await?;

    let students = vec![
        ("S1", "John Doe", "john@example.com"),
        ("S2", "Jane Smith", "jane@example.com"),
        ("S3", "Bob Wilson", "bob@example.com"),
    ];

    for (id, name, email) in students {
        upsert_student(pool, id, name, Some(email)).await?;
    }

    let components = vec![
        ("CS101-HW", "homework", 30.0),
        ("CS101-TEST", "tests", 40.0),
        ("CS101-PROJ", "projects", 30.0),
    ];

    for (id, category, weight) in components {
        sqlx::query(
            r#"
            INSERT INTO components (component_id, module_id, category, weight)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (component_id) DO UPDATE
            SET category = excluded.category, weight = excluded.weight
            "#,
        )
        .bind(id)
        .bind("CS101")
        .bind(category)
        .bind(weight)
        .execute(pool)
        .await?;
    }

    let scores = vec![
        ("seed-001", "S1", "CS101-HW", 85.0),
        ("seed-002", "S1", "CS101-TEST", 92.0),
        ("seed-003", "S1", "CS101-PROJ", 88.0),
        ("seed-004", "S2", "CS101-HW", 90.0),
        ("seed-005", "S2", "CS101-TEST", 85.0),
        ("seed-006", "S2", "CS101-PROJ", 95.0),
        ("seed-007", "S3", "CS101-HW", 78.0),
        ("seed-008", "S3", "CS101-TEST", 88.0),
        ("seed-009", "S3", "CS101-PROJ", 84.0),
    ];

    for (source_key, student_id, component_id, mark) in scores {
        insert_score(pool, student_id, component_id, Some(mark), None, source_key).await?;
    }

    info!("seeded module CS101");
    Ok(())
}

async fn upsert_student(
    pool: &AnyPool,
    student_id: &str,
    full_name: &str,
    email: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO students (student_id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (student_id) DO UPDATE
        SET full_name = excluded.full_name, email = COALESCE(excluded.email, students.email)
        "#,
    )
    .bind(student_id)
    .bind(full_name)
    .bind(email)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns `false` when a score with the same `source_key` already exists.
async fn insert_score(
    pool: &AnyPool,
    student_id: &str,
    component_id: &str,
    mark: Option<f64>,
    attempt_seq: Option<i64>,
    source_key: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO scores (score_id, student_id, component_id, mark, attempt_seq, source_key)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(student_id)
    .bind(component_id)
    .bind(mark)
    .bind(attempt_seq)
    .bind(source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn import_csv(pool: &AnyPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        full_name: String,
        component_id: String,
        mark: Option<f64>,
        attempt_seq: Option<i64>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed row {}", line + 1))?;
        upsert_student(pool, &row.student_id, &row.full_name, None).await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        if insert_score(
            pool,
            &row.student_id,
            &row.component_id,
            row.mark,
            row.attempt_seq,
            &source_key,
        )
        .await?
        {
            inserted += 1;
        }
    }

    Ok(inserted)
}
