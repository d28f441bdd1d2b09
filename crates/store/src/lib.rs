use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use jobchat_contracts::{Application, Job, NewJob, Row, SchemaDescriptor};
use jobchat_policy::ValidatedQuery;
use sqlx::Row as _;
use sqlx::postgres::PgPoolOptions;

const MIGRATE_TIMEOUT: Duration = Duration::from_secs(10);
const CRUD_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str =
    "id, title, description, location, salary::float8 AS salary, contact_email";

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    NotFound,
    UnknownJob,
    HasApplications,
    SchemaDrift(String),
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::NotFound => write!(f, "job not found"),
            StoreError::UnknownJob => write!(f, "application references an unknown job"),
            StoreError::HasApplications => write!(f, "job still has applications"),
            StoreError::SchemaDrift(detail) => write!(f, "schema drift: {}", detail),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    SyntaxRejected,
    ConstraintViolated,
    Timeout,
    Unknown,
}

impl ExecutionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionErrorKind::SyntaxRejected => "syntax_rejected",
            ExecutionErrorKind::ConstraintViolated => "constraint_violated",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::Unknown => "unknown",
        }
    }
}

/// A validated statement the store refused or could not finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionFailure {
    fn timeout() -> Self {
        Self {
            kind: ExecutionErrorKind::Timeout,
            message: "statement did not finish before the query timeout".to_string(),
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ExecutionFailure {}

impl From<sqlx::Error> for ExecutionFailure {
    fn from(value: sqlx::Error) -> Self {
        Self {
            kind: classify(&value),
            message: value.to_string(),
        }
    }
}

/// Maps a driver error onto the execution taxonomy by SQLSTATE class.
pub fn classify(err: &sqlx::Error) -> ExecutionErrorKind {
    match err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("57014") => ExecutionErrorKind::Timeout,
            Some(code) if code.starts_with("42") => ExecutionErrorKind::SyntaxRejected,
            Some(code) if code.starts_with("23") || code.starts_with("25") => {
                ExecutionErrorKind::ConstraintViolated
            }
            _ => ExecutionErrorKind::Unknown,
        },
        sqlx::Error::PoolTimedOut => ExecutionErrorKind::Timeout,
        _ => ExecutionErrorKind::Unknown,
    }
}

/// Read side used by the chat pipeline.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Runs `query` and returns each row as a JSON object, in store order.
    async fn fetch_rows(&self, query: &ValidatedQuery) -> Result<Vec<Row>, ExecutionFailure>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Parameterized CRUD behind the listing, application and admin routes.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn list_all_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn list_jobs(
        &self,
        page: u32,
        limit: u32,
        location: Option<&str>,
    ) -> Result<Vec<Job>, StoreError>;

    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError>;

    async fn update_job(&self, id: i32, job: &NewJob) -> Result<(), StoreError>;

    async fn delete_job(&self, id: i32) -> Result<(), StoreError>;

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub db_url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

#[derive(Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub async fn connect(options: &StoreOptions) -> Result<Self, StoreError> {
        let pool = tokio::time::timeout(
            options.connect_timeout,
            PgPoolOptions::new()
                .max_connections(options.max_connections)
                .acquire_timeout(options.connect_timeout)
                .connect(&options.db_url),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self::from_pool(pool, options.query_timeout))
    }

    pub async fn connect_and_migrate(options: &StoreOptions) -> Result<Self, StoreError> {
        let store = Self::connect(options).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: sqlx::PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(MIGRATE_TIMEOUT, migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// Fails when a column the generation prompt advertises is missing from
    /// the live table.
    pub async fn verify_schema(&self, schema: &SchemaDescriptor) -> Result<(), StoreError> {
        let rows = tokio::time::timeout(
            CRUD_TIMEOUT,
            sqlx::query(
                "SELECT column_name \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1",
            )
            .bind(schema.table)
            .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        if rows.is_empty() {
            return Err(StoreError::SchemaDrift(format!(
                "table `{}` does not exist in current schema",
                schema.table
            )));
        }

        let available = rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("column_name").ok())
            .map(|c| c.to_ascii_lowercase())
            .collect::<BTreeSet<_>>();

        let missing = missing_columns(schema, &available);
        if !missing.is_empty() {
            return Err(StoreError::SchemaDrift(format!(
                "table `{}` is missing columns [{}]",
                schema.table,
                missing.join(", ")
            )));
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl QueryStore for PgStore {
    async fn fetch_rows(&self, query: &ValidatedQuery) -> Result<Vec<Row>, ExecutionFailure> {
        let sql = bounded_sql(query);
        let timeout_str = format!("{}ms", self.query_timeout.as_millis());

        // Dropping this future drops the transaction guard, which rolls back
        // and returns the connection to the pool.
        let values = tokio::time::timeout(self.query_timeout, async {
            let mut tx = self.pool.begin().await?;

            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await?;

            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(&timeout_str)
                .execute(&mut *tx)
                .await?;

            let values = sqlx::query_scalar::<_, serde_json::Value>(&sql)
                .fetch_all(&mut *tx)
                .await?;

            tx.rollback().await?;
            Ok::<_, sqlx::Error>(values)
        })
        .await
        .map_err(|_| ExecutionFailure::timeout())??;

        rows_from_json(values)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(CRUD_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }
}

#[async_trait]
impl JobRepository for PgStore {
    async fn list_all_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let sql = format!("SELECT {} FROM jobs ORDER BY id", JOB_COLUMNS);
        let rows = tokio::time::timeout(CRUD_TIMEOUT, sqlx::query(&sql).fetch_all(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;

        rows.iter().map(job_from_row).collect()
    }

    async fn list_jobs(
        &self,
        page: u32,
        limit: u32,
        location: Option<&str>,
    ) -> Result<Vec<Job>, StoreError> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let pattern = location
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| format!("%{}%", escape_like(l)));

        let sql = format!(
            "SELECT {} FROM jobs \
             WHERE ($1::text IS NULL OR location ILIKE $1) \
             ORDER BY id LIMIT $2 OFFSET $3",
            JOB_COLUMNS
        );
        let rows = tokio::time::timeout(
            CRUD_TIMEOUT,
            sqlx::query(&sql)
                .bind(pattern)
                .bind(i64::from(limit))
                .bind(offset)
                .fetch_all(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        rows.iter().map(job_from_row).collect()
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError> {
        let sql = format!(
            "INSERT INTO jobs (title, description, location, salary, contact_email) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            JOB_COLUMNS
        );
        let row = tokio::time::timeout(
            CRUD_TIMEOUT,
            sqlx::query(&sql)
                .bind(&job.title)
                .bind(&job.description)
                .bind(&job.location)
                .bind(job.salary)
                .bind(&job.contact_email)
                .fetch_one(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        job_from_row(&row)
    }

    async fn update_job(&self, id: i32, job: &NewJob) -> Result<(), StoreError> {
        let result = tokio::time::timeout(
            CRUD_TIMEOUT,
            sqlx::query(
                "UPDATE jobs SET title = $1, description = $2, location = $3, salary = $4, contact_email = $5 WHERE id = $6",
            )
            .bind(&job.title)
            .bind(&job.description)
            .bind(&job.location)
            .bind(job.salary)
            .bind(&job.contact_email)
            .bind(id)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_job(&self, id: i32) -> Result<(), StoreError> {
        let result = tokio::time::timeout(
            CRUD_TIMEOUT,
            sqlx::query("DELETE FROM jobs WHERE id = $1")
                .bind(id)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|err| match_foreign_key(err, StoreError::HasApplications))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError> {
        tokio::time::timeout(
            CRUD_TIMEOUT,
            sqlx::query(
                "INSERT INTO applications (job_id, candidate_name, contact) VALUES ($1, $2, $3)",
            )
            .bind(application.job_id)
            .bind(&application.candidate_name)
            .bind(&application.contact)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)?
        .map_err(|err| match_foreign_key(err, StoreError::UnknownJob))?;

        Ok(())
    }
}

fn match_foreign_key(err: sqlx::Error, mapped: StoreError) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => mapped,
        _ => StoreError::Sqlx(err),
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    Ok(Job {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        salary: row.try_get("salary")?,
        contact_email: row.try_get("contact_email")?,
    })
}

// The outer LIMIT holds even if the statement's own bound sits in a subquery
// or set operation.
fn bounded_sql(query: &ValidatedQuery) -> String {
    format!(
        "SELECT row_to_json(q) FROM ({}) AS q LIMIT {}",
        query.sql(),
        query.row_bound()
    )
}

fn rows_from_json(values: Vec<serde_json::Value>) -> Result<Vec<Row>, ExecutionFailure> {
    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(ExecutionFailure {
                kind: ExecutionErrorKind::Unknown,
                message: "store returned a row that is not a JSON object".to_string(),
            }),
        })
        .collect()
}

fn missing_columns(schema: &SchemaDescriptor, available: &BTreeSet<String>) -> Vec<String> {
    schema
        .column_names()
        .filter(|name| !available.contains(*name))
        .map(str::to_string)
        .collect()
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
