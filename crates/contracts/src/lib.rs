use serde::{Deserialize, Serialize};

pub mod canonical;

/// Hard ceiling on the number of rows handed to the summarizer.
pub const MAX_ROW_CAP: usize = 20;

/// Rows beyond this count are not detailed individually in a narrative.
pub const DEFAULT_DISPLAY_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Identifier,
    ShortText,
    LongText,
    Location,
    MoneyInr,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub constraints: &'static [&'static str],
}

/// Description of the one relation the chat pipeline may query.
///
/// Must match the `jobs` migration. The store compares column names and
/// nullability against the live table at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaDescriptor {
    pub table: &'static str,
    pub version: u32,
    pub columns: &'static [ColumnDescriptor],
}

pub static JOBS_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    table: "jobs",
    version: 1,
    columns: &[
        ColumnDescriptor {
            name: "id",
            sql_type: "SERIAL",
            semantic_type: SemanticType::Identifier,
            nullable: false,
            constraints: &["PRIMARY KEY"],
        },
        ColumnDescriptor {
            name: "title",
            sql_type: "VARCHAR(255)",
            semantic_type: SemanticType::ShortText,
            nullable: false,
            constraints: &[],
        },
        ColumnDescriptor {
            name: "description",
            sql_type: "TEXT",
            semantic_type: SemanticType::LongText,
            nullable: false,
            constraints: &[],
        },
        ColumnDescriptor {
            name: "location",
            sql_type: "VARCHAR(255)",
            semantic_type: SemanticType::Location,
            nullable: false,
            constraints: &[],
        },
        ColumnDescriptor {
            name: "salary",
            sql_type: "NUMERIC(10, 2)",
            semantic_type: SemanticType::MoneyInr,
            nullable: false,
            constraints: &["CHECK (salary >= 0)"],
        },
        ColumnDescriptor {
            name: "contact_email",
            sql_type: "VARCHAR(255)",
            semantic_type: SemanticType::Email,
            nullable: false,
            constraints: &[],
        },
    ],
};

impl SchemaDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// DDL-shaped rendering embedded verbatim in generation prompts.
    pub fn render(&self) -> String {
        let mut out = format!(
            "-- {} schema v{} (PostgreSQL)\nCREATE TABLE {} (\n",
            self.table, self.version, self.table
        );

        for (idx, column) in self.columns.iter().enumerate() {
            out.push_str("    ");
            out.push_str(column.name);
            out.push(' ');
            out.push_str(column.sql_type);
            if !column.nullable {
                out.push_str(" NOT NULL");
            }
            for constraint in column.constraints {
                out.push(' ');
                out.push_str(constraint);
            }
            if idx + 1 != self.columns.len() {
                out.push(',');
            }
            out.push_str(" -- ");
            out.push_str(semantic_hint(column.semantic_type));
            out.push('\n');
        }

        out.push_str(");");
        out
    }

    pub fn fingerprint(&self) -> String {
        canonical::hash_canonical_json(&serde_json::to_value(self).unwrap_or_default())
    }
}

fn semantic_hint(semantic_type: SemanticType) -> &'static str {
    match semantic_type {
        SemanticType::Identifier => "job identifier",
        SemanticType::ShortText => "job title",
        SemanticType::LongText => "free-text job description",
        SemanticType::Location => "city or region, free text",
        SemanticType::MoneyInr => "salary in Indian rupees",
        SemanticType::Email => "recruiter contact email",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    GenerationFailed,
    ExtractionFailed,
    ValidationFailed,
    ExecutionFailed,
    SummarizationFailed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::GenerationFailed => "GenerationFailed",
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::ValidationFailed => "ValidationFailed",
            ErrorKind::ExecutionFailed => "ExecutionFailed",
            ErrorKind::SummarizationFailed => "SummarizationFailed",
        }
    }

    /// Failures caused by the request or by what the model produced for it,
    /// as opposed to an unavailable provider or store.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidRequest | ErrorKind::ExtractionFailed | ErrorKind::ValidationFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatResponse {
    Success { narrative: String },
    Failure { reason: ErrorKind, detail: String },
}

impl ChatResponse {
    pub fn outcome_label(&self) -> &'static str {
        match self {
            ChatResponse::Success { .. } => "success",
            ChatResponse::Failure { reason, .. } => reason.as_str(),
        }
    }
}

pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows retrieved for one chat request, never more than [`MAX_ROW_CAP`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    rows: Vec<Row>,
    matched_rows: usize,
    truncated: bool,
}

impl ResultSet {
    pub fn bounded(mut rows: Vec<Row>, cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_ROW_CAP);
        let matched_rows = rows.len();
        let truncated = matched_rows > cap;
        rows.truncate(cap);
        Self {
            rows,
            matched_rows,
            truncated,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn matched_rows(&self) -> usize {
        self.matched_rows
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub location: String,
    pub salary: f64,
    pub contact_email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    pub description: String,
    pub location: String,
    pub salary: f64,
    pub contact_email: String,
}

impl NewJob {
    /// Largest value a NUMERIC(10, 2) column holds.
    pub const MAX_SALARY: f64 = 99_999_999.99;

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.trim().is_empty() {
            return Err("title must be non-empty");
        }
        if self.description.trim().is_empty() {
            return Err("description must be non-empty");
        }
        if self.location.trim().is_empty() {
            return Err("location must be non-empty");
        }
        if !self.salary.is_finite() || !(0.0..=Self::MAX_SALARY).contains(&self.salary) {
            return Err("salary out of range");
        }
        let email = self.contact_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err("contact_email must be an email address");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApplicationRequest {
    #[serde(default)]
    pub job_id: Option<i32>,
    #[serde(default)]
    pub candidate_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub job_id: i32,
    pub candidate_name: String,
    pub contact: String,
}

impl ApplicationRequest {
    pub fn into_application(self) -> Result<Application, &'static str> {
        let non_empty = |v: Option<String>| {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        };

        match (
            self.job_id,
            non_empty(self.candidate_name),
            non_empty(self.contact),
        ) {
            (Some(job_id), Some(candidate_name), Some(contact)) if job_id > 0 => Ok(Application {
                job_id,
                candidate_name,
                contact,
            }),
            _ => Err("All fields are required"),
        }
    }
}
