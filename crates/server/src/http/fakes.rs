use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use jobchat_contracts::{Application, Job, NewJob, Row};
use jobchat_policy::ValidatedQuery;
use jobchat_store::{ExecutionFailure, JobRepository, QueryStore, StoreError};

use crate::provider::{CompletionProvider, CompletionRequest, CompletionStage, ProviderFailure};

/// Answers generation with a fixed text and summarization with "summary".
pub(crate) struct ScriptedProvider {
    generation: String,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn generating(text: &str) -> Self {
        Self {
            generation: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(match request.stage {
            CompletionStage::Generation => self.generation.clone(),
            CompletionStage::Summarization => "summary".to_string(),
        })
    }
}

/// In-memory stand-in for both store traits.
pub(crate) struct MemoryStore {
    chat_rows: Result<Vec<Row>, ExecutionFailure>,
    executed: Mutex<Vec<String>>,
    jobs: Mutex<Vec<Job>>,
    applications: Mutex<Vec<Application>>,
    healthy: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            chat_rows: Ok(Vec::new()),
            executed: Mutex::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            applications: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub(crate) fn with_chat_rows(rows: Vec<Row>) -> Self {
        Self {
            chat_rows: Ok(rows),
            ..Self::default()
        }
    }

    pub(crate) fn failing_chat(failure: ExecutionFailure) -> Self {
        Self {
            chat_rows: Err(failure),
            ..Self::default()
        }
    }

    pub(crate) fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            ..Self::default()
        }
    }

    pub(crate) fn rows(jobs: &[(&str, &str)]) -> Vec<Row> {
        jobs.iter()
            .enumerate()
            .map(|(idx, (title, location))| {
                let mut row = Row::new();
                row.insert("id".to_string(), serde_json::json!(idx + 1));
                row.insert("title".to_string(), serde_json::json!(title));
                row.insert("location".to_string(), serde_json::json!(location));
                row
            })
            .collect()
    }

    pub(crate) fn job(id: i32, title: &str, location: &str) -> Job {
        Job {
            id,
            title: title.to_string(),
            description: format!("{} role", title),
            location: location.to_string(),
            salary: 900_000.0,
            contact_email: "hiring@example.com".to_string(),
        }
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("lock").clone()
    }

    pub(crate) fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().expect("lock").clone()
    }

    pub(crate) fn applications(&self) -> Vec<Application> {
        self.applications.lock().expect("lock").clone()
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn fetch_rows(&self, query: &ValidatedQuery) -> Result<Vec<Row>, ExecutionFailure> {
        self.executed
            .lock()
            .expect("lock")
            .push(query.sql().to_string());
        self.chat_rows.clone()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Timeout)
        }
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn list_all_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs())
    }

    async fn list_jobs(
        &self,
        page: u32,
        limit: u32,
        location: Option<&str>,
    ) -> Result<Vec<Job>, StoreError> {
        let needle = location.map(str::to_lowercase);
        let offset = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        Ok(self
            .jobs()
            .into_iter()
            .filter(|job| match &needle {
                Some(needle) => job.location.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .skip(offset)
            .take(limit as usize)
            .collect())
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().expect("lock");
        let id = jobs.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        let created = Job {
            id,
            title: job.title.clone(),
            description: job.description.clone(),
            location: job.location.clone(),
            salary: job.salary,
            contact_email: job.contact_email.clone(),
        };
        jobs.push(created.clone());
        Ok(created)
    }

    async fn update_job(&self, id: i32, job: &NewJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().expect("lock");
        let existing = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(StoreError::NotFound)?;
        existing.title = job.title.clone();
        existing.description = job.description.clone();
        existing.location = job.location.clone();
        existing.salary = job.salary;
        existing.contact_email = job.contact_email.clone();
        Ok(())
    }

    async fn delete_job(&self, id: i32) -> Result<(), StoreError> {
        if self
            .applications
            .lock()
            .expect("lock")
            .iter()
            .any(|a| a.job_id == id)
        {
            return Err(StoreError::HasApplications);
        }
        let mut jobs = self.jobs.lock().expect("lock");
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_application(&self, application: &Application) -> Result<(), StoreError> {
        if !self
            .jobs
            .lock()
            .expect("lock")
            .iter()
            .any(|j| j.id == application.job_id)
        {
            return Err(StoreError::UnknownJob);
        }
        self.applications
            .lock()
            .expect("lock")
            .push(application.clone());
        Ok(())
    }
}
