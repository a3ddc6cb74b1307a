//! Job, unit, and result storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use mediaproc_core::{JobId, OwnerId, UnitId};

use super::types::{Job, Unit, UnitResult};

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("unit not found: {0}")]
    UnitNotFound(UnitId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {job_id} already has a unit with ordinal {ordinal}")]
    DuplicateOrdinal { job_id: JobId, ordinal: u64 },
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence boundary for jobs, units, and results.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert_job(&self, job: Job) -> Result<JobId, StoreError>;

    async fn load_job(&self, job_id: JobId) -> Result<Job, StoreError>;

    /// Persist a job update. Status regressions are rejected.
    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;

    /// All jobs, oldest first, optionally restricted to one owner.
    async fn list_jobs(&self, owner: Option<OwnerId>) -> Result<Vec<Job>, StoreError>;

    async fn insert_unit(&self, unit: Unit) -> Result<UnitId, StoreError>;

    /// Units of a job in ordinal order.
    async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>, StoreError>;

    async fn save_unit(&self, unit: &Unit) -> Result<(), StoreError>;

    /// Record a unit's result. A second result for the same unit replaces the first.
    async fn create_result(&self, result: UnitResult) -> Result<(), StoreError>;

    /// Results of a job in ordinal order.
    async fn list_results(&self, job_id: JobId) -> Result<Vec<UnitResult>, StoreError>;
}

#[derive(Debug, Default)]
struct JobRows {
    units: BTreeMap<u64, Unit>,
    results: BTreeMap<u64, UnitResult>,
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMediaStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    rows: RwLock<HashMap<JobId, JobRows>>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn jobs_read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, StoreError> {
        self.jobs.read().map_err(|_| poisoned())
    }

    fn jobs_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, StoreError> {
        self.jobs.write().map_err(|_| poisoned())
    }

    fn rows_read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, JobRows>>, StoreError> {
        self.rows.read().map_err(|_| poisoned())
    }

    fn rows_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, JobRows>>, StoreError> {
        self.rows.write().map_err(|_| poisoned())
    }

    fn ensure_job(&self, job_id: JobId) -> Result<(), StoreError> {
        if self.jobs_read()?.contains_key(&job_id) {
            Ok(())
        } else {
            Err(StoreError::JobNotFound(job_id))
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl MediaStore for InMemoryMediaStore {
    async fn insert_job(&self, job: Job) -> Result<JobId, StoreError> {
        let mut jobs = self.jobs_write()?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn load_job(&self, job_id: JobId) -> Result<Job, StoreError> {
        self.jobs_read()?
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs_write()?;
        let Some(current) = jobs.get_mut(&job.id) else {
            return Err(StoreError::JobNotFound(job.id));
        };
        if current.status != job.status && !current.status.can_advance_to(job.status) {
            return Err(StoreError::Conflict(format!(
                "job {} is {}, refusing to store {}",
                job.id, current.status, job.status
            )));
        }
        *current = job.clone();
        Ok(())
    }

    async fn list_jobs(&self, owner: Option<OwnerId>) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<_> = self
            .jobs_read()?
            .values()
            .filter(|j| owner.is_none_or(|o| j.owner_id == o))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }

    async fn insert_unit(&self, unit: Unit) -> Result<UnitId, StoreError> {
        self.ensure_job(unit.job_id)?;
        let mut rows = self.rows_write()?;
        let entry = rows.entry(unit.job_id).or_default();
        if entry.units.contains_key(&unit.ordinal) {
            return Err(StoreError::DuplicateOrdinal {
                job_id: unit.job_id,
                ordinal: unit.ordinal,
            });
        }
        let id = unit.id;
        entry.units.insert(unit.ordinal, unit);
        Ok(id)
    }

    async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>, StoreError> {
        self.ensure_job(job_id)?;
        Ok(self
            .rows_read()?
            .get(&job_id)
            .map(|r| r.units.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_unit(&self, unit: &Unit) -> Result<(), StoreError> {
        let mut rows = self.rows_write()?;
        let stored = rows
            .get_mut(&unit.job_id)
            .and_then(|r| r.units.get_mut(&unit.ordinal))
            .filter(|u| u.id == unit.id)
            .ok_or(StoreError::UnitNotFound(unit.id))?;
        *stored = unit.clone();
        Ok(())
    }

    async fn create_result(&self, result: UnitResult) -> Result<(), StoreError> {
        let mut rows = self.rows_write()?;
        let entry = rows
            .get_mut(&result.job_id)
            .filter(|r| {
                r.units
                    .get(&result.ordinal)
                    .is_some_and(|u| u.id == result.unit_id)
            })
            .ok_or(StoreError::UnitNotFound(result.unit_id))?;
        entry.results.insert(result.ordinal, result);
        Ok(())
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<UnitResult>, StoreError> {
        self.ensure_job(job_id)?;
        Ok(self
            .rows_read()?
            .get(&job_id)
            .map(|r| r.results.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl<S: MediaStore + ?Sized> MediaStore for Arc<S> {
    async fn insert_job(&self, job: Job) -> Result<JobId, StoreError> {
        (**self).insert_job(job).await
    }

    async fn load_job(&self, job_id: JobId) -> Result<Job, StoreError> {
        (**self).load_job(job_id).await
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        (**self).save_job(job).await
    }

    async fn list_jobs(&self, owner: Option<OwnerId>) -> Result<Vec<Job>, StoreError> {
        (**self).list_jobs(owner).await
    }

    async fn insert_unit(&self, unit: Unit) -> Result<UnitId, StoreError> {
        (**self).insert_unit(unit).await
    }

    async fn list_units(&self, job_id: JobId) -> Result<Vec<Unit>, StoreError> {
        (**self).list_units(job_id).await
    }

    async fn save_unit(&self, unit: &Unit) -> Result<(), StoreError> {
        (**self).save_unit(unit).await
    }

    async fn create_result(&self, result: UnitResult) -> Result<(), StoreError> {
        (**self).create_result(result).await
    }

    async fn list_results(&self, job_id: JobId) -> Result<Vec<UnitResult>, StoreError> {
        (**self).list_results(job_id).await
    }
}
