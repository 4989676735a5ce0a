use crate::job::{Job, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time counts over a manager's jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total: usize,
    pub queue_length: usize,
    pub in_flight: usize,
    /// One entry per status, zero counts included
    pub by_status: BTreeMap<JobStatus, usize>,
}

impl JobStatistics {
    pub(crate) fn collect<'a>(
        jobs: impl IntoIterator<Item = &'a Job>,
        queue_length: usize,
        in_flight: usize,
    ) -> Self {
        let mut by_status: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut total = 0;
        for job in jobs {
            total += 1;
            *by_status.entry(job.status).or_default() += 1;
        }
        Self {
            total,
            queue_length,
            in_flight,
            by_status,
        }
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
