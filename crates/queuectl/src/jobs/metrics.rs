use serde::Serialize;

use crate::error::Result;
use crate::jobs::model::JobState;
use crate::jobs::repo::JobsRepo;

/// Point-in-time counts derived from the jobs table. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub total: i64,
    pub pending: i64,
    pub claimed: i64,
    pub completed: i64,
    pub dead: i64,
    /// completed / (completed + dead), 0 when nothing has finished.
    pub success_rate: f64,
}

impl Metrics {
    pub fn from_counts(counts: &[(JobState, i64)]) -> Self {
        let count = |state: JobState| {
            counts
                .iter()
                .filter(|(s, _)| *s == state)
                .map(|(_, n)| *n)
                .sum::<i64>()
        };

        let pending = count(JobState::Pending);
        let claimed = count(JobState::Claimed);
        let completed = count(JobState::Completed);
        let dead = count(JobState::Dead);

        let finished = completed + dead;
        let success_rate = if finished > 0 {
            completed as f64 / finished as f64
        } else {
            0.0
        };

        Metrics {
            total: pending + claimed + completed + dead,
            pending,
            claimed,
            completed,
            dead,
            success_rate,
        }
    }
}

#[derive(Clone)]
pub struct MetricsRepo {
    jobs: JobsRepo,
}

impl MetricsRepo {
    pub fn new(jobs: JobsRepo) -> Self {
        Self { jobs }
    }

    /// Computed on every call; nothing is cached.
    pub async fn snapshot(&self) -> Result<Metrics> {
        let counts = self.jobs.count_by_state().await?;
        Ok(Metrics::from_counts(&counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_without_finished_jobs() {
        let m = Metrics::from_counts(&[(JobState::Pending, 4), (JobState::Claimed, 1)]);
        assert_eq!(m.total, 5);
        assert_eq!(m.success_rate, 0.0);
    }

    #[test]
    fn success_rate_ignores_unfinished_jobs() {
        let m = Metrics::from_counts(&[
            (JobState::Completed, 3),
            (JobState::Dead, 1),
            (JobState::Pending, 10),
        ]);
        assert_eq!(m.total, 14);
        assert_eq!(m.completed, 3);
        assert_eq!(m.dead, 1);
        assert_eq!(m.success_rate, 0.75);
    }
}
