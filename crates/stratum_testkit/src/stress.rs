//! Stress helpers for the commit engine.
//!
//! One engine is shared by every thread; each thread commits through its own
//! connection onto one shared store.

use crate::fixtures::object;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stratum_core::{ChangeRecord, ChangeSet, CommitEngine};
use stratum_store::InMemoryStore;

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Commits attempted.
    pub total_commits: usize,
    /// Commits that succeeded.
    pub successful_commits: usize,
    /// Commits that failed.
    pub failed_commits: usize,
    /// Wall time.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        Self {
            total_commits: successful + failed,
            successful_commits: successful,
            failed_commits: failed,
            duration,
        }
    }

    /// Commits per second.
    pub fn commits_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_commits as f64 / secs
        } else {
            0.0
        }
    }
}

/// Stress run configuration.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Commits per thread.
    pub commits_per_thread: usize,
    /// Number of threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            commits_per_thread: 100,
            threads: 4,
        }
    }
}

/// A unit of work inserting a company, a department and an employee
/// referencing both, keyed from `base`.
pub fn staffing_unit(base: i64) -> ChangeSet {
    let company = object("Company", base);
    let department = object("Department", base);
    let employee = object("Employee", base);
    let mut changes = ChangeSet::new();
    changes
        .add(
            ChangeRecord::new_object(employee)
                .with_reference("company", Some(company.clone()))
                .with_reference("department", Some(department.clone())),
        )
        .add(ChangeRecord::new_object(department))
        .add(ChangeRecord::new_object(company));
    changes
}

/// Commits [`staffing_unit`]s from several threads through one engine, each
/// thread on its own connection to `store`.
pub fn stress_concurrent_commits(
    engine: Arc<CommitEngine>,
    store: &InMemoryStore,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let commits = config.commits_per_thread;
            let mut store = store.connect();

            thread::spawn(move || {
                for i in 0..commits {
                    let base = (t * commits + i) as i64 + 1;
                    match engine.commit(&staffing_unit(base), &mut store) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
