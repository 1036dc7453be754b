//! A bounded pool of worker threads running one job per item.
//!
//! A job that fails or panics is retried, when it still fails after the last attempt it is
//! dead-lettered: the failure is reported but other jobs keep running.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel as channel;
use tools::teprintln;

use crate::{Error, Result};

/// Number of times a job is run before being dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// A job that could not be completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    pub name: String,
    pub attempts: u32,
    pub error: String,
}

/// Result of a job.
#[derive(Debug)]
pub struct JobReport<T> {
    /// Position of the job in the input.
    pub index: usize,
    pub name: String,
    pub attempts: u32,
    pub outcome: std::result::Result<T, DeadLetter>,
}

pub struct WorkerPool {
    concurrency: usize,
    max_attempts: u32,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl WorkerPool {
    /// Creates a pool of `concurrency` workers, at least one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn attempt<J, T, F>(&self, index: usize, job: &J, work: &F) -> JobReport<T>
    where
        J: fmt::Display,
        F: Fn(&J) -> Result<T>,
    {
        let name = job.to_string();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let err = match panic::catch_unwind(AssertUnwindSafe(|| work(job))) {
                Ok(Ok(value)) => {
                    return JobReport {
                        index,
                        name,
                        attempts,
                        outcome: Ok(value),
                    }
                }
                Ok(Err(err)) => err,
                Err(payload) => Error::WorkerPanicked(panic_message(payload)),
            };

            teprintln!(
                "Job {} failed (attempt {}/{}): {}",
                name,
                attempts,
                self.max_attempts,
                err
            );

            if attempts >= self.max_attempts {
                return JobReport {
                    index,
                    name: name.clone(),
                    attempts,
                    outcome: Err(DeadLetter {
                        name,
                        attempts,
                        error: err.to_string(),
                    }),
                };
            }
        }
    }

    /// Runs `work` on every job and returns the reports in the order of `jobs`.
    ///
    /// `on_report` is called from the calling thread as soon as a job is over, which makes it
    /// suitable to display progress.
    ///
    /// # Example
    /// ```
    /// use loader::pool::WorkerPool;
    ///
    /// let reports = WorkerPool::new(4).run(&[1, 2, 3], |x| Ok(x * 10), |_| {});
    /// let values: Vec<_> = reports.into_iter().map(|r| r.outcome.unwrap()).collect();
    /// assert_eq!(values, [10, 20, 30]);
    /// ```
    pub fn run<J, T, F, R>(&self, jobs: &[J], work: F, mut on_report: R) -> Vec<JobReport<T>>
    where
        J: fmt::Display + Sync,
        T: Send,
        F: Fn(&J) -> Result<T> + Sync,
        R: FnMut(&JobReport<T>),
    {
        let nb_workers = self.concurrency.min(jobs.len()).max(1);

        // Run jobs in parallel using the following pipeline:
        //
        // [     job_sender      ] calling thread, all jobs are queued upfront
        //            |
        //            v
        // [    job_receiver     ] worker threads
        // [    report_sender    ]
        //            |
        //            v
        // [   report_receiver   ] calling thread

        let (job_sender, job_receiver) = channel::unbounded();
        let (report_sender, report_receiver) = channel::unbounded();

        for job in jobs.iter().enumerate() {
            job_sender.send(job).ok();
        }

        drop(job_sender);
        let mut reports = Vec::with_capacity(jobs.len());

        thread::scope(|scope| {
            for _ in 0..nb_workers {
                let job_receiver = job_receiver.clone();
                let report_sender = report_sender.clone();
                let work = &work;

                scope.spawn(move || {
                    for (index, job) in job_receiver {
                        if report_sender.send(self.attempt(index, job, work)).is_err() {
                            break;
                        }
                    }
                });
            }

            drop(report_sender);

            for report in report_receiver {
                on_report(&report);
                reports.push(report);
            }
        });

        reports.sort_by_key(|report| report.index);
        reports
    }
}

/// Extracts the dead letters of a batch of reports.
pub fn dead_letters<T>(reports: &[JobReport<T>]) -> Vec<DeadLetter> {
    reports
        .iter()
        .filter_map(|report| report.outcome.as_ref().err().cloned())
        .collect()
}
