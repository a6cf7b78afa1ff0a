//! About running a batch of jobs over the device pool: one worker thread per device,
//! each draining its own queue in batch order.
use crate::common::error::MdError;
use crate::computing::device::{Device, DevicePool};
use crate::computing::job::JobDescriptor;
use crate::md::runner::JobCompletion;
use log::{error, info};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;





/// What became of one job
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome
{
    Completed
    {
        steps_run: usize,
        frames: usize,
    },
    /// The snapshot store already held every frame, so nothing ran
    SkippedAlreadyComplete
    {
        frames: usize,
    },
    Failed(String),
}

impl JobOutcome
{
    pub fn is_failed(&self) -> bool
    {
        matches!(self, JobOutcome::Failed(_))
    }
}

impl fmt::Display for JobOutcome
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            JobOutcome::Completed { steps_run, frames } => write!(f, "completed ({} steps run, {} frames stored)", steps_run, frames),
            JobOutcome::SkippedAlreadyComplete { frames } => write!(f, "skipped, already complete ({} frames stored)", frames),
            JobOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobReport
{
    pub index: usize,
    pub job_name: String,
    pub device: Device,
    pub outcome: JobOutcome,
}



/// The static round-robin dispatcher
pub struct Dispatcher
{
    pool: DevicePool,
}

impl Dispatcher
{
    pub fn new(pool: DevicePool) -> Self
    {
        Dispatcher
        {
            pool,
        }
    }

    pub fn pool(&self) -> &DevicePool
    {
        &self.pool
    }

    /// Split the batch into one queue per device slot, keeping the batch order inside each queue
    pub fn partition<'a>(&self, jobs: &'a [JobDescriptor]) -> Vec< Vec<(usize, &'a JobDescriptor)> >
    {
        let mut queues: Vec< Vec<(usize, &JobDescriptor)> > = (0..self.pool.len()).map(|_| Vec::new()).collect();
        for (position, job) in jobs.iter().enumerate()
        {
            queues[job.device_slot() % self.pool.len()].push((position, job));
        }
        queues
    }

    /// Run every job of the batch and return one report per job, in batch order.
    ///
    /// A job that returns an error or panics is recorded as failed; the jobs queued behind it still run.
    ///
    /// # Parameters
    /// ```text
    /// jobs: the batch, built with the same device pool
    /// run: the body of one job on its device
    /// ```
    ///
    /// # Examples
    /// ```text
    /// let reports: Vec<JobReport> = Dispatcher::new(pool).run_batch(&jobs, |job, device| run_job(job, device, options));
    /// ```
    pub fn run_batch<F>(&self, jobs: &[JobDescriptor], run: F) -> Vec<JobReport>
    where
        F: Fn(&JobDescriptor, &Device) -> crate::common::error::Result<JobCompletion> + Sync,
    {
        let queues: Vec< Vec<(usize, &JobDescriptor)> > = self.partition(jobs);
        let mut reports: Vec< Option<JobReport> > = (0..jobs.len()).map(|_| None).collect();
        let (sender, receiver) = mpsc::channel::<(usize, JobReport)>();
        let run: &F = &run;

        thread::scope(|scope|
        {
            for (slot, queue) in queues.into_iter().enumerate()
            {
                if queue.is_empty()
                {
                    continue;
                }
                let device: &Device = &self.pool.devices()[slot];
                let sender: mpsc::Sender<(usize, JobReport)> = sender.clone();
                let spawned = thread::Builder::new()
                    .name(format!("device-{}", slot))
                    .spawn_scoped(scope, move ||
                    {
                        for (position, job) in queue
                        {
                            info!("Job {} '{}' starts on {}", job.index(), job.job_name(), device);
                            let report: JobReport = JobReport
                            {
                                index: job.index(),
                                job_name: job.job_name().to_string(),
                                device: device.clone(),
                                outcome: run_guarded(run, job, device),
                            };
                            if sender.send((position, report)).is_err()
                            {
                                break;
                            }
                        }
                    });
                if let Err(err) = spawned
                {
                    error!("Cannot start the worker of {}: {}", device, err);
                }
            }
            drop(sender);

            for (position, report) in receiver.iter()
            {
                info!("Job {} '{}' on {}: {}", report.index, report.job_name, report.device, report.outcome);
                reports[position] = Some(report);
            }
        });

        reports.into_iter().zip(jobs.iter()).map(|(report, job)| match report
        {
            Some(report) => report,
            None =>
            {
                let device: Device = self.pool.device_for(job.device_slot()).clone();
                error!("Job {} '{}' was never run on {}", job.index(), job.job_name(), device);
                JobReport
                {
                    index: job.index(),
                    job_name: job.job_name().to_string(),
                    outcome: JobOutcome::Failed(format!("the worker of {} stopped before running the job", device)),
                    device,
                }
            },
        }).collect()
    }
}



/// Run one job, turning its error or panic into a failed outcome
fn run_guarded<F>(run: &F, job: &JobDescriptor, device: &Device) -> JobOutcome
where
    F: Fn(&JobDescriptor, &Device) -> crate::common::error::Result<JobCompletion>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| run(job, device)))
    {
        Ok(Ok(JobCompletion::Ran { steps, frames })) => JobOutcome::Completed { steps_run: steps, frames },
        Ok(Ok(JobCompletion::AlreadyComplete { frames })) => JobOutcome::SkippedAlreadyComplete { frames },
        Ok(Err(err)) =>
        {
            error!("Job {} '{}' failed: {}", job.index(), job.job_name(), err);
            JobOutcome::Failed(err.to_string())
        },
        Err(payload) =>
        {
            let err: MdError = MdError::Panic(panic_message(payload.as_ref()));
            error!("Job {} '{}' failed: {}", job.index(), job.job_name(), err);
            JobOutcome::Failed(err.to_string())
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String
{
    if let Some(message) = payload.downcast_ref::<&str>()
    {
        message.to_string()
    }
    else if let Some(message) = payload.downcast_ref::<String>()
    {
        message.clone()
    }
    else
    {
        String::from("unknown panic payload")
    }
}
