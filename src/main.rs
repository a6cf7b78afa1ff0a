//! The command line entry: load the configuration, build the batch, and run it over the device pool.
use clap::Parser;
use log::{error, info, warn};
use mlmd::common::error::*;
use mlmd::computing::device::DevicePool;
use mlmd::computing::dispatcher::{Dispatcher, JobReport};
use mlmd::computing::job::{build_batch, JobDescriptor};
use mlmd::io::input::Para;
use mlmd::md::runner::{run_job, RunOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;





#[derive(Parser, Debug)]
#[command(name = "mlmd", version, about = "ML-potential molecular dynamics over a device pool, with QM validation and restart")]
struct Args
{
    /// The YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Resume every job from its snapshot store
    #[arg(long)]
    restart: bool,

    /// Use only the first N devices of the pool
    #[arg(long, value_name = "N")]
    parallel: Option<usize>,

    /// Print the debug messages
    #[arg(long)]
    debug: bool,
}



fn main() -> ExitCode
{
    let args: Args = Args::parse();
    let default_level: &str = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    match run(&args)
    {
        Ok(reports) =>
        {
            let failed: usize = reports.iter().filter(|report| report.outcome.is_failed()).count();
            if failed == 0
            {
                info!("All {} jobs succeeded", reports.len());
                ExitCode::SUCCESS
            }
            else
            {
                warn!("{} of {} jobs failed", failed, reports.len());
                ExitCode::from(1)
            }
        },
        Err(err) =>
        {
            error!("{}", err);
            ExitCode::from(2)
        },
    }
}

/// Everything that can fail here fails before any job starts
fn run(args: &Args) -> Result<Vec<JobReport>>
{
    let para: Para = Para::load(&args.config)?;
    para.check()?;

    let structures: Vec<PathBuf> = para.discover_structures()?;
    if structures.is_empty()
    {
        return Err(error_config("initial_structures", "no *.xyz structure found"));
    }

    let mut pool: DevicePool = DevicePool::from_names(&para.mace.devices.to_vec())?;
    if let Some(parallel) = args.parallel
    {
        pool = pool.restrict(parallel)?;
    }
    let jobs: Vec<JobDescriptor> = build_batch(&structures, Arc::new(para), &pool)?;
    info!("{} jobs over {} devices ({}), restart: {}", jobs.len(), pool.len(),
        pool.devices().iter().map(|device| device.to_string()).collect::<Vec<String>>().join(", "), args.restart);

    let options: RunOptions = RunOptions { restart: args.restart };
    let reports: Vec<JobReport> = Dispatcher::new(pool).run_batch(&jobs, |job, device| run_job(job, device, options));
    for report in &reports
    {
        info!("{:>4} {:<24} {:<8} {}", report.index, report.job_name, report.device.to_string(), report.outcome);
    }
    Ok(reports)
}
