use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use structopt::StructOpt;

use halo_spmv::{
    build, destroy, spawn_cluster, Communicator, DistributedOperator, ExchangeLimits, KernelMode,
    LocalSystem, OperatorCounters, Result, RunConfig, SpmvError, N_CPUS,
};

#[macro_use]
extern crate log;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "halo_spmv",
    about = "Distributed sparse matrix-vector product over a thread-backed cluster"
)]
struct Opt {
    /// Matrix file in the row stream format (header, row sizes, rows, vectors)
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Number of participants sharing the rows
    #[structopt(short, long, default_value = "1")]
    participants: usize,

    /// Number of timed multiplies, overrides the config file
    #[structopt(short, long)]
    repeat: Option<usize>,

    /// Local kernel. Options are: serial, parallel
    #[structopt(short, long)]
    kernel: Option<KernelMode>,

    /// JSON run configuration (limits, kernel, repeat)
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Write a JSON report here
    #[structopt(long, parse(from_os_str))]
    report: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ParticipantReport {
    rank: usize,
    local_nrow: usize,
    local_nnz: usize,
    num_external: usize,
    num_neighbors: usize,
    total_to_be_sent: usize,
    rayon_threads: usize,
    counters: OperatorCounters,
}

#[derive(Debug, Serialize)]
struct RunReport {
    timestamp: String,
    input: String,
    total_nrow: usize,
    total_nnz: u64,
    participants: usize,
    kernel: KernelMode,
    limits: ExchangeLimits,
    repeat: usize,
    /// `||A x_exact - b||_2` over the whole system.
    residual_norm: f64,
    ranks: Vec<ParticipantReport>,
}

struct ParticipantResult {
    report: ParticipantReport,
    total_nrow: usize,
    total_nnz: u64,
    residual_norm: f64,
}

fn participant<C: Communicator>(
    input: &Path,
    comm: C,
    config: &RunConfig,
    rayon_threads: usize,
) -> Result<ParticipantResult> {
    let rank = comm.rank();
    if rank == 0 {
        info!("Reading matrix info from {}", input.display());
    }
    let file = File::open(input)?;
    let LocalSystem {
        matrix, b, x_exact, ..
    } = build(BufReader::new(file), &comm, &config.limits)?;

    let total_nrow = matrix.total_nrow();
    let total_nnz = matrix.total_nnz();
    let local_nrow = matrix.local_nrow();
    let local_nnz = matrix.local_nnz();
    let num_external = matrix.num_external();
    let num_neighbors = matrix.halo().neighbors().len();
    let total_to_be_sent = matrix.halo().total_to_be_sent();

    let mut x = matrix.extend_vector(&x_exact)?;
    let mut op = DistributedOperator::new(matrix, comm, config.kernel)?;
    let mut y = op.apply(&mut x)?;
    for _ in 1..config.repeat {
        y = op.apply(&mut x)?;
    }

    let local_sq = (&y - &b).mapv(|r| r * r).sum();
    let residual_norm = op.comm().all_reduce_sum(&[local_sq])?[0].sqrt();

    let (matrix, _comm, counters) = op.into_parts();
    destroy(matrix);
    debug!(
        "participant {}: {} multiplies, {:.3} MFLOPS",
        rank,
        counters.multiplies,
        counters.mflops()
    );

    Ok(ParticipantResult {
        report: ParticipantReport {
            rank,
            local_nrow,
            local_nnz,
            num_external,
            num_neighbors,
            total_to_be_sent,
            rayon_threads,
            counters,
        },
        total_nrow,
        total_nnz,
        residual_norm,
    })
}

fn run(opt: Opt) -> Result<()> {
    let mut config = match &opt.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(repeat) = opt.repeat {
        config.repeat = repeat;
    }
    if let Some(kernel) = opt.kernel {
        config.kernel = kernel;
    }
    if opt.participants == 0 {
        return Err(SpmvError::invalid_argument("participants", "need at least one"));
    }
    if config.repeat == 0 {
        return Err(SpmvError::invalid_argument("repeat", "need at least one multiply"));
    }
    info!("{:?}", config);

    // every participant gets an equal share of the cores for its kernel
    let rayon_threads = (*N_CPUS / opt.participants).max(1);
    let results = spawn_cluster(opt.participants, |comm| {
        let rank = comm.rank();
        let outcome = match rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(move |i| format!("participant-{}-kernel-{}", rank, i))
            .build()
        {
            Ok(pool) => pool.install(|| participant(&opt.input, comm, &config, rayon_threads)),
            Err(err) => {
                warn!("participant {}: no private thread pool ({}), using the global one", rank, err);
                participant(&opt.input, comm, &config, rayon::current_num_threads())
            }
        };
        match outcome {
            Ok(result) => result,
            Err(err) => {
                // the other participants may be blocked waiting on this one
                error!("participant {}: {}", rank, err);
                std::process::exit(1);
            }
        }
    });

    let (total_nrow, total_nnz, residual_norm) = results
        .first()
        .map(|r| (r.total_nrow, r.total_nnz, r.residual_norm))
        .unwrap_or_default();
    let ranks: Vec<ParticipantReport> = results.into_iter().map(|r| r.report).collect();

    let exchange = ranks
        .iter()
        .map(|r| r.counters.exchange_time)
        .max()
        .unwrap_or_default();
    let kernel = ranks
        .iter()
        .map(|r| r.counters.kernel_time)
        .max()
        .unwrap_or_default();
    let flops: u64 = ranks.iter().map(|r| r.counters.flops).sum();
    let secs = (exchange + kernel).as_secs_f64();
    info!(
        "{} rows, {} nonzeros on {} participants, {} multiplies",
        total_nrow, total_nnz, opt.participants, config.repeat
    );
    info!(
        "exchange {:?}, kernel {:?}, {:.3} MFLOPS",
        exchange,
        kernel,
        if secs > 0.0 { flops as f64 / secs / 1.0e6 } else { 0.0 }
    );
    info!("||A x_exact - b|| = {:e}", residual_norm);
    if residual_norm > 1e-6 * (total_nrow as f64).sqrt().max(1.0) {
        warn!("b does not match A x_exact, residual {:e}", residual_norm);
    }

    if let Some(path) = &opt.report {
        let report = RunReport {
            timestamp: Local::now().to_rfc3339(),
            input: opt.input.display().to_string(),
            total_nrow,
            total_nnz,
            participants: opt.participants,
            kernel: config.kernel,
            limits: config.limits,
            repeat: config.repeat,
            residual_norm,
            ranks,
        };
        let out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(out, &report)?;
        info!("Report written to {}", path.display());
    }
    Ok(())
}

fn main() {
    pretty_env_logger::init();
    let opt = Opt::from_args();
    if let Err(err) = run(opt) {
        error!("{}", err);
        std::process::exit(1);
    }
}
