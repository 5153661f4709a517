//! RKRR Command Line Interface
//!
//! A command-line interface for fitting, inspecting, and using Nystroem
//! kernel ridge regression models on CSV data.

use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{error, info};
use rkrr::api::{quick, Krr, TrainedModel};
use rkrr::core::{KrrError, Options, Precision, Result};
use rkrr::data::write_csv;
use rkrr::kernel::{Kernel, KernelSpec};
use rkrr::persistence::SerializableModel;
use rkrr::{CSVDataset, Dataset};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rkrr")]
#[command(about = "Large-scale kernel ridge regression with a Nystroem preconditioner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "rkrr contributors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a new model
    Fit(FitArgs),
    /// Make predictions using a fitted model
    Predict(PredictArgs),
    /// Display model information
    Info(InfoArgs),
    /// Fit on one file and report the error on another, without saving
    Eval(EvalArgs),
}

#[derive(Args)]
struct FitArgs {
    /// Training data file (CSV, targets in the last columns)
    #[arg(long)]
    data: PathBuf,

    /// Output model file
    #[arg(short, long)]
    output: PathBuf,

    /// Number of target columns at the end of each row
    #[arg(short, long, default_value = "1")]
    targets: usize,

    #[command(flatten)]
    kernel: KernelArgs,

    /// Ridge penalty
    #[arg(short, long, default_value = "1e-6")]
    penalty: f64,

    /// Number of Nystroem centers
    #[arg(short = 'M', long, default_value = "1000")]
    centers: usize,

    /// Maximum CG iterations
    #[arg(short, long, default_value = "20")]
    max_iterations: usize,

    /// Seed for center sampling
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Report the training error every this many iterations
    #[arg(long)]
    error_every: Option<usize>,

    /// Stop the solver after this many seconds
    #[arg(long)]
    time_limit: Option<f64>,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Args)]
struct KernelArgs {
    /// Kernel function
    #[arg(short, long, default_value = "gaussian")]
    kernel: CliKernel,

    /// Bandwidth of the gaussian and laplacian kernels
    #[arg(short, long, default_value = "1.0")]
    sigma: f64,

    /// Degree of the polynomial kernel
    #[arg(long, default_value = "3")]
    degree: u32,

    /// Scale of the polynomial kernel
    #[arg(long, default_value = "1.0")]
    gamma: f64,

    /// Offset of the polynomial kernel
    #[arg(long, default_value = "1.0")]
    coef0: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliKernel {
    /// Dot product
    #[value(name = "linear")]
    Linear,
    /// exp(-||x-y||² / 2σ²)
    #[value(name = "gaussian")]
    Gaussian,
    /// exp(-||x-y|| / σ)
    #[value(name = "laplacian")]
    Laplacian,
    /// (γ·xᵗy + c)^d
    #[value(name = "polynomial")]
    Polynomial,
}

impl KernelArgs {
    fn to_spec(&self) -> Result<KernelSpec> {
        let spec = match self.kernel {
            CliKernel::Linear => KernelSpec::Linear,
            CliKernel::Gaussian => KernelSpec::Gaussian { sigma: self.sigma },
            CliKernel::Laplacian => KernelSpec::Laplacian { sigma: self.sigma },
            CliKernel::Polynomial => KernelSpec::Polynomial {
                degree: self.degree,
                gamma: self.gamma,
                coef0: self.coef0,
            },
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[derive(Args)]
struct EngineArgs {
    /// Never use the parallel backend
    #[arg(long)]
    cpu_only: bool,

    /// Threads of the parallel backend
    #[arg(long)]
    threads: Option<usize>,

    /// Memory budget of the sequential backend in MB
    #[arg(long)]
    max_cpu_mem: Option<usize>,

    /// Memory budget of the parallel backend in MB
    #[arg(long)]
    max_device_mem: Option<usize>,

    /// Evaluate kernel tiles in single precision
    #[arg(long)]
    single_precision: bool,

    /// Disable the fused kernel-vector product
    #[arg(long)]
    no_fused: bool,

    /// Relative residual at which the solver stops
    #[arg(long)]
    tolerance: Option<f64>,

    /// Force the preconditioner factorization in-core
    #[arg(long, conflicts_with = "chol_ooc")]
    chol_in_core: bool,

    /// Force the preconditioner factorization out-of-core
    #[arg(long)]
    chol_ooc: bool,
}

impl EngineArgs {
    fn to_options(&self, debug: bool) -> Options {
        let defaults = Options::default();
        Options {
            kernel_precision: if self.single_precision {
                Precision::Single
            } else {
                Precision::Double
            },
            chol_force_in_core: self.chol_in_core,
            chol_force_ooc: self.chol_ooc,
            cg_tolerance: self.tolerance.unwrap_or(defaults.cg_tolerance),
            cpu_only: self.cpu_only,
            max_cpu_mem: self
                .max_cpu_mem
                .map_or(defaults.max_cpu_mem, |mb| mb.saturating_mul(1024 * 1024)),
            max_device_mem: self
                .max_device_mem
                .map_or(defaults.max_device_mem, |mb| mb.saturating_mul(1024 * 1024)),
            device_threads: self.threads,
            no_fused: self.no_fused,
            debug,
            ..defaults
        }
    }
}

#[derive(Args)]
struct PredictArgs {
    /// Fitted model file
    #[arg(short, long)]
    model: PathBuf,

    /// Input data file (CSV)
    #[arg(long)]
    data: PathBuf,

    /// Number of trailing target columns in the input; when non-zero the
    /// error against them is reported
    #[arg(short, long, default_value = "0")]
    targets: usize,

    /// Output predictions file (optional, prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct InfoArgs {
    /// Model file
    model: PathBuf,
}

#[derive(Args)]
struct EvalArgs {
    /// Training data file
    train: PathBuf,
    /// Test data file
    test: PathBuf,
    /// Gaussian bandwidth
    #[arg(short, long, default_value = "1.0")]
    sigma: f64,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Fit(args) => fit_command(args, cli.debug),
        Commands::Predict(args) => predict_command(args),
        Commands::Info(args) => info_command(args),
        Commands::Eval(args) => eval_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn fit_command(args: FitArgs, debug: bool) -> Result<()> {
    if args.targets == 0 {
        return Err(KrrError::InvalidParameter(
            "Training data needs at least one target column".to_string(),
        ));
    }
    let kernel = args.kernel.to_spec()?;
    let options = args.engine.to_options(debug);

    info!("Fitting KRR model...");
    info!("Data file: {:?}", args.data);
    info!(
        "Parameters: kernel={}, penalty={:e}, centers={}, max_iter={}",
        kernel.name(),
        args.penalty,
        args.centers,
        args.max_iterations
    );

    let dataset = CSVDataset::from_file(&args.data, args.targets)?;
    info!(
        "Loaded {} samples with {} features and {} targets",
        dataset.len(),
        dataset.dim(),
        dataset.n_targets()
    );

    let mut builder = Krr::with_kernel(kernel)
        .with_penalty(args.penalty)
        .with_centers(args.centers)
        .with_max_iterations(args.max_iterations)
        .with_seed(args.seed)
        .with_options(options);
    if let Some(every) = args.error_every {
        builder = builder.with_error_every(every);
    }
    if let Some(seconds) = args.time_limit {
        if !(seconds >= 0.0) || !seconds.is_finite() {
            return Err(KrrError::InvalidParameter(format!(
                "Time limit must be a non-negative number of seconds, got: {seconds}"
            )));
        }
        builder = builder.with_time_limit(Duration::from_secs_f64(seconds));
    }

    let model = builder.fit_with_callback(dataset.features(), dataset.targets(), |report| {
        if let Some(train_error) = report.train_error {
            info!(
                "Iteration {}: residual {:.3e}, training error {:.6}",
                report.iteration, report.relative_residual, train_error
            );
        }
    })?;

    let info = model.info();
    info!(
        "Fit finished after {} iterations ({:?})",
        info.iterations, info.status
    );

    let serializable = SerializableModel::from_trained_model(&model);
    serializable.save_to_file(&args.output)?;
    info!("Model saved to: {:?}", args.output);

    let mse = model.evaluate(&dataset)?;
    info!("Training MSE: {mse:.6}");

    Ok(())
}

fn predict_command(args: PredictArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let serializable_model = SerializableModel::load_from_file(&args.model)?;
    let model: TrainedModel<KernelSpec> = serializable_model.to_trained_model()?;

    info!("Loading prediction data from: {:?}", args.data);
    let dataset = CSVDataset::from_file(&args.data, args.targets)?;

    info!(
        "Making predictions using model with {} centers",
        serializable_model.metadata.n_centers
    );
    let predictions = model.predict_dataset(&dataset)?;

    if let Some(output_path) = &args.output {
        let file = File::create(output_path)?;
        write_csv(BufWriter::new(file), predictions.view())?;
        info!("Predictions saved to: {output_path:?}");
    } else {
        let stdout = io::stdout();
        write_csv(stdout.lock(), predictions.view())?;
    }

    if args.targets > 0 {
        let mse = model.evaluate(&dataset)?;
        if args.output.is_some() {
            println!("MSE: {mse:.6}");
        } else {
            info!("MSE: {mse:.6}");
        }
    }

    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    info!("Loading model from: {:?}", args.model);
    let serializable_model = SerializableModel::load_from_file(&args.model)?;

    serializable_model.print_summary();

    println!("\nCoefficients:");
    let alpha = &serializable_model.alpha;
    let n_show = alpha.nrows().min(10);
    for (i, row) in alpha.outer_iter().take(n_show).enumerate() {
        let values: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        println!("  α{i}: [{}]", values.join(", "));
    }
    if alpha.nrows() > n_show {
        println!("  ... ({} more)", alpha.nrows() - n_show);
    }

    Ok(())
}

fn eval_command(args: EvalArgs) -> Result<()> {
    info!(
        "Quick evaluation: fit on {:?}, test on {:?}",
        args.train, args.test
    );
    let mse = quick::evaluate_split(&args.train, &args.test, args.sigma)?;

    println!("=== Quick Evaluation Results ===");
    println!("Training file: {:?}", args.train);
    println!("Test file: {:?}", args.test);
    println!("Sigma: {}", args.sigma);
    println!("Test MSE: {mse:.6}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_args(kernel: CliKernel, sigma: f64) -> KernelArgs {
        KernelArgs {
            kernel,
            sigma,
            degree: 2,
            gamma: 1.0,
            coef0: 1.0,
        }
    }

    #[test]
    fn test_kernel_spec_from_args() {
        assert_eq!(
            kernel_args(CliKernel::Gaussian, 0.5).to_spec().unwrap(),
            KernelSpec::Gaussian { sigma: 0.5 }
        );
        assert_eq!(
            kernel_args(CliKernel::Linear, -1.0).to_spec().unwrap(),
            KernelSpec::Linear
        );
        assert!(kernel_args(CliKernel::Laplacian, 0.0).to_spec().is_err());
    }

    #[test]
    fn test_engine_options() {
        let engine = EngineArgs {
            cpu_only: true,
            threads: Some(2),
            max_cpu_mem: Some(16),
            max_device_mem: None,
            single_precision: true,
            no_fused: false,
            tolerance: None,
            chol_in_core: false,
            chol_ooc: true,
        };
        let options = engine.to_options(false);
        assert!(options.cpu_only);
        assert_eq!(options.max_cpu_mem, 16 * 1024 * 1024);
        assert_eq!(options.max_device_mem, Options::default().max_device_mem);
        assert_eq!(options.kernel_precision, Precision::Single);
        assert!(options.chol_force_ooc);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_memory_budget_saturates() {
        let engine = EngineArgs {
            cpu_only: false,
            threads: None,
            max_cpu_mem: Some(usize::MAX / 1024),
            max_device_mem: Some(usize::MAX),
            single_precision: false,
            no_fused: false,
            tolerance: None,
            chol_in_core: false,
            chol_ooc: false,
        };
        let options = engine.to_options(false);
        assert_eq!(options.max_cpu_mem, usize::MAX);
        assert_eq!(options.max_device_mem, usize::MAX);
    }
}
