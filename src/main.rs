use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use log::{info, warn};

use ortperf::bench::{self, BenchReport};
use ortperf::config::{self, Config};
use ortperf::model::shufflenet::{self, SHUFFLENET_URL};
use ortperf::model::{
    ModelRunner, OnnxSession, OutputCollection, ProductRecoRunner, Provider, ShuffleNetRunner,
    product_reco,
};
use ortperf::testdata::{TestCase, load_test_cases};

const DEFAULT_ITERATIONS: usize = 20;

#[derive(Parser)]
#[command(name = "ortperf", version, about = "Benchmark pretrained ONNX models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the ShuffleNet archive if it is not already present
    Fetch,
    /// Validate and time a model against its test data
    Run {
        model: ModelKind,

        /// Number of timed inference passes
        #[arg(short = 'n', long)]
        iterations: Option<usize>,

        #[arg(long, value_enum)]
        provider: Option<Provider>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Skip comparison against reference outputs
        #[arg(long = "no-validate")]
        no_validate: bool,
    },
    /// Show known models and whether their artifacts are present
    List,
}

#[derive(ValueEnum, Clone, Copy)]
enum ModelKind {
    Shufflenet,
    ProductReco,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = config::load_config()?;

    match cli.command {
        Command::Fetch => {
            let root = config.workdir()?;
            let path = shufflenet::ensure_model(
                &root,
                config.shufflenet_url.as_deref().unwrap_or(SHUFFLENET_URL),
                config.shufflenet_sha256.as_deref(),
            )?;
            eprintln!("{}", path.display());
        }
        Command::Run {
            model,
            iterations,
            provider,
            json,
            no_validate,
        } => {
            if provider.is_some() {
                config.provider = provider;
            }
            let iterations = iterations.or(config.iterations).unwrap_or(DEFAULT_ITERATIONS);
            let report = match model {
                ModelKind::Shufflenet => {
                    let runner: ShuffleNetRunner<OnnxSession> = ShuffleNetRunner::new(&config)?;
                    run_benchmark(runner, iterations, !no_validate)?
                }
                ModelKind::ProductReco => {
                    let runner: ProductRecoRunner<OnnxSession> = ProductRecoRunner::new(&config)?;
                    run_benchmark(runner, iterations, !no_validate)?
                }
            };
            print_report(&report, json)?;
        }
        Command::List => list(&config)?,
    }

    Ok(())
}

fn run_benchmark<R: ModelRunner>(
    mut runner: R,
    iterations: usize,
    validate: bool,
) -> Result<BenchReport> {
    let cases = load_test_cases(runner.test_data_dir())?;
    let (batch, cases): (Vec<R::Input>, Vec<TestCase>) = cases
        .into_iter()
        .filter_map(|case| R::input_from_case(&case).map(|input| (input, case)))
        .unzip();
    if batch.is_empty() {
        bail!("no test inputs found in {}", runner.test_data_dir().display());
    }
    info!(
        "{}: {} test cases from {}",
        runner.name(),
        batch.len(),
        runner.test_data_dir().display()
    );

    let mut outputs = OutputCollection::new();
    if validate {
        runner.preprocess();
        outputs.apply(runner.inference(&batch)?);
        runner.postprocess();
        bench::validate(outputs.items(), &cases, runner.validate_decimal())?;
        info!(
            "{}: outputs match reference to {} decimals",
            runner.name(),
            runner.validate_decimal()
        );
    } else {
        warn!("{}: skipping validation", runner.name());
    }

    Ok(bench::time_inference(
        &mut runner,
        &batch,
        iterations,
        &mut outputs,
    )?)
}

fn print_report(report: &BenchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{} ({} inputs x {} iterations)",
        style(&report.model).bold(),
        report.inputs,
        report.iterations
    );
    println!("  mean {:>10.3} ms", report.mean_ms);
    println!("  min  {:>10.3} ms", report.min_ms);
    println!("  p50  {:>10.3} ms", report.p50_ms);
    println!("  p90  {:>10.3} ms", report.p90_ms);
    println!("  p99  {:>10.3} ms", report.p99_ms);
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let root = config.workdir()?;
    let models = [
        ("shufflenet", shufflenet::paths(&root)),
        ("product-reco", product_reco::paths(&root)),
    ];

    for (name, (model_path, test_data_dir)) in models {
        let status = if model_path.is_file() {
            style("present").green()
        } else {
            style("missing").red()
        };
        println!("{:<14} {}", name, status);
        println!("  model     {}", model_path.display());
        println!("  test data {}", test_data_dir.display());
    }
    Ok(())
}
