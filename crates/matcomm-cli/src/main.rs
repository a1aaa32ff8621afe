//! `matcomm` — correctness harness for fused matmul/collective kernels.
//!
//! Three entry points: `run` samples shapes and drives full cases against a
//! kernel executable, `gen` materializes inputs and golden for one explicit
//! case, `verify` re-checks an already-produced kernel output.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use matcomm_common::case::{CommPattern, GenMode, QuantMode, ScaleKind, TestCase};
use matcomm_common::{DType, HarnessConfig};
use matcomm_harness::{CaseLayout, CaseOutcome, CaseRunner};
use matcomm_sampler::ShapeSampler;

/// Correctness harness for distributed matmul/collective kernels
#[derive(Parser)]
#[command(name = "matcomm")]
#[command(about = "Golden-model correctness harness for fused matmul/collective kernels")]
#[command(version)]
struct Cli {
    /// Log level filter used when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample shapes and run full cases against the kernel under test
    Run(RunArgs),
    /// Generate inputs and golden for one explicit case without running it
    Gen(GenArgs),
    /// Verify an existing kernel output against the stored golden
    Verify(VerifyArgs),
}

/// Case parameters shared by `run` and `gen`.
#[derive(Args)]
struct CaseArgs {
    /// Output dtype: fp16, bf16 or fp32
    #[arg(long, value_parser = parse_dtype, default_value = "fp16")]
    dtype: DType,

    /// Number of rank processes
    #[arg(long, default_value_t = 2)]
    world_size: usize,

    /// Store operand A transposed
    #[arg(long)]
    trans_a: bool,

    /// Store operand B transposed
    #[arg(long)]
    trans_b: bool,

    /// Use int8 quantized operands
    #[arg(long)]
    int8: bool,

    /// Fuse an int32 bias vector (int8 only)
    #[arg(long)]
    bias: bool,

    /// Dequantization scale shape: none, per_tensor, per_channel, per_token
    /// or fused (int8 only)
    #[arg(long, value_parser = parse_scale_kind, default_value = "none")]
    scale: ScaleKind,
}

impl CaseArgs {
    fn quant(&self) -> QuantMode {
        if self.int8 {
            QuantMode::Int8
        } else {
            QuantMode::None
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Path to the kernel executable
    #[arg(long, value_name = "PATH")]
    kernel: PathBuf,

    /// Root directory for generated case data
    #[arg(long, value_name = "DIR", default_value = "./test_data")]
    data_root: PathBuf,

    /// Shapes to sample per pattern
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Patterns to exercise; repeatable, defaults to all four
    #[arg(long = "pattern", value_parser = parse_pattern)]
    patterns: Vec<CommPattern>,

    /// Replace random draws with fixed deterministic inputs
    #[arg(long)]
    deterministic: bool,

    /// Sampling seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Seconds to wait for all ranks before reaping survivors
    #[arg(long, value_name = "SECS")]
    join_timeout: Option<u64>,

    /// Device id handed to rank 0
    #[arg(long, default_value_t = 0)]
    device_id_base: usize,

    /// Which rank's output is verified
    #[arg(long, default_value_t = 0)]
    verify_rank: usize,

    #[command(flatten)]
    case: CaseArgs,
}

#[derive(Args)]
struct GenArgs {
    #[arg(long)]
    m: usize,
    #[arg(long)]
    k: usize,
    #[arg(long)]
    n: usize,

    /// Leading batch dimensions, comma separated (allreduce only)
    #[arg(long, value_delimiter = ',')]
    batch_dims: Vec<usize>,

    /// Communication pattern
    #[arg(long, value_parser = parse_pattern, default_value = "allreduce")]
    pattern: CommPattern,

    /// Root directory for generated case data
    #[arg(long, value_name = "DIR", default_value = "./test_data")]
    data_root: PathBuf,

    /// Replace random draws with fixed deterministic inputs
    #[arg(long)]
    deterministic: bool,

    /// Sampling seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[command(flatten)]
    case: CaseArgs,
}

#[derive(Args)]
struct VerifyArgs {
    /// Root directory holding the case directories
    #[arg(long, value_name = "DIR", default_value = "./test_data")]
    data_root: PathBuf,

    /// Parameter-hash id of the case to verify
    #[arg(long)]
    case_id: String,

    /// Rank whose output is compared
    #[arg(long, default_value_t = 0)]
    rank: usize,
}

fn parse_dtype(s: &str) -> std::result::Result<DType, matcomm_common::HarnessError> {
    s.parse()
}

fn parse_pattern(s: &str) -> std::result::Result<CommPattern, matcomm_common::HarnessError> {
    s.parse()
}

fn parse_scale_kind(s: &str) -> std::result::Result<ScaleKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Ok(ScaleKind::None),
        "per_tensor" => Ok(ScaleKind::PerTensor),
        "per_channel" => Ok(ScaleKind::PerChannel),
        "per_token" => Ok(ScaleKind::PerToken),
        "fused" => Ok(ScaleKind::Fused),
        other => Err(format!("unknown scale kind: {other}")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Gen(args) => cmd_gen(args),
        Commands::Verify(args) => cmd_verify(args),
    };

    if let Err(e) = result {
        error!("command failed: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn gen_mode(deterministic: bool) -> GenMode {
    if deterministic {
        GenMode::Deterministic
    } else {
        GenMode::Random
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let config = HarnessConfig {
        gen_mode: gen_mode(args.deterministic),
        kernel_path: args.kernel,
        data_root: args.data_root,
        device_id_base: args.device_id_base,
        join_timeout: args.join_timeout.map(Duration::from_secs),
        seed: args.seed,
        ..HarnessConfig::default()
    };

    let patterns = if args.patterns.is_empty() {
        CommPattern::ALL.to_vec()
    } else {
        args.patterns.clone()
    };

    let mut sampler = ShapeSampler::new(&config);
    let mut cases = Vec::new();
    for &pattern in &patterns {
        for shape in sampler.sample(pattern, args.case.world_size, args.count)? {
            cases.push(TestCase {
                dtype: args.case.dtype,
                m: shape.m,
                k: shape.k,
                n: shape.n,
                batch_dims: shape.batch_dims,
                world_size: args.case.world_size,
                trans_a: args.case.trans_a,
                trans_b: args.case.trans_b,
                quant: args.case.quant(),
                bias: args.case.bias,
                scale: args.case.scale,
                pattern,
            });
        }
    }
    info!(cases = cases.len(), patterns = patterns.len(), "case list sampled");

    let runner = CaseRunner::new(config).with_verify_rank(args.verify_rank);
    let (summary, outcomes) = runner.run_batch(&cases);

    for (case, outcome) in cases.iter().zip(&outcomes) {
        match outcome {
            CaseOutcome::Passed(report) => {
                info!(case = %case.label(), within = report.within_tolerance_pct, "PASS");
            }
            CaseOutcome::Skipped { case_id } => {
                info!(case = %case.label(), %case_id, "SKIP (golden overflow)");
            }
            CaseOutcome::Failed(err) => {
                error!(case = %case.label(), %err, "FAIL");
            }
        }
    }

    if !summary.all_passed() {
        bail!(
            "{} of {} cases failed ({} passed, {} skipped)",
            summary.failed,
            summary.total(),
            summary.passed,
            summary.skipped
        );
    }
    info!(
        passed = summary.passed,
        skipped = summary.skipped,
        "all cases passed"
    );
    Ok(())
}

fn cmd_gen(args: GenArgs) -> Result<()> {
    let case = TestCase {
        dtype: args.case.dtype,
        m: args.m,
        k: args.k,
        n: args.n,
        batch_dims: args.batch_dims,
        world_size: args.case.world_size,
        trans_a: args.case.trans_a,
        trans_b: args.case.trans_b,
        quant: args.case.quant(),
        bias: args.case.bias,
        scale: args.case.scale,
        pattern: args.pattern,
    };

    let config = HarnessConfig {
        gen_mode: gen_mode(args.deterministic),
        data_root: args.data_root,
        seed: args.seed,
        ..HarnessConfig::default()
    };

    let runner = CaseRunner::new(config);
    let layout = runner.prepare(&case)?;
    println!("{}", layout.case_dir().display());
    Ok(())
}

fn cmd_verify(args: VerifyArgs) -> Result<()> {
    let case_file = args.data_root.join(&args.case_id).join("case.json");
    let json = std::fs::read_to_string(&case_file)
        .with_context(|| format!("reading {}", case_file.display()))?;
    let case: TestCase = serde_json::from_str(&json)
        .with_context(|| format!("parsing {}", case_file.display()))?;

    let layout = CaseLayout::new(&args.data_root, &case);
    let report = matcomm_harness::verify::verify_rank(&case, &layout, args.rank)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scale_kind_parsing_accepts_all_shapes() {
        for (s, kind) in [
            ("none", ScaleKind::None),
            ("per_tensor", ScaleKind::PerTensor),
            ("per_channel", ScaleKind::PerChannel),
            ("per_token", ScaleKind::PerToken),
            ("fused", ScaleKind::Fused),
        ] {
            assert_eq!(parse_scale_kind(s).unwrap(), kind);
        }
        assert!(parse_scale_kind("per_block").is_err());
    }

    #[test]
    fn run_args_default_to_all_patterns() {
        let cli = Cli::parse_from(["matcomm", "run", "--kernel", "/bin/true"]);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.patterns.is_empty());
                assert_eq!(args.count, 10);
                assert_eq!(args.case.world_size, 2);
            }
            _ => unreachable!(),
        }
    }
}
