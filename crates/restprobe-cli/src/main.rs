//! restprobe CLI - adaptive feedback-directed probing of REST APIs

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use restprobe_core::Config;
use restprobe_runner::Engine;

#[derive(Parser)]
#[command(name = "restprobe")]
#[command(about = "Adaptive feedback-directed test-case generator for REST APIs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "terminal")]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the API described by the configured OpenAPI document
    Run {
        /// Config file (default: .restprobe.toml)
        #[arg(short, long)]
        config: Option<String>,

        /// Wall-clock budget in seconds (overrides config)
        #[arg(long)]
        time_budget: Option<u64>,

        /// RNG seed for a reproducible run (overrides config)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Initialize config file
    Init,

    /// Show version and check the configured spec and solver
    Doctor,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Terminal,
    Json,
    Silent,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(3)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            config,
            time_budget,
            seed,
        } => {
            let mut cfg = if let Some(path) = config {
                Config::load(std::path::Path::new(&path))?
            } else {
                Config::load_default()?
            };
            if let Some(budget) = time_budget {
                cfg.time_budget_secs = budget;
            }
            if let Some(seed) = seed {
                cfg.seed = Some(seed);
            }

            if cli.output != OutputFormat::Silent {
                eprintln!("Config:");
                eprintln!("  spec:     {}", cfg.spec.display());
                eprintln!("  base_url: {}", cfg.base_url);
                eprintln!("  budget:   {}s", cfg.time_budget_secs);
                eprintln!("  solver:   {:?}", cfg.solver);
                if !cfg.headers.is_empty() {
                    eprintln!("  headers:  {} configured", cfg.headers.len());
                }
                eprintln!();
            }

            let output_dir = cfg.output_dir.clone();
            let mut engine = Engine::new(cfg)?;
            let summary = engine.run()?;

            // No requests went through at all: tool error, not a clean pass
            let total: u64 = summary
                .operations
                .iter()
                .map(|o| o.ok + o.client_error + o.server_error)
                .sum();
            if total == 0 {
                eprintln!("Error: no requests were made. Check spec and base_url.");
                return Ok(3);
            }

            let failed = summary.total_server_errors() > 0 || summary.total_bug_fragments() > 0;

            match cli.output {
                OutputFormat::Terminal => {
                    println!(
                        "{}: {} operations, {} requests in {:.1}s",
                        if failed { "FAIL" } else { "PASS" },
                        summary.operations.len(),
                        total,
                        summary.elapsed.as_secs_f64(),
                    );
                    println!("\n{:<40} {:>6} {:>6} {:>6} {:>6}", "operation", "2xx", "4xx", "5xx", "bugs");
                    for op in &summary.operations {
                        println!(
                            "{:<40} {:>6} {:>6} {:>6} {:>6}",
                            op.op_id, op.ok, op.client_error, op.server_error, op.bug_fragments,
                        );
                    }
                    println!("\nReports: {}", output_dir.display());
                }
                OutputFormat::Json => {
                    let json_output = serde_json::json!({
                        "verdict": if failed { "fail" } else { "pass" },
                        "summary": summary,
                    });
                    println!("{}", serde_json::to_string_pretty(&json_output)?);
                }
                OutputFormat::Silent => {}
            }

            Ok(i32::from(failed))
        }

        Commands::Init => {
            let config_path = ".restprobe.toml";
            if std::path::Path::new(config_path).exists() {
                eprintln!("{config_path} already exists");
                return Ok(1);
            }

            std::fs::write(config_path, Config::example())?;
            println!("Created {config_path}");
            println!("\nEdit the file to configure:");
            println!("  - spec: path to your OpenAPI document");
            println!("  - base_url: server to test");
            println!("  - headers / query_auth: auth tokens, API keys");
            Ok(0)
        }

        Commands::Doctor => {
            println!("restprobe doctor");
            println!("================\n");

            let config_ok = std::path::Path::new(".restprobe.toml").exists();
            println!(
                "[{}] Config file (.restprobe.toml)",
                if config_ok { "OK" } else { "--" }
            );

            if let Ok(cfg) = Config::load_default() {
                let spec_ok = cfg.spec.exists();
                println!(
                    "[{}] Spec file ({})",
                    if spec_ok { "OK" } else { "NG" },
                    cfg.spec.display()
                );

                if cfg.solver == restprobe_core::SolverKind::Pict {
                    let pict = cfg.pict_path.unwrap_or_else(|| "pict".into());
                    let pict_ok = which(&pict);
                    println!(
                        "[{}] PICT binary ({})",
                        if pict_ok { "OK" } else { "NG" },
                        pict.display()
                    );
                } else {
                    println!("[OK] Greedy solver (built in)");
                }
            }

            if !config_ok {
                println!("\nCreate config file:");
                println!("  restprobe init");
            }

            Ok(0)
        }
    }
}

/// True if `binary` resolves to an existing file, either directly or on PATH.
fn which(binary: &std::path::Path) -> bool {
    if binary.components().count() > 1 {
        return binary.exists();
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
    })
}
