//! team-e2e - run team-management scenarios against the application under test

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use team_e2e::report::{exit_code, print_report, ReportFormat, EXIT_ERROR};
use team_e2e::server::ServerConfig;
use team_e2e::{E2eResult, RunnerConfig, ScenarioFilter, ScenarioRunner, TestSuiteResult};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "team-e2e")]
#[command(author, version, about = "E2E scenario runner for the team-management pages")]
struct Args {
    /// Scenario files or directories (default: `specs` from the config)
    paths: Vec<PathBuf>,

    /// YAML runner configuration
    #[arg(short, long, env = "E2E_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the application under test
    #[arg(long, env = "E2E_BASE_URL")]
    base_url: Option<String>,

    /// Run only scenarios carrying this tag (repeatable)
    #[arg(short, long)]
    tag: Vec<String>,

    /// Run only scenarios whose "suite › scenario" name contains this
    #[arg(short, long)]
    name: Option<String>,

    /// Scenarios to run concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Wall-clock budget per scenario
    #[arg(long)]
    scenario_timeout_ms: Option<u64>,

    /// How long element lookups and assertions retry
    #[arg(long)]
    lookup_timeout_ms: Option<u64>,

    /// Budget for one page navigation
    #[arg(long)]
    navigation_timeout_ms: Option<u64>,

    /// Spawn this application binary before running
    #[arg(long, env = "E2E_SERVER_BINARY")]
    server_binary: Option<PathBuf>,

    /// Port for the spawned application (default: any free port)
    #[arg(long, requires = "server_binary")]
    port: Option<u16>,

    /// Output directory for test-results.json
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(EXIT_ERROR);
        }
    };

    let outcome = rt.block_on(async_main(args));
    if let Err(e) = &outcome {
        eprintln!("Error: {}", e);
    }
    std::process::exit(exit_code(&outcome));
}

fn build_config(args: &Args) -> E2eResult<RunnerConfig> {
    let mut config = match &args.config {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::default(),
    };

    if !args.paths.is_empty() {
        config.specs = args.paths.clone();
    }
    if let Some(base_url) = &args.base_url {
        config.session.base_url = base_url.clone();
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(ms) = args.scenario_timeout_ms {
        config.scenario_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.lookup_timeout_ms {
        config.session.lookup_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.navigation_timeout_ms {
        config.session.navigation_timeout = Duration::from_millis(ms);
    }
    if let Some(binary) = &args.server_binary {
        let server = config.server.get_or_insert_with(ServerConfig::default);
        server.binary_path = binary.clone();
        if args.port.is_some() {
            server.port = args.port;
        }
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn async_main(args: Args) -> E2eResult<TestSuiteResult> {
    let config = build_config(&args)?;
    let filter = ScenarioFilter {
        tags: args.tag.clone(),
        name: args.name.clone(),
    };

    let mut runner = ScenarioRunner::with_config(config);
    let results = runner.run_all(&filter).await?;
    runner.stop_server().await?;

    print_report(&results, args.format)?;
    runner.write_results(&results)?;

    Ok(results)
}
