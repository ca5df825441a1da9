//! Command-line front end for grib-output.
//!
//! Resolves templates, prints assembled plans and drives synthetic writes
//! through an output session, using the same configuration the model
//! runner would.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use grib_output::OutputConfig;

#[derive(Parser, Debug)]
#[command(name = "grib-output")]
#[command(about = "Template resolution and output plans for GRIB model output")]
struct Args {
    /// Log level
    #[arg(long, global = true, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Log format: text or json
    #[arg(long, global = true, default_value = "text", env = "LOG_FORMAT")]
    log_format: String,

    /// Configuration file (YAML); the environment is used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the template for a field shape and metadata
    Resolve {
        /// Field shape, e.g. 181,360
        #[arg(long, value_delimiter = ',', required = true)]
        shape: Vec<usize>,

        /// Field metadata as key=value
        #[arg(long = "meta")]
        meta: Vec<String>,
    },

    /// Print the plan a session would build
    Plan {
        /// Plan profile: to_file, to_fdb or debug
        #[arg(short, long)]
        profile: Option<String>,

        /// Output file or archive config
        #[arg(short, long)]
        destination: PathBuf,

        /// Field shape, e.g. 181,360
        #[arg(long, value_delimiter = ',', default_value = "181,360")]
        shape: Vec<usize>,

        /// Field metadata as key=value
        #[arg(long = "meta")]
        meta: Vec<String>,

        /// Output format: yaml or json
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// List template files under every search root
    Templates,

    /// Write synthetic fields through an output session
    Write {
        /// Plan profile: to_file, to_fdb or debug
        #[arg(short, long)]
        profile: Option<String>,

        /// Output file or archive config
        #[arg(short, long)]
        destination: PathBuf,

        /// Field shape, e.g. 181,360
        #[arg(long, value_delimiter = ',', default_value = "181,360")]
        shape: Vec<usize>,

        /// Number of forecast steps to write
        #[arg(long, default_value = "1")]
        steps: u32,

        /// Hours between steps
        #[arg(long, default_value = "6")]
        step_interval: i64,

        /// Experiment version
        #[arg(long, default_value = "0001")]
        expver: String,

        /// Field metadata as key=value
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
}

fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format)?;

    let config = match &args.config {
        Some(path) => OutputConfig::from_yaml(path)?,
        None => OutputConfig::from_env()?,
    };
    debug!(roots = ?config.template_roots.roots(), "Loaded configuration");

    match args.command {
        Commands::Resolve { shape, meta } => commands::resolve(&config, &shape, &meta),
        Commands::Plan {
            profile,
            destination,
            shape,
            meta,
            format,
        } => commands::plan(
            &config,
            profile.as_deref(),
            &destination,
            &shape,
            &meta,
            &format,
        ),
        Commands::Templates => commands::templates(&config),
        Commands::Write {
            profile,
            destination,
            shape,
            steps,
            step_interval,
            expver,
            meta,
        } => commands::write(
            &config,
            &commands::WriteRequest {
                profile: profile.as_deref(),
                destination: &destination,
                shape: &shape,
                steps,
                step_interval,
                expver: &expver,
                meta: &meta,
            },
        ),
    }
}

/// Logs go to stderr so command output on stdout stays parseable.
fn init_tracing(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if log_format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    Ok(())
}
