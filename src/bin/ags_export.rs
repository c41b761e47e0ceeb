use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ags_export::app::App;
use ags_export::config::{ConfigLoader, ConfigOverrides};
use ags_export::domain::ResourceUrl;
use ags_export::error::AgsError;
use ags_export::output::{JsonOutput, LogProgress, OutputMode, print_summary};
use ags_export::service::ArcGisHttpClient;

#[derive(Parser)]
#[command(name = "ags-export")]
#[command(about = "Download every layer of an ArcGIS MapServer/FeatureServer as GeoJSON")]
#[command(version, author)]
struct Cli {
    #[arg(short, long, help = "Service, group layer or layer URL")]
    url: String,

    #[arg(short, long, help = "Directory receiving one <id>_<name>.geojson per layer")]
    output_dir: Option<String>,

    #[arg(long, help = "Output spatial reference (EPSG code)")]
    out_sr: Option<u32>,

    #[arg(long, help = "Comma-separated attribute fields, `*` for all")]
    fields: Option<String>,

    #[arg(long, help = "Attributes only")]
    no_geometry: bool,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long, help = "Chunk requests per layer allowed without --force")]
    chunk_threshold: Option<usize>,

    #[arg(long, help = "Export layers even when they exceed the chunk threshold")]
    force: bool,

    #[arg(long)]
    retries: Option<usize>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Print the export report as JSON")]
    non_interactive: bool,
}

const PARTIAL_FAILURE: u8 = 4;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<AgsError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &AgsError) -> u8 {
    match error {
        AgsError::InvalidUrl(_)
        | AgsError::ConfigRead(_)
        | AgsError::ConfigParse(_)
        | AgsError::InvalidConfig(_) => 2,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let source: ResourceUrl = cli.url.parse()?;
    let overrides = ConfigOverrides {
        output_dir: cli.output_dir,
        out_sr: cli.out_sr,
        out_fields: cli.fields,
        no_geometry: cli.no_geometry,
        chunk_size: cli.chunk_size,
        chunk_threshold: cli.chunk_threshold,
        force: cli.force,
        retries: cli.retries,
        timeout_secs: cli.timeout_secs,
    };
    let resolved = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;
    let client = ArcGisHttpClient::new(resolved.http)?;
    let app = App::new(client, resolved.export_settings());

    let result = match output_mode {
        OutputMode::Interactive => {
            let result = app.export(&source, &LogProgress)?;
            print_summary(&result);
            result
        }
        OutputMode::NonInteractive => {
            let result = app.export(&source, &JsonOutput)?;
            JsonOutput::print_export(&result).into_diagnostic()?;
            result
        }
    };

    if result.has_failures() {
        return Ok(ExitCode::from(PARTIAL_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}
