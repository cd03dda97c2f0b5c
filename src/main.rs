use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zip_courier::config::PipelineConfig;
use zip_courier::utils::status_log::StatusLog;
use zip_courier::{InputFile, RunReport, create_pipeline};

#[derive(Parser, Debug)]
#[command(version, about = "Zip local files in a staging area and upload the archive")]
struct Cli {
    /// Upload endpoint, overrides UPLOAD_URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Staging directory, overrides STAGING_ROOT
    #[arg(long, global = true)]
    staging_root: Option<PathBuf>,

    /// Staging quota in bytes, overrides STAGING_QUOTA_BYTES
    #[arg(long, global = true)]
    quota_bytes: Option<u64>,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive the given files and upload the archive
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Upload an archive left in the staging namespace
    Retrieve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zip_courier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env();
    if let Some(endpoint) = cli.endpoint {
        config.upload_url = endpoint;
    }
    if let Some(root) = cli.staging_root {
        config.staging_root = root;
    }
    if let Some(quota) = cli.quota_bytes {
        config.quota_bytes = quota;
    }

    let pipeline = create_pipeline(&config).await?;
    let printer = tokio::spawn(print_status(pipeline.status().subscribe()));

    let outcome = match cli.command {
        Command::Send { files } => {
            let mut inputs = Vec::with_capacity(files.len());
            for path in &files {
                inputs.push(InputFile::from_path(path).await.map_err(|e| {
                    anyhow::anyhow!("cannot read {}: {}", path.display(), e)
                })?);
            }
            info!("🚀 Sending {} file(s)", inputs.len());
            pipeline.run(inputs).await
        }
        Command::Retrieve => {
            info!("🚀 Retrieving staged archive from {}", pipeline.namespace());
            pipeline.get_file().await
        }
    };

    // Closing the status channel lets the printer drain and exit.
    drop(pipeline);
    let _ = printer.await;

    match outcome {
        Ok(report) => {
            print_report(&report, cli.json)?;
            Ok(())
        }
        Err(e) => {
            error!("❌ {}", e);
            Err(e.into())
        }
    }
}

/// Prints each status message once, as it enters the log.
async fn print_status(mut rx: watch::Receiver<StatusLog>) {
    let mut printed: Vec<String> = Vec::new();
    loop {
        let fresh: Vec<String> = rx
            .borrow_and_update()
            .entries()
            .filter(|m| !printed.iter().any(|p| p == m))
            .map(str::to_string)
            .collect();

        for message in fresh {
            println!("{}", message);
            printed.push(message);
        }

        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    if let Some(archive) = &report.archive {
        println!(
            "Archived {} file(s), {} bytes -> {} bytes",
            archive.entries, archive.input_bytes, archive.archive_bytes
        );
    }
    println!(
        "Uploaded {} bytes (HTTP {}) in {} ms",
        report.upload.archive_bytes,
        report.upload.status,
        (report.finished_at - report.started_at).num_milliseconds()
    );
    Ok(())
}
