//! Main entry point for the pypidata CLI application.

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use pypidata::cli::Command;
use pypidata::{
    Cli, DirectorySink, LogSink, PackageIndex, Pipeline, ProjectProducer, RemoteZip,
    ResilientFetcher, ZipFileEntry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let fetcher = ResilientFetcher::with_config(cli.fetcher_config())?;

    match &cli.command {
        Command::Fetch {
            names,
            from,
            output,
            jobs,
            ..
        } => {
            let mut names = names.clone();
            if let Some(path) = from {
                let listed = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading project names from {}", path.display()))?;
                names.extend(
                    listed
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty() && !l.starts_with('#'))
                        .map(String::from),
                );
            }
            if names.is_empty() {
                bail!("no project names given");
            }

            let producer = ProjectProducer::new(PackageIndex::new(fetcher, cli.command.index_urls()));
            let mut pipeline = Pipeline::new(*jobs);
            let stats = match output {
                Some(dir) => pipeline.run(names, &producer, DirectorySink::new(dir)).await?,
                None => pipeline.run(names, &producer, LogSink::default()).await?,
            };
            if !cli.is_quiet() {
                eprintln!(
                    "{} projects, {} updates in {} batches",
                    stats.inputs, stats.items, stats.batches
                );
            }
        }
        Command::List { url, long, .. } => {
            let archive = RemoteZip::open(fetcher, url.as_str(), cli.command.lazy_file_config()).await?;
            list_files(archive.entries(), *long);
            if !cli.is_quiet() {
                eprintln!(
                    "\nTotal bytes transferred: {} in {} requests",
                    format_size(archive.file().transferred_bytes()),
                    archive.file().range_requests()
                );
            }
        }
        Command::Cat { url, member, .. } => {
            let mut archive = RemoteZip::open(fetcher, url.as_str(), cli.command.lazy_file_config()).await?;
            let Some(data) = archive.read_by_name(member).await? else {
                bail!("{member}: no such file in archive");
            };
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

/// Print archive contents, either names only or as a table.
fn list_files(entries: &[ZipFileEntry], long: bool) {
    if long {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if !long {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if long {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Space saved by compression, as a right-aligned percentage.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
