// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use segfetch::prelude::*;
use segfetch::util::{extract_file_name, format_bytes, is_valid_url};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Download a file over HTTP in parallel segments.
///
/// Interrupt with Ctrl-C to pause; running the same command again resumes
/// from the segments already on disk.
#[derive(Parser, Debug)]
#[command(name = "segfetch", version, about)]
struct Args {
    /// URL to download (http or https)
    url: String,

    /// Directory to save the file in
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// File name to save as; derived from the URL when omitted
    #[arg(short = 'f', long)]
    file_name: Option<String>,

    /// Number of parallel segments (1-8)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=8))]
    threads: Option<u8>,

    /// JSON file with download options
    #[arg(long)]
    config: Option<PathBuf>,

    /// Delete segments left by an earlier run instead of resuming them
    #[arg(long)]
    discard: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Renders progress on stderr, rewriting one line.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn on_snapshot(&self, snapshot: &ProgressSnapshot) {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r{}", progress_line(snapshot));
        let _ = err.flush();
    }

    fn on_state(&self, state: SessionState) {
        match state {
            SessionState::Completed => eprintln!("\nDownload completed."),
            SessionState::Paused => eprintln!("\nDownload paused."),
            SessionState::Cancelled => eprintln!("\nDownload cancelled."),
            _ => {}
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if !is_valid_url(&args.url) {
        bail!("not an http(s) URL: {}", args.url);
    }

    let mut options = match &args.config {
        Some(path) => DownloadOptions::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DownloadOptions::default(),
    };
    if let Some(threads) = args.threads {
        options.threads = usize::from(threads);
    }

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let file_name = args
        .file_name
        .clone()
        .unwrap_or_else(|| extract_file_name(&args.url));
    let destination = args.output_dir.join(file_name);

    eprintln!("URL:         {}", args.url);
    eprintln!("Destination: {}", destination.display());
    eprintln!("Threads:     {}", options.effective_threads());

    let session = Arc::new(
        SessionController::new(args.url.clone(), &destination, options)?
            .with_sink(Arc::new(ConsoleSink)),
    );

    if args.discard {
        let removed = session.store().discard_all().await?;
        if removed > 0 {
            eprintln!("Discarded {removed} segment(s) from an earlier run.");
        }
    }

    session.start().await?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let ctrl_c = {
        let session = session.clone();
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
                if let Err(e) = session.pause().await {
                    tracing::debug!(error = %e, "pause on ctrl-c ignored");
                }
            }
        })
    };

    session.join_workers().await;
    if interrupted.load(Ordering::SeqCst) {
        let _ = ctrl_c.await;
    } else {
        ctrl_c.abort();
    }

    let status = session.status().await;
    match status.state {
        SessionState::Completed => Ok(()),
        SessionState::Paused if interrupted.load(Ordering::SeqCst) => {
            eprintln!("Run the same command again to resume.");
            Ok(())
        }
        SessionState::Paused => {
            bail!("merging segments failed; run the same command again to retry")
        }
        _ => {
            // Every worker has exited but at least one chunk is incomplete.
            session.cancel().await?;
            let total = status
                .total_bytes
                .map(format_bytes)
                .unwrap_or_else(|| "unknown".to_string());
            bail!(
                "download stopped at {} of {}: a segment failed; run the same command again to resume",
                format_bytes(status.downloaded_bytes),
                total
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_the_only_required_argument() {
        let args = Args::try_parse_from(["segfetch", "https://example.com/a.zip"]).unwrap();
        assert_eq!(args.url, "https://example.com/a.zip");
        assert_eq!(args.output_dir, PathBuf::from("."));
        assert_eq!(args.threads, None);
        assert!(!args.discard);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn thread_count_outside_bounds_is_rejected() {
        assert!(Args::try_parse_from(["segfetch", "-t", "0", "https://x.test/a"]).is_err());
        assert!(Args::try_parse_from(["segfetch", "-t", "9", "https://x.test/a"]).is_err());
        let args = Args::try_parse_from(["segfetch", "-t", "8", "https://x.test/a"]).unwrap();
        assert_eq!(args.threads, Some(8));
    }

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from([
            "segfetch",
            "-o",
            "/tmp/dl",
            "-f",
            "name.bin",
            "--config",
            "opts.json",
            "--discard",
            "-vv",
            "https://x.test/a",
        ])
        .unwrap();
        assert_eq!(args.output_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(args.file_name.as_deref(), Some("name.bin"));
        assert_eq!(args.config, Some(PathBuf::from("opts.json")));
        assert!(args.discard);
        assert_eq!(args.verbose, 2);
    }
}
