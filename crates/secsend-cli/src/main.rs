//! secsend: end-to-end encrypted, resumable file transfers
//!
//! Commands:
//!   upload <paths..>                 - encrypt and upload one file (or several as a zip)
//!   resume --id --key <paths..>      - continue an interrupted upload
//!   download --id --key [--range]    - fetch and decrypt, optionally a byte range
//!   info --id --key                  - show decrypted metadata and sizes
//!   delete --id                      - remove a transfer (needs the root id)
//!   config show                      - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use secsend_core::config::{expand_home, SecsendConfig};
use secsend_core::{parse_any_file_id, RootId, SecsendError};
use secsend_crypto::BaseKey;
use secsend_storage::{
    build_operator, check_health, ObjectTransport, S3Credentials, Transport, TransportConfig,
};
use secsend_transfer::{
    delete_transfer, transfer_info, ByteRangeSpec, DownloadSession, ProgressFn, UploadOptions,
    UploadSession, UploadSource,
};

/// Key prefix for transfers inside the storage root
const TRANSFER_PREFIX: &str = "transfers";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "secsend",
    version,
    about = "End-to-end encrypted, resumable file transfers",
    long_about = "secsend: encrypt files client-side, upload them in chunks, and resume or \
                  download byte ranges without the store ever seeing plaintext"
)]
struct Cli {
    /// Path to secsend.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SECSEND_CONFIG",
        default_value = "~/.config/secsend/config.toml"
    )]
    config: String,

    /// Log level (overrides config; RUST_LOG takes precedence over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: text or json (overrides config)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and upload files; several paths are sent as one zip archive
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Display name (for several files: the archive name, without .zip)
        #[arg(long)]
        name: Option<String>,
        /// MIME type (default: application/octet-stream, or application/zip)
        #[arg(long)]
        mime: Option<String>,
        /// Seconds the transfer lives after completion (0 = never)
        #[arg(long)]
        expiry: Option<u64>,
    },

    /// Continue an interrupted upload from the same files
    Resume {
        /// Root id printed by `upload`
        #[arg(long)]
        id: RootId,
        /// Key printed by `upload`
        #[arg(long, env = "SECSEND_KEY", value_parser = parse_key)]
        key: BaseKey,
        /// The same files, in any order
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Download and decrypt a transfer
    Download {
        /// File id (or root id)
        #[arg(long)]
        id: String,
        #[arg(long, env = "SECSEND_KEY", value_parser = parse_key)]
        key: BaseKey,
        /// Plaintext byte range: a-b (inclusive), a-, or -n
        #[arg(long)]
        range: Option<ByteRangeSpec>,
        /// Output path; "-" for stdout (default: the stored name)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Show decrypted metadata and sizes
    Info {
        /// File id (or root id)
        #[arg(long)]
        id: String,
        #[arg(long, env = "SECSEND_KEY", value_parser = parse_key)]
        key: BaseKey,
    },

    /// Delete a transfer
    Delete {
        /// Root id printed by `upload`
        #[arg(long)]
        id: RootId,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

fn parse_key(s: &str) -> Result<BaseKey, String> {
    BaseKey::from_text(s).map_err(|e| e.to_string())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_home(&cli.config);
    let config = load_config(&config_path)?;

    init_logging(
        cli.log_level.as_deref().unwrap_or(&config.log.level),
        cli.log_format.as_deref().unwrap_or(&config.log.format),
    );

    match cli.command {
        Commands::Upload {
            paths,
            name,
            mime,
            expiry,
        } => cmd_upload(&config, &paths, name, mime, expiry).await,
        Commands::Resume { id, key, paths } => cmd_resume(&config, id, key, &paths).await,
        Commands::Download {
            id,
            key,
            range,
            output,
        } => cmd_download(&config, &id, key, range, output.as_deref()).await,
        Commands::Info { id, key } => cmd_info(&config, &id, key).await,
        Commands::Delete { id } => cmd_delete(&config, &id).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn load_config(path: &Path) -> Result<SecsendConfig> {
    SecsendConfig::load_or_default(path)
        .with_context(|| format!("loading config: {}", path.display()))
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries ids, keys and downloaded data
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn build_transport(config: &SecsendConfig) -> Result<Arc<dyn Transport>> {
    let creds = S3Credentials::from_env();
    tracing::debug!(
        backend = ?config.storage.backend,
        root = %config.storage.root,
        s3_credentials = creds.is_some(),
        "opening storage"
    );
    let op = build_operator(&config.storage, creds.as_ref())?;
    check_health(&op, TRANSFER_PREFIX).await?;
    let limits = TransportConfig {
        valid_expiries: config.transfer.valid_expiries.clone(),
        filesize_limit: config.storage.filesize_limit,
    };
    Ok(Arc::new(ObjectTransport::new(op, TRANSFER_PREFIX, limits)))
}

fn push_timeout(config: &SecsendConfig) -> Option<Duration> {
    (config.transfer.push_timeout_secs > 0).then(|| config.transfer.push_timeout())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `secsend upload` / `secsend resume` ──────────────────────────────────────

async fn cmd_upload(
    config: &SecsendConfig,
    paths: &[PathBuf],
    name: Option<String>,
    mime: Option<String>,
    expiry: Option<u64>,
) -> Result<()> {
    let transport = build_transport(config).await?;
    let source = UploadSource::from_paths(paths, name.as_deref())
        .await
        .context("reading upload source")?;
    let name = match &source {
        UploadSource::Archive { .. } => None,
        _ => name,
    };

    let opts = UploadOptions {
        name,
        mime_type: mime,
        chunk_size: config.transfer.chunk_size,
        expiry: expiry.unwrap_or(config.transfer.default_expiry),
        push_timeout: push_timeout(config),
    };
    let mut session = UploadSession::new_upload(transport, source, opts)
        .await
        .context("registering upload")?;

    println!("root id:  {}", session.root_id());
    println!("file id:  {}", session.file_id());
    println!("key:      {}", session.key().to_text());

    run_upload(&mut session, paths).await
}

async fn cmd_resume(
    config: &SecsendConfig,
    id: RootId,
    key: BaseKey,
    paths: &[PathBuf],
) -> Result<()> {
    let transport = build_transport(config).await?;
    let source = UploadSource::from_paths(paths, None)
        .await
        .context("reading upload source")?;
    let mut session = UploadSession::resume(transport, id, key, source, push_timeout(config))
        .await
        .context("resuming upload")?;
    println!(
        "resuming {} at {}",
        session.metadata().name,
        fmt_bytes(session.sent())
    );
    run_upload(&mut session, paths).await
}

async fn run_upload(session: &mut UploadSession, paths: &[PathBuf]) -> Result<()> {
    let pb = make_progress_bar(session.total_len(), "upload");
    let progress = progress_callback(&pb);
    let cancel = cancel_on_ctrl_c();

    match session.run(Some(&progress), &cancel).await {
        Ok(bytes) => {
            pb.finish_with_message("done");
            println!("uploaded: {}", fmt_bytes(bytes));
            println!("file id:  {}", session.file_id());
            Ok(())
        }
        Err(e) if e.is_canceled() || e.is_retryable() => {
            pb.abandon_with_message("paused");
            if !e.is_canceled() {
                eprintln!("upload interrupted: {e}");
            }
            eprintln!(
                "{} of {} stored; continue with:\n  secsend resume --id {} --key {} {}",
                fmt_bytes(session.sent()),
                fmt_bytes(session.total_len()),
                session.root_id(),
                session.key().to_text(),
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            if e.is_canceled() {
                Ok(())
            } else {
                Err(e).context("upload interrupted")
            }
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(e).context("upload failed")
        }
    }
}

// ── `secsend download` ───────────────────────────────────────────────────────

async fn cmd_download(
    config: &SecsendConfig,
    id: &str,
    key: BaseKey,
    range: Option<ByteRangeSpec>,
    output: Option<&Path>,
) -> Result<()> {
    let transport = build_transport(config).await?;
    let file_id = parse_any_file_id(id)?;
    let session = DownloadSession::open(transport.as_ref(), file_id, key, range)
        .await
        .map_err(explain_key_error)
        .context("opening download")?;

    let cancel = cancel_on_ctrl_c();
    let to_stdout = output.is_some_and(|p| p == Path::new("-"));
    if to_stdout {
        let mut stdout = tokio::io::stdout();
        session.write_to(&mut stdout, None, &cancel).await?;
        return Ok(());
    }

    let dest = match output {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(safe_file_name(&session.metadata().name)),
    };
    let pb = make_progress_bar(session.content_length(), "download");
    let progress = progress_callback(&pb);
    let mut file = tokio::fs::File::create(&dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;

    match session.write_to(&mut file, Some(&progress), &cancel).await {
        Ok(bytes) => {
            pb.finish_with_message("done");
            println!("{} → {}", fmt_bytes(bytes), dest.display());
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(e).with_context(|| format!("downloading to {}", dest.display()))
        }
    }
}

/// Stored names come from the uploader; keep only the final component.
fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    match base {
        "" | "." | ".." => "download.bin".to_string(),
        other => other.to_string(),
    }
}

fn explain_key_error(e: SecsendError) -> anyhow::Error {
    match e {
        SecsendError::InvalidKey => anyhow::anyhow!("the key does not match this transfer"),
        other => other.into(),
    }
}

// ── `secsend info` / `secsend delete` ────────────────────────────────────────

async fn cmd_info(config: &SecsendConfig, id: &str, key: BaseKey) -> Result<()> {
    let transport = build_transport(config).await?;
    let file_id = parse_any_file_id(id)?;
    let info = transfer_info(transport.as_ref(), file_id, key)
        .await
        .map_err(explain_key_error)?;
    let meta = &info.metadata;

    println!("file id:     {}", info.file_id);
    println!("name:        {}", meta.name);
    println!("mime type:   {}", meta.mime_type);
    println!("algorithm:   {}", meta.algo.name());
    println!("chunk size:  {}", fmt_bytes(meta.chunk_size as u64));
    println!("complete:    {}", meta.complete);
    println!("stored:      {} ({} plaintext)", fmt_bytes(info.stored), fmt_bytes(info.plain_size));
    match (meta.timeout_s, info.expires_at) {
        (0, _) => println!("expires:     never"),
        (secs, None) => println!("expires:     {secs}s after completion"),
        (_, Some(ts)) => {
            let when = chrono::DateTime::from_timestamp(ts as i64, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| ts.to_string());
            println!("expires:     {when}");
        }
    }
    Ok(())
}

async fn cmd_delete(config: &SecsendConfig, id: &RootId) -> Result<()> {
    let transport = build_transport(config).await?;
    delete_transfer(transport.as_ref(), id)
        .await
        .context("deleting transfer")?;
    println!("deleted {}", id.file_id());
    Ok(())
}

// ── `secsend config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SecsendConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
