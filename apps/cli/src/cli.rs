//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Resumable chunked uploads to an HTTP upload server.
#[derive(Parser)]
#[command(name = "chunkwise")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Base URL of the upload server
    #[arg(long, global = true, env = "CHUNKWISE_SERVER", default_value = "http://localhost:8080")]
    pub server: String,

    /// TOML configuration file
    #[arg(long, global = true, env = "CHUNKWISE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload a file in chunks
    Upload(UploadArgs),

    /// Continue an interrupted upload
    Resume(ResumeArgs),

    /// Cancel an upload and release its server storage
    Cancel(SessionArgs),

    /// Show which chunks the server has stored
    Status(SessionArgs),
}

#[derive(Args)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Metadata forwarded to the server, as KEY=VALUE (repeatable)
    #[arg(short, long = "meta", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
}

#[derive(Args)]
pub struct ResumeArgs {
    /// Session id printed by an earlier upload
    pub session_id: String,

    /// The same file that was being uploaded
    pub file: PathBuf,

    #[arg(short, long = "meta", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
}

#[derive(Args)]
pub struct SessionArgs {
    pub session_id: String,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
