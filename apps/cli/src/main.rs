//! Chunkwise command-line uploader.

mod cli;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use chunkwise_uploader::{
    HttpBackend, UploadBackend, UploadClient, UploadError, UploadOptions, UploaderConfig,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => UploaderConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => UploaderConfig::default(),
    };
    let backend = Arc::new(
        HttpBackend::new(&cli.server, config.request_timeout())
            .context("building HTTP client")?,
    );
    tracing::debug!(server = %cli.server, "using upload server");

    match cli.command {
        Command::Upload(args) => {
            let client = UploadClient::new(backend, config)?;
            let options = options(args.metadata);
            let id = client.initialize_file(&args.file, options).await?;
            println!("session {id}");
            drive(Arc::new(client), id, false).await
        }
        Command::Resume(args) => {
            let client = UploadClient::new(backend, config)?;
            client
                .restore_file(&args.session_id, &args.file, options(args.metadata))
                .await?;
            drive(Arc::new(client), args.session_id, true).await
        }
        Command::Cancel(args) => {
            backend.delete_session(&args.session_id).await?;
            println!("cancelled {}", args.session_id);
            Ok(())
        }
        Command::Status(args) => {
            let status = backend.session_status(&args.session_id).await?;
            println!("{}", output::format_stored(&status.acknowledged_chunks));
            Ok(())
        }
    }
}

fn options(metadata: Vec<(String, String)>) -> UploadOptions {
    metadata
        .into_iter()
        .fold(UploadOptions::new(), |opts, (k, v)| opts.with(k, v))
}

/// Runs the transfer, printing progress. Ctrl-C pauses the session so it
/// can be resumed later.
async fn drive(client: Arc<UploadClient>, id: String, resume: bool) -> Result<()> {
    let mut sub = client.subscribe(&id)?;
    let printer = tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            let last = event.kind.is_final();
            println!("{}", output::format_event(&event));
            if last {
                break;
            }
        }
    });

    let mut task = {
        let client = Arc::clone(&client);
        let id = id.clone();
        tokio::spawn(async move {
            if resume {
                client.resume(&id).await
            } else {
                client.upload(&id).await
            }
        })
    };

    let result = tokio::select! {
        res = &mut task => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(session = %id, "interrupted, pausing");
            if let Err(e) = client.pause(&id) {
                // Past the chunk phase; let the transfer settle.
                tracing::warn!(session = %id, error = %e, "could not pause");
            }
            task.await?
        }
    };

    match result {
        Ok(job_id) => {
            // Dropping the session closes the event stream.
            if let Err(e) = client.remove(&id) {
                tracing::debug!(session = %id, error = %e, "session not removed");
            }
            printer.await?;
            println!("job {job_id}");
            Ok(())
        }
        Err(UploadError::Paused(_)) => {
            printer.abort();
            println!("paused; continue with: chunkwise resume {id} <file>");
            Ok(())
        }
        Err(e) => {
            printer.abort();
            if e.can_resume() {
                eprintln!("upload failed, resumable with: chunkwise resume {id} <file>");
            }
            Err(e.into())
        }
    }
}
