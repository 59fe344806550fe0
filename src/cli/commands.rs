//! CLI command handlers.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{parse_query, Cli, Commands, DownloadArgs, PathArgs, UploadArgs};
use crate::controller::{Outcome, Progress, RequestController};
use crate::request::{HttpMethod, UploadSource};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Run one parsed command to completion.
pub async fn run(cli: Cli) -> CommandResult {
    let controller = RequestController::new(cli.controller_config()?)?;
    match cli.command {
        Commands::Get(args) => handle_simple(&controller, HttpMethod::Get, args, true).await,
        Commands::Head(args) => handle_simple(&controller, HttpMethod::Head, args, false).await,
        Commands::Delete(args) => handle_simple(&controller, HttpMethod::Delete, args, true).await,
        Commands::Download(args) => handle_download(&controller, args).await,
        Commands::Upload(args) => handle_upload(&controller, args).await,
    }
}

async fn handle_simple(
    controller: &RequestController,
    method: HttpMethod,
    args: PathArgs,
    print_body: bool,
) -> CommandResult {
    let query = args
        .query
        .iter()
        .map(|raw| parse_query(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let pairs: Vec<(&str, &str)> = query
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let descriptor = controller.descriptor(method, &args.path, &pairs)?;
    let outcome = controller.send(descriptor).await;
    report(outcome, print_body)
}

async fn handle_download(controller: &RequestController, args: DownloadArgs) -> CommandResult {
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.download_file(
        &args.path,
        args.out,
        None,
        Some(Arc::new(print_progress)),
        Arc::new(move |outcome: Outcome| {
            let _ = tx.send(outcome);
        }),
    )?;
    let outcome = rx.recv().await.ok_or("download finished without an outcome")?;
    eprintln!();
    if let Some(file) = &outcome.response.file {
        println!("{}", file.display());
    }
    report(outcome, false)
}

async fn handle_upload(controller: &RequestController, args: UploadArgs) -> CommandResult {
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.upload_file(
        args.method,
        &args.path,
        UploadSource::File(args.file),
        args.content_type.as_deref(),
        Some(Arc::new(print_progress)),
        Arc::new(move |outcome: Outcome| {
            let _ = tx.send(outcome);
        }),
    )?;
    let outcome = rx.recv().await.ok_or("upload finished without an outcome")?;
    eprintln!();
    report(outcome, true)
}

fn print_progress(progress: Progress) {
    match progress.fraction() {
        Some(fraction) => eprint!("\r{:>5.1}% ({} bytes)", fraction * 100.0, progress.bytes_done),
        None => eprint!("\r{} bytes", progress.bytes_done),
    }
    let _ = std::io::stderr().flush();
}

fn report(outcome: Outcome, print_body: bool) -> CommandResult {
    let response = &outcome.response;
    if response.status != 0 {
        eprintln!("HTTP {}", response.status);
        for (name, value) in &response.headers {
            eprintln!("{name}: {value}");
        }
    }
    if print_body && !response.body.is_empty() {
        match &response.parsed {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => println!("{}", response.text()),
        }
    }
    match outcome.error {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}
