//! Import command handler

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::clients::{ImdbClient, OpenSubtitlesClient};
use crate::config::Config;
use crate::domain::ExternalId;
use crate::importer::{Clients, ImportContext, ImportReport, ShowWithFile};
use crate::library::{Entity, SqliteLibrary};
use crate::models::{FileRef, Stage};

pub async fn cmd_import(
    config: &Config,
    paths: Vec<PathBuf>,
    interactive: bool,
) -> anyhow::Result<()> {
    let library = Arc::new(
        SqliteLibrary::open(&config.library.database_path)
            .await
            .context("Failed to open library")?,
    );

    let osdb = Arc::new(OpenSubtitlesClient::new(config.importer.osdb.clone())?);
    let clients = Clients {
        fingerprints: osdb.clone(),
        metadata: Arc::new(ImdbClient::new(&config.importer.imdb)?),
        subtitles: osdb,
    };

    let (ctx, mut errors) = ImportContext::new(config.clone(), library, clients);

    let error_logger = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(err) = errors.recv().await {
            error!(error = %err, "Import error");
            count += 1;
        }
        count
    });

    let interrupt = tokio::spawn({
        let ctx = ctx.clone();
        async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupted, stopping import");
                    if let Err(e) = ctx.stop() {
                        warn!(error = %e, "Stop failed");
                    }
                }
                Err(e) => error!("Error listening for interrupt: {}", e),
            }
        }
    });

    let report = ctx.import(paths).await;
    print_report(&report);

    if !report.files_with_errors.is_empty() && !ctx.is_stopped() {
        if interactive {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            fix_file_errors(&ctx, &report.files_with_errors, &mut input, &mut output).await?;
        } else {
            warn!(
                files = report.files_with_errors.len(),
                "There have been errors while importing some files"
            );
        }
    }

    interrupt.abort();
    let _ = interrupt.await;
    drop(ctx);
    let fatal = error_logger.await.unwrap_or_default();
    if fatal > 0 {
        anyhow::bail!("{fatal} errors while saving to the library");
    }
    Ok(())
}

fn print_report(report: &ImportReport) {
    println!("Import finished:");
    println!("  Files probed:         {}", report.files_probed);
    println!("  Files identified:     {}", report.files_identified);
    println!("  Shows processed:      {}", report.shows_processed);
    println!("  Series created:       {}", report.series_created);
    println!("  Subtitles downloaded: {}", report.subtitles_downloaded);
    if report.invalid_paths > 0 {
        println!("  Invalid paths:        {}", report.invalid_paths);
    }
    if !report.files_with_errors.is_empty() {
        println!("  Files with errors:    {}", report.files_with_errors.len());
    }
}

/// What the operator wants done with a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    /// Attach the file to this show.
    Show(ExternalId),
    /// Don't try to identify this file by fingerprint again.
    SkipFingerprint,
    /// Leave the file alone.
    Next,
    Abort,
    Invalid(String),
}

impl Answer {
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "" => Self::Next,
            "f" => Self::SkipFingerprint,
            "a" => Self::Abort,
            other => match other.parse::<ExternalId>() {
                Ok(id) => Self::Show(id),
                Err(e) => Self::Invalid(e.to_string()),
            },
        }
    }
}

/// Walks the operator through every file that could not be identified.
/// Files matched by hand go through metadata and subtitle processing again.
pub async fn fix_file_errors<R: BufRead, W: Write>(
    ctx: &Arc<ImportContext>,
    files: &[FileRef],
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<()> {
    writeln!(
        output,
        "{} of the files have errors. Let's walk through them:",
        files.len()
    )?;

    let (tx, rx) = mpsc::channel(ctx.config().importer.buffer_size.max(1));
    let processing = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.process_shows(rx).await }
    });

    let result = prompt_files(ctx, files, input, output, &tx).await;

    drop(tx);
    if let Err(e) = processing.await {
        error!(error = %e, "Show processing failed");
    }
    result
}

async fn prompt_files<R: BufRead, W: Write>(
    ctx: &ImportContext,
    files: &[FileRef],
    input: &mut R,
    output: &mut W,
    shows: &mpsc::Sender<ShowWithFile>,
) -> anyhow::Result<()> {
    for file in files {
        {
            let guard = file.lock().await;
            writeln!(output, "[{}]", guard.path)?;
            for (stage, message) in guard.status.errors() {
                writeln!(output, "  {stage}: {message}")?;
            }
        }

        loop {
            write!(
                output,
                "Enter [imdb id or link], [f] skip fingerprint identification, [a] abort, or nothing to leave it: "
            )?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(output, "aborting.")?;
                return Ok(());
            }

            match Answer::parse(&line) {
                Answer::Next => break,
                Answer::Abort => {
                    writeln!(output, "aborting.")?;
                    return Ok(());
                }
                Answer::SkipFingerprint => {
                    file.lock().await.status.skip(Stage::FingerprintIdentify);
                    ctx.library()
                        .save(Entity::File(file.clone()))
                        .await
                        .context("Failed to save file")?;
                    break;
                }
                Answer::Invalid(reason) => {
                    writeln!(output, "unable to read imdb id: {reason}")?;
                }
                Answer::Show(id) => {
                    let show = match ctx.library().get_or_create_show_by_external_id(id).await {
                        Ok(show) => show,
                        Err(e) => {
                            writeln!(output, "unable to get show {id}: {e}")?;
                            continue;
                        }
                    };
                    writeln!(output, "adding show with imdb id {}", id.imdb_tag())?;

                    {
                        let mut guard = file.lock().await;
                        guard.show_id = Some(id);
                        guard.status.succeed(Stage::FingerprintIdentify);
                    }
                    show.lock().await.attach_file(file);

                    let pair = ShowWithFile {
                        show,
                        file: file.clone(),
                    };
                    if shows.send(pair).await.is_err() {
                        anyhow::bail!("Show processing stopped");
                    }
                    break;
                }
            }
        }
    }
    Ok(())
}
