use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use pitch_upload::config::{Config, DEFAULT_CONFIG_PATH};
use pitch_upload::core::{BatchOutcome, FilteredEventReceiver, SelectionReport};
use pitch_upload::utils::{format_bytes, format_duration, format_eta, format_speed, progress_bar};
use pitch_upload::{
    ArtifactRole,
    CandidateFile,
    DeferredUploadCoordinator,
    HttpParentService,
    HttpTransport,
    LocalMediaProbe,
    ParentId,
    RecordId,
    UploadEvent,
    UploadManager,
};

/// Upload the media of a pitch.
///
/// Without --pitch-id the pitch is created first and the files are attached
/// to it once it exists.
#[derive(Parser, Debug)]
#[command(name = "pitch-upload", version)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Attach to an existing pitch instead of creating one
    #[arg(long)]
    pitch_id: Option<String>,

    /// Title of the new pitch
    #[arg(long, default_value = "Untitled pitch")]
    title: String,

    #[arg(long)]
    logline: Option<String>,

    #[arg(long)]
    cover: Option<PathBuf>,

    #[arg(long)]
    trailer: Option<PathBuf>,

    #[arg(long)]
    deck: Option<PathBuf>,

    #[arg(long)]
    script: Option<PathBuf>,

    #[arg(long)]
    nda: Option<PathBuf>,

    /// Override the configured concurrency
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Skip metadata and thumbnail extraction
    #[arg(long)]
    no_probe: bool,

    /// Supporting files
    files: Vec<PathBuf>,
}

impl Args {
    async fn candidates(&self) -> anyhow::Result<Vec<CandidateFile>> {
        let roles = [
            (&self.cover, ArtifactRole::Cover),
            (&self.trailer, ArtifactRole::Trailer),
            (&self.deck, ArtifactRole::PitchDeck),
            (&self.script, ArtifactRole::Script),
            (&self.nda, ArtifactRole::Nda),
        ];

        let paths = roles
            .into_iter()
            .filter_map(|(path, role)| path.as_ref().map(|path| (path, role)))
            .chain(self.files.iter().map(|path| (path, ArtifactRole::Supporting)));

        let mut candidates = Vec::new();
        for (path, role) in paths {
            let candidate = CandidateFile::from_path(path)
                .await
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            candidates.push(candidate.with_role(role));
        }
        Ok(candidates)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pitch_upload=info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(concurrency) = args.concurrency {
        config.session.max_concurrent = concurrency;
    }
    // 新建 pitch 时文件必须等到 pitch 存在
    if args.pitch_id.is_none() {
        config.session.require_parent = true;
    }

    let candidates = args.candidates().await?;
    if candidates.is_empty() {
        anyhow::bail!("no files given");
    }

    let transport = HttpTransport::new(&config.endpoint)?.with_token(config.token.clone());
    let mut builder = UploadManager::builder(Arc::new(transport)).config(config.session.clone());
    if !args.no_probe {
        builder = builder.probe(Arc::new(LocalMediaProbe::new()));
    }
    if let Some(pitch_id) = &args.pitch_id {
        builder = builder.parent(ParentId::new(pitch_id.clone()));
    }

    let handle = builder.build();
    let manager = handle.manager.clone();
    let started = Instant::now();
    let printer = tokio::spawn(print_progress(manager.clone()));
    let finished = manager.subscribe_filtered(|event| {
        matches!(event, UploadEvent::Completed { .. } | UploadEvent::Failed { .. })
    });
    let finished_printer = tokio::spawn(print_finished(manager.clone(), finished));

    let result = match &args.pitch_id {
        Some(pitch_id) => {
            let selection = manager.select(candidates).await?;
            print_selection(&selection);
            let ids = manager.start_batch().await?;
            let outcome = manager.wait_settled(ids).await?;
            println!("Pitch {}", pitch_id);
            print_outcome(&outcome);
            outcome.failed.len()
        }
        None => {
            let parent_service = HttpParentService::new(&config.endpoint)?.with_token(config.token.clone());
            let coordinator = DeferredUploadCoordinator::new(manager.clone(), Arc::new(parent_service));

            let parent_data = json!({
                "title": args.title,
                "logline": args.logline,
            });
            let (selection, report) = coordinator.run(candidates, parent_data).await?;
            print_selection(&selection);
            println!("Pitch {}", report.parent_id);
            print_outcome(&report.outcome);
            if let Some(warning) = &report.warning {
                println!("Warning: uploads were not linked to the pitch: {}", warning.message);
            }
            report.outcome.failed.len()
        }
    };

    printer.abort();
    finished_printer.abort();
    handle.shutdown().await?;
    println!("Done in {}", format_duration(started.elapsed()));

    if result > 0 {
        anyhow::bail!("{} upload(s) failed", result);
    }
    Ok(())
}

async fn print_progress(manager: UploadManager) {
    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        interval.tick().await;
        let stats = manager.view().stats;
        if stats.uploading == 0 {
            continue;
        }
        eprintln!(
            "{} {:>5.1}% {}/{} files  {} of {}  {}  eta {}",
            progress_bar(stats.byte_percent, 30),
            stats.byte_percent,
            stats.completed,
            stats.total,
            format_bytes(stats.bytes_completed),
            format_bytes(stats.bytes_total),
            format_speed(stats.speed),
            format_eta(stats.eta_seconds),
        );
    }
}

async fn print_finished<F>(manager: UploadManager, mut events: FilteredEventReceiver<F>)
where
    F: Fn(&UploadEvent) -> bool,
{
    while let Some(event) = events.recv().await {
        let name_of = |id: RecordId| {
            manager
                .view()
                .record(id)
                .map(|record| record.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        match event {
            UploadEvent::Completed { id, .. } => eprintln!("finished {}", name_of(id)),
            UploadEvent::Failed { id, error } => eprintln!("failed   {}: {}", name_of(id), error),
            _ => {}
        }
    }
}

fn print_selection(selection: &SelectionReport) {
    for rejection in &selection.rejected {
        println!("Skipped {}: {}", rejection.name, rejection.error);
    }
}

fn print_outcome(outcome: &BatchOutcome) {
    for upload in &outcome.successful {
        println!("  ok      {} -> {}", upload.name, upload.url);
    }
    for upload in &outcome.failed {
        println!("  failed  {}: {}", upload.name, upload.reason);
    }
    if !outcome.cancelled.is_empty() {
        println!("  {} cancelled", outcome.cancelled.len());
    }
}
