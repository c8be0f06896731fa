use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;

use tpush_protocol::{HttpConnector, RemoteConnector, ServerCredentials};
use tpush_store::DirObjectSource;
use tpush_sync::{push_root_ref, UploadReport, Uploader};
use tpush_types::ObjectHash;

use crate::cli::*;
use crate::config::PushConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => PushConfig::load(path)?,
        None => PushConfig::default(),
    };
    let connector = HttpConnector::new().with_verbose(cli.verbose);
    match cli.command {
        Command::Push(args) => cmd_push(args, &config, Arc::new(connector), cli.format).await,
        Command::PushRef(args) => cmd_push_ref(args, &config, &connector).await,
    }
}

fn load_credentials(path: &Path) -> anyhow::Result<ServerCredentials> {
    ServerCredentials::load(path)
        .with_context(|| format!("reading credentials {}", path.display()))
}

fn parse_commit(hex: &str) -> anyhow::Result<ObjectHash> {
    ObjectHash::from_hex(hex).with_context(|| format!("invalid commit hash {hex}"))
}

/// The commit named on the command line, by hash or by local ref.
fn resolve_commit(repo: &DirObjectSource, args: &PushArgs) -> anyhow::Result<ObjectHash> {
    match (&args.commit, &args.ref_name) {
        (Some(hex), _) => parse_commit(hex),
        (None, Some(name)) => repo
            .resolve_ref(name)
            .with_context(|| format!("resolving ref {name}")),
        (None, None) => bail!("either --ref or --commit is required"),
    }
}

async fn cmd_push(
    args: PushArgs,
    config: &PushConfig,
    connector: Arc<dyn RemoteConnector>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let ref_to_push = match (args.push_ref, &args.ref_name) {
        (false, _) => None,
        (true, Some(name)) => Some(name.clone()),
        (true, None) => bail!("--push-ref needs --ref to name the remote ref"),
    };
    let credentials = load_credentials(&args.credentials)?;
    let repo = DirObjectSource::open(&args.repo)
        .with_context(|| format!("opening repository {}", args.repo.display()))?;
    let commit = resolve_commit(&repo, &args)?;
    let options = config.upload_options(args.jobs, args.timeout, args.dry_run);
    let cacert = config.cacert(args.cacert.as_deref());

    let uploader = Uploader::new(Arc::new(repo), connector.clone());
    let report = uploader
        .upload(&credentials, commit, cacert.as_deref(), &options)
        .await?;
    print_report(&report, format)?;
    if !report.success {
        bail!(
            "push failed: {}",
            report.stop_reason.as_deref().unwrap_or("unknown error")
        );
    }

    if let Some(name) = ref_to_push {
        push_root_ref(
            connector.as_ref(),
            &credentials,
            &name,
            &commit,
            cacert.as_deref(),
            args.dry_run,
        )
        .await?;
        if matches!(format, OutputFormat::Text) {
            println!(
                "{} refs/heads/{} -> {}",
                "✓".green(),
                name.yellow(),
                commit.short_hex().cyan()
            );
        }
    }
    Ok(())
}

async fn cmd_push_ref(
    args: PushRefArgs,
    config: &PushConfig,
    connector: &dyn RemoteConnector,
) -> anyhow::Result<()> {
    let credentials = load_credentials(&args.credentials)?;
    let commit = parse_commit(&args.commit)?;
    let cacert = config.cacert(args.cacert.as_deref());
    push_root_ref(
        connector,
        &credentials,
        &args.ref_name,
        &commit,
        cacert.as_deref(),
        args.dry_run,
    )
    .await?;
    let note = if args.dry_run { " (dry run)" } else { "" };
    println!(
        "{} refs/heads/{} -> {}{}",
        "✓".green().bold(),
        args.ref_name.yellow(),
        commit.short_hex().cyan(),
        note.dimmed()
    );
    Ok(())
}

fn print_report(report: &UploadReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            if report.success {
                let headline = if report.dry_run {
                    "Dry run complete, no objects uploaded"
                } else {
                    "Upload complete"
                };
                println!("{} {}", "✓".green().bold(), headline);
            } else {
                println!("{} Push aborted ({})", "✗".red().bold(), report.state);
            }
            println!("  Commit: {}", report.root.to_hex().cyan());
            println!("  Requests: {}", report.requests_issued.to_string().bold());
            println!(
                "  Objects: {} seen, {} uploaded, {} already present",
                report.objects_seen, report.uploads_performed, report.already_present
            );
            if report.retries > 0 {
                println!("  Retries: {}", report.retries.to_string().yellow());
            }
            if let Some(reason) = &report.stop_reason {
                println!("  Reason: {}", reason.red());
            }
        }
    }
    Ok(())
}
