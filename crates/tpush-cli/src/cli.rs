use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tpush",
    about = "Push snapshot commits to a remote artifact host",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with defaults for jobs, CA bundle, timeout and pacing
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload a commit and every object it references
    Push(PushArgs),
    /// Point a remote ref at a commit
    PushRef(PushRefArgs),
}

#[derive(Args)]
pub struct PushArgs {
    /// Local repository directory
    #[arg(long)]
    pub repo: PathBuf,
    /// Ref under refs/heads naming the commit to push
    #[arg(long = "ref", required_unless_present = "commit", conflicts_with = "commit")]
    pub ref_name: Option<String>,
    /// Commit hash to push
    #[arg(long)]
    pub commit: Option<String>,
    /// Credentials JSON file
    #[arg(long)]
    pub credentials: PathBuf,
    /// Extra CA certificates (PEM)
    #[arg(long)]
    pub cacert: Option<PathBuf>,
    #[arg(long)]
    pub dry_run: bool,
    /// Maximum concurrent transfers
    #[arg(short, long)]
    pub jobs: Option<usize>,
    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Also update the remote ref after a successful upload
    #[arg(long, requires = "ref_name", conflicts_with = "commit")]
    pub push_ref: bool,
}

#[derive(Args)]
pub struct PushRefArgs {
    #[arg(long)]
    pub credentials: PathBuf,
    #[arg(long = "ref")]
    pub ref_name: String,
    #[arg(long)]
    pub commit: String,
    #[arg(long)]
    pub cacert: Option<PathBuf>,
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_push_by_ref() {
        let cli = Cli::try_parse_from([
            "tpush", "push", "--repo", "/srv/repo", "--ref", "main", "--credentials", "creds.json",
        ])
        .unwrap();
        if let Command::Push(args) = cli.command {
            assert_eq!(args.repo, PathBuf::from("/srv/repo"));
            assert_eq!(args.ref_name, Some("main".into()));
            assert!(args.commit.is_none());
            assert!(!args.dry_run);
            assert!(args.jobs.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_push_by_commit() {
        let hex = "ab".repeat(32);
        let cli = Cli::try_parse_from([
            "tpush", "push", "--repo", ".", "--commit", hex.as_str(), "--credentials", "c.json",
            "--dry-run", "-j", "8",
        ])
        .unwrap();
        if let Command::Push(args) = cli.command {
            assert_eq!(args.commit, Some(hex));
            assert!(args.dry_run);
            assert_eq!(args.jobs, Some(8));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn push_needs_ref_or_commit() {
        let result =
            Cli::try_parse_from(["tpush", "push", "--repo", ".", "--credentials", "c.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn ref_and_commit_conflict() {
        let result = Cli::try_parse_from([
            "tpush", "push", "--repo", ".", "--credentials", "c.json", "--ref", "main",
            "--commit", "ab",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn push_ref_flag_requires_ref() {
        let result = Cli::try_parse_from([
            "tpush", "push", "--repo", ".", "--credentials", "c.json", "--commit", "ab",
            "--push-ref",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn push_ref_flag_with_ref() {
        let cli = Cli::try_parse_from([
            "tpush", "push", "--repo", ".", "--credentials", "c.json", "--ref", "main",
            "--push-ref",
        ])
        .unwrap();
        if let Command::Push(args) = cli.command {
            assert!(args.push_ref);
            assert_eq!(args.ref_name, Some("main".into()));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_push_ref() {
        let cli = Cli::try_parse_from([
            "tpush", "push-ref", "--credentials", "c.json", "--ref", "release", "--commit", "ab",
        ])
        .unwrap();
        if let Command::PushRef(args) = cli.command {
            assert_eq!(args.ref_name, "release");
            assert_eq!(args.commit, "ab");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "tpush", "--verbose", "--format", "json", "--config", "tpush.toml",
            "push-ref", "--credentials", "c.json", "--ref", "main", "--commit", "ab",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Json));
        assert_eq!(cli.config, Some(PathBuf::from("tpush.toml")));
    }
}
