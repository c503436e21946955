//! `git review`: distributed code review over git notes.
//!
//! The CLI is a thin wrapper over the library: it parses arguments, opens
//! the repository containing the current directory, builds a context from
//! its configuration, and calls one lifecycle or synchronization operation.
//! All interesting semantics live in `git_review` proper.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use git_review::config::Context;
use git_review::errors::ReviewError;
use git_review::forks::{self, Fork, ingest};
use git_review::records::comment::Resolution;
use git_review::refs::{ARCHIVES_PATTERN, NOTES_PATTERN};
use git_review::repo::git::GitCliRepo;
use git_review::repo::{Repo, SubmitStrategy};
use git_review::review::lifecycle::{self, CommentArgs, RequestArgs};
use git_review::review::Review;
use git_review::sign::{GpgSigner, Signer};

#[derive(Parser)]
#[command(
    name = "git-review",
    about = "Distributed code review stored in git notes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct MessageOpts {
    /// Message text.
    #[arg(short, long)]
    message: Option<String>,
    /// Read the message from a file (`-` for stdin).
    #[arg(short = 'F', long = "file", conflicts_with = "message")]
    message_file: Option<String>,
}

impl MessageOpts {
    fn text(&self) -> Result<String, ReviewError> {
        if let Some(message) = &self.message {
            return Ok(message.clone());
        }
        match self.message_file.as_deref() {
            Some("-") => {
                let mut buffer = String::new();
                std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)?;
                Ok(buffer.trim_end().to_string())
            }
            Some(path) => Ok(std::fs::read_to_string(path)?.trim_end().to_string()),
            None => Ok(String::new()),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Request a review of the current branch.
    Request {
        /// Reviewer email; repeatable.
        #[arg(short, long = "reviewer")]
        reviewers: Vec<String>,
        /// Source ref (defaults to the checked-out branch).
        #[arg(long)]
        source: Option<String>,
        /// Target ref to merge into.
        #[arg(long, default_value = "refs/heads/master")]
        target: String,
        /// Allow requesting with uncommitted local changes.
        #[arg(long)]
        allow_uncommitted: bool,
        /// Sign the request record.
        #[arg(long)]
        sign: bool,
        #[command(flatten)]
        message: MessageOpts,
    },
    /// Comment on a review.
    Comment {
        /// Review anchor (defaults to the current branch's review).
        review: Option<String>,
        /// Id of the comment being replied to.
        #[arg(short, long)]
        parent: Option<String>,
        /// File the comment refers to.
        #[arg(short = 'f', long = "file-path")]
        path: Option<String>,
        /// One-based line within the file.
        #[arg(short, long, requires = "path")]
        line: Option<u32>,
        /// Mark the comment as approval.
        #[arg(long, conflicts_with = "nmw")]
        lgtm: bool,
        /// Mark the comment as needs-work.
        #[arg(long)]
        nmw: bool,
        /// Sign the comment record.
        #[arg(long)]
        sign: bool,
        #[command(flatten)]
        message: MessageOpts,
    },
    /// Approve a review (LGTM).
    Accept {
        review: Option<String>,
        #[arg(long)]
        sign: bool,
        #[command(flatten)]
        message: MessageOpts,
    },
    /// Ask for more work on a review.
    Reject {
        review: Option<String>,
        #[arg(long)]
        sign: bool,
        #[command(flatten)]
        message: MessageOpts,
    },
    /// Abandon a review.
    Abandon {
        review: Option<String>,
        #[arg(long)]
        sign: bool,
        #[command(flatten)]
        message: MessageOpts,
    },
    /// Rebase a review onto its target, keeping its identity.
    Rebase {
        review: Option<String>,
        #[arg(long)]
        sign: bool,
    },
    /// Land an accepted review on its target ref.
    Submit {
        review: Option<String>,
        /// Override the configured submit strategy.
        #[arg(long, value_parser = clap::value_parser!(SubmitStrategyArg))]
        strategy: Option<SubmitStrategyArg>,
        /// Submit even when the review is not accepted.
        #[arg(long)]
        force: bool,
    },
    /// Show one review.
    Show { review: Option<String> },
    /// List reviews.
    List {
        /// Include submitted and abandoned reviews.
        #[arg(long)]
        all: bool,
    },
    /// Fetch review metadata from a remote and ingest registered forks.
    Pull {
        #[arg(default_value = "origin")]
        remote: String,
    },
    /// Push review metadata to a remote.
    Push {
        #[arg(default_value = "origin")]
        remote: String,
    },
    /// Manage the fork registry.
    Fork {
        #[command(subcommand)]
        command: ForkCommand,
    },
}

#[derive(Clone)]
struct SubmitStrategyArg(SubmitStrategy);

impl std::str::FromStr for SubmitStrategyArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SubmitStrategy>()
            .map(SubmitStrategyArg)
            .map_err(|e| e.to_string())
    }
}

#[derive(Subcommand)]
enum ForkCommand {
    /// Register a fork.
    Add {
        name: String,
        /// Fetch URL; repeatable.
        #[arg(long = "url", required = true)]
        urls: Vec<String>,
        /// Trusted owner email; repeatable.
        #[arg(long = "owner", required = true)]
        owners: Vec<String>,
        /// Refspec pattern the fork advertises; repeatable.
        #[arg(long = "ref", default_value = "refs/heads/*")]
        refs: Vec<String>,
    },
    /// List registered forks.
    List,
    /// Remove a fork.
    Remove { name: String },
}

fn signer_for(repo: &dyn Repo, sign: bool) -> Result<Option<GpgSigner>, ReviewError> {
    if !sign {
        return Ok(None);
    }
    match repo.signing_key()? {
        Some(key) => Ok(Some(GpgSigner::new(&key))),
        None => Err(ReviewError::Signature(
            "signing requested but user.signingKey is not configured".to_string(),
        )),
    }
}

fn run() -> Result<(), ReviewError> {
    let cli = Cli::parse();
    let repo = GitCliRepo::open(Path::new("."))?;
    let mut ctx = Context::from_repo(&repo)?;

    match cli.command {
        Command::Request {
            reviewers,
            source,
            target,
            allow_uncommitted,
            sign,
            message,
        } => {
            ctx.sign = sign;
            let signer = signer_for(&repo, sign)?;
            let anchor = lifecycle::request_review(
                &repo,
                &ctx,
                &RequestArgs {
                    reviewers,
                    source,
                    target,
                    description: message.text()?,
                    allow_uncommitted,
                },
                signer.as_ref().map(|s| s as &dyn Signer),
            )?;
            println!("requested review {}", anchor.colored_hex());
        }
        Command::Comment {
            review,
            parent,
            path,
            line,
            lgtm,
            nmw,
            sign,
            message,
        } => {
            ctx.sign = sign;
            let signer = signer_for(&repo, sign)?;
            let anchor = lifecycle::resolve_anchor(&repo, review.as_deref())?;
            let resolved = if lgtm {
                Resolution::Accepted
            } else if nmw {
                Resolution::Rejected
            } else {
                Resolution::Fyi
            };
            let id = lifecycle::comment_on_review(
                &repo,
                &ctx,
                &anchor,
                &CommentArgs {
                    message: message.text()?,
                    parent,
                    path,
                    line,
                    resolved,
                },
                signer.as_ref().map(|s| s as &dyn Signer),
            )?;
            println!("{id}");
        }
        Command::Accept { review, sign, message } => {
            ctx.sign = sign;
            let signer = signer_for(&repo, sign)?;
            let anchor = lifecycle::resolve_anchor(&repo, review.as_deref())?;
            lifecycle::set_verdict(
                &repo,
                &ctx,
                &anchor,
                true,
                &message.text()?,
                signer.as_ref().map(|s| s as &dyn Signer),
            )?;
        }
        Command::Reject { review, sign, message } => {
            ctx.sign = sign;
            let signer = signer_for(&repo, sign)?;
            let anchor = lifecycle::resolve_anchor(&repo, review.as_deref())?;
            lifecycle::set_verdict(
                &repo,
                &ctx,
                &anchor,
                false,
                &message.text()?,
                signer.as_ref().map(|s| s as &dyn Signer),
            )?;
        }
        Command::Abandon { review, sign, message } => {
            ctx.sign = sign;
            let signer = signer_for(&repo, sign)?;
            let anchor = lifecycle::resolve_anchor(&repo, review.as_deref())?;
            let text = message.text()?;
            let farewell = if text.is_empty() { None } else { Some(text.as_str()) };
            lifecycle::abandon(
                &repo,
                &ctx,
                &anchor,
                farewell,
                signer.as_ref().map(|s| s as &dyn Signer),
            )?;
        }
        Command::Rebase { review, sign } => {
            ctx.sign = sign;
            let signer = signer_for(&repo, sign)?;
            let anchor = lifecycle::resolve_anchor(&repo, review.as_deref())?;
            let head = lifecycle::rebase(
                &repo,
                &ctx,
                &anchor,
                signer.as_ref().map(|s| s as &dyn Signer),
            )?;
            println!("rebased onto {}", head.colored_hex());
        }
        Command::Submit { review, strategy, force } => {
            let anchor = lifecycle::resolve_anchor(&repo, review.as_deref())?;
            lifecycle::submit(&repo, &ctx, &anchor, strategy.map(|s| s.0), force)?;
        }
        Command::Show { review } => {
            let anchor = lifecycle::resolve_anchor(&repo, review.as_deref())?;
            let review = Review::get_required(&repo, &anchor)?;
            print!("{review}");
        }
        Command::List { all } => {
            let reviews = if all {
                Review::list_all(&repo)?
            } else {
                Review::list_open(&repo)?
            };
            for review in reviews {
                let state = if review.submitted {
                    "submitted"
                } else if !review.open() {
                    "abandoned"
                } else {
                    "open"
                };
                println!(
                    "{} [{state}] {} {}",
                    review.revision,
                    review.request.requester,
                    review.request.description.lines().next().unwrap_or("")
                );
            }
        }
        Command::Pull { remote } => {
            repo.pull_notes_and_archive(&remote, NOTES_PATTERN, ARCHIVES_PATTERN)?;
            let registered = forks::list_forks(&repo)?;
            if !registered.is_empty() {
                let imported = ingest::ingest_forks(Arc::new(repo), registered)?;
                println!("imported {imported} fork records");
            }
        }
        Command::Push { remote } => {
            repo.push_notes_and_archive(&remote, NOTES_PATTERN, ARCHIVES_PATTERN)?;
        }
        Command::Fork { command } => match command {
            ForkCommand::Add { name, urls, owners, refs } => {
                forks::add_fork(&repo, &Fork::new(&name, urls, owners, refs))?;
            }
            ForkCommand::List => {
                for fork in forks::list_forks(&repo)? {
                    println!("{} {} (owners: {})", fork.name, fork.urls.join(" "), fork.owners.join(", "));
                }
            }
            ForkCommand::Remove { name } => {
                forks::remove_fork(&repo, &name)?;
            }
        },
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("git-review: {e}");
            ExitCode::FAILURE
        }
    }
}
