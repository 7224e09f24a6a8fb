use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use snaprestore_core::{
	CancellationToken, CollectWarnings, ContentId, LocalRepository, NodeType, PathFilter,
	RestoreConfig, RestoreProgress, RestoreSummary, RestoreWarning, Restorer, Snapshot,
	TreeSource, VerifyReport,
};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "snaprestore", version, about = "snaprestore - parallel snapshot restore")]
struct Cli {
	/// Increase log verbosity (-v debug, -vv trace)
	#[arg(short, long, action = ArgAction::Count, global = true)]
	verbose: u8,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
	/// Only restore paths matching this pattern (repeatable)
	#[arg(long, value_name = "PATTERN")]
	include: Vec<String>,
	/// Skip paths matching this pattern (repeatable)
	#[arg(long, value_name = "PATTERN")]
	exclude: Vec<String>,
}

impl FilterArgs {
	fn build(&self) -> Result<PathFilter> {
		let filter = self.include.iter().try_fold(PathFilter::new(), |f, p| f.include(p))?;
		Ok(self.exclude.iter().try_fold(filter, |f, p| f.exclude(p))?)
	}
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// List snapshots in a repository
	Snapshots {
		/// Repository directory
		#[arg(long)]
		repo: PathBuf,
	},
	/// List the entries of a snapshot
	Ls {
		#[arg(long)]
		repo: PathBuf,
		/// Snapshot ID or unique prefix
		snapshot: String,
	},
	/// Restore a snapshot into a directory
	Restore {
		#[arg(long)]
		repo: PathBuf,
		/// Snapshot ID or unique prefix
		snapshot: String,
		/// Destination directory (created if missing)
		#[arg(long)]
		target: PathBuf,
		/// Number of restore workers (default: available parallelism)
		#[arg(short, long)]
		workers: Option<usize>,
		#[command(flatten)]
		filter: FilterArgs,
		/// Report failed entries as warnings instead of aborting
		#[arg(long)]
		ignore_errors: bool,
		/// Compare restored files with the snapshot afterwards
		#[arg(long)]
		verify: bool,
		/// Print the summary as JSON
		#[arg(long)]
		json: bool,
	},
	/// Compare a restored directory with a snapshot
	Verify {
		#[arg(long)]
		repo: PathBuf,
		/// Snapshot ID or unique prefix
		snapshot: String,
		#[arg(long)]
		target: PathBuf,
		#[command(flatten)]
		filter: FilterArgs,
		/// Print the report as JSON
		#[arg(long)]
		json: bool,
	},
}

#[derive(Serialize)]
struct RestoreOutput<'a> {
	snapshot: String,
	#[serde(flatten)]
	summary: &'a RestoreSummary,
	warnings: Vec<RestoreWarning>,
	#[serde(skip_serializing_if = "Option::is_none")]
	verify: Option<&'a VerifyReport>,
}

fn main() -> ExitCode {
	let cli = Cli::parse();
	setup_logging(cli.verbose);

	match run(cli.command) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!("{:#}", e);
			eprintln!("❌ Error: {:#}", e);
			ExitCode::FAILURE
		}
	}
}

fn setup_logging(verbose: u8) {
	let level = match verbose {
		0 => Level::WARN,
		1 => Level::INFO,
		2 => Level::DEBUG,
		_ => Level::TRACE,
	};
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();
}

fn run(command: Commands) -> Result<()> {
	match command {
		Commands::Snapshots { repo } => {
			let repo = open_repository(&repo)?;
			let snapshots = repo.list_snapshots().context("Failed to list snapshots")?;
			if snapshots.is_empty() {
				println!("No snapshots in {}", repo.root().display());
				return Ok(());
			}
			println!("{:<10} {:<20} {:<16} {}", "ID", "Time", "Host", "Paths");
			for (id, snapshot) in snapshots {
				let paths: Vec<String> = snapshot.paths.iter().map(|p| p.display().to_string()).collect();
				println!(
					"{:<10} {:<20} {:<16} {}",
					id.short(),
					snapshot.time.format("%Y-%m-%d %H:%M:%S"),
					snapshot.hostname,
					paths.join(", ")
				);
			}
		}
		Commands::Ls { repo, snapshot } => {
			let repo = open_repository(&repo)?;
			let (_, snapshot) = load_snapshot(&repo, &snapshot)?;
			list_tree(&repo, snapshot.tree, Path::new("/"))?;
		}
		Commands::Restore { repo, snapshot, target, workers, filter, ignore_errors, verify, json } => {
			let repo = open_repository(&repo)?;
			let (id, snapshot) = load_snapshot(&repo, &snapshot)?;

			let config = match workers {
				Some(n) => RestoreConfig::with_workers(n),
				None => RestoreConfig::default(),
			};
			config.validate().context("Invalid --workers")?;

			let cancel = install_cancel_handler()?;
			let warnings = Arc::new(CollectWarnings::new());
			let mut restorer = Restorer::new(Arc::new(repo), snapshot, config).with_select_policy(filter.build()?);
			if ignore_errors {
				restorer = restorer.with_error_handler(warnings.clone());
			}

			let progress = if !json && atty::is(atty::Stream::Stderr) {
				Some(progress_bar()?)
			} else {
				None
			};
			if let Some(bar) = &progress {
				let bar = bar.clone();
				restorer.set_progress_callback(move |p| bar.set_message(format_progress(&p)));
			}

			let result = restorer.restore_to(&cancel, &target);
			if let Some(bar) = &progress {
				bar.finish_and_clear();
			}
			let summary = result.with_context(|| format!("Restore of snapshot {} failed", id.short()))?;

			let report = if verify {
				Some(restorer.verify_files(&cancel, &target).context("Verification failed")?)
			} else {
				None
			};

			if json {
				let output = RestoreOutput {
					snapshot: id.to_hex(),
					summary: &summary,
					warnings: warnings.warnings(),
					verify: report.as_ref(),
				};
				println!("{}", serde_json::to_string_pretty(&output)?);
			} else {
				print_restore_summary(&id, &summary, &warnings.warnings());
				if let Some(report) = &report {
					print_verify_report(report);
				}
			}

			if let Some(report) = &report {
				if !report.is_clean() {
					bail!("{} restored files differ from the snapshot", report.issues.len());
				}
			}
		}
		Commands::Verify { repo, snapshot, target, filter, json } => {
			let repo = open_repository(&repo)?;
			let (_, snapshot) = load_snapshot(&repo, &snapshot)?;
			let cancel = install_cancel_handler()?;

			let restorer = Restorer::new(Arc::new(repo), snapshot, RestoreConfig::default())
				.with_select_policy(filter.build()?);
			let report = restorer.verify_files(&cancel, &target).context("Verification failed")?;

			if json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else {
				print_verify_report(&report);
			}
			if !report.is_clean() {
				bail!("{} files differ from the snapshot", report.issues.len());
			}
		}
	}
	Ok(())
}

fn open_repository(path: &Path) -> Result<LocalRepository> {
	LocalRepository::open(path).with_context(|| format!("Failed to open repository at {}", path.display()))
}

fn load_snapshot(repo: &LocalRepository, id: &str) -> Result<(ContentId, Snapshot)> {
	repo.load_snapshot(id).with_context(|| format!("Failed to load snapshot {}", id))
}

/// Ctrl-C cancels the run; workers finish their current entry first
fn install_cancel_handler() -> Result<CancellationToken> {
	let cancel = CancellationToken::new();
	let flag = cancel.clone();
	ctrlc::set_handler(move || {
		eprintln!("\nInterrupt received, stopping...");
		flag.cancel();
	})
	.context("Failed to set signal handler")?;
	Ok(cancel)
}

fn progress_bar() -> Result<ProgressBar> {
	let bar = ProgressBar::new_spinner();
	bar.set_style(
		ProgressStyle::default_spinner()
			.template("{spinner:.green} [{elapsed_precise}] {msg}")?
			.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
	);
	bar.enable_steady_tick(Duration::from_millis(100));
	Ok(bar)
}

fn format_progress(p: &RestoreProgress) -> String {
	format!(
		"Entries: {} | Dirs: {} | {} | Errors: {} | Active: {} | Queued: {} files, {} dirs",
		p.nodes_restored,
		p.dirs_restored,
		format_bytes(p.bytes_restored),
		p.errors_handled,
		p.in_flight,
		p.pending_nodes,
		p.pending_dirs
	)
}

fn format_bytes(bytes: u64) -> String {
	const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
	let mut value = bytes as f64;
	let mut unit = 0;
	while value >= 1024.0 && unit < UNITS.len() - 1 {
		value /= 1024.0;
		unit += 1;
	}
	if unit == 0 {
		format!("{} {}", bytes, UNITS[0])
	} else {
		format!("{:.1} {}", value, UNITS[unit])
	}
}

fn list_tree(repo: &LocalRepository, tree: ContentId, dir: &Path) -> Result<()> {
	let tree = repo
		.load_tree(&tree)
		.with_context(|| format!("Failed to load tree for {}", dir.display()))?;
	for node in &tree.nodes {
		let path = dir.join(&node.name);
		match node.node_type {
			NodeType::Dir => {
				println!("d {:>10} {} {}/", "", node.mtime.format("%Y-%m-%d %H:%M"), path.display());
				if let Some(subtree) = node.subtree {
					list_tree(repo, subtree, &path)?;
				}
			}
			NodeType::Symlink => println!(
				"l {:>10} {} {} -> {}",
				"",
				node.mtime.format("%Y-%m-%d %H:%M"),
				path.display(),
				node.link_target.as_deref().unwrap_or("")
			),
			_ => println!(
				"{} {:>10} {} {}",
				type_char(node.node_type),
				node.size,
				node.mtime.format("%Y-%m-%d %H:%M"),
				path.display()
			),
		}
	}
	Ok(())
}

fn type_char(node_type: NodeType) -> char {
	match node_type {
		NodeType::File => '-',
		NodeType::Dir => 'd',
		NodeType::Symlink => 'l',
		NodeType::Dev => 'b',
		NodeType::CharDev => 'c',
		NodeType::Fifo => 'p',
		NodeType::Socket => 's',
	}
}

fn print_restore_summary(id: &ContentId, summary: &RestoreSummary, warnings: &[RestoreWarning]) {
	println!("✅ Restore completed!");
	println!("📊 Run ID: {}", summary.run_id);
	println!("📸 Snapshot: {}", id.short());
	println!("📁 Target: {}", summary.target.display());
	println!("👷 Workers: {}", summary.workers);
	println!("📄 Entries restored: {}", summary.stats.nodes_restored);
	println!("📂 Directories restored: {}", summary.stats.dirs_restored);
	println!("💾 Data written: {}", format_bytes(summary.stats.bytes_restored));
	println!("⏱️  Duration: {} ms", summary.duration_ms);
	if !warnings.is_empty() {
		println!("⚠️  {} entries could not be restored:", warnings.len());
		for warning in warnings {
			println!("   {}: {}", warning.path.display(), warning.message);
		}
	}
}

fn print_verify_report(report: &VerifyReport) {
	println!(
		"🔍 Verified {} files ({})",
		report.files_checked,
		format_bytes(report.bytes_checked)
	);
	for issue in &report.issues {
		println!("   ❌ {}: {}", issue.path.display(), issue.reason);
	}
}
