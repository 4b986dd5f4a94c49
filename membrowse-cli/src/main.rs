//! `membrowse`: memory footprint analysis, upload and PR reporting for
//! embedded firmware builds.

mod git;
mod github_comment;
mod summary;
mod upload;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use upload::{GitMetadataPayload, MemBrowseUploader, UploadMetadata, UploadRequest};

#[derive(Parser)]
#[command(name = "membrowse", version, about = "Memory footprint analysis for embedded firmware")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a memory footprint report from an ELF file and linker scripts.
    Report(ReportArgs),
    /// Walk historical commits, rebuilding and uploading a report for each.
    Onboard(OnboardArgs),
    /// Fetch a previously uploaded report and render it as a summary.
    Summary(SummaryArgs),
}

#[derive(Args)]
struct ReportArgs {
    /// Path to the ELF file to analyze.
    elf_path: PathBuf,
    /// Space-separated linker script paths (quote if more than one).
    ld_scripts: String,

    /// Write the report to this path instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Skip DWARF line-program processing for faster analysis.
    #[arg(long)]
    skip_line_program: bool,
    /// Enable debug-level logging.
    #[arg(long)]
    verbose: bool,

    /// Upload the report to MemBrowse.
    #[arg(long)]
    upload: bool,
    /// GitHub Actions mode: auto-detect Git metadata and imply `--upload`.
    #[arg(long)]
    github: bool,

    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    target_name: Option<String>,
    #[arg(long, default_value = "https://membrowse.appspot.com/api/upload")]
    api_url: String,

    #[arg(long)]
    commit_sha: Option<String>,
    #[arg(long)]
    base_sha: Option<String>,
    #[arg(long)]
    branch_name: Option<String>,
    #[arg(long)]
    repo_name: Option<String>,
    #[arg(long)]
    commit_message: Option<String>,
    #[arg(long)]
    commit_timestamp: Option<String>,
    #[arg(long)]
    pr_number: Option<String>,
    #[arg(long)]
    dont_fail_on_alerts: bool,
}

#[derive(Args)]
struct OnboardArgs {
    /// Number of historical commits to process.
    num_commits: u32,
    /// Shell command that builds the firmware.
    build_script: String,
    /// Path to the ELF file produced by the build.
    elf_path: PathBuf,
    /// Space-separated linker script paths (quote if more than one).
    ld_scripts: String,
    /// Build configuration/target name.
    target_name: String,
    /// MemBrowse API key.
    api_key: String,
    /// MemBrowse API endpoint.
    #[arg(default_value = "https://membrowse.appspot.com/api/upload")]
    api_url: String,
}

#[derive(Args)]
struct SummaryArgs {
    /// Git commit SHA to retrieve the summary for.
    commit_sha: String,
    #[arg(long)]
    api_key: String,
    #[arg(long, default_value = "https://api.membrowse.com")]
    api_url: String,
    /// Print the raw JSON response instead of a rendered summary.
    #[arg(long)]
    json: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Report(args) => {
            init_tracing(args.verbose);
            run_report(args)
        }
        Command::Onboard(args) => {
            init_tracing(false);
            run_onboard(args)
        }
        Command::Summary(args) => {
            init_tracing(false);
            run_summary(args)
        }
    }
}

fn detect_elf_info(elf_path: &Path) -> Option<membrowse_common::ElfInfo> {
    let header = fs::read(elf_path).ok()?;
    membrowse_common::detect_elf_info(&header, &elf_path.display().to_string())
}

fn build_report(
    elf_path: &Path,
    ld_scripts: &str,
    skip_line_program: bool,
) -> anyhow::Result<membrowse_report::Report> {
    let script_paths: Vec<&str> = ld_scripts.split_whitespace().collect();
    let elf_info = detect_elf_info(elf_path);
    let regions = membrowse_linker::parse_memory_regions(&script_paths, elf_info.as_ref())?;

    let analyzed = membrowse_debuginfo::analyze(elf_path, skip_line_program)?;

    Ok(membrowse_report::assemble(
        elf_path,
        &analyzed.metadata,
        analyzed.symbols,
        analyzed.program_headers,
        &analyzed.sections,
        regions.into_values().collect(),
    ))
}

fn run_report(args: &ReportArgs) -> anyhow::Result<()> {
    let upload_mode = args.upload || args.github;
    if upload_mode {
        if args.api_key.is_none() {
            anyhow::bail!("--api-key is required when using --upload or --github");
        }
        if args.target_name.is_none() {
            anyhow::bail!("--target-name is required when using --upload or --github");
        }
    }

    let log_prefix = args.commit_sha.clone().map(|s| format!("({s})")).unwrap_or_else(|| "MemBrowse".to_string());
    tracing::info!("{log_prefix}: started memory report generation");

    let report = build_report(&args.elf_path, &args.ld_scripts, args.skip_line_program)?;

    if !upload_mode {
        let json = serde_json::to_string_pretty(&report)?;
        match &args.output {
            Some(path) => fs::write(path, json)?,
            None => println!("{json}"),
        }
        return Ok(());
    }

    let mut commit_sha = args.commit_sha.clone();
    let mut base_sha = args.base_sha.clone();
    let mut branch_name = args.branch_name.clone();
    let mut repo_name = args.repo_name.clone();
    let mut commit_message = args.commit_message.clone();
    let mut commit_timestamp = args.commit_timestamp.clone();
    let mut pr_number = args.pr_number.clone();

    if args.github {
        let metadata = git::detect_github_metadata();
        commit_sha = commit_sha.or(metadata.commit_sha);
        base_sha = base_sha.or(metadata.base_sha);
        branch_name = branch_name.or(metadata.branch_name);
        repo_name = repo_name.or(metadata.repo_name);
        commit_message = commit_message.or(metadata.commit_message);
        commit_timestamp = commit_timestamp.or(metadata.commit_timestamp);
        pr_number = pr_number.or(metadata.pr_number);
    }

    let request = UploadRequest {
        metadata: UploadMetadata {
            git: GitMetadataPayload {
                commit_hash: commit_sha.unwrap_or_default(),
                commit_message: commit_message.unwrap_or_default(),
                commit_timestamp: commit_timestamp.unwrap_or_default(),
                base_commit_hash: base_sha.unwrap_or_default(),
                branch_name: branch_name.unwrap_or_default(),
                pr_number,
            },
            repository: repo_name.unwrap_or_default(),
            target_name: args.target_name.clone().unwrap_or_default(),
            analysis_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        memory_analysis: report,
    };

    let uploader = MemBrowseUploader::new(args.api_key.as_deref().unwrap_or_default(), &args.api_url)?;
    uploader.upload_report(&request, !args.dont_fail_on_alerts)?;
    tracing::info!("{log_prefix}: memory report uploaded successfully");

    if args.github {
        github_comment::post_or_update_pr_comment(None);
    }

    Ok(())
}

fn run_onboard(args: &OnboardArgs) -> anyhow::Result<()> {
    use std::process::Command;

    println!("Starting historical memory analysis for {}", args.target_name);
    println!("Processing last {} commits", args.num_commits);

    let current_branch = git_output(&["symbolic-ref", "--short", "HEAD"])
        .or_else(|| git_output(&["for-each-ref", "--points-at", "HEAD", "--format=%(refname:short)", "refs/heads/"]))
        .unwrap_or_else(|| "unknown".to_string());

    let original_head = git_output(&["rev-parse", "HEAD"]).ok_or_else(|| anyhow::anyhow!("not in a git repository"))?;

    let repo_name = git_output(&["config", "--get", "remote.origin.url"])
        .map(|url| url.trim_end_matches(".git").rsplit('/').next().unwrap_or("unknown").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let commits_output = git_output(&["log", "--format=%H", &format!("-n{}", args.num_commits), "--reverse"])
        .ok_or_else(|| anyhow::anyhow!("failed to get commit history"))?;
    let commits: Vec<&str> = commits_output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let total = commits.len();

    let mut successful = 0;
    let mut failed = 0;

    for (i, commit) in commits.iter().enumerate() {
        let position = i + 1;
        println!("\n=== Processing commit {position}/{total}: {commit} ===");

        if !Command::new("git").args(["checkout", commit, "--quiet"]).status().map(|s| s.success()).unwrap_or(false) {
            eprintln!("({commit}): failed to checkout commit");
            failed += 1;
            continue;
        }
        let _ = Command::new("git").args(["clean", "-fd"]).status();

        println!("({commit}): building firmware with: {}", args.build_script);
        let build_ok = Command::new("bash")
            .args(["-c", &args.build_script])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !build_ok {
            eprintln!("({commit}): build failed, stopping");
            failed += 1;
            restore_head(&original_head);
            anyhow::bail!("build failed on commit {commit}");
        }

        if !args.elf_path.exists() {
            eprintln!("({commit}): ELF file not found at {}", args.elf_path.display());
            failed += 1;
            restore_head(&original_head);
            anyhow::bail!("ELF file missing after build on commit {commit}");
        }

        let commit_metadata = git::commit_metadata(commit);

        let report = match build_report(&args.elf_path, &args.ld_scripts, false) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("({commit}): failed to analyze report: {e}");
                failed += 1;
                restore_head(&original_head);
                return Err(e);
            }
        };

        let request = UploadRequest {
            metadata: UploadMetadata {
                git: GitMetadataPayload {
                    commit_hash: commit.to_string(),
                    commit_message: commit_metadata.commit_message,
                    commit_timestamp: commit_metadata.commit_timestamp,
                    base_commit_hash: commit_metadata.base_sha.unwrap_or_default(),
                    branch_name: current_branch.clone(),
                    pr_number: None,
                },
                repository: repo_name.clone(),
                target_name: args.target_name.clone(),
                analysis_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            memory_analysis: report,
        };

        let uploader = MemBrowseUploader::new(&args.api_key, &args.api_url)?;
        match uploader.upload_report(&request, true) {
            Ok(_) => {
                println!("({commit}): memory report uploaded successfully ({position}/{total})");
                successful += 1;
            }
            Err(e) => {
                eprintln!("({commit}): failed to upload memory report: {e}");
                failed += 1;
                restore_head(&original_head);
                return Err(e);
            }
        }
    }

    restore_head(&original_head);

    println!("\nHistorical analysis completed!");
    println!("Processed {total} commits");
    println!("Successful uploads: {successful}");
    println!("Failed uploads: {failed}");

    if failed == 0 {
        Ok(())
    } else {
        anyhow::bail!("{failed} commit(s) failed to upload")
    }
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = std::process::Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn restore_head(original_head: &str) {
    println!("\nRestoring original HEAD...");
    let _ = std::process::Command::new("git").args(["checkout", original_head, "--quiet"]).status();
}

fn run_summary(args: &SummaryArgs) -> anyhow::Result<()> {
    let client = summary::SummaryClient::new(&args.api_key, &args.api_url)?;
    let response = client.fetch_summary(&args.commit_sha)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", summary::render_summary(&response));
    }
    Ok(())
}
