//! codewatch CLI entry point

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};
use std::time::{Duration, Instant};

use clap::Parser;

use codewatch::cli::{AnalyzeArgs, Cli, Commands, LogsArgs};
use codewatch::config::Config;
use codewatch::control::{ControlClient, Request, Response, StatusReply};
use codewatch::daemon::{is_process_alive, DaemonPaths};
use codewatch::error::{CodewatchError, Result};
use codewatch::orchestrator::ScheduleState;
use codewatch::pipeline::{DaemonStatus, LastOutcome, Pipeline, RepositoryState, RunOutcome};
use codewatch::report::{ReportStore, RunStatus};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
/// Reloads rebuild the pipeline and may probe model endpoints
const RELOAD_TIMEOUT: Duration = Duration::from_secs(60);
const DAEMON_BINARY: &str = "codewatch-daemon";

fn main() -> ExitCode {
    match run() {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run() -> Result<String> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Start => run_start(&cli),
        Commands::Stop => run_stop(&cli),
        Commands::Restart => {
            let mut output = match run_stop(&cli) {
                Ok(output) => output,
                Err(CodewatchError::Control { message }) => format!("{}\n", message),
                Err(e) => return Err(e),
            };
            output.push_str(&run_start(&cli)?);
            Ok(output)
        }
        Commands::Status => run_status(&cli),
        Commands::Logs(args) => run_logs(&cli, args),
        Commands::Analyze(args) => run_analyze(&cli, args),
        Commands::Trigger(args) => {
            let config = load_config(&cli)?;
            let name = config.repository(&args.repository)?.name.clone();
            match request(&config, &Request::AnalyzeNow { repository: name }, CONTROL_TIMEOUT)? {
                Response::Accepted {
                    repository,
                    submission,
                } => Ok(format!("{}: {:?}\n", repository, submission)),
                other => Err(unexpected(other)),
            }
        }
        Commands::Reload => {
            let config = load_config(&cli)?;
            match request(&config, &Request::ReloadConfig, RELOAD_TIMEOUT)? {
                Response::Reloaded { repositories } => Ok(format!(
                    "Reloaded: {} repositories ({})\n",
                    repositories.len(),
                    repositories.join(", ")
                )),
                other => Err(unexpected(other)),
            }
        }
        Commands::CheckConfig => run_check_config(&cli),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "codewatch=debug" } else { "codewatch=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    Config::load_from(&cli.config_path())
}

fn request(config: &Config, request: &Request, timeout: Duration) -> Result<Response> {
    let mut client = ControlClient::connect(&config.daemon.control_addr, timeout)?;
    match client.request(request)? {
        Response::Error { message } => Err(CodewatchError::Control { message }),
        response => Ok(response),
    }
}

fn unexpected(response: Response) -> CodewatchError {
    CodewatchError::Control {
        message: format!("unexpected response: {:?}", response),
    }
}

// ============================================
// Daemon lifecycle
// ============================================

fn daemon_binary() -> Result<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        let sibling = exe.with_file_name(DAEMON_BINARY);
        if sibling.is_file() {
            return Ok(sibling);
        }
    }
    which::which(DAEMON_BINARY).map_err(|e| CodewatchError::ToolInvocation {
        tool: DAEMON_BINARY.to_string(),
        message: format!("not found next to codewatch or on PATH: {}", e),
    })
}

fn run_start(cli: &Cli) -> Result<String> {
    let config_path = cli.config_path();
    let config = Config::load_from(&config_path)?;
    let paths = DaemonPaths::from_config(&config);
    if let Some(pid) = paths.running_pid() {
        return Ok(format!("Daemon already running (pid {})\n", pid));
    }

    fs::create_dir_all(&paths.state_dir)?;
    let log = OpenOptions::new().create(true).append(true).open(&paths.log)?;
    let mut command = Command::new(daemon_binary()?);
    command
        .arg("--config")
        .arg(&config_path)
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command.spawn().map_err(|e| CodewatchError::ToolInvocation {
        tool: DAEMON_BINARY.to_string(),
        message: e.to_string(),
    })?;

    // Ready once the control channel answers
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(CodewatchError::Control {
                message: format!(
                    "daemon exited during startup ({}); see {}",
                    status,
                    paths.log.display()
                ),
            });
        }
        if let Ok(Response::Pong { .. }) = request(&config, &Request::Ping, Duration::from_millis(500)) {
            return Ok(format!(
                "Daemon started (pid {}), watching {} repositories\nLog: {}\n",
                child.id(),
                config.repositories.len(),
                paths.log.display()
            ));
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    Err(CodewatchError::Control {
        message: format!(
            "daemon did not answer on {} in time; see {}",
            config.daemon.control_addr,
            paths.log.display()
        ),
    })
}

fn run_stop(cli: &Cli) -> Result<String> {
    let config = load_config(cli)?;
    let paths = DaemonPaths::from_config(&config);
    let pid = paths.running_pid();

    let requested = request(&config, &Request::Shutdown, CONTROL_TIMEOUT).is_ok();
    if !requested {
        let Some(pid) = pid else {
            return Err(CodewatchError::Control {
                message: "daemon is not running".to_string(),
            });
        };
        // Control channel unreachable: fall back to SIGTERM
        let status = Command::new("kill").arg(pid.to_string()).status()?;
        if !status.success() {
            return Err(CodewatchError::Control {
                message: format!("failed to signal pid {}", pid),
            });
        }
    }

    if let Some(pid) = pid {
        let deadline = Instant::now() + Duration::from_secs(30);
        while is_process_alive(pid) {
            if Instant::now() > deadline {
                return Err(CodewatchError::Control {
                    message: format!("daemon (pid {}) is still finishing a run", pid),
                });
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }
    Ok("Daemon stopped\n".to_string())
}

fn run_status(cli: &Cli) -> Result<String> {
    let config = load_config(cli)?;
    let paths = DaemonPaths::from_config(&config);

    let mut output = match request(&config, &Request::Status, CONTROL_TIMEOUT) {
        Ok(Response::Status(reply)) => format_status(Some(&reply), &reply.daemon),
        Ok(other) => return Err(unexpected(other)),
        Err(_) => {
            let mut output = String::from("Daemon: not running\n");
            if let Some(last) = DaemonStatus::load(&paths.state_dir)? {
                output.push_str("Last known state:\n");
                output.push_str(&format_status(None, &last));
            }
            output
        }
    };
    output.push_str(&format_latest_reports(&config));
    Ok(output)
}

fn format_latest_reports(config: &Config) -> String {
    let store = ReportStore::new(config.daemon.output_dir.clone());
    let mut out = String::from("Latest reports:\n");
    for repo in &config.repositories {
        let line = match store.load_latest(repo) {
            Ok(Some(report)) => report.headline(),
            Ok(None) => "none yet".to_string(),
            Err(e) => format!("unreadable ({})", e),
        };
        let _ = writeln!(out, "  {:<20} {}", repo.name, line);
    }
    out
}

fn format_status(live: Option<&StatusReply>, status: &DaemonStatus) -> String {
    let mut out = String::new();
    if live.is_some() {
        let _ = writeln!(out, "Daemon: running (pid {})", status.pid);
    }
    if let Some(started) = status.started_at {
        let _ = writeln!(out, "Started: {}", started.to_rfc3339());
    }
    for (name, repo) in &status.repositories {
        let state = match live.and_then(|reply| reply.schedule.get(name)) {
            Some(ScheduleState::Idle) => "idle",
            Some(ScheduleState::Queued) => "queued",
            Some(ScheduleState::Running { rerun: false }) => "running",
            Some(ScheduleState::Running { rerun: true }) => "running, re-run pending",
            None => match repo.state {
                RepositoryState::Idle => "idle",
                RepositoryState::Queued => "queued",
                RepositoryState::Running => "running",
                RepositoryState::RunningRerunPending => "running, re-run pending",
            },
        };
        let last = repo
            .last_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        let outcome = match repo.last_outcome {
            Some(LastOutcome::Completed) => "completed",
            Some(LastOutcome::Skipped) => "skipped",
            Some(LastOutcome::Failed) => "failed",
            None => "-",
        };
        let _ = writeln!(
            out,
            "  {:<20} {:<28} last run: {} ({}), {} completed, {} failed",
            name, state, last, outcome, repo.runs_completed, repo.runs_failed
        );
        if let Some(error) = &repo.last_error {
            let _ = writeln!(out, "  {:<20} last error: {}", "", error);
        }
    }
    out
}

fn run_logs(cli: &Cli, args: &LogsArgs) -> Result<String> {
    let config = load_config(cli)?;
    let paths = DaemonPaths::from_config(&config);
    if !paths.log.exists() {
        return Ok(format!("No log at {}\n", paths.log.display()));
    }

    let content = fs::read_to_string(&paths.log)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(args.lines);
    for line in &lines[start..] {
        println!("{}", line);
    }

    if args.follow {
        follow(&paths.log, content.len() as u64)?;
    }
    Ok(String::new())
}

/// Print whatever is appended to `path`, forever
fn follow(path: &Path, mut offset: u64) -> Result<()> {
    loop {
        std::thread::sleep(Duration::from_millis(500));
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < offset {
            // Truncated or rotated
            offset = 0;
        }
        if len > offset {
            file.seek(SeekFrom::Start(offset))?;
            let mut chunk = String::new();
            file.read_to_string(&mut chunk)?;
            print!("{}", chunk);
            offset = len;
        }
    }
}

// ============================================
// One-shot analysis
// ============================================

fn run_analyze(cli: &Cli, args: &AnalyzeArgs) -> Result<String> {
    let config = load_config(cli)?;
    let repo = config.repository(&args.repository)?.clone();
    let options = args.run_options();
    let pipeline = Pipeline::from_config(&config)?;

    let outcome = pipeline.run(&repo, &options)?;
    let mut out = String::new();

    match outcome {
        RunOutcome::Skipped { reason, .. } => {
            let _ = writeln!(out, "{}: nothing to analyze ({})", repo.name, reason);
        }
        RunOutcome::Planned(plan) => {
            write_payload(&mut out, &plan.payload);
            let _ = writeln!(
                out,
                "{}: dry run, {} analysis ({}), {} blocks in {} requests",
                repo.name, plan.analysis_type, plan.classification, plan.blocks, plan.requests
            );
        }
        RunOutcome::Recorded(record) => {
            write_payload(&mut out, &record.payload);
            let _ = writeln!(
                out,
                "{}: {} analysis of {} blocks",
                repo.name, record.analysis_type, record.input_block_count
            );
            let _ = writeln!(
                out,
                "Findings: {} critical, {} high, {} medium, {} low",
                record.counts.critical, record.counts.high, record.counts.medium, record.counts.low
            );
            let _ = writeln!(out, "Report: {}", record.report.json.display());
            if let Some(commit) = &record.commit {
                let _ = writeln!(
                    out,
                    "Committed {}{}",
                    &commit.sha[..commit.sha.len().min(7)],
                    if commit.pushed { " and pushed" } else { "" }
                );
                if let Some(error) = &commit.push_error {
                    let _ = writeln!(out, "Push failed: {}", error);
                }
            }
            if let Some(error) = &record.commit_error {
                let _ = writeln!(out, "Commit failed: {}", error);
            }
            if record.status == RunStatus::Failed {
                print!("{}", out);
                return Err(CodewatchError::model(
                    record.error.unwrap_or_else(|| "analysis failed".to_string()),
                ));
            }
        }
    }
    Ok(out)
}

fn write_payload(out: &mut String, payload: &[String]) {
    let total = payload.len();
    for (i, request) in payload.iter().enumerate() {
        let _ = writeln!(out, "===== Request {} of {} =====\n{}\n", i + 1, total, request);
    }
}

fn run_check_config(cli: &Cli) -> Result<String> {
    let path = cli.config_path();
    let config = Config::load_from(&path)?;
    let mut out = String::new();

    let _ = writeln!(out, "Configuration OK: {}", path.display());
    let _ = writeln!(out, "Repositories:");
    for repo in &config.repositories {
        let _ = writeln!(
            out,
            "  {:<20} {} (auto_commit: {}, auto_push: {}, commit_threshold: {})",
            repo.name,
            repo.path.display(),
            repo.auto_commit,
            repo.auto_push,
            repo.commit_threshold
        );
    }
    let _ = writeln!(out, "LLM: {} @ {}", config.llm.model, config.llm.endpoint);
    let flattener = match which::which(&config.flattener.program) {
        Ok(found) => found.display().to_string(),
        Err(_) => "NOT FOUND on PATH".to_string(),
    };
    let _ = writeln!(out, "Flattener: {} ({})", config.flattener.program, flattener);
    let _ = writeln!(
        out,
        "Semantic: {:?} backend, threshold {:.2}, index {}",
        config.semantic.backend,
        config.semantic.similarity_threshold,
        config.semantic.index_dir().display()
    );
    let _ = writeln!(out, "State: {}", config.daemon.state_dir().display());
    Ok(out)
}
