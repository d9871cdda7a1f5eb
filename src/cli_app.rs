//! Top-level CLI definition and dispatch.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use serde::Serialize;

use crate::checks::{CheckDefaults, CheckId, CheckStore};
use crate::core::config::{Config, DEFAULT_CONFIG_PATH};
use crate::core::errors::{MpError, Result};
use crate::daemon::Daemon;
use crate::daemon::signals::SignalForwarder;
use crate::executor::{CancelSource, Executor};
use crate::logger::{self, LogFormat, LogLevel};
use crate::sink;

/// Massive Passive: schedules passive monitoring checks and submits their
/// results to Nagios/Icinga.
#[derive(Debug, Parser)]
#[command(name = "massive-passive", version, about)]
pub struct Cli {
    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand; runs the daemon when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Options shared by every subcommand. Values given here override the
/// configuration file.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Log level (debug, info, warning, error). `RUST_LOG` takes precedence.
    #[arg(long, short = 'l', global = true, default_value = "info")]
    pub loglevel: LogLevel,

    /// Log line encoding.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Directory holding the check definition files.
    #[arg(long, global = true, value_name = "DIR")]
    pub confdir: Option<PathBuf>,

    /// Daemon configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    pub conffile: Option<PathBuf>,

    /// Pid file written while the daemon runs.
    #[arg(long, global = true, value_name = "FILE")]
    pub pidfile: Option<PathBuf>,

    /// Submit results in batches.
    #[arg(long, global = true)]
    pub batch_mode: bool,

    /// Longest time a result waits for its batch to be sent.
    #[arg(long, global = true, value_name = "SECS")]
    pub batch_wait_time: Option<u64>,

    /// Upper bound of the random delay before each check's first run.
    #[arg(long, global = true, value_name = "SECS")]
    pub initial_random_wait_range: Option<u64>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground (the default).
    Daemon,
    /// Load the configuration and check definitions and report problems.
    Validate {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run one check now and print its result.
    Exec {
        host: String,
        service: Option<String>,
        /// Also deliver the result through the configured sink.
        #[arg(long)]
        submit: bool,
    },
    /// Print a shell completion script.
    Completions { shell: Shell },
}

/// Dispatch CLI commands.
///
/// # Errors
/// Returns an error if the subcommand fails.
pub fn run(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Some(Command::Completions { shell }) => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "massive-passive",
                &mut std::io::stdout(),
            );
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Validate { json }) => {
            logger::init(cli.global.loglevel, cli.global.log_format)?;
            validate(&cli.global, *json)
        }
        Some(Command::Exec {
            host,
            service,
            submit,
        }) => {
            logger::init(cli.global.loglevel, cli.global.log_format)?;
            let id = service.as_ref().map_or_else(
                || CheckId::host(host.as_str()),
                |service| CheckId::service(host.as_str(), service.as_str()),
            );
            exec(&cli.global, &id, *submit)
        }
        Some(Command::Daemon) | None => {
            logger::init(cli.global.loglevel, cli.global.log_format)?;
            run_daemon(&cli.global)
        }
    }
}

/// Read the configuration file and apply command-line overrides.
pub fn load_config(args: &GlobalArgs) -> Result<Config> {
    let (path, explicit) = args
        .conffile
        .clone()
        .map_or_else(|| (PathBuf::from(DEFAULT_CONFIG_PATH), false), |path| (path, true));
    let mut config = Config::load(&path, explicit)?;
    if let Some(dir) = &args.confdir {
        config.paths.check_dir.clone_from(dir);
    }
    if let Some(pid_file) = &args.pidfile {
        config.paths.pid_file.clone_from(pid_file);
    }
    if args.batch_mode {
        config.batch.enabled = true;
    }
    if let Some(wait) = args.batch_wait_time {
        config.batch.wait_time_secs = wait;
    }
    if let Some(range) = args.initial_random_wait_range {
        config.scheduler.initial_random_wait_range_secs = range;
    }
    config.validate()?;
    Ok(config)
}

fn store_for(config: &Config) -> CheckStore {
    CheckStore::new(
        &config.paths.check_dir,
        CheckDefaults {
            timeout: config.scheduler.check_timeout(),
        },
    )
}

fn run_daemon(args: &GlobalArgs) -> Result<ExitCode> {
    let config = load_config(args)?;
    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let _signals = SignalForwarder::install(control_tx)?;
    let daemon = Daemon::start(config)?;
    let report = daemon.serve(&control_rx)?;
    Ok(if report.delivery.dropped() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    check_dir: PathBuf,
    files: usize,
    checks: Vec<String>,
    errors: Vec<String>,
    sink: Option<String>,
    valid: bool,
}

fn validate(args: &GlobalArgs, json: bool) -> Result<ExitCode> {
    let config = load_config(args)?;
    let store = store_for(&config);
    let load = store.load()?;

    let mut errors: Vec<String> = load.errors.iter().map(ToString::to_string).collect();
    if load.checks.is_empty() {
        errors.push(MpError::NoChecksLoaded {
            dir: store.dir().to_path_buf(),
        }
        .to_string());
    }
    let sink = match sink::from_config(&config.sink) {
        Ok(sink) => Some(sink.name().to_string()),
        Err(err) => {
            errors.push(err.to_string());
            None
        }
    };
    let report = ValidationReport {
        check_dir: store.dir().to_path_buf(),
        files: load.files,
        checks: load.checks.iter().map(|check| check.id.to_string()).collect(),
        valid: errors.is_empty(),
        errors,
        sink,
    };

    let mut out = std::io::stdout().lock();
    let written = if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)
    } else {
        write_text_report(&mut out, &report)
    };
    written.map_err(|err| MpError::io("<stdout>", err))?;
    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn write_text_report(out: &mut impl std::io::Write, report: &ValidationReport) -> std::io::Result<()> {
    writeln!(
        out,
        "{} check(s) from {} file(s) in {}",
        report.checks.len(),
        report.files,
        report.check_dir.display()
    )?;
    for check in &report.checks {
        writeln!(out, "  {check}")?;
    }
    if let Some(sink) = &report.sink {
        writeln!(out, "sink: {sink}")?;
    }
    for error in &report.errors {
        writeln!(out, "{} {error}", "error:".red())?;
    }
    if report.valid {
        writeln!(out, "{}", "OK".green().bold())
    } else {
        writeln!(out, "{}", "INVALID".red().bold())
    }
}

fn exec(args: &GlobalArgs, id: &CheckId, submit: bool) -> Result<ExitCode> {
    let config = load_config(args)?;
    let load = store_for(&config).load()?;
    let definition = load.checks.get(id).ok_or_else(|| MpError::UnknownCheck {
        id: id.to_string(),
    })?;

    let cancel = CancelSource::new();
    let execution = Executor::default().run(definition, &cancel.token());
    let result = execution.result;
    println!("{} {}: {}", result.id, result.state, result.output);

    if submit {
        let mut sink = sink::from_config(&config.sink)?;
        sink.submit(std::slice::from_ref(&result))?;
        tracing::info!(check = %result.id, sink = sink.name(), "result submitted");
    }
    Ok(ExitCode::from(result.state.code()))
}
