pub mod backends;
pub mod builder;
pub mod compat;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod logging;
pub mod patch;
pub mod pool;
pub mod registry;
pub mod restore;
pub mod runtime;
pub mod scope;
pub mod seam;
pub mod session;
pub mod stubs;
pub mod substitute;
pub mod transport;

use clap::{error::ErrorKind, Parser};
use config::{load_config, CliOverrides};
use diagnostics::{list_seams, run_self_check};
use errors::SeamError;
use logging::{append_run_log, init_run_logger, structured_fallback_line};
use runtime::ProductionRuntime;
use serde_json::json;

#[derive(Debug, Clone, Parser)]
#[command(name = "seamswap")]
#[command(about = "Inspect and self-check the transport interception seams")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    #[arg(long)]
    pub log_path: Option<std::path::PathBuf>,
    #[arg(long, default_value_t = false)]
    pub list_seams: bool,
    #[arg(long, default_value_t = false)]
    pub self_check: bool,
}

pub fn run() -> Result<i32, SeamError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| SeamError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, SeamError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(SeamError::Cli(error.to_string())),
        },
    };

    if !cli.list_seams && !cli.self_check {
        return Err(SeamError::Cli(
            "nothing to do: pass --list-seams and/or --self-check".to_string(),
        ));
    }

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        log_path: cli.log_path.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    if let Some(logger) = cfg.run_logger() {
        if let Some(parent) = logger.path.parent() {
            runtime.file_system.create_dir_all(parent)?;
        }
        init_run_logger(logger);
    }
    append_run_log(
        "info",
        "seamswap.run.started",
        json!({
            "list_seams": cli.list_seams,
            "self_check": cli.self_check,
            "disabled": cfg.backends.disabled,
        }),
    );

    if cli.list_seams {
        for line in list_seams(&cfg) {
            runtime.terminal.write_line(&line)?;
        }
    }

    if cli.self_check {
        match run_self_check(&cfg) {
            Ok(summary) => runtime.terminal.write_line(&summary.render())?,
            Err(error) => {
                runtime.terminal.write_error_line(&structured_fallback_line(
                    "self_check",
                    "failed",
                    &error.to_string(),
                ))?;
                return Ok(1);
            }
        }
    }

    Ok(0)
}
