use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kestrel_core::{attach, launch, locate_tables, Backend, DebugConfig, Process, ProcessId, ThreadId};
use kestrel_utils::{info, init_logging_with, warn, LogFormat, LogLevel, LoggingConfig};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Launch, trap and step native processes.
#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(version)]
#[command(about = "Launch, trap and step native processes", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format: pretty or json (overrides KESTREL_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Give up on a trap wait after this many milliseconds (overrides KESTREL_WAIT_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Launch a program under the debugger and report every stop until it exits
    Run
    {
        /// Program to launch (searched in PATH when it has no directory)
        program: String,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Attach to a running process and print its threads
    Attach
    {
        /// Process ID (PID) to attach to
        pid: u32,
        /// Kill the process instead of letting it continue
        #[arg(long, default_value_t = false)]
        kill: bool,
    },
    /// Print where the runtime symbol and line tables of an executable are
    Locate
    {
        /// Executable image
        path: PathBuf,
    },
}

fn main() -> ExitCode
{
    let cli = Cli::parse();

    let mut logging = match LoggingConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging.level = cli.log_level.or(logging.level);
    logging.format = cli.log_format.unwrap_or(logging.format);
    let _guard = match init_logging_with(&logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run_command(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn debug_config(timeout_ms: Option<u64>) -> CliResult<DebugConfig>
{
    let config = DebugConfig::from_env()?;
    Ok(match timeout_ms {
        Some(0) => config.without_wait_timeout(),
        Some(ms) => config.with_wait_timeout(Duration::from_millis(ms)),
        None => config,
    })
}

fn run_command(cli: Cli) -> CliResult<ExitCode>
{
    match cli.command {
        Commands::Run { program, args } => {
            let config = debug_config(cli.timeout_ms)?;
            let argv: Vec<String> = std::iter::once(program).chain(args).collect();
            info!(program = %argv[0], args = argv.len() - 1, "Launching");

            let process = launch(&argv, &config)?;
            println!("Launched {} (PID: {})", argv[0], process.pid());
            forward_interrupts(&process)?;
            follow(&process)
        }
        Commands::Attach { pid, kill } => {
            let config = debug_config(cli.timeout_ms)?;
            let process = attach(ProcessId::from(pid), &config)?;
            println!("Attached to process {pid}");
            print_threads(&process)?;

            if kill {
                process.kill()?;
                println!("Killed process {pid}");
                return Ok(ExitCode::SUCCESS);
            }
            // attach stops every thread; the coordinator only resumes the current one
            let current = process.current_thread()?.id();
            for tid in process.threads()?.into_iter().filter(|tid| *tid != current) {
                process.thread(tid)?.resume(None)?;
            }
            forward_interrupts(&process)?;
            follow(&process)
        }
        Commands::Locate { path } => {
            let tables = locate_tables(&path)?;
            println!("{}:", path.display());
            println!("  .text:   {}", tables.text_start);
            println!("  symtab:  {} bytes", tables.symtab.len());
            println!("  pclntab: {} bytes", tables.pclntab.len());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Ctrl-C stops the inferior; the stop shows up as the next reported trap
fn forward_interrupts<B: Backend>(process: &Process<B>) -> CliResult<()>
{
    let stop = process.stop_handle();
    ctrlc::set_handler(move || {
        if let Err(err) = stop.request_stop() {
            warn!(error = %err, "Manual stop failed");
        }
    })?;
    Ok(())
}

/// Report every stop and resume until the inferior exits
fn follow<B: Backend>(process: &Process<B>) -> CliResult<ExitCode>
{
    let mut stopped = process.break_thread()?;
    loop {
        if let Some(tid) = stopped {
            report_stop(process, tid);
        }
        match process.continue_to_trap() {
            Ok(tid) => stopped = Some(tid),
            Err(err) => {
                let Some(status) = err.exit_status() else {
                    return Err(err.into());
                };
                println!("Process {} exited with status {status}", process.pid());
                return Ok(ExitCode::from(u8::try_from(status & 0xff).unwrap_or(u8::MAX)));
            }
        }
    }
}

fn report_stop<B: Backend>(process: &Process<B>, tid: ThreadId)
{
    match process.thread(tid).and_then(|thread| thread.pc()) {
        Ok(pc) => println!("Stopped: thread {tid} at {pc}"),
        // the thread may already be gone again
        Err(err) => println!("Stopped: thread {tid} ({err})"),
    }
}

fn print_threads<B: Backend>(process: &Process<B>) -> CliResult<()>
{
    let current = process.current_thread()?.id();
    for tid in process.threads()? {
        let marker = if tid == current { "*" } else { " " };
        let registers = process.thread(tid)?.registers()?;
        println!(
            "{marker} thread {tid}: pc={} sp={} fp={}",
            registers.pc, registers.sp, registers.fp
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_keeps_program_arguments_verbatim()
    {
        let cli = Cli::parse_from(["kestrel", "--timeout-ms", "50", "run", "/bin/sh", "-c", "exit 3"]);
        assert_eq!(cli.timeout_ms, Some(50));
        match cli.command {
            Commands::Run { program, args } => {
                assert_eq!(program, "/bin/sh");
                assert_eq!(args, vec!["-c", "exit 3"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn logging_flags_parse()
    {
        let cli = Cli::parse_from(["kestrel", "locate", "a.out", "--log-level", "debug", "--log-format", "json"]);
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn attach_kill_flag()
    {
        let cli = Cli::parse_from(["kestrel", "attach", "1234", "--kill"]);
        assert!(matches!(cli.command, Commands::Attach { pid: 1234, kill: true }));
    }
}
