use std::io::{stdin, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, panic};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use log::info;

use kvcli::command::{self, Command};
use kvcli::config::ConfigLoad;
use kvcli::session::Session;
use kvcli::trace;

#[derive(Debug, Parser, PartialEq)]
#[command(version)]
#[command(author, about, disable_help_flag = true)]
pub struct Args {
    #[clap(short, long, help = "debug mode")]
    debug: bool,

    #[clap(long, help = "Print help information")]
    help: bool,

    /// Configuration file path, default 'config/kvdb.yaml'
    #[clap(short = 'c', long = "config", help = "Configuration file path", default_value = "config/kvdb.yaml")]
    config: String,

    /// The subcommand to run directly, instead of entering the REPL.
    #[clap(subcommand)]
    cmd: Option<command::Command>,

    /// quiet mode, no banner/welcome output
    #[clap(long = "quiet", short = 'q', default_value = "false")]
    quiet: bool,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,

    #[clap(short = 'n', long, help = "Force non-interactive mode", default_value = "false")]
    non_interactive: bool,

    #[clap(long, require_equals = true, help = "Query to execute")]
    query: Option<String>,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic_hooks();

    let mut args = Args::parse();
    if args.debug {
        println!("{:?}", args);
    }

    if !args.quiet {
        eprintln!();
        eprintln!("██  ██  █        █");
        eprintln!("██ ██   ██      ██");
        eprintln!("███      ██    ██");
        eprintln!("██ ██     ██  ██");
        eprintln!("██  ██     ████  KV Storage CLI");
        eprintln!();
    }

    let log_dir = format!("{}/.kvdb", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level).await?;
    info!("kvdb start args: {:?}", &args);

    let mut cmd = Args::command();
    if args.help {
        cmd.print_help()?;
        return Ok(());
    }

    let mut cfg = match ConfigLoad::new(args.config.as_ref()) {
        Ok(c) => c,
        Err(_) => ConfigLoad::default(),
    };
    cfg.fix_settings();
    if args.debug {
        println!("{:?}", &cfg);
        eprintln!();
    }
    info!("kvdb start config: {:?}", &cfg);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("received Ctrl+C!");
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    let is_terminal = stdin().is_terminal();
    let is_repl = is_terminal && !args.non_interactive && args.query.is_none() && args.cmd.is_none();
    if is_repl {
        cfg.terminal_update();
    }

    if let Some(command) = args.cmd.take() {
        let mut session = Session::try_new(cfg, false, args.quiet, running.clone()).await?;
        let line = command_to_line(&command);
        session.handle_reader(std::io::Cursor::new(line)).await?;
        return Ok(());
    }

    let mut session = Session::try_new(cfg, is_repl, args.quiet, running.clone()).await?;

    info!("kvdb starting, is_repl[{}].", is_repl);

    if is_repl {
        session.handle_repl().await;
        return Ok(());
    }

    match args.query {
        None => session.handle_reader(stdin().lock()).await?,
        Some(query) => session.handle_reader(std::io::Cursor::new(query)).await?,
    }

    Ok(())
}

fn command_to_line(command: &Command) -> String {
    command::as_query_line(command)
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();

    if env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info: &panic::PanicInfo| {
            default_hook(info);

            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta).expect("human-panic: printing error message to console failed");
        }));
    }
}
