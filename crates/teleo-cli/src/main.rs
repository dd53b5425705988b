//! `teleo-cli` – Teleo agent launcher
//!
//! This binary wires the agent to the network and runs it until Ctrl-C:
//!
//! 1. Loads `~/.teleo/config.toml` (or `--config PATH`) and applies `TELEO_*`
//!    environment overrides and command-line flags.
//! 2. Binds the agent link and, unless `--no-kit`, the MisBKit link.  A bind
//!    failure is fatal (exit code 1).
//! 3. Runs the kit pairing handshake, then the fixed-rate decision loop.
//! 4. Intercepts **Ctrl-C** to stop both loops and release the sockets.

mod config;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use teleo_hal::SessionPhase;
use teleo_middleware::SystemClock;
use teleo_runtime::{TeleoRuntime, init_tracing};

#[derive(Debug, Parser)]
#[command(name = "teleo", version, about = "Run a teleo agent paired with a MisBKit")]
struct Args {
    /// ID of the kit to run
    kit_id: i32,

    /// Number of steps per second (overrides the config file)
    #[arg(long)]
    fps: Option<u32>,

    /// Config file to use instead of ~/.teleo/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run the agent without pairing a kit
    #[arg(long)]
    no_kit: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Hold the guard for the whole run so pending spans are flushed on exit.
    let _guard = init_tracing("teleo");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let path = args.config.clone().unwrap_or_else(config::config_path);
    let mut cfg = match config::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    if let Some(fps) = args.fps {
        cfg.agent.steps_per_second = fps;
    }

    if args.init_config {
        return match config::save_to(&cfg, &path) {
            Ok(()) => {
                println!(
                    "  {} Config saved to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("{}: {}", "Error saving config".red(), e);
                ExitCode::from(1)
            }
        };
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the agent can only be stopped by killing the process");
    }

    // ── Runtime ───────────────────────────────────────────────────────────
    let runtime_config = cfg.runtime_config(args.kit_id, !args.no_kit);
    let mut runtime = match TeleoRuntime::build(&runtime_config, Rc::new(SystemClock), shutdown) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "startup failed");
            println!("{}: {}", "Startup failed".red().bold(), e);
            return ExitCode::from(1);
        }
    };

    print_links(&runtime_config);

    if let Some(kit) = &runtime_config.kit {
        println!("  Pairing with kit {} … (Ctrl-C to abort)", kit.link_name().bold());
        match runtime.begin() {
            Some(SessionPhase::Inventoried) => {
                let ids = runtime
                    .agent()
                    .kit()
                    .and_then(|k| k.motor_ids())
                    .unwrap_or_default();
                println!("  {} Kit ready, motors {:?}", "✓".green().bold(), ids);
            }
            Some(phase) => println!("  {} Pairing abandoned ({:?})", "✗".yellow(), phase),
            None => {}
        }
    }

    let ticks = runtime.run();
    runtime.terminate();
    println!("{}", format!("  ✓ Stopped after {ticks} tick(s).").green());
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  __       __    "#.bold().cyan());
    println!("{}", r#" / /____  / /__ ___ "#.bold().cyan());
    println!("{}", r#"/ __/ -_)/ / -_) _ \"#.bold().cyan());
    println!("{}", r#"\__/\__//_/\__/\___/"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "teleo".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Trust-negotiating agent for MisBKit robots");
    println!();
}

fn print_links(config: &teleo_runtime::RuntimeConfig) {
    println!(
        "  Agent link  {} → {}  (listening on {})",
        "teleo-agent".bold(),
        config.link.peer().to_string().cyan(),
        config.link.recv_port
    );
    if let Some(redirect) = &config.link.redirect {
        println!(
            "  Redirect    {}:{}",
            redirect.host.cyan(),
            redirect.port
        );
    }
    match &config.kit {
        Some(kit) => println!(
            "  Kit link    {} → {}  (listening on {})",
            kit.link_name().bold(),
            kit.peer().to_string().cyan(),
            kit.recv_port
        ),
        None => println!("  Kit link    {}", "disabled".dimmed()),
    }
    println!(
        "  Tick rate   {} step(s)/s",
        config.agent.steps_per_second
    );
    println!();
}
