//! attachcon - open a command console from any process
//!
//! Demo host for the attachcon library. It opens a console session, serves a
//! handful of commands typed into it, and exits once the console is closed.
//!
//! # Quick Start
//!
//! ```text
//! attachcon                     # Open a console titled "Console"
//! attachcon -t "Debug" -x quit  # Custom title and exit command
//! attachcon --hide-buttons      # No close button on the window
//! ```
//!
//! # Commands
//!
//! | Command | Action |
//! |---------|--------|
//! | help | List commands |
//! | echo TEXT | Print TEXT |
//! | time | Show host uptime |
//! | color NAME | Change the output color |
//! | fail | Raise an error through the error path |
//! | exit | Close the console |

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use attachcon::{
    Console, ConsoleColor, ConsoleConfig, ConsoleEvent, ConsolePlatform, QueueContext,
};

/// Command line overrides for the config file
#[derive(Default)]
struct Options {
    title: Option<String>,
    exit_command: Option<String>,
    hide_buttons: bool,
    hide_taskbar: bool,
    no_echo: bool,
}

impl Options {
    fn apply(self, config: &mut ConsoleConfig) {
        if let Some(title) = self.title {
            config.title = title;
        }
        if let Some(exit_command) = self.exit_command {
            config.exit_command = exit_command;
        }
        config.hide_buttons |= self.hide_buttons;
        config.hide_from_taskbar |= self.hide_taskbar;
        if self.no_echo {
            config.write_executed = false;
        }
    }
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("attachcon {}", VERSION);
}

fn print_help() {
    eprintln!("attachcon {} - Detachable command console", VERSION);
    eprintln!();
    eprintln!("Usage: attachcon [OPTIONS]");
    eprintln!();
    eprintln!("Window options:");
    eprintln!("  -t, --title <TEXT>    Console window title");
    eprintln!("  --hide-buttons        Remove the system menu and close button");
    eprintln!("  --hide-taskbar        Do not show the console on the taskbar");
    eprintln!();
    eprintln!("Session options:");
    eprintln!("  -x, --exit <CMD>      Command that closes the console (default: exit)");
    eprintln!("  --no-echo             Do not echo executed commands");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Console commands:");
    eprintln!("  help                  List commands");
    eprintln!("  echo <TEXT>           Print TEXT");
    eprintln!("  time                  Show host uptime");
    eprintln!("  color <NAME>          Change the output color");
    eprintln!("  fail                  Raise an error");
    eprintln!();
    eprintln!("Configuration: ~/.attachcon/config.toml");
    eprintln!("Log file: ~/.attachcon/attachcon.log (level from RUST_LOG)");
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    let value = |i: usize, name: &str| {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("Missing {} argument", name))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-t" | "--title" => {
                i += 1;
                options.title = Some(value(i, "title")?);
            }
            "-x" | "--exit" => {
                i += 1;
                options.exit_command = Some(value(i, "exit command")?);
            }
            "--hide-buttons" => {
                options.hide_buttons = true;
            }
            "--hide-taskbar" => {
                options.hide_taskbar = true;
            }
            "--no-echo" => {
                options.no_echo = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Log to ~/.attachcon/attachcon.log; the console itself belongs to the user
fn init_logging() {
    let home = env::var_os("USERPROFILE")
        .or_else(|| env::var_os("HOME"))
        .map(std::path::PathBuf::from);

    let log_path = home
        .map(|h| h.join(".attachcon").join("attachcon.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("attachcon.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("attachcon starting...");

    let mut config = ConsoleConfig::load();
    options.apply(&mut config);

    #[cfg(not(windows))]
    {
        eprintln!("attachcon needs a Windows console.");
        eprintln!("Running in demo mode...");
        run_demo(config)?;
    }

    #[cfg(windows)]
    {
        run_native(config)?;
    }

    Ok(())
}

/// Run against the process console (Windows only)
#[cfg(windows)]
fn run_native(config: ConsoleConfig) -> anyhow::Result<()> {
    let platform = Arc::new(attachcon::NativeConsole::claim()?);
    let console = build_console(platform, config);
    host(&console, || ())?;
    info!("attachcon exiting");
    Ok(())
}

/// Run a scripted session against the in-memory platform and print what the
/// console would have shown
#[cfg(not(windows))]
fn run_demo(config: ConsoleConfig) -> anyhow::Result<()> {
    use attachcon::MemoryPlatform;

    println!("=== attachcon Demo Mode ===\n");

    let platform = Arc::new(MemoryPlatform::new());
    let console = build_console(platform.clone(), config);
    let exit_command = console.exit_command();

    let script = platform.clone();
    host(&console, move || {
        for line in ["help", "echo hello from the demo", "color green", "time", "fail"] {
            script.feed_line(line);
        }
        script.feed_line(&exit_command);
    })?;

    println!("{}", platform.plain_output());
    println!("\nDemo complete. Build on Windows to use a real console.");
    Ok(())
}

fn build_console(platform: Arc<dyn ConsolePlatform>, config: ConsoleConfig) -> Console {
    let console = Console::new(platform, config);
    let started = Instant::now();

    console.set_handler(move |console, line| handle_command(console, line, started));
    console.set_exception_handler(|e| error!("Command failed: {}", e));
    console
}

/// Open the console, then serve marshalled commands on this thread until the
/// session closes. `on_open` runs once the worker is up.
fn host(console: &Console, on_open: impl FnOnce()) -> anyhow::Result<()> {
    let closed = Arc::new(AtomicBool::new(false));
    let flag = closed.clone();
    let subscription = console.subscribe(move |event| {
        if *event == ConsoleEvent::Closed {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let (context, queue) = QueueContext::new();

    console.open()?;
    console.write_info(format!(
        "Type help for commands, {} to close.",
        console.exit_command()
    ));
    console.execute_on(&context, "time", None);
    queue.run_pending();
    on_open();

    // This thread plays the UI thread: marshalled commands run here
    while !closed.load(Ordering::SeqCst) {
        queue.run_next(Duration::from_millis(100));
    }
    queue.run_pending();

    subscription.cancel();
    Ok(())
}

fn handle_command(console: &Console, line: &str, started: Instant) -> anyhow::Result<()> {
    let line = line.trim();
    let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match name.to_lowercase().as_str() {
        "" => {}
        "help" => {
            console.write_info("Commands:");
            console.write_line("  help          List commands");
            console.write_line("  echo <TEXT>   Print TEXT");
            console.write_line("  time          Show host uptime");
            console.write_line("  color <NAME>  Change the output color");
            console.write_line("  fail          Raise an error");
            console.write_line(format!("  {:<13} Close the console", console.exit_command()));
        }
        "echo" => {
            console.write_line(rest);
        }
        "time" => {
            console.write_info(format!("Up for {:.1?}", started.elapsed()));
        }
        "color" => {
            let color = ConsoleColor::by_name(rest).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown color '{}'. Available: {}",
                    rest,
                    ConsoleColor::list().join(", ")
                )
            })?;
            console.set_fore_color(color);
            console.write_line(format!("Output color is now {}", rest));
        }
        "fail" => anyhow::bail!("Failure requested by the user"),
        other => anyhow::bail!("Unknown command '{}'. Type help for a list.", other),
    }
    Ok(())
}
