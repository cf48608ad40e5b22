// CLI module - User-facing command-line interface

mod output;

use crate::control::ControlAction;
use crate::error::{DevhubError, Result};
use crate::ipc::{Command, IpcClient, LogOptions, ResponseData, SearchOptions, DEFAULT_SOCKET_PATH};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// devhub - Supervise local development services
#[derive(Parser)]
#[command(name = "devhub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Socket of the running supervisor
    #[arg(long, global = true, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor in the foreground
    Up {
        /// Service configuration file (TOML or JSON)
        #[arg(short, long, default_value = "devhub.toml")]
        config: PathBuf,
    },

    /// List all services
    List,

    /// Show details of one service
    Status {
        /// Service name
        name: String,
    },

    /// Print captured output of a service
    Logs {
        /// Service name
        name: String,

        /// Number of lines to display
        #[arg(short = 'n', long)]
        lines: Option<usize>,

        /// Skip this many of the newest lines
        #[arg(short, long)]
        offset: Option<usize>,
    },

    /// Search captured output of a service (case-insensitive)
    Search {
        /// Service name
        name: String,

        /// Text to look for
        pattern: String,

        /// Lines of context around each match
        #[arg(short = 'C', long)]
        context: Option<usize>,

        /// Maximum number of matches
        #[arg(short, long)]
        max_results: Option<usize>,
    },

    /// Start a service
    Start { name: String },

    /// Stop a service
    Stop { name: String },

    /// Restart a service
    Restart { name: String },

    /// Redraw the service table periodically
    Watch {
        /// Refresh interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },
}

impl Cli {
    /// Run the CLI application, reporting any failure on stderr
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        let result = cli.execute();
        if let Err(ref e) = result {
            output::print_error(&e.to_string());
        }
        result
    }

    fn execute(self) -> Result<()> {
        match self.command {
            Commands::Up { ref config } => run_supervisor(config, &self.socket),
            Commands::Watch { interval } => watch(&self.socket, interval),
            ref command => {
                let request = build_command(command)?;
                send(&self.socket, request)
            }
        }
    }
}

fn run_supervisor(config: &Path, socket: &Path) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(crate::daemon::run(config, socket))
}

fn build_command(command: &Commands) -> Result<Command> {
    let command = match command {
        Commands::List => Command::List,
        Commands::Status { name } => Command::Health { name: name.clone() },
        Commands::Logs {
            name,
            lines,
            offset,
        } => Command::Logs(LogOptions {
            name: name.clone(),
            lines: *lines,
            offset: *offset,
        }),
        Commands::Search {
            name,
            pattern,
            context,
            max_results,
        } => Command::Search(SearchOptions {
            name: name.clone(),
            pattern: pattern.clone(),
            context_lines: *context,
            max_results: *max_results,
        }),
        Commands::Start { name } => control(name, ControlAction::Start),
        Commands::Stop { name } => control(name, ControlAction::Stop),
        Commands::Restart { name } => control(name, ControlAction::Restart),
        Commands::Up { .. } | Commands::Watch { .. } => {
            return Err(DevhubError::Other(
                "command is not sent to the supervisor".to_string(),
            ))
        }
    };
    Ok(command)
}

fn control(name: &str, action: ControlAction) -> Command {
    Command::Control {
        name: name.to_string(),
        action,
    }
}

fn send(socket: &Path, command: Command) -> Result<()> {
    let client = IpcClient::with_socket_path(socket);
    let response = client.send_command(command)?;

    match response.result {
        Ok(data) => {
            output::print_response(&data);
            Ok(())
        }
        Err(reply) => Err(reply.into()),
    }
}

fn watch(socket: &Path, interval: u64) -> Result<()> {
    let client = IpcClient::with_socket_path(socket);
    let interval = std::time::Duration::from_secs(interval.max(1));

    loop {
        let services = match client.request(Command::List)? {
            ResponseData::ServiceList(services) => services,
            other => {
                return Err(DevhubError::ProtocolError(format!(
                    "Unexpected reply to list: {:?}",
                    other
                )))
            }
        };

        // Clear screen and move the cursor home
        print!("\x1B[2J\x1B[H");
        output::print_watch_header(socket);
        output::print_service_table(&services);

        std::thread::sleep(interval);
    }
}
