use clap::{Parser, Subcommand};
use mend_core::config::{Config, Secrets};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod runtime;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_INVALID: u8 = 1;
const EXIT_STARTUP_FAILURE: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "mend", about = "CI auto-remediation monitor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor daemon.
    Serve {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Validate the configuration and exit.
    ConfigCheck {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Print the dashboard OpenAPI spec.
    Openapi,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => {
            let config = match Config::load(&config) {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!(error = %err, "configuration invalid");
                    return ExitCode::from(EXIT_CONFIG_INVALID);
                }
            };
            let secrets = match Secrets::from_env() {
                Ok(secrets) => secrets,
                Err(err) => {
                    tracing::error!(error = %err, "missing required secret");
                    return ExitCode::from(EXIT_CONFIG_INVALID);
                }
            };
            match runtime::run(config, secrets).await {
                Ok(runtime::Shutdown::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
                Ok(runtime::Shutdown::Normal) => ExitCode::from(EXIT_OK),
                Err(err) => {
                    tracing::error!(error = %err, "startup failed");
                    ExitCode::from(EXIT_STARTUP_FAILURE)
                }
            }
        }
        Command::ConfigCheck { config } => match Config::load(&config) {
            Ok(_) => {
                println!("configuration ok");
                ExitCode::from(EXIT_OK)
            }
            Err(err) => {
                eprintln!("configuration invalid: {err}");
                ExitCode::from(EXIT_CONFIG_INVALID)
            }
        },
        Command::Openapi => {
            println!("{}", mend_serve::openapi::generate_spec());
            ExitCode::from(EXIT_OK)
        }
    }
}
