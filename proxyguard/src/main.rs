use clap::{Parser, Subcommand};
use proxyguard_core::config::GatewayConfig;
use proxyguard_core::logging::init_logging;
use proxyguard_core::server;

#[derive(Parser, Debug)]
#[command(
    name = "proxyguard",
    version,
    about = "Proxyguard: a rotating HTTP proxy gateway"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default)
    Run,

    /// Load and validate configuration from the environment, then exit
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::CheckConfig => match GatewayConfig::from_env() {
            Ok(cfg) => {
                println!("configuration OK: listening on 0.0.0.0:{}", cfg.proxy_port);
            }
            Err(e) => {
                eprintln!("configuration error: {e}");
                std::process::exit(1);
            }
        },

        Command::Run => {
            init_logging();

            let cfg = match GatewayConfig::from_env() {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load configuration");
                    std::process::exit(1);
                }
            };

            if let Err(e) = server::run(cfg) {
                tracing::error!(error = %e, "gateway exited with an error");
                std::process::exit(1);
            }
        }
    }
}
