// command line entry point

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use revtether::{Relay, RelayConfig, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "revtether", version, about = "Reverse tethering relay")]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(short = 'v', long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay server
    Relay {
        /// Port the device tunnels connect to (on 127.0.0.1)
        #[arg(short, long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,

        /// Write every tunnelled packet to this pcap file
        #[arg(long, value_name = "FILE")]
        pcap: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Relay { port, pcap } => {
            let config = RelayConfig {
                capture: pcap,
                ..RelayConfig::with_port(port)
            };
            Relay::with_config(config)
                .run()
                .with_context(|| format!("relay on port {} failed", port))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
        let cli = Cli::parse_from(["revtether", "relay", "-p", "1234", "--pcap", "out.pcap"]);
        match cli.command {
            Command::Relay { port, pcap } => {
                assert_eq!(port, 1234);
                assert_eq!(pcap, Some(PathBuf::from("out.pcap")));
            }
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_default_port() {
        let cli = Cli::parse_from(["revtether", "relay"]);
        let Command::Relay { port, pcap } = cli.command;
        assert_eq!(port, DEFAULT_PORT);
        assert!(pcap.is_none());
        assert!(Cli::try_parse_from(["revtether", "relay", "-p", "0"]).is_err());
    }
}
