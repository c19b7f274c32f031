use clap::{Parser, Subcommand};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "tether-offload-agent",
    about = "Tethering offload coordinator agent",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "TETHER_OFFLOAD_CONFIG")]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Display version and build information
    Version,

    /// Load and validate the configuration file, then exit
    CheckConfig,
}

impl Cli {
    /// Logging settings after applying CLI overrides to the file values.
    pub fn logging(&self, file_level: LogLevel, file_format: LogFormat) -> (LogLevel, LogFormat) {
        (
            self.log_level.unwrap_or(file_level),
            self.log_format.unwrap_or(file_format),
        )
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_default_config_path() {
        let cli = Cli::try_parse_from(["tether-offload-agent"]).unwrap();
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert!(cli.log_level.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_custom_config_path() {
        let cli =
            Cli::try_parse_from(["tether-offload-agent", "--config", "/tmp/test.yaml"]).unwrap();
        assert_eq!(cli.config, "/tmp/test.yaml");
    }

    #[test]
    fn cli_log_overrides() {
        let cli = Cli::try_parse_from([
            "tether-offload-agent",
            "--log-level",
            "debug",
            "--log-format",
            "text",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(
            cli.logging(LogLevel::Info, LogFormat::Json),
            (LogLevel::Debug, LogFormat::Text)
        );
    }

    #[test]
    fn cli_without_overrides_keeps_file_values() {
        let cli = Cli::try_parse_from(["tether-offload-agent"]).unwrap();
        assert_eq!(
            cli.logging(LogLevel::Warn, LogFormat::Json),
            (LogLevel::Warn, LogFormat::Json)
        );
    }

    #[test]
    fn cli_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["tether-offload-agent", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn cli_subcommands() {
        let cli = Cli::try_parse_from(["tether-offload-agent", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
        let cli = Cli::try_parse_from(["tether-offload-agent", "check-config"]).unwrap();
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
    }
}
