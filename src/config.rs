use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::risk::RiskWindow;

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Trailing hours of vitals used for risk inference (default 24)
    #[arg(long, env = "VITAL_RISK_TIME_WINDOW_HOURS", allow_hyphen_values = true)]
    pub risk_window_hours: Option<String>,

    /// Tracing filter directive, e.g. `info` or `vital_signs_risk=debug`
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Settings {
    pub fn risk_window(&self) -> RiskWindow {
        RiskWindow::from_setting(self.risk_window_hours.as_deref())
    }

    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["vital-signs-risk", "--database-url", "postgres://localhost/vitals"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().settings
    }

    #[test]
    fn explicit_window_is_used() {
        assert_eq!(parse(&["--risk-window-hours", "6"]).risk_window().hours(), 6);
    }

    #[test]
    fn invalid_window_falls_back_to_default() {
        assert_eq!(parse(&["--risk-window-hours", "-3"]).risk_window().hours(), 24);
        assert_eq!(parse(&["--risk-window-hours", "soon"]).risk_window().hours(), 24);
    }

    #[test]
    fn connection_settings_are_read() {
        let settings = parse(&["--max-connections", "5"]);
        assert_eq!(settings.max_connections, 5);
        assert_eq!(settings.database_url, "postgres://localhost/vitals");
    }
}
