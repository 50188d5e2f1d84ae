use std::fs;
use std::path::Path;

use chrono_tz::Tz;
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::severity::SeverityClass;

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub vmsql: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const VMSQL_LEVEL: &str = "info";

    fn ensure_valid(&mut self) {
        let str_original = self.vmsql.clone();
        self.vmsql = self.vmsql.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.vmsql.as_str()) {
            eprintln!(
                "Config error: vmsql log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::VMSQL_LEVEL
            );
            self.vmsql = Self::VMSQL_LEVEL.to_owned();
        }
    }

    /// flexi_logger spec string for the configured level.
    pub fn log_spec(&self) -> String {
        format!("vmsql={}", self.vmsql)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            vmsql: Self::VMSQL_LEVEL.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SeverityConfig {
    class: String,
    /// Query yielding the severity of task `?1`; `?2` is the overrides flag.
    pub task_severity_sql: String,
    /// Query yielding whether task `?1` has at least one report.
    pub task_report_sql: String,
}

impl SeverityConfig {
    const DEFAULT_CLASS: &str = "nist";

    pub const DEFAULT_TASK_SEVERITY_SQL: &str = "SELECT max(CASE WHEN ?2 THEN coalesce(new_severity, severity) ELSE severity END) \
         FROM results \
         WHERE report = (SELECT id FROM reports WHERE task = ?1 ORDER BY date DESC LIMIT 1)";

    pub const DEFAULT_TASK_REPORT_SQL: &str =
        "SELECT EXISTS (SELECT 1 FROM reports WHERE task = ?1)";

    pub fn class(&self) -> SeverityClass {
        // ensure_valid has already rejected anything unparseable
        self.class.parse().unwrap_or_default()
    }

    fn ensure_valid(&mut self) {
        let str_original = self.class.clone();
        self.class = self.class.trim().to_ascii_lowercase();
        if self.class.parse::<SeverityClass>().is_err() {
            eprintln!(
                "Config error: severity class of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_CLASS
            );
            self.class = Self::DEFAULT_CLASS.to_owned();
        }

        if self.task_severity_sql.trim().is_empty() {
            eprintln!("Config error: task_severity_sql is empty - using default");
            self.task_severity_sql = Self::DEFAULT_TASK_SEVERITY_SQL.to_owned();
        }

        if self.task_report_sql.trim().is_empty() {
            eprintln!("Config error: task_report_sql is empty - using default");
            self.task_report_sql = Self::DEFAULT_TASK_REPORT_SQL.to_owned();
        }
    }
}

impl Default for SeverityConfig {
    fn default() -> Self {
        SeverityConfig {
            class: Self::DEFAULT_CLASS.to_owned(),
            task_severity_sql: Self::DEFAULT_TASK_SEVERITY_SQL.to_owned(),
            task_report_sql: Self::DEFAULT_TASK_REPORT_SQL.to_owned(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ScheduleConfig {
    /// IANA zone used when a command asks for "the" offset. Empty means UTC.
    pub timezone: String,
}

impl ScheduleConfig {
    fn ensure_valid(&mut self) {
        self.timezone = self.timezone.trim().to_owned();
        if !self.timezone.is_empty() && self.timezone.parse::<Tz>().is_err() {
            eprintln!(
                "Config error: timezone of '{}' is unknown - using UTC",
                self.timezone
            );
            self.timezone = String::new();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub severity: SeverityConfig,
    pub schedule: ScheduleConfig,
}

impl Config {
    const ENV_PREFIX: &str = "VMSQL_";

    /// Loads the configuration from `config.toml` in the app's data directory,
    /// then applies `VMSQL_` environment overrides (`VMSQL_SEVERITY__CLASS=bsi`).
    /// A missing file is created with the defaults. A file that fails to parse
    /// is reported and the defaults are used.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");

        if !config_path.exists() {
            Self::write_default(&config_path);
        }

        Self::from_figment(Self::figment(&config_path))
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> Self {
        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load configuration: {}. Using default configuration.",
                err
            );
            Config::default()
        });

        config.ensure_valid();

        config
    }

    fn write_default(config_path: &Path) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.severity.ensure_valid();
        self.schedule.ensure_valid();
    }
}
