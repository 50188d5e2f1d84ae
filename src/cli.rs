use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::{debug, info};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Number, Value};

use crate::config::Config;
use crate::database::Database;
use crate::error::VmSqlError;
use crate::functions::FunctionSettings;
use crate::hosts::{self, HostList};
use crate::migrate;
use crate::recurrence::{self, RecurrenceSpec};
use crate::severity::{self, SeverityClass};
use crate::timestamp;
use crate::uniquify::{self, CandidateName, ResourceType, TableRegistry};

#[derive(Parser)]
#[command(
    name = "vmsql",
    version,
    about = "vmsql: vulnerability manager SQL functions for SQLite"
)]
pub struct Cli {
    /// Database file (default: vmsql.db in the data directory)
    #[arg(long = "db", short = 'd', global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Compute the next run of a schedule
    #[command(name = "next-time")]
    NextTime {
        /// First run, seconds since the epoch
        #[arg(long = "first")]
        first: i64,

        /// Period in seconds
        #[arg(long = "period", default_value_t = 0)]
        period: i64,

        /// Period in months (takes precedence over --period)
        #[arg(long = "months", default_value_t = 0)]
        months: i64,

        /// Reference time (default: now)
        #[arg(long = "now")]
        now: Option<i64>,
    },

    /// Parse a timestamp in any supported format
    #[command(name = "parse-time")]
    ParseTime { text: String },

    /// Show the threat level and message type of a severity score
    Classify {
        score: f64,

        /// Severity class (default: from config)
        #[arg(long = "class")]
        class: Option<SeverityClass>,

        /// Report the High band as "Alarm"
        #[arg(long = "legacy", default_value_t = false)]
        legacy: bool,
    },

    /// Clean a host list and count the hosts in it
    Hosts {
        hosts: String,

        /// Hosts to leave out of the count
        #[arg(long = "exclude", short = 'x')]
        exclude: Option<String>,
    },

    /// Find a free name for a resource
    Uniquify {
        /// Resource type, e.g. task or port_list
        resource: String,

        name: String,

        #[arg(long = "owner")]
        owner: Option<i64>,

        #[arg(long = "suffix", default_value = "")]
        suffix: String,
    },

    /// Copy rows into a replacement table that renames one column
    #[command(name = "rename-column")]
    RenameColumn {
        old_table: String,
        new_table: String,
        old_name: String,
        new_name: String,
    },

    /// Run a query with the SQL functions available and print rows as JSON
    Query { sql: String },
}

impl Cli {
    pub fn handle_command_line(
        project_dirs: &ProjectDirs,
        config: &Config,
    ) -> Result<(), VmSqlError> {
        let args = Cli::parse();
        let db_path = args
            .db
            .unwrap_or_else(|| Database::default_path(project_dirs));

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        execute(args.command, &db_path, config, &mut out)
    }
}

fn open_database(db_path: &Path, config: &Config) -> Result<Database, VmSqlError> {
    Database::open(db_path, FunctionSettings::from_config(config))
}

/// Run one command, writing its output to `out`.
pub fn execute(
    command: Command,
    db_path: &Path,
    config: &Config,
    out: &mut dyn Write,
) -> Result<(), VmSqlError> {
    debug!("Executing {:?}", command);

    match command {
        Command::NextTime {
            first,
            period,
            months,
            now,
        } => {
            let now = now.unwrap_or_else(recurrence::now);
            let next = RecurrenceSpec::new(first, period, months).next_occurrence(now);
            match timestamp::format_timestamp(next).filter(|_| next != 0) {
                Some(formatted) => writeln!(out, "{} ({})", next, formatted)?,
                None => writeln!(out, "{} (no further runs)", next)?,
            }
            if !config.schedule.timezone.is_empty() && next != 0 {
                let offset = recurrence::utc_offset_at(&config.schedule.timezone, next);
                writeln!(out, "UTC offset in {}: {} minutes", config.schedule.timezone, offset)?;
            }
        }
        Command::ParseTime { text } => match timestamp::parse(&text)? {
            timestamp::ParsedTimestamp::Placeholder => writeln!(out, "0 (no date)")?,
            timestamp::ParsedTimestamp::Time { epoch, grammar } => {
                writeln!(out, "{} ({} format)", epoch, grammar)?
            }
        },
        Command::Classify {
            score,
            class,
            legacy,
        } => {
            let class = class.unwrap_or_else(|| config.severity.class());
            let mode = if legacy { 1 } else { 0 };
            writeln!(
                out,
                "{}: {} / {} ({})",
                score,
                severity::severity_to_level(score, class, mode),
                severity::severity_to_type(score),
                class
            )?;
        }
        Command::Hosts { hosts, exclude } => {
            let list = HostList::normalize(&hosts);
            let count = hosts::count(Some(&hosts), exclude.as_deref())?;
            writeln!(out, "{}", list)?;
            writeln!(out, "{} hosts", count)?;
        }
        Command::Uniquify {
            resource,
            name,
            owner,
            suffix,
        } => {
            let resource = ResourceType::from_tag(&resource)?;
            let db = open_database(db_path, config)?;
            let conn = db.conn()?;
            let unique = uniquify::make_unique_in(
                &CandidateName::new(&name, &suffix, owner),
                resource,
                &TableRegistry::new(&conn),
            )?;
            writeln!(out, "{}", unique)?;
        }
        Command::RenameColumn {
            old_table,
            new_table,
            old_name,
            new_name,
        } => {
            let db = open_database(db_path, config)?;
            let copied = db.immediate_transaction(|tx| {
                migrate::copy_with_rename(tx, &old_table, &new_table, &old_name, &new_name)
            })?;
            info!("rename-column copied {} rows in {}", copied, db.path().display());
            writeln!(out, "Copied {} rows", copied)?;
        }
        Command::Query { sql } => {
            let db = open_database(db_path, config)?;
            let conn = db.conn()?;
            let rows = query_json(&conn, &sql)?;
            let text = serde_json::to_string_pretty(&rows)
                .map_err(|e| VmSqlError::Error(format!("Failed to render rows: {}", e)))?;
            writeln!(out, "{}", text)?;
        }
    }

    Ok(())
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(b.to_vec()),
    }
}

/// Run `sql` and return its rows as JSON objects keyed by column name.
pub fn query_json(conn: &Connection, sql: &str) -> Result<Vec<Value>, VmSqlError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (i, column) in columns.iter().enumerate() {
            object.insert(column.clone(), json_value(row.get_ref(i)?));
        }
        result.push(Value::Object(object));
    }

    Ok(result)
}
