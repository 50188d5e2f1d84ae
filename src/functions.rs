use std::panic::RefUnwindSafe;
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};
use regex::Regex;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{ToSql, Value, ValueRef};
use rusqlite::{Connection, OptionalExtension};

use crate::config::{Config, SeverityConfig};
use crate::error::VmSqlError;
use crate::hosts::{self, HostList};
use crate::recurrence::{self, RecurrenceSpec};
use crate::run_status;
use crate::severity::{self, SeverityClass, SEVERITY_MISSING};
use crate::severity_cache::SeverityCache;
use crate::sort::{compare_ips, compare_message_types, compare_threats};
use crate::tags;
use crate::timestamp;
use crate::uniquify::{self, CandidateName, ResourceType, TableRegistry};
use uuid::Uuid;

/// Where the raw severity of a task comes from.
///
/// The connection passed in is the one evaluating the current statement, so
/// lookups see that connection's uncommitted writes.
pub trait SeveritySource: Send + Sync + RefUnwindSafe {
    fn task_severity(
        &self,
        conn: &Connection,
        task: i64,
        overrides: bool,
    ) -> Result<Option<f64>, VmSqlError>;

    fn task_has_report(&self, conn: &Connection, task: i64) -> Result<bool, VmSqlError>;
}

/// Severity lookups driven by configurable SQL.
///
/// The severity query gets the task as `?1` and the overrides flag as `?2`,
/// and may use only the first. The report query gets the task as `?1`.
#[derive(Debug, Clone)]
pub struct SqlSeveritySource {
    severity_sql: String,
    report_sql: String,
}

impl SqlSeveritySource {
    pub fn new(severity_sql: &str, report_sql: &str) -> Self {
        SqlSeveritySource {
            severity_sql: severity_sql.to_owned(),
            report_sql: report_sql.to_owned(),
        }
    }

    pub fn from_config(config: &SeverityConfig) -> Self {
        Self::new(&config.task_severity_sql, &config.task_report_sql)
    }
}

impl SeveritySource for SqlSeveritySource {
    fn task_severity(
        &self,
        conn: &Connection,
        task: i64,
        overrides: bool,
    ) -> Result<Option<f64>, VmSqlError> {
        let mut stmt = conn.prepare(&self.severity_sql)?;
        let args: [&dyn ToSql; 2] = [&task, &overrides];
        let n = stmt.parameter_count().min(args.len());

        let severity = stmt
            .query_row(&args[..n], |row| row.get::<_, Option<f64>>(0))
            .optional()?
            .flatten();

        trace!("Task {} severity (overrides {}): {:?}", task, overrides, severity);
        Ok(severity)
    }

    fn task_has_report(&self, conn: &Connection, task: i64) -> Result<bool, VmSqlError> {
        let has_report = conn
            .query_row(&self.report_sql, [task], |row| row.get::<_, bool>(0))
            .optional()?;

        Ok(has_report.unwrap_or(false))
    }
}

/// Everything the registered functions need besides their arguments.
#[derive(Clone)]
pub struct FunctionSettings {
    pub class: SeverityClass,
    pub source: Arc<dyn SeveritySource>,
}

impl FunctionSettings {
    pub fn from_config(config: &Config) -> Self {
        FunctionSettings {
            class: config.severity.class(),
            source: Arc::new(SqlSeveritySource::from_config(&config.severity)),
        }
    }
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn user_error(e: VmSqlError) -> rusqlite::Error {
    e.into_sql()
}

fn missing_argument(what: &str) -> rusqlite::Error {
    user_error(VmSqlError::InvalidArgument(format!(
        "Failed to get {} argument",
        what
    )))
}

/// Argument as text the way SQLite would render it, `None` for NULL.
fn text_arg(ctx: &Context<'_>, idx: usize) -> Option<String> {
    match ctx.get_raw(idx) {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

fn required_text(ctx: &Context<'_>, idx: usize, what: &str) -> rusqlite::Result<String> {
    text_arg(ctx, idx).ok_or_else(|| missing_argument(what))
}

/// Argument as a real, with SQLite's lenient coercion: NULL and
/// non-numeric text are 0.
fn real_arg(ctx: &Context<'_>, idx: usize) -> f64 {
    match ctx.get_raw(idx) {
        ValueRef::Null => 0.0,
        ValueRef::Integer(i) => i as f64,
        ValueRef::Real(f) => f,
        ValueRef::Text(t) | ValueRef::Blob(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0.0),
    }
}

fn int_arg(ctx: &Context<'_>, idx: usize) -> i64 {
    match ctx.get_raw(idx) {
        ValueRef::Null => 0,
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) => f as i64,
        ValueRef::Text(t) | ValueRef::Blob(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            })
            .unwrap_or(0),
    }
}

fn is_null_or_empty(ctx: &Context<'_>, idx: usize) -> bool {
    match ctx.get_raw(idx) {
        ValueRef::Null => true,
        ValueRef::Text(t) => t.is_empty(),
        _ => false,
    }
}

/// Severity of `task`, through the statement's cache.
///
/// The cache hangs off the overrides argument's auxiliary data, so SQLite
/// drops it with the statement. When SQLite does not keep the auxiliary data
/// the cache only lives for this call.
fn cached_task_severity(
    ctx: &Context<'_>,
    source: &dyn SeveritySource,
    task: i64,
    overrides: bool,
) -> rusqlite::Result<Option<f64>> {
    let cache = match ctx.get_aux::<Mutex<SeverityCache>>(1)? {
        Some(cache) => cache,
        None => ctx.set_aux(1, Mutex::new(SeverityCache::new()))?,
    };

    // SAFETY: the connection reference is only used for the duration of
    // this callback, on the thread SQLite invoked it from.
    let conn = unsafe { ctx.get_connection()? };

    let mut cache = cache
        .lock()
        .map_err(|_| user_error(VmSqlError::Error("Severity cache lock poisoned".into())))?;

    cache
        .cached_lookup(task, overrides, |task, overrides| {
            source.task_severity(&conn, task, overrides)
        })
        .map_err(user_error)
}

/// Register every SQL function and collation on `conn`.
pub fn register_functions(conn: &Connection, settings: &FunctionSettings) -> rusqlite::Result<()> {
    let deterministic = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    let volatile = FunctionFlags::SQLITE_UTF8;

    register_time_functions(conn, deterministic, volatile)?;
    register_severity_functions(conn, settings, deterministic, volatile)?;
    register_host_functions(conn, deterministic)?;
    register_resource_functions(conn, volatile)?;
    register_text_functions(conn, deterministic, volatile)?;

    conn.create_collation("collate_message_type", compare_message_types)?;
    conn.create_collation("collate_threat", compare_threats)?;
    conn.create_collation("collate_ip", compare_ips)?;

    debug!("Registered SQL functions (severity class {})", settings.class);
    Ok(())
}

fn register_time_functions(
    conn: &Connection,
    deterministic: FunctionFlags,
    volatile: FunctionFlags,
) -> rusqlite::Result<()> {
    conn.create_scalar_function("iso_time", 1, deterministic, |ctx| {
        timestamp::iso_time(int_arg(ctx, 0))
            .ok_or_else(|| user_error(VmSqlError::Error("Failed to format time".into())))
    })?;

    conn.create_scalar_function("parse_time", 1, deterministic, |ctx| {
        let text = text_arg(ctx, 0).unwrap_or_default();
        Ok(timestamp::parse_or_unset(&text))
    })?;

    // Depend on the clock
    conn.create_scalar_function("next_time", 3, volatile, |ctx| {
        let spec = RecurrenceSpec::new(int_arg(ctx, 0), int_arg(ctx, 1), int_arg(ctx, 2));
        Ok(spec.next_occurrence(recurrence::now()))
    })?;

    conn.create_scalar_function("next_time", 2, volatile, |ctx| {
        let spec = RecurrenceSpec::new(int_arg(ctx, 0), int_arg(ctx, 1), 0);
        Ok(spec.next_occurrence(recurrence::now()))
    })?;

    conn.create_scalar_function("m_now", 0, volatile, |_ctx| Ok(recurrence::now()))?;

    conn.create_scalar_function("current_offset", 1, volatile, |ctx| {
        let zone = text_arg(ctx, 0).unwrap_or_default();
        Ok(recurrence::current_utc_offset(&zone))
    })?;

    Ok(())
}

fn register_severity_functions(
    conn: &Connection,
    settings: &FunctionSettings,
    deterministic: FunctionFlags,
    volatile: FunctionFlags,
) -> rusqlite::Result<()> {
    let class = settings.class;

    conn.create_scalar_function("severity_to_level", 1, deterministic, move |ctx| {
        if is_null_or_empty(ctx, 0) {
            return Ok(None);
        }
        Ok(Some(severity::severity_to_level(real_arg(ctx, 0), class, 0)))
    })?;

    conn.create_scalar_function("severity_to_level", 2, deterministic, move |ctx| {
        if is_null_or_empty(ctx, 0) {
            return Ok(None);
        }
        Ok(Some(severity::severity_to_level(
            real_arg(ctx, 0),
            class,
            int_arg(ctx, 1),
        )))
    })?;

    conn.create_scalar_function("severity_to_type", 1, deterministic, |ctx| {
        if is_null_or_empty(ctx, 0) {
            return Ok(None);
        }
        Ok(Some(severity::severity_to_type(real_arg(ctx, 0))))
    })?;

    conn.create_scalar_function("severity_matches_ov", 2, deterministic, move |ctx| {
        if matches!(ctx.get_raw(0), ValueRef::Null) {
            return Err(user_error(VmSqlError::InvalidArgument(
                "First parameter of severity_matches_ov is NULL".into(),
            )));
        }
        let override_severity = if is_null_or_empty(ctx, 1) {
            None
        } else {
            Some(real_arg(ctx, 1))
        };
        Ok(severity::matches_override(
            real_arg(ctx, 0),
            override_severity,
            class,
        ))
    })?;

    conn.create_scalar_function("severity_in_level", 2, deterministic, move |ctx| {
        Ok(text_arg(ctx, 1).map(|level| severity::in_level(real_arg(ctx, 0), &level, class)))
    })?;

    // These read the store, so they are not deterministic
    let source = Arc::clone(&settings.source);
    conn.create_scalar_function("task_severity", 2, volatile, move |ctx| {
        let task = int_arg(ctx, 0);
        if task == 0 {
            return Ok(Value::Text(String::new()));
        }

        let severity = cached_task_severity(ctx, source.as_ref(), task, int_arg(ctx, 1) != 0)?;
        Ok(Value::Real(severity.unwrap_or(SEVERITY_MISSING)))
    })?;

    let source = Arc::clone(&settings.source);
    conn.create_scalar_function("task_threat_level", 2, volatile, move |ctx| {
        let task = int_arg(ctx, 0);
        if task == 0 {
            return Ok("");
        }

        if let Some(score) = cached_task_severity(ctx, source.as_ref(), task, int_arg(ctx, 1) != 0)? {
            return Ok(severity::severity_to_level(score, class, 0));
        }

        // SAFETY: used only within this callback, as above.
        let conn = unsafe { ctx.get_connection()? };
        if source.task_has_report(&conn, task).map_err(user_error)? {
            Ok("None")
        } else {
            Ok("")
        }
    })?;

    Ok(())
}

fn register_host_functions(conn: &Connection, deterministic: FunctionFlags) -> rusqlite::Result<()> {
    conn.create_scalar_function("hosts_contains", 2, deterministic, |ctx| {
        let hosts = required_text(ctx, 0, "hosts")?;
        let host = required_text(ctx, 1, "host")?;
        Ok(hosts::contains(&hosts, &host))
    })?;

    conn.create_scalar_function("clean_hosts", 1, deterministic, |ctx| {
        let hosts = required_text(ctx, 0, "hosts")?;
        Ok(HostList::normalize(&hosts).to_string())
    })?;

    // Text result, matching how the count is stored alongside targets
    conn.create_scalar_function("max_hosts", 2, deterministic, |ctx| {
        let hosts = match text_arg(ctx, 0) {
            Some(hosts) => hosts,
            None => return Ok("0".to_owned()),
        };
        let excluded = text_arg(ctx, 1);
        Ok(hosts::count_or_zero(Some(hosts.as_str()), excluded.as_deref()).to_string())
    })?;

    Ok(())
}

fn register_resource_functions(conn: &Connection, volatile: FunctionFlags) -> rusqlite::Result<()> {
    conn.create_scalar_function("uniquify", 4, volatile, |ctx| {
        let resource = ResourceType::from_tag(&required_text(ctx, 0, "type")?).map_err(user_error)?;
        let proposed = required_text(ctx, 1, "proposed name")?;
        let owner = match ctx.get_raw(2) {
            ValueRef::Null => None,
            _ => Some(int_arg(ctx, 2)),
        };
        let suffix = required_text(ctx, 3, "suffix")?;

        // SAFETY: used only within this callback, on the calling thread.
        let conn = unsafe { ctx.get_connection()? };
        let registry = TableRegistry::new(&conn);

        uniquify::make_unique_in(&CandidateName::new(&proposed, &suffix, owner), resource, &registry)
            .map_err(user_error)
    })?;

    conn.create_scalar_function("resource_exists", 2, volatile, |ctx| resource_exists(ctx, false))?;

    conn.create_scalar_function("resource_exists", 3, volatile, |ctx| {
        resource_exists(ctx, int_arg(ctx, 2) == 1)
    })?;

    conn.create_scalar_function("resource_name", 3, volatile, |ctx| {
        let (tag, uuid) = match (text_arg(ctx, 0), text_arg(ctx, 1)) {
            (Some(tag), Some(uuid)) => (tag, uuid),
            _ => return Ok(None),
        };
        let resource = ResourceType::from_tag(&tag).map_err(user_error)?;

        // SAFETY: used only within this callback, on the calling thread.
        let conn = unsafe { ctx.get_connection()? };
        let name = uniquify::resource_name(&conn, resource, &uuid, int_arg(ctx, 2) == 1)
            .map_err(user_error)?;
        Ok(Some(name.unwrap_or_default()))
    })?;

    Ok(())
}

fn register_text_functions(
    conn: &Connection,
    deterministic: FunctionFlags,
    volatile: FunctionFlags,
) -> rusqlite::Result<()> {
    conn.create_scalar_function("tag", 2, deterministic, |ctx| {
        let tags = required_text(ctx, 0, "tags")?;
        let name = required_text(ctx, 1, "tag")?;
        Ok(tags::tag(&tags, &name).to_owned())
    })?;

    conn.create_scalar_function("common_cve", 2, deterministic, |ctx| {
        let first = required_text(ctx, 0, "first CVE")?;
        let second = required_text(ctx, 1, "second CVE")?;
        Ok(tags::common_cve(&first, &second))
    })?;

    // Backs `text REGEXP pattern`, which SQLite calls as regexp(pattern, text)
    conn.create_scalar_function("regexp", 2, deterministic, |ctx| {
        let (pattern, text) = match (text_arg(ctx, 0), text_arg(ctx, 1)) {
            (Some(pattern), Some(text)) => (pattern, text),
            _ => return Ok(false),
        };

        let regex = match ctx.get_aux::<Regex>(0)? {
            Some(regex) => regex,
            None => match Regex::new(&pattern) {
                Ok(regex) => ctx.set_aux(0, regex)?,
                Err(err) => {
                    warn!("Invalid regular expression '{}': {}", pattern, err);
                    return Ok(false);
                }
            },
        };

        Ok(regex.is_match(&text))
    })?;

    conn.create_scalar_function("run_status_name", 1, deterministic, |ctx| {
        Ok(run_status::run_status_name(int_arg(ctx, 0)))
    })?;

    conn.create_scalar_function("make_uuid", 0, volatile, |_ctx| {
        Ok(Uuid::new_v4().to_string())
    })?;

    Ok(())
}

fn resource_exists(ctx: &Context<'_>, in_trash: bool) -> rusqlite::Result<bool> {
    let tag = match text_arg(ctx, 0) {
        Some(tag) => tag,
        None => return Ok(false),
    };
    let resource = ResourceType::from_tag(&tag).map_err(user_error)?;

    // SAFETY: used only within this callback, on the calling thread.
    let conn = unsafe { ctx.get_connection()? };
    uniquify::resource_exists(&conn, resource, int_arg(ctx, 1), in_trash).map_err(user_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rusqlite::types::FromSql;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup_with(settings: &FunctionSettings) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        register_functions(&conn, settings).unwrap();
        conn
    }

    fn setup() -> Connection {
        setup_with(&FunctionSettings::default())
    }

    fn query<T: FromSql>(conn: &Connection, sql: &str) -> T {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    fn create_reports(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE reports (id INTEGER PRIMARY KEY, task INTEGER, date INTEGER);
             CREATE TABLE results (id INTEGER PRIMARY KEY, report INTEGER,
                                   severity REAL, new_severity REAL);
             INSERT INTO reports VALUES (1, 10, 100);
             INSERT INTO reports VALUES (2, 10, 200);
             INSERT INTO reports VALUES (3, 20, 100);
             INSERT INTO results VALUES (1, 1, 9.0, NULL);
             INSERT INTO results VALUES (2, 2, 5.0, NULL);
             INSERT INTO results VALUES (3, 2, 7.5, 2.0);",
        )
        .unwrap();
    }

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    impl SeveritySource for CountingSource {
        fn task_severity(
            &self,
            _conn: &Connection,
            task: i64,
            _overrides: bool,
        ) -> Result<Option<f64>, VmSqlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(task as f64))
        }

        fn task_has_report(&self, _conn: &Connection, _task: i64) -> Result<bool, VmSqlError> {
            Ok(true)
        }
    }

    #[test]
    fn test_time_functions() {
        let conn = setup();

        assert_eq!(query::<String>(&conn, "SELECT iso_time(0)"), "");
        assert_eq!(
            query::<String>(&conn, "SELECT iso_time(1312870834)"),
            "2011-08-09T06:20:34Z"
        );
        assert_eq!(
            query::<i64>(&conn, "SELECT parse_time('2011-08-09 08:20:34 +0200 (Tue, 09 Aug 2011)')"),
            1312870834
        );
        assert_eq!(query::<i64>(&conn, "SELECT parse_time('$Date: $')"), 0);
        assert_eq!(query::<i64>(&conn, "SELECT parse_time('garbage')"), 0);
        assert_eq!(query::<i64>(&conn, "SELECT next_time(0, 3600, 0)"), 0);
        assert_eq!(query::<i64>(&conn, "SELECT current_offset('UTC')"), 0);
        assert_eq!(query::<i64>(&conn, "SELECT current_offset(NULL)"), 0);

        let now: i64 = query(&conn, "SELECT m_now()");
        let next: i64 = query(&conn, "SELECT next_time(1, 86400)");
        assert!(next > now && next - now <= 86400);
    }

    #[test]
    fn test_severity_functions() {
        let conn = setup();

        assert_eq!(query::<String>(&conn, "SELECT severity_to_level(7.5)"), "High");
        assert_eq!(query::<String>(&conn, "SELECT severity_to_level('7.5', 1)"), "Alarm");
        assert_eq!(query::<Option<String>>(&conn, "SELECT severity_to_level(NULL)"), None);
        assert_eq!(query::<Option<String>>(&conn, "SELECT severity_to_level('')"), None);
        assert_eq!(query::<String>(&conn, "SELECT severity_to_type(-1)"), "False Positive");
        assert_eq!(query::<Option<String>>(&conn, "SELECT severity_to_type(NULL)"), None);

        assert!(query::<bool>(&conn, "SELECT severity_matches_ov(5.0, NULL)"));
        assert!(query::<bool>(&conn, "SELECT severity_matches_ov(5.0, '')"));
        assert!(query::<bool>(&conn, "SELECT severity_matches_ov(5.0, 6.5)"));
        assert!(!query::<bool>(&conn, "SELECT severity_matches_ov(5.0, 7.0)"));
        assert!(conn
            .query_row("SELECT severity_matches_ov(NULL, 7.0)", [], |r| r.get::<_, bool>(0))
            .is_err());

        assert!(query::<bool>(&conn, "SELECT severity_in_level(2.0, 'low')"));
        assert_eq!(query::<Option<bool>>(&conn, "SELECT severity_in_level(2.0, NULL)"), None);
    }

    #[test]
    fn test_configured_class_is_used() {
        let settings = FunctionSettings {
            class: SeverityClass::Bsi,
            ..FunctionSettings::default()
        };
        let conn = setup_with(&settings);

        assert_eq!(query::<String>(&conn, "SELECT severity_to_level(6.5)"), "High");
    }

    #[test]
    fn test_task_severity_from_latest_report() {
        let conn = setup();
        create_reports(&conn);

        assert_eq!(query::<f64>(&conn, "SELECT task_severity(10, 0)"), 7.5);
        assert_eq!(query::<f64>(&conn, "SELECT task_severity(10, 1)"), 5.0);
        assert_eq!(query::<f64>(&conn, "SELECT task_severity(20, 0)"), SEVERITY_MISSING);
        assert_eq!(query::<String>(&conn, "SELECT task_severity(0, 0)"), "");
    }

    #[test]
    fn test_task_threat_level() {
        let conn = setup();
        create_reports(&conn);

        assert_eq!(query::<String>(&conn, "SELECT task_threat_level(10, 0)"), "High");
        assert_eq!(query::<String>(&conn, "SELECT task_threat_level(10, 1)"), "Medium");
        // Report without results
        assert_eq!(query::<String>(&conn, "SELECT task_threat_level(20, 0)"), "None");
        // No report at all
        assert_eq!(query::<String>(&conn, "SELECT task_threat_level(30, 0)"), "");
        assert_eq!(query::<String>(&conn, "SELECT task_threat_level(0, 0)"), "");
    }

    #[test]
    fn test_task_severity_sees_uncommitted_rows() {
        let mut conn = setup();
        create_reports(&conn);

        let tx = conn.transaction().unwrap();
        tx.execute("INSERT INTO results VALUES (4, 3, 3.0, NULL)", [])
            .unwrap();
        let severity: f64 = tx
            .query_row("SELECT task_severity(20, 0)", [], |r| r.get(0))
            .unwrap();
        assert_eq!(severity, 3.0);
        tx.rollback().unwrap();
    }

    #[test]
    fn test_severity_cache_is_per_statement() {
        let calls = Arc::new(AtomicUsize::new(0));
        let settings = FunctionSettings {
            class: SeverityClass::Nist,
            source: Arc::new(CountingSource {
                calls: Arc::clone(&calls),
            }),
        };
        let conn = setup_with(&settings);
        let sql = "SELECT sum(task_severity(t, 0)) FROM \
                   (SELECT 1 AS t UNION ALL SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 2)";

        assert_eq!(query::<f64>(&conn, sql), 6.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A new statement starts with an empty cache
        assert_eq!(query::<f64>(&conn, sql), 6.0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_severity_cache_is_per_call_site() {
        let calls = Arc::new(AtomicUsize::new(0));
        let settings = FunctionSettings {
            class: SeverityClass::Nist,
            source: Arc::new(CountingSource {
                calls: Arc::clone(&calls),
            }),
        };
        let conn = setup_with(&settings);

        // Each expression keeps its own cache, so both fetch
        let (score, level): (f64, String) = conn
            .query_row(
                "SELECT task_severity(t, 0), task_threat_level(t, 0) FROM (SELECT 5 AS t)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(score, 5.0);
        assert_eq!(level, "Medium");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_host_functions() {
        let conn = setup();

        assert!(query::<bool>(&conn, "SELECT hosts_contains('10.0.0.1, 10.0.0.2', '10.0.0.2')"));
        assert!(!query::<bool>(&conn, "SELECT hosts_contains('10.0.0.1', '10.0.0.3')"));
        assert_eq!(
            query::<String>(&conn, "SELECT clean_hosts(' a ,b,,a ')"),
            "a, b"
        );
        assert_eq!(query::<String>(&conn, "SELECT max_hosts('192.168.1.0/24', '')"), "254");
        assert_eq!(
            query::<String>(&conn, "SELECT max_hosts('192.168.1.0/24', '192.168.1.1-10')"),
            "244"
        );
        assert_eq!(query::<String>(&conn, "SELECT max_hosts(NULL, NULL)"), "0");
        assert_eq!(query::<String>(&conn, "SELECT max_hosts('not a host!', NULL)"), "0");
        assert!(conn
            .query_row("SELECT clean_hosts(NULL)", [], |r| r.get::<_, String>(0))
            .is_err());
    }

    #[test]
    fn test_uniquify_and_resource_exists() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TABLE tasks (id INTEGER PRIMARY KEY, owner INTEGER, name TEXT);
             CREATE TABLE tasks_trash (id INTEGER PRIMARY KEY, owner INTEGER, name TEXT);
             INSERT INTO tasks VALUES (1, 7, 'Scan Clone 1');
             INSERT INTO tasks_trash VALUES (5, 7, 'Old');",
        )
        .unwrap();

        assert_eq!(
            query::<String>(&conn, "SELECT uniquify('task', 'Scan', 7, ' Clone')"),
            "Scan Clone 2"
        );
        assert_eq!(
            query::<String>(&conn, "SELECT uniquify('task', 'Scan', 8, ' Clone')"),
            "Scan Clone 1"
        );
        assert!(conn
            .query_row("SELECT uniquify('spaceship', 'x', 1, '')", [], |r| r.get::<_, String>(0))
            .is_err());

        assert!(query::<bool>(&conn, "SELECT resource_exists('task', 1)"));
        assert!(!query::<bool>(&conn, "SELECT resource_exists('task', 5)"));
        assert!(query::<bool>(&conn, "SELECT resource_exists('task', 5, 1)"));
        assert!(!query::<bool>(&conn, "SELECT resource_exists(NULL, 1)"));
        assert!(conn
            .query_row("SELECT resource_exists('spaceship', 1)", [], |r| r.get::<_, bool>(0))
            .is_err());
    }

    #[test]
    fn test_resource_name() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TABLE targets (id INTEGER PRIMARY KEY, uuid TEXT, owner INTEGER, name TEXT);
             CREATE TABLE targets_trash (id INTEGER PRIMARY KEY, uuid TEXT, owner INTEGER, name TEXT);
             INSERT INTO targets (uuid, name) VALUES ('a1', 'Office LAN');
             INSERT INTO targets_trash (uuid, name) VALUES ('b2', 'Retired DMZ');",
        )
        .unwrap();

        assert_eq!(
            query::<String>(&conn, "SELECT resource_name('target', 'a1', 0)"),
            "Office LAN"
        );
        assert_eq!(
            query::<String>(&conn, "SELECT resource_name('target', 'b2', 1)"),
            "Retired DMZ"
        );
        assert_eq!(query::<String>(&conn, "SELECT resource_name('target', 'b2', 0)"), "");
        assert_eq!(
            query::<Option<String>>(&conn, "SELECT resource_name(NULL, 'a1', 0)"),
            None
        );
        assert_eq!(
            query::<Option<String>>(&conn, "SELECT resource_name('target', NULL, 0)"),
            None
        );
        assert!(conn
            .query_row("SELECT resource_name('spaceship', 'a1', 0)", [], |r| {
                r.get::<_, String>(0)
            })
            .is_err());
    }

    #[test]
    fn test_regexp() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TABLE t (name TEXT);
             INSERT INTO t VALUES ('Scan Clone 1');
             INSERT INTO t VALUES ('Scan Clone 12');
             INSERT INTO t VALUES ('Scan');
             INSERT INTO t VALUES (NULL);",
        )
        .unwrap();

        assert_eq!(
            query::<i64>(&conn, "SELECT count(*) FROM t WHERE name REGEXP 'Clone [0-9]+$'"),
            2
        );
        assert!(!query::<bool>(&conn, "SELECT NULL REGEXP 'x'"));
        assert!(!query::<bool>(&conn, "SELECT 'x' REGEXP NULL"));
        // Invalid patterns match nothing
        assert!(!query::<bool>(&conn, "SELECT 'a(' REGEXP 'a('"));
    }

    #[test]
    fn test_run_status_name_and_make_uuid() {
        let conn = setup();

        assert_eq!(query::<String>(&conn, "SELECT run_status_name(4)"), "Running");
        assert_eq!(query::<String>(&conn, "SELECT run_status_name(11)"), "Stop Requested");
        assert_eq!(query::<String>(&conn, "SELECT run_status_name(NULL)"), "Delete Requested");

        let first: String = query(&conn, "SELECT make_uuid()");
        let second: String = query(&conn, "SELECT make_uuid()");
        assert_eq!(first.len(), 36);
        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, second);
    }

    #[test]
    fn test_tag_and_common_cve() {
        let conn = setup();

        assert_eq!(
            query::<String>(&conn, "SELECT tag('cvss_base=5.0|risk=High', 'risk')"),
            "High"
        );
        assert!(query::<bool>(&conn, "SELECT common_cve('CVE-1, CVE-2', 'CVE-2')"));
        assert!(conn
            .query_row("SELECT tag(NULL, 'risk')", [], |r| r.get::<_, String>(0))
            .is_err());
    }

    #[test]
    fn test_collations() {
        let conn = setup();
        conn.execute_batch(
            "CREATE TABLE t (threat TEXT, host TEXT);
             INSERT INTO t VALUES ('Low', '10.0.0.10');
             INSERT INTO t VALUES ('High', '10.0.0.9');
             INSERT INTO t VALUES ('Medium', 'alpha');",
        )
        .unwrap();

        let threats: Vec<String> = conn
            .prepare("SELECT threat FROM t ORDER BY threat COLLATE collate_threat")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(threats, vec!["High", "Medium", "Low"]);

        let hosts: Vec<String> = conn
            .prepare("SELECT host FROM t ORDER BY host COLLATE collate_ip")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(hosts, vec!["10.0.0.9", "10.0.0.10", "alpha"]);

        let types: Vec<String> = conn
            .prepare(
                "SELECT severity_to_type(s) AS kind FROM (SELECT -1 AS s UNION ALL SELECT 0 \
                 UNION ALL SELECT 7.5) ORDER BY kind COLLATE collate_message_type",
            )
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(types, vec!["Alarm", "Log Message", "False Positive"]);
    }
}
