use log::trace;

/// One remembered lookup: the task it was for and what the lookup returned.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedSeverity {
    task: i64,
    severity: Option<f64>,
}

/// Task severity cache scoped to a single statement.
///
/// A statement that evaluates several severity-derived expressions per row
/// (level, score, trend) would otherwise repeat the same expensive lookup.
/// The cache keeps one entry per overrides flag: a call for the same task
/// reuses it, a call for another task replaces it. The owner creates one of
/// these when a statement starts and drops it when the statement ends, so
/// nothing leaks into the next statement.
#[derive(Debug, Default)]
pub struct SeverityCache {
    plain: Option<CachedSeverity>,
    overrides: Option<CachedSeverity>,
}

impl SeverityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the severity of `task`, calling `fetch` only on a miss.
    pub fn cached_lookup<F, E>(
        &mut self,
        task: i64,
        apply_overrides: bool,
        fetch: F,
    ) -> Result<Option<f64>, E>
    where
        F: FnOnce(i64, bool) -> Result<Option<f64>, E>,
    {
        let slot = if apply_overrides {
            &mut self.overrides
        } else {
            &mut self.plain
        };

        if let Some(cached) = slot.filter(|cached| cached.task == task) {
            trace!("Severity cache hit: task {}, overrides {}", task, apply_overrides);
            return Ok(cached.severity);
        }

        let severity = fetch(task, apply_overrides)?;
        *slot = Some(CachedSeverity { task, severity });

        Ok(severity)
    }

    pub fn clear(&mut self) {
        self.plain = None;
        self.overrides = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;

    fn counting_fetch(calls: &Cell<u32>) -> impl Fn(i64, bool) -> Result<Option<f64>, Infallible> + '_ {
        move |task, overrides| {
            calls.set(calls.get() + 1);
            Ok(Some(task as f64 + if overrides { 0.5 } else { 0.0 }))
        }
    }

    #[test]
    fn test_repeat_lookup_hits_cache() {
        let calls = Cell::new(0);
        let mut cache = SeverityCache::new();

        assert_eq!(cache.cached_lookup(3, false, counting_fetch(&calls)), Ok(Some(3.0)));
        assert_eq!(cache.cached_lookup(3, false, counting_fetch(&calls)), Ok(Some(3.0)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_flags_have_separate_slots() {
        let calls = Cell::new(0);
        let mut cache = SeverityCache::new();

        assert_eq!(cache.cached_lookup(3, false, counting_fetch(&calls)), Ok(Some(3.0)));
        assert_eq!(cache.cached_lookup(3, true, counting_fetch(&calls)), Ok(Some(3.5)));
        assert_eq!(cache.cached_lookup(3, false, counting_fetch(&calls)), Ok(Some(3.0)));
        assert_eq!(cache.cached_lookup(3, true, counting_fetch(&calls)), Ok(Some(3.5)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_other_task_evicts() {
        let calls = Cell::new(0);
        let mut cache = SeverityCache::new();

        cache.cached_lookup(1, false, counting_fetch(&calls)).unwrap();
        cache.cached_lookup(2, false, counting_fetch(&calls)).unwrap();
        cache.cached_lookup(1, false, counting_fetch(&calls)).unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_missing_severity_is_cached_too() {
        let calls = Cell::new(0);
        let mut cache = SeverityCache::new();
        let fetch = |_task: i64, _overrides: bool| -> Result<Option<f64>, Infallible> {
            calls.set(calls.get() + 1);
            Ok(None)
        };

        assert_eq!(cache.cached_lookup(9, false, fetch), Ok(None));
        assert_eq!(cache.cached_lookup(9, false, fetch), Ok(None));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_fetch_is_not_cached() {
        let mut cache = SeverityCache::new();

        let failed: Result<Option<f64>, &str> = cache.cached_lookup(4, false, |_, _| Err("locked"));
        assert_eq!(failed, Err("locked"));

        let ok: Result<Option<f64>, &str> = cache.cached_lookup(4, false, |_, _| Ok(Some(1.0)));
        assert_eq!(ok, Ok(Some(1.0)));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let calls = Cell::new(0);
        let mut cache = SeverityCache::new();

        cache.cached_lookup(1, true, counting_fetch(&calls)).unwrap();
        cache.clear();
        cache.cached_lookup(1, true, counting_fetch(&calls)).unwrap();
        assert_eq!(calls.get(), 2);
    }
}
