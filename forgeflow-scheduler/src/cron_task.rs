//! Cron-scheduled background tasks: persistent task records,
//! a naive natural-language-to-cron translator, and the monitor loop that
//! dispatches due tasks onto the scheduler at BACKGROUND priority.
//!
//! The `cron` crate parses six-field expressions (seconds leading the
//! standard five fields), so every expression stored here carries that
//! leading field even though schedules are authored/described as
//! five-field cron per convention; a literal `"0 "` is prefixed onto
//! whatever five-field or natural-language input resolves to.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forgeflow_memory::{Artifact, ArtifactKind, ArtifactMemory};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::task::{Priority, Task};

const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronTask {
    pub name: String,
    pub description: String,
    pub cron_expression: String,
    #[serde(default)]
    pub natural_language_source: Option<String>,
    pub callable_reference: String,
    pub enabled: bool,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

impl CronTask {
    fn recompute_next_run(&mut self, after: DateTime<Utc>) {
        self.next_run = cron::Schedule::from_str(&self.cron_expression).ok().and_then(|s| s.after(&after).next());
    }
}

pub enum Schedule {
    Cron(String),
    NaturalLanguage(String),
}

/// Translate a schedule description into a `cron`-crate-compatible
/// six-field expression.
pub fn derive_cron_expression(schedule: &Schedule) -> Result<String, SchedulerError> {
    match schedule {
        Schedule::Cron(raw) => normalize_explicit_cron(raw),
        Schedule::NaturalLanguage(text) => parse_natural_language(text),
    }
}

fn normalize_explicit_cron(raw: &str) -> Result<String, SchedulerError> {
    let fields = raw.split_whitespace().count();
    let candidate = if fields == 5 { format!("0 {raw}") } else { raw.to_string() };
    cron::Schedule::from_str(&candidate).map_err(|e| SchedulerError::InvalidCronExpression(raw.to_string(), e.to_string()))?;
    Ok(candidate)
}

static WEEKDAYS: &[(&str, u32)] =
    &[("sunday", 0), ("monday", 1), ("tuesday", 2), ("wednesday", 3), ("thursday", 4), ("friday", 5), ("saturday", 6)];

fn parse_natural_language(text: &str) -> Result<String, SchedulerError> {
    let lowercase = text.to_lowercase();

    if let Some(captures) = Regex::new(r"^every (\d+) minutes?$").unwrap().captures(&lowercase) {
        let n: u32 = captures[1].parse().unwrap_or(1);
        return normalize_explicit_cron(&format!("*/{n} * * * *"));
    }
    if let Some(captures) = Regex::new(r"^every (\d+) hours?$").unwrap().captures(&lowercase) {
        let n: u32 = captures[1].parse().unwrap_or(1);
        return normalize_explicit_cron(&format!("0 */{n} * * *"));
    }
    if lowercase == "every hour" {
        return normalize_explicit_cron("0 * * * *");
    }
    if lowercase == "every minute" {
        return normalize_explicit_cron("* * * * *");
    }

    if let Some(captures) = Regex::new(r"^every day at (.+)$").unwrap().captures(&lowercase) {
        let (hour, minute) = parse_time_of_day(&captures[1])?;
        return normalize_explicit_cron(&format!("{minute} {hour} * * *"));
    }

    for (name, dow) in WEEKDAYS {
        if let Some(captures) = Regex::new(&format!(r"^every {name} at (.+)$")).unwrap().captures(&lowercase) {
            let (hour, minute) = parse_time_of_day(&captures[1])?;
            return normalize_explicit_cron(&format!("{minute} {hour} * * {dow}"));
        }
    }

    Err(SchedulerError::UnparseableSchedule(text.to_string()))
}

fn parse_time_of_day(raw: &str) -> Result<(u32, u32), SchedulerError> {
    let raw = raw.trim();
    if raw == "noon" {
        return Ok((12, 0));
    }
    if raw == "midnight" {
        return Ok((0, 0));
    }

    let re = Regex::new(r"^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").unwrap();
    let captures = re.captures(raw).ok_or_else(|| SchedulerError::UnparseableSchedule(raw.to_string()))?;
    let mut hour: u32 = captures[1].parse().map_err(|_| SchedulerError::UnparseableSchedule(raw.to_string()))?;
    let minute: u32 = captures.get(2).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
    match captures.get(3).map(|m| m.as_str()) {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }
    if hour > 23 || minute > 59 {
        return Err(SchedulerError::UnparseableSchedule(raw.to_string()));
    }
    Ok((hour, minute))
}

pub struct CronStore {
    tasks: RwLock<HashMap<String, CronTask>>,
    inflight: RwLock<HashMap<String, String>>,
}

impl CronStore {
    pub fn new() -> Self {
        Self { tasks: RwLock::new(HashMap::new()), inflight: RwLock::new(HashMap::new()) }
    }

    pub fn create_task(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schedule: Schedule,
        callable_reference: impl Into<String>,
    ) -> Result<CronTask, SchedulerError> {
        let natural_language_source = match &schedule {
            Schedule::NaturalLanguage(text) => Some(text.clone()),
            Schedule::Cron(_) => None,
        };
        let cron_expression = derive_cron_expression(&schedule)?;

        let mut task = CronTask {
            name: name.into(),
            description: description.into(),
            cron_expression,
            natural_language_source,
            callable_reference: callable_reference.into(),
            enabled: true,
            run_count: 0,
            error_count: 0,
            last_run: None,
            next_run: None,
        };
        task.recompute_next_run(Utc::now());
        self.tasks.write().insert(task.name.clone(), task.clone());
        Ok(task)
    }

    pub fn get(&self, name: &str) -> Result<CronTask, SchedulerError> {
        self.tasks.read().get(name).cloned().ok_or_else(|| SchedulerError::TaskNotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<CronTask> {
        self.tasks.read().values().cloned().collect()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(name).ok_or_else(|| SchedulerError::TaskNotFound(name.to_string()))?;
        task.enabled = enabled;
        Ok(())
    }

    /// Dispatch every due, enabled task onto `scheduler` at BACKGROUND
    /// priority. When a workflow is active the dispatch is skipped (not
    /// dropped) and retried on the next tick.
    pub fn tick(&self, scheduler: &Scheduler, now: DateTime<Utc>) -> usize {
        let due_names: Vec<String> = self
            .tasks
            .read()
            .values()
            .filter(|t| t.enabled && t.next_run.is_some_and(|next| next <= now))
            .map(|t| t.name.clone())
            .collect();

        let mut dispatched = 0;
        for name in due_names {
            let mut tasks = self.tasks.write();
            let Some(task) = tasks.get_mut(&name) else { continue };
            let submission = Task::new(Priority::Background, task.callable_reference.clone(), serde_json::Value::Null);
            match scheduler.submit(submission.clone()) {
                Ok(()) => {
                    task.run_count += 1;
                    task.last_run = Some(now);
                    task.recompute_next_run(now);
                    self.inflight.write().insert(submission.task_id, name.clone());
                    dispatched += 1;
                }
                Err(err) => {
                    tracing::warn!(task = %name, error = %err, "failed to submit cron task to scheduler queue");
                }
            }
        }
        dispatched
    }

    /// Record the outcome of a task this store previously dispatched,
    /// auto-disabling after `MAX_CONSECUTIVE_FAILURES` consecutive
    /// failures.
    pub fn record_outcome(&self, task_id: &str, succeeded: bool) {
        let Some(name) = self.inflight.write().remove(task_id) else { return };
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(&name) else { return };
        if succeeded {
            task.error_count = 0;
        } else {
            task.error_count += 1;
            if task.error_count >= MAX_CONSECUTIVE_FAILURES {
                task.enabled = false;
                tracing::warn!(task = %name, "cron task auto-disabled after repeated failures");
            }
        }
    }

    pub async fn persist(&self, path: &Path) -> Result<(), SchedulerError> {
        let tasks: Vec<CronTask> = self.tasks.read().values().cloned().collect();
        let json = serde_json::to_string_pretty(&tasks).map_err(|e| SchedulerError::Io(e.to_string()))?;
        tokio::fs::write(path, json).await.map_err(|e| SchedulerError::Io(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, SchedulerError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| SchedulerError::Io(e.to_string()))?;
        let tasks: Vec<CronTask> = serde_json::from_str(&content).map_err(|e| SchedulerError::Io(e.to_string()))?;
        let store = Self::new();
        let mut map = store.tasks.write();
        for task in tasks {
            map.insert(task.name.clone(), task);
        }
        drop(map);
        Ok(store)
    }

    /// Mirror every cron task into Artifact Memory as a `plan` artifact so
    /// it is semantically searchable ("find me all daily
    /// tasks").
    pub async fn mirror_to_memory(&self, memory: &ArtifactMemory) -> Result<(), SchedulerError> {
        for task in self.list() {
            let content = serde_json::to_string(&task).map_err(|e| SchedulerError::Io(e.to_string()))?;
            let mut artifact = Artifact::new(ArtifactKind::Plan, task.name.clone(), task.description.clone(), content);
            artifact.artifact_id = format!("cron-task:{}", task.name);
            artifact.tags.insert("cron".to_string());
            memory.store(artifact).await?;
        }
        Ok(())
    }
}

impl Default for CronStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Ticks `store` against `scheduler` at `interval_ms` (default 30s).
pub fn run_monitor(store: Arc<CronStore>, scheduler: Arc<Scheduler>, interval_ms: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            let dispatched = store.tick(&scheduler, Utc::now());
            if dispatched > 0 {
                tracing::debug!(dispatched, "cron monitor dispatched due tasks");
            }
        }
    })
}

/// Drains scheduler outcomes back into the cron store so consecutive
/// failures can be counted and auto-disable can trigger.
pub fn run_outcome_listener(store: Arc<CronStore>, mut outcomes: tokio::sync::mpsc::UnboundedReceiver<crate::task::TaskOutcome>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            store.record_outcome(&outcome.task_id, outcome.succeeded);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_n_minutes() {
        assert_eq!(derive_cron_expression(&Schedule::NaturalLanguage("every 15 minutes".into())).unwrap(), "0 */15 * * * *");
    }

    #[test]
    fn parses_every_day_at_time() {
        assert_eq!(derive_cron_expression(&Schedule::NaturalLanguage("every day at 9:30am".into())).unwrap(), "0 30 9 * * *");
    }

    #[test]
    fn parses_every_weekday_at_noon() {
        assert_eq!(derive_cron_expression(&Schedule::NaturalLanguage("every sunday at noon".into())).unwrap(), "0 0 12 * * 0");
    }

    #[test]
    fn rejects_unrecognized_phrasing() {
        assert!(matches!(derive_cron_expression(&Schedule::NaturalLanguage("whenever it feels right".into())), Err(SchedulerError::UnparseableSchedule(_))));
    }

    #[test]
    fn normalizes_five_field_cron_by_prefixing_seconds() {
        assert_eq!(derive_cron_expression(&Schedule::Cron("30 9 * * 1-5".into())).unwrap(), "0 30 9 * * 1-5");
    }

    #[test]
    fn create_task_computes_an_upcoming_next_run() {
        let store = CronStore::new();
        let task = store.create_task("daily-digest", "send the daily digest", Schedule::NaturalLanguage("every day at noon".into()), "send_digest").unwrap();
        assert!(task.next_run.is_some());
        assert_eq!(task.cron_expression, "0 0 12 * * *");
    }

    #[test]
    fn auto_disables_after_consecutive_failures() {
        let store = CronStore::new();
        store.create_task("flaky", "desc", Schedule::NaturalLanguage("every hour".into()), "flaky_job").unwrap();
        for i in 0..MAX_CONSECUTIVE_FAILURES {
            store.inflight.write().insert(format!("run-{i}"), "flaky".to_string());
            store.record_outcome(&format!("run-{i}"), false);
        }
        assert!(!store.get("flaky").unwrap().enabled);
    }
}
