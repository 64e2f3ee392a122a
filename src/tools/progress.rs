//! Progress tools: read-only snapshots of the habit book.
//!
//! - `get_habit_progress`: per-day habit completion over the last 7 days.
//! - `get_leadership_scores`: per-day leadership scores over the last 7 days.
//! - `get_tasks_today`: today's task list as a markdown report.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::catalog::{Habit, LEADERSHIP_ATTRIBUTES};
use crate::habits::{format_date, trailing_dates, HabitCompletion, LeadershipScore, TaskItem};

use super::{Tool, ToolContext, ToolOutput, ToolRegistry};

const WINDOW_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateWindow {
    pub start: String,
    pub end: String,
}

impl DateWindow {
    fn of(dates: &[String]) -> Self {
        Self {
            start: dates.first().cloned().unwrap_or_default(),
            end: dates.last().cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HabitSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl From<&Habit> for HabitSummary {
    fn from(habit: &Habit) -> Self {
        Self {
            id: habit.id.clone(),
            name: habit.name.clone(),
            description: habit.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayProgress {
    pub date: String,
    pub total_habits: usize,
    pub completed: usize,
    pub completion_rate: f64,
    pub completed_habits: Vec<HabitSummary>,
    pub uncompleted_habits: Vec<HabitSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitProgressReport {
    pub habits: Vec<HabitSummary>,
    pub window: DateWindow,
    pub per_day: Vec<DayProgress>,
    pub overall_completion_rate: f64,
    pub notes: &'static str,
}

/// Build the habit progress snapshot for the given window of dates.
pub fn habit_progress(
    habits: &[Habit],
    completions: &[HabitCompletion],
    dates: &[String],
) -> HabitProgressReport {
    let per_day: Vec<DayProgress> = dates
        .iter()
        .map(|date| {
            let day_completions: Vec<&HabitCompletion> = completions
                .iter()
                .filter(|c| &c.date == date && c.completed)
                .collect();

            let completed_habits = day_completions
                .iter()
                .filter_map(|c| habits.iter().find(|h| h.id == c.habit_id))
                .map(HabitSummary::from)
                .collect();
            let uncompleted_habits = habits
                .iter()
                .filter(|h| !day_completions.iter().any(|c| c.habit_id == h.id))
                .map(HabitSummary::from)
                .collect();

            let completed = day_completions.len();
            DayProgress {
                date: date.clone(),
                total_habits: habits.len(),
                completed,
                completion_rate: ratio(completed, habits.len()),
                completed_habits,
                uncompleted_habits,
            }
        })
        .collect();

    let max_total = per_day
        .iter()
        .map(|d| d.total_habits)
        .fold(habits.len(), usize::max);
    let completed_sum: usize = per_day.iter().map(|d| d.completed).sum();

    HabitProgressReport {
        habits: habits.iter().map(HabitSummary::from).collect(),
        window: DateWindow::of(dates),
        per_day,
        overall_completion_rate: ratio(completed_sum, max_total * dates.len()),
        notes: "Completion rate is completed habits divided by total habits for each day. \
                Includes detailed habit information and completion status.",
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayScores {
    pub date: String,
    /// Attribute key -> score, `null` when unset
    pub averages: AttributeScores,
    pub day_average: Option<f64>,
}

/// Per-attribute scores for one day, serialized as an object in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeScores(pub Vec<(&'static str, Option<u8>)>);

impl AttributeScores {
    pub fn get(&self, key: &str) -> Option<u8> {
        self.0.iter().find(|(k, _)| *k == key).and_then(|(_, s)| *s)
    }

    fn present(&self) -> Vec<f64> {
        self.0.iter().filter_map(|(_, s)| s.map(f64::from)).collect()
    }
}

impl Serialize for AttributeScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, score) in &self.0 {
            map.serialize_entry(key, score)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeSummary {
    pub key: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadershipReport {
    pub window: DateWindow,
    pub per_day: Vec<DayScores>,
    pub overall_average: Option<f64>,
    pub attributes: Vec<AttributeSummary>,
    pub notes: &'static str,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn leadership_scores(scores: &[LeadershipScore], dates: &[String]) -> LeadershipReport {
    let per_day: Vec<DayScores> = dates
        .iter()
        .map(|date| {
            let averages = AttributeScores(
                LEADERSHIP_ATTRIBUTES
                    .iter()
                    .map(|attr| {
                        let found = scores
                            .iter()
                            .find(|s| &s.date == date && s.attribute == attr.key)
                            .map(|s| s.score);
                        (attr.key, found)
                    })
                    .collect(),
            );

            DayScores {
                date: date.clone(),
                day_average: mean(&averages.present()),
                averages,
            }
        })
        .collect();

    let day_averages: Vec<f64> = per_day.iter().filter_map(|d| d.day_average).collect();

    LeadershipReport {
        window: DateWindow::of(dates),
        overall_average: mean(&day_averages),
        per_day,
        attributes: LEADERSHIP_ATTRIBUTES
            .iter()
            .map(|a| AttributeSummary {
                key: a.key,
                name: a.name,
            })
            .collect(),
        notes: "Scores are 1-10 per attribute; day average is mean across available attributes.",
    }
}

/// Markdown report of a day's tasks, active first.
pub fn tasks_report(date: &str, tasks: &[TaskItem]) -> String {
    let mut out = format!("## Tasks for {}\n\n", date);
    if tasks.is_empty() {
        out.push_str("No tasks recorded for today (0 tasks).\n");
        return out;
    }

    let (active, done): (Vec<&TaskItem>, Vec<&TaskItem>) = tasks.iter().partition(|t| !t.done);
    out.push_str(&format!(
        "{} of {} complete.\n\n",
        done.len(),
        tasks.len()
    ));

    out.push_str(&format!("**Active ({})**\n", active.len()));
    if active.is_empty() {
        out.push_str("- _none_\n");
    }
    for task in &active {
        out.push_str(&format!("- [ ] {}\n", task.text));
    }

    out.push_str(&format!("\n**Completed ({})**\n", done.len()));
    if done.is_empty() {
        out.push_str("- _none_\n");
    }
    for task in &done {
        out.push_str(&format!("- [x] {}\n", task.text));
    }
    out
}

pub struct HabitProgressTool;

impl HabitProgressTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for HabitProgressTool {
    fn name(&self) -> &str {
        "get_habit_progress"
    }

    fn description(&self) -> &str {
        "Return habit completion stats for the last 7 days (including today): per-day totals, \
         completion rate, and which habits were completed or missed."
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let dates = trailing_dates(ctx.today, WINDOW_DAYS);
        let habits = ctx.book.habits()?;
        let completions = ctx.book.completions()?;

        let report = habit_progress(&habits, &completions, &dates);
        Ok(ToolOutput::Json(serde_json::to_value(report)?))
    }
}

pub struct LeadershipScoresTool;

impl LeadershipScoresTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for LeadershipScoresTool {
    fn name(&self) -> &str {
        "get_leadership_scores"
    }

    fn description(&self) -> &str {
        "Return leadership attribute scores (1-10) for the last 7 days with daily and overall averages."
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let dates = trailing_dates(ctx.today, WINDOW_DAYS);
        let scores = ctx.book.scores()?;

        // Serialized straight to text: a `Value` round-trip would re-sort the attribute keys.
        let report = leadership_scores(&scores, &dates);
        Ok(ToolOutput::Text(serde_json::to_string_pretty(&report)?))
    }
}

pub struct TasksTodayTool;

impl TasksTodayTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for TasksTodayTool {
    fn name(&self) -> &str {
        "get_tasks_today"
    }

    fn description(&self) -> &str {
        "Return today's task list split into active and completed tasks."
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let date = format_date(ctx.today);
        let tasks = ctx.book.tasks(&date)?;
        Ok(ToolOutput::Text(tasks_report(&date, &tasks)))
    }
}

pub async fn register_builtin_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(HabitProgressTool::new())).await;
    registry.register(Arc::new(LeadershipScoresTool::new())).await;
    registry.register(Arc::new(TasksTodayTool::new())).await;
    tracing::info!("Tool registry initialized with 3 built-in tools");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_habits;
    use crate::habits::HabitBook;
    use crate::store::{MemoryStateStore, ReadError, StateStore};
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn ctx_with(store: Arc<dyn StateStore>) -> ToolContext {
        ToolContext {
            book: Arc::new(HabitBook::new(store, 5)),
            today: today(),
        }
    }

    fn completion(date: &str, habit_id: &str) -> HabitCompletion {
        HabitCompletion {
            date: date.to_string(),
            habit_id: habit_id.to_string(),
            completed: true,
        }
    }

    #[test]
    fn empty_habit_list_yields_zero_rates() {
        let dates = trailing_dates(today(), 7);
        let report = habit_progress(&[], &[], &dates);

        assert_eq!(report.overall_completion_rate, 0.0);
        assert_eq!(report.per_day.len(), 7);
        for day in &report.per_day {
            assert_eq!(day.completion_rate, 0.0);
            assert!(day.completed_habits.is_empty());
            assert!(day.uncompleted_habits.is_empty());
        }
    }

    #[test]
    fn habit_progress_counts_completed_days() {
        let habits = default_habits();
        let dates = trailing_dates(today(), 7);
        let completions = vec![
            completion("2026-10-16", "clean-fuel"),
            completion("2026-10-16", "remember"),
            completion("2026-10-10", "remember"),
            HabitCompletion {
                date: "2026-10-15".to_string(),
                habit_id: "remember".to_string(),
                completed: false,
            },
            completion("2026-09-01", "remember"),
        ];

        let report = habit_progress(&habits, &completions, &dates);
        assert_eq!(report.window.start, "2026-10-10");
        assert_eq!(report.window.end, "2026-10-16");

        let last = report.per_day.last().unwrap();
        assert_eq!(last.completed, 2);
        assert_eq!(last.completion_rate, 2.0 / 8.0);
        assert_eq!(last.uncompleted_habits.len(), 6);

        let yesterday = &report.per_day[5];
        assert_eq!(yesterday.completed, 0);
        assert_eq!(yesterday.uncompleted_habits.len(), 8);

        assert_eq!(report.overall_completion_rate, 3.0 / 56.0);
    }

    #[test]
    fn no_scores_means_null_averages() {
        let dates = trailing_dates(today(), 7);
        let report = leadership_scores(&[], &dates);

        assert_eq!(report.overall_average, None);
        assert!(report.per_day.iter().all(|d| d.day_average.is_none()));
        assert_eq!(report.attributes.len(), 10);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["overallAverage"].is_null());
        assert!(json["perDay"][0]["dayAverage"].is_null());
        assert!(json["perDay"][0]["averages"]["ego-management"].is_null());
    }

    #[test]
    fn day_average_uses_present_scores_only() {
        let dates = trailing_dates(today(), 7);
        let scores = vec![
            LeadershipScore {
                date: "2026-10-16".to_string(),
                attribute: "ego-management".to_string(),
                score: 8,
            },
            LeadershipScore {
                date: "2026-10-16".to_string(),
                attribute: "extreme-ownership".to_string(),
                score: 4,
            },
            LeadershipScore {
                date: "2026-10-14".to_string(),
                attribute: "adapt-and-overcome".to_string(),
                score: 9,
            },
        ];

        let report = leadership_scores(&scores, &dates);
        assert_eq!(report.per_day[6].averages.get("ego-management"), Some(8));
        assert_eq!(report.per_day[6].averages.get("simplify-and-clarify"), None);
        assert_eq!(report.per_day[6].day_average, Some(6.0));
        assert_eq!(report.per_day[4].day_average, Some(9.0));
        assert_eq!(report.overall_average, Some(7.5));
    }

    #[test]
    fn tasks_report_distinguishes_empty_list() {
        let report = tasks_report("2026-10-16", &[]);
        assert!(report.contains("0 tasks"));

        let tasks = vec![
            TaskItem {
                id: "1".to_string(),
                text: "Write plan".to_string(),
                done: false,
            },
            TaskItem {
                id: "2".to_string(),
                text: "Lift".to_string(),
                done: true,
            },
        ];
        let report = tasks_report("2026-10-16", &tasks);
        assert!(report.contains("1 of 2 complete."));
        assert!(report.contains("- [ ] Write plan"));
        assert!(report.contains("- [x] Lift"));
    }

    #[tokio::test]
    async fn habit_tool_on_empty_store_reports_nothing() {
        let ctx = ctx_with(Arc::new(MemoryStateStore::new()));

        let output = HabitProgressTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        let ToolOutput::Json(value) = output else {
            panic!("expected json output");
        };
        assert_eq!(value["overallCompletionRate"], 0.0);
        for day in value["perDay"].as_array().unwrap() {
            assert_eq!(day["totalHabits"], 0);
            assert_eq!(day["completionRate"], 0.0);
            assert!(day["completedHabits"].as_array().unwrap().is_empty());
            assert!(day["uncompletedHabits"].as_array().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn leadership_tool_keeps_catalog_key_order() {
        let ctx = ctx_with(Arc::new(MemoryStateStore::new()));
        ctx.book.set_score("adapt-and-overcome", "2026-10-16", 6).unwrap();

        let output = LeadershipScoresTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        let text = output.to_llm_string();
        let first = text.find("\"extreme-ownership\"").unwrap();
        let second = text.find("\"discipline-equals-freedom\"").unwrap();
        let last = text.find("\"adapt-and-overcome\"").unwrap();
        assert!(first < second && second < last);

        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["perDay"][6]["averages"]["adapt-and-overcome"], 6);
        assert_eq!(parsed["perDay"][6]["dayAverage"], 6.0);
    }

    #[tokio::test]
    async fn habit_tool_reads_from_store() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let ctx = ctx_with(store);
        ctx.book.seed_defaults().unwrap();
        ctx.book.toggle_completion("get-after-it", "2026-10-16").unwrap();

        let output = HabitProgressTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        let ToolOutput::Json(value) = output else {
            panic!("expected json output");
        };
        assert_eq!(value["perDay"][6]["completed"], 1);
        assert_eq!(value["perDay"][6]["completedHabits"][0]["id"], "get-after-it");
    }

    struct OfflineStore;

    impl StateStore for OfflineStore {
        fn read(&self, _key: &str) -> std::result::Result<Option<String>, ReadError> {
            Err(ReadError::Unavailable("disk detached".to_string()))
        }

        fn write(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("disk detached")
        }

        fn remove(&self, _key: &str) -> Result<()> {
            anyhow::bail!("disk detached")
        }
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_as_tool_error() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry).await;
        let ctx = ctx_with(Arc::new(OfflineStore));

        let call = crate::tools::ToolCall {
            id: "call_1".to_string(),
            name: "get_leadership_scores".to_string(),
            arguments: "{}".to_string(),
        };
        let result = registry.execute_call(&call, &ctx).await;
        let parsed: Value = serde_json::from_str(&result.content()).unwrap();
        assert_eq!(parsed["error"], "tool execution failed");
        assert!(parsed["detail"].as_str().unwrap().contains("disk detached"));
    }
}
