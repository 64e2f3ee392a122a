//! Typed access to the user's habit book on top of the raw state store.
//!
//! Every collection is stored as one JSON value under a fixed key (tasks are
//! keyed per day). Reads fall back to defaults on missing or malformed data;
//! mutations validate their input and write the whole collection back.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{
    self, default_habits, Habit, WorkoutCounts, COMPLETIONS_KEY, CREDENTIAL_KEY,
    DAILY_LAST_KEY, DAILY_MESSAGE_KEY, HABITS_KEY, MAX_SCORE, MIN_SCORE, SCORES_KEY,
    WORKOUT_LAST_DAY_KEY,
};
use crate::store::{read_json, read_json_or_default, write_json, ReadError, StateStore};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitCompletion {
    pub date: String,
    pub habit_id: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipScore {
    pub date: String,
    pub attribute: String,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub text: String,
    pub done: bool,
}

/// Last auto-generated coach message and when it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyMessage {
    pub text: String,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Rejected mutation input. Surfaces to the user; never a storage failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task text is empty")]
    EmptyTask,
    #[error("maximum of {0} tasks per day reached")]
    TaskLimit(usize),
    #[error("unknown task '{0}'")]
    UnknownTask(String),
    #[error("unknown habit '{0}'")]
    UnknownHabit(String),
    #[error("unknown leadership attribute '{0}'")]
    UnknownAttribute(String),
    #[error("credential is empty")]
    EmptyCredential,
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// The `days` calendar dates ending at `today`, oldest first.
pub fn trailing_dates(today: NaiveDate, days: u32) -> Vec<String> {
    (0..days)
        .rev()
        .map(|offset| format_date(today - Duration::days(i64::from(offset))))
        .collect()
}

pub struct HabitBook {
    store: Arc<dyn StateStore>,
    max_tasks_per_day: usize,
    /// Held across each read-modify-write so concurrent mutations don't
    /// overwrite one another.
    write_lock: Mutex<()>,
}

impl HabitBook {
    pub fn new(store: Arc<dyn StateStore>, max_tasks_per_day: usize) -> Self {
        Self {
            store,
            max_tasks_per_day,
            write_lock: Mutex::new(()),
        }
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| anyhow::anyhow!("Habit book lock poisoned: {}", e))
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Write the default habit catalog if none is stored yet.
    pub fn seed_defaults(&self) -> Result<()> {
        if read_json::<Vec<Habit>>(self.store.as_ref(), HABITS_KEY)
            .ok()
            .flatten()
            .is_none()
        {
            write_json(self.store.as_ref(), HABITS_KEY, &default_habits())?;
            tracing::info!("Seeded default habit catalog");
        }
        Ok(())
    }

    /// Stored habit list; empty until `seed_defaults` has run.
    pub fn habits(&self) -> std::result::Result<Vec<Habit>, ReadError> {
        read_json_or_default(self.store.as_ref(), HABITS_KEY)
    }

    pub fn completions(&self) -> std::result::Result<Vec<HabitCompletion>, ReadError> {
        read_json_or_default(self.store.as_ref(), COMPLETIONS_KEY)
    }

    pub fn scores(&self) -> std::result::Result<Vec<LeadershipScore>, ReadError> {
        read_json_or_default(self.store.as_ref(), SCORES_KEY)
    }

    pub fn tasks(&self, date: &str) -> std::result::Result<Vec<TaskItem>, ReadError> {
        read_json_or_default(self.store.as_ref(), &catalog::tasks_key(date))
    }

    pub fn is_completed(&self, habit_id: &str, date: &str) -> Result<bool> {
        Ok(self
            .completions()?
            .iter()
            .any(|c| c.habit_id == habit_id && c.date == date && c.completed))
    }

    /// Flip a habit's completion for a day. Returns the new state.
    pub fn toggle_completion(&self, habit_id: &str, date: &str) -> Result<bool> {
        let _guard = self.lock_writes()?;
        if !self.habits()?.iter().any(|h| h.id == habit_id) {
            return Err(ValidationError::UnknownHabit(habit_id.to_string()).into());
        }

        let mut completions = self.completions()?;
        let now_completed = match completions
            .iter_mut()
            .find(|c| c.habit_id == habit_id && c.date == date)
        {
            Some(existing) => {
                existing.completed = !existing.completed;
                existing.completed
            }
            None => {
                completions.push(HabitCompletion {
                    date: date.to_string(),
                    habit_id: habit_id.to_string(),
                    completed: true,
                });
                true
            }
        };

        write_json(self.store.as_ref(), COMPLETIONS_KEY, &completions)?;
        tracing::debug!("Habit {} on {} -> completed={}", habit_id, date, now_completed);
        Ok(now_completed)
    }

    /// Upsert a score; values are clamped to the 1..=10 scale.
    pub fn set_score(&self, attribute: &str, date: &str, score: u8) -> Result<u8> {
        let _guard = self.lock_writes()?;
        if !catalog::is_leadership_attribute(attribute) {
            return Err(ValidationError::UnknownAttribute(attribute.to_string()).into());
        }
        let score = score.clamp(MIN_SCORE, MAX_SCORE);

        let mut scores = self.scores()?;
        match scores
            .iter_mut()
            .find(|s| s.attribute == attribute && s.date == date)
        {
            Some(existing) => existing.score = score,
            None => scores.push(LeadershipScore {
                date: date.to_string(),
                attribute: attribute.to_string(),
                score,
            }),
        }

        write_json(self.store.as_ref(), SCORES_KEY, &scores)?;
        Ok(score)
    }

    /// Add a task after the last active one, ahead of completed tasks.
    pub fn add_task(&self, date: &str, text: &str) -> Result<TaskItem> {
        let _guard = self.lock_writes()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyTask.into());
        }

        let tasks = self.tasks(date)?;
        if tasks.len() >= self.max_tasks_per_day {
            return Err(ValidationError::TaskLimit(self.max_tasks_per_day).into());
        }

        let task = TaskItem {
            id: uuid::Uuid::new_v4().simple().to_string(),
            text: text.to_string(),
            done: false,
        };
        let (mut active, done): (Vec<_>, Vec<_>) = tasks.into_iter().partition(|t| !t.done);
        active.push(task.clone());
        active.extend(done);

        self.save_tasks(date, &active)?;
        Ok(task)
    }

    /// Flip a task's done flag and keep active tasks ahead of completed ones.
    pub fn toggle_task(&self, date: &str, id: &str) -> Result<TaskItem> {
        let _guard = self.lock_writes()?;
        let mut tasks = self.tasks(date)?;
        let toggled = {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| ValidationError::UnknownTask(id.to_string()))?;
            task.done = !task.done;
            task.clone()
        };

        let (mut active, done): (Vec<_>, Vec<_>) = tasks.into_iter().partition(|t| !t.done);
        active.extend(done);
        self.save_tasks(date, &active)?;
        Ok(toggled)
    }

    pub fn remove_task(&self, date: &str, id: &str) -> Result<()> {
        let _guard = self.lock_writes()?;
        let mut tasks = self.tasks(date)?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Err(ValidationError::UnknownTask(id.to_string()).into());
        }
        self.save_tasks(date, &tasks)
    }

    /// Move `from_id` to the position of `to_id`. Both must sit in the same
    /// partition (active or done); anything else leaves the list unchanged.
    pub fn reorder_tasks(&self, date: &str, from_id: &str, to_id: &str) -> Result<Vec<TaskItem>> {
        let _guard = self.lock_writes()?;
        let tasks = self.tasks(date)?;
        if from_id == to_id {
            return Ok(tasks);
        }

        let (mut active, mut done): (Vec<_>, Vec<_>) =
            tasks.iter().cloned().partition(|t| !t.done);

        let moved = move_within(&mut active, from_id, to_id) || move_within(&mut done, from_id, to_id);
        if !moved {
            return Ok(tasks);
        }

        active.extend(done);
        self.save_tasks(date, &active)?;
        Ok(active)
    }

    fn save_tasks(&self, date: &str, tasks: &[TaskItem]) -> Result<()> {
        write_json(self.store.as_ref(), &catalog::tasks_key(date), tasks)
    }

    pub fn last_completed_workout_day(&self) -> std::result::Result<u32, ReadError> {
        let raw = self.store.read(WORKOUT_LAST_DAY_KEY)?;
        Ok(raw
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(0))
    }

    pub fn complete_workout(&self) -> Result<u32> {
        let _guard = self.lock_writes()?;
        let next = self.last_completed_workout_day()? + 1;
        self.store.write(WORKOUT_LAST_DAY_KEY, &next.to_string())?;
        Ok(next)
    }

    pub fn undo_workout(&self) -> Result<u32> {
        let _guard = self.lock_writes()?;
        let prev = self.last_completed_workout_day()?.saturating_sub(1);
        self.store.write(WORKOUT_LAST_DAY_KEY, &prev.to_string())?;
        Ok(prev)
    }

    /// Program days around today's workout: two back, today, two ahead.
    pub fn workout_plan(&self) -> Result<Vec<WorkoutCounts>> {
        let today = self.last_completed_workout_day()? + 1;
        Ok((today.saturating_sub(2)..=today + 2)
            .filter(|day| *day >= 1)
            .map(catalog::workout_counts_for_day)
            .collect())
    }

    pub fn credential(&self) -> std::result::Result<Option<String>, ReadError> {
        Ok(self
            .store
            .read(CREDENTIAL_KEY)?
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty()))
    }

    pub fn set_credential(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::EmptyCredential.into());
        }
        self.store.write(CREDENTIAL_KEY, key)
    }

    pub fn daily_message(&self) -> std::result::Result<DailyMessage, ReadError> {
        let text = self.store.read(DAILY_MESSAGE_KEY)?.unwrap_or_default();
        Ok(DailyMessage {
            text,
            generated_at: self.last_daily_message_at()?,
        })
    }

    pub fn last_daily_message_at(&self) -> std::result::Result<Option<DateTime<Utc>>, ReadError> {
        let raw = self.store.read(DAILY_LAST_KEY)?;
        Ok(raw
            .and_then(|value| value.trim().parse::<i64>().ok())
            .filter(|millis| *millis > 0)
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()))
    }

    /// Persist the message text and its timestamp, even when the text is empty.
    pub fn record_daily_message(&self, text: &str, at: DateTime<Utc>) -> Result<()> {
        self.store.write(DAILY_MESSAGE_KEY, text)?;
        self.store
            .write(DAILY_LAST_KEY, &at.timestamp_millis().to_string())?;
        Ok(())
    }
}

fn move_within(list: &mut Vec<TaskItem>, from_id: &str, to_id: &str) -> bool {
    let src = list.iter().position(|t| t.id == from_id);
    let dst = list.iter().position(|t| t.id == to_id);
    match (src, dst) {
        (Some(src), Some(dst)) => {
            let item = list.remove(src);
            list.insert(dst, item);
            true
        }
        _ => false,
    }
}
