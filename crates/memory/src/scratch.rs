//! Scratch: a persona's mutable working state.
//!
//! Identity, perception/reflection tuning, the progressively decomposed
//! daily schedule, the current action, chat state and path state.  The
//! whole struct round-trips through `scratch.json` with datetimes in the
//! shared snapshot format.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::concept::SpoTriple;
use crate::timefmt;
use crate::MemoryError;

/// Parameters committed by [`Scratch::add_new_action`].
#[derive(Debug, Clone, Default)]
pub struct NewAction {
    pub address: String,
    pub duration: i64,
    pub description: String,
    pub pronunciatio: String,
    pub event: SpoTriple,
    pub chatting_with: Option<String>,
    pub chat: Option<Vec<(String, String)>>,
    pub chatting_with_buffer: Option<BTreeMap<String, i64>>,
    pub chatting_end_time: Option<NaiveDateTime>,
    pub obj_description: Option<String>,
    pub obj_pronunciatio: Option<String>,
    pub obj_event: SpoTriple,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scratch {
    // Perception tuning.
    pub vision_r: usize,
    pub att_bandwidth: usize,
    pub retention: usize,

    // World cursor.
    #[serde(with = "timefmt::option")]
    pub curr_time: Option<NaiveDateTime>,
    pub curr_tile: Option<(usize, usize)>,
    pub daily_plan_req: String,

    // Identity.
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub innate: String,
    pub learned: String,
    pub currently: String,
    pub lifestyle: String,
    pub living_area: String,

    // Reflection tuning.
    pub recency_w: f64,
    pub relevance_w: f64,
    pub importance_w: f64,
    pub recency_decay: f64,
    pub importance_trigger_max: i64,
    pub importance_trigger_curr: i64,
    pub importance_ele_n: usize,
    pub thought_count: usize,

    // Day plan.
    pub daily_req: Vec<String>,
    pub f_daily_schedule: Vec<(String, i64)>,
    pub f_daily_schedule_hourly_org: Vec<(String, i64)>,

    // Current action.
    pub act_address: Option<String>,
    #[serde(with = "timefmt::option")]
    pub act_start_time: Option<NaiveDateTime>,
    pub act_duration: Option<i64>,
    pub act_description: Option<String>,
    pub act_pronunciatio: Option<String>,
    pub act_event: SpoTriple,
    pub act_obj_description: Option<String>,
    pub act_obj_pronunciatio: Option<String>,
    pub act_obj_event: SpoTriple,

    // Chat state.
    pub chatting_with: Option<String>,
    pub chat: Option<Vec<(String, String)>>,
    pub chatting_with_buffer: BTreeMap<String, i64>,
    #[serde(with = "timefmt::option")]
    pub chatting_end_time: Option<NaiveDateTime>,

    // Path state.
    pub act_path_set: bool,
    pub planned_path: Vec<(usize, usize)>,
}

impl Default for Scratch {
    fn default() -> Self {
        Self {
            vision_r: 4,
            att_bandwidth: 3,
            retention: 5,
            curr_time: None,
            curr_tile: None,
            daily_plan_req: String::new(),
            name: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            age: 0,
            innate: String::new(),
            learned: String::new(),
            currently: String::new(),
            lifestyle: String::new(),
            living_area: String::new(),
            recency_w: 1.0,
            relevance_w: 1.0,
            importance_w: 1.0,
            recency_decay: 0.99,
            importance_trigger_max: 150,
            importance_trigger_curr: 150,
            importance_ele_n: 0,
            thought_count: 5,
            daily_req: Vec::new(),
            f_daily_schedule: Vec::new(),
            f_daily_schedule_hourly_org: Vec::new(),
            act_address: None,
            act_start_time: None,
            act_duration: None,
            act_description: None,
            act_pronunciatio: None,
            act_event: (String::new(), None, None),
            act_obj_description: None,
            act_obj_pronunciatio: None,
            act_obj_event: (String::new(), None, None),
            chatting_with: None,
            chat: None,
            chatting_with_buffer: BTreeMap::new(),
            chatting_end_time: None,
            act_path_set: false,
            planned_path: Vec::new(),
        }
    }
}

impl Scratch {
    pub fn bootstrap(name: &str) -> Self {
        let mut parts = name.splitn(2, ' ');
        let first = parts.next().unwrap_or_default().to_string();
        let last = parts.next().unwrap_or_default().to_string();
        Self {
            name: name.to_string(),
            first_name: first,
            last_name: last,
            act_event: (name.to_string(), None, None),
            act_obj_event: (name.to_string(), None, None),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MemoryError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    // ── Identity ──────────────────────────────────────────────────────────

    /// The identity stable set: the minimum persona description injected
    /// into nearly every prompt.
    pub fn identity_summary(&self) -> String {
        let date = self
            .curr_time
            .map(|t| t.format("%A %B %d").to_string())
            .unwrap_or_default();
        format!(
            "Name: {}\nAge: {}\nInnate traits: {}\nLearned traits: {}\nCurrently: {}\nLifestyle: {}\nDaily plan requirement: {}\nCurrent Date: {}\n",
            self.name,
            self.age,
            self.innate,
            self.learned,
            self.currently,
            self.lifestyle,
            self.daily_plan_req,
            date,
        )
    }

    pub fn curr_date_str(&self) -> String {
        self.curr_time
            .map(|t| t.format("%A %B %d").to_string())
            .unwrap_or_default()
    }

    // ── Schedule ──────────────────────────────────────────────────────────

    fn minutes_elapsed_today(&self) -> i64 {
        self.curr_time
            .map(|t| t.hour() as i64 * 60 + t.minute() as i64)
            .unwrap_or(0)
    }

    fn index_at(schedule: &[(String, i64)], target_min: i64) -> usize {
        let mut elapsed = 0;
        for (index, (_, duration)) in schedule.iter().enumerate() {
            elapsed += duration;
            if elapsed > target_min {
                return index;
            }
        }
        schedule.len()
    }

    /// Index of the `f_daily_schedule` slot covering now + `advance`
    /// minutes: the first slot whose cumulative duration exceeds the
    /// elapsed minutes today.
    pub fn schedule_index(&self, advance: i64) -> usize {
        Self::index_at(
            &self.f_daily_schedule,
            self.minutes_elapsed_today() + advance,
        )
    }

    /// Same lookup against the immutable hourly snapshot.
    pub fn hourly_org_index(&self, advance: i64) -> usize {
        Self::index_at(
            &self.f_daily_schedule_hourly_org,
            self.minutes_elapsed_today() + advance,
        )
    }

    pub fn schedule_minutes_sum(&self) -> i64 {
        self.f_daily_schedule.iter().map(|(_, d)| d).sum()
    }

    fn render_schedule(schedule: &[(String, i64)]) -> String {
        let mut out = String::new();
        let mut minutes = 0;
        for (task, duration) in schedule {
            minutes += duration;
            out.push_str(&format!("{:02}:{:02} || {}\n", minutes / 60, minutes % 60, task));
        }
        out
    }

    pub fn daily_schedule_summary(&self) -> String {
        Self::render_schedule(&self.f_daily_schedule)
    }

    pub fn hourly_org_summary(&self) -> String {
        Self::render_schedule(&self.f_daily_schedule_hourly_org)
    }

    // ── Current action ────────────────────────────────────────────────────

    pub fn add_new_action(&mut self, action: NewAction) {
        self.act_address = Some(action.address);
        self.act_duration = Some(action.duration);
        self.act_description = Some(action.description);
        self.act_pronunciatio = Some(action.pronunciatio);
        self.act_event = action.event;

        self.chatting_with = action.chatting_with;
        self.chat = action.chat;
        if let Some(buffer) = action.chatting_with_buffer {
            // Merge: existing cooldowns for other partners keep ticking.
            self.chatting_with_buffer.extend(buffer);
        }
        self.chatting_end_time = action.chatting_end_time;

        self.act_obj_description = action.obj_description;
        self.act_obj_pronunciatio = action.obj_pronunciatio;
        self.act_obj_event = action.obj_event;

        self.act_start_time = self.curr_time;
        self.act_path_set = false;
    }

    /// Has the current action run its course?
    ///
    /// Chats end at `chatting_end_time`.  Other actions end
    /// `act_duration` minutes after their start time rounded up to the
    /// whole minute; completion is a time-of-day comparison so an action
    /// straddling midnight ends on the matching wall-clock second.
    pub fn act_check_finished(&self) -> bool {
        if self.act_address.is_none() {
            return true;
        }
        let Some(curr_time) = self.curr_time else {
            return true;
        };

        let end_time = if self.chatting_with.is_some() {
            self.chatting_end_time
        } else {
            self.act_start_time.map(|start| {
                let start = if start.second() != 0 {
                    start.with_second(0).unwrap_or(start) + Duration::minutes(1)
                } else {
                    start
                };
                start + Duration::minutes(self.act_duration.unwrap_or(0))
            })
        };

        match end_time {
            Some(end) => end.time() == curr_time.time(),
            None => true,
        }
    }

    /// The persona's current event, `(name, None, None)` when no action
    /// has been committed yet.
    pub fn curr_event(&self) -> SpoTriple {
        if self.act_address.is_none() {
            (self.name.clone(), None, None)
        } else {
            self.act_event.clone()
        }
    }

    pub fn curr_event_and_desc(&self) -> (String, Option<String>, Option<String>, Option<String>) {
        if self.act_address.is_none() {
            (self.name.clone(), None, None, None)
        } else {
            (
                self.act_event.0.clone(),
                self.act_event.1.clone(),
                self.act_event.2.clone(),
                self.act_description.clone(),
            )
        }
    }

    /// The object-side event for the current action, keyed by the action
    /// address.
    pub fn curr_obj_event_and_desc(&self) -> (String, Option<String>, Option<String>, Option<String>) {
        match &self.act_address {
            None => (String::new(), None, None, None),
            Some(address) => (
                address.clone(),
                self.act_obj_event.1.clone(),
                self.act_obj_event.2.clone(),
                self.act_obj_description.clone(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 2, 13)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn scratch_with_schedule() -> Scratch {
        let mut scratch = Scratch::bootstrap("Isabella Rodriguez");
        scratch.curr_time = Some(at(8, 30, 0));
        scratch.f_daily_schedule = vec![
            ("sleeping".into(), 420),
            ("waking up and starting her morning routine".into(), 60),
            ("having breakfast".into(), 60),
            ("working at the cafe".into(), 900),
        ];
        scratch.f_daily_schedule_hourly_org = scratch.f_daily_schedule.clone();
        scratch
    }

    #[test]
    fn bootstrap_splits_names() {
        let scratch = Scratch::bootstrap("Klaus Mueller");
        assert_eq!(scratch.first_name, "Klaus");
        assert_eq!(scratch.last_name, "Mueller");
        assert_eq!(scratch.vision_r, 4);
        assert_eq!(scratch.importance_trigger_curr, 150);
    }

    #[test]
    fn schedule_index_walks_cumulative_durations() {
        let scratch = scratch_with_schedule();
        // 08:30 = 510 minutes: inside "having breakfast" (480..540).
        assert_eq!(scratch.schedule_index(0), 2);
        assert_eq!(scratch.schedule_index(60), 3);
        // Far past the end of the day walks off the list.
        assert_eq!(scratch.schedule_index(2000), 4);
    }

    #[test]
    fn action_lifecycle_rounds_to_the_minute() {
        let mut scratch = scratch_with_schedule();
        scratch.curr_time = Some(at(8, 30, 40));
        scratch.add_new_action(NewAction {
            address: "the ville:cafe:counter:register".into(),
            duration: 10,
            description: "ringing up customers".into(),
            pronunciatio: "🙂".into(),
            event: (
                "Isabella Rodriguez".into(),
                Some("is".into()),
                Some("ringing up customers".into()),
            ),
            ..NewAction::default()
        });

        assert!(!scratch.act_path_set);
        assert_eq!(scratch.act_start_time, Some(at(8, 30, 40)));

        // Start rounds up to 08:31, so the action ends at 08:41.
        scratch.curr_time = Some(at(8, 40, 0));
        assert!(!scratch.act_check_finished());
        scratch.curr_time = Some(at(8, 41, 0));
        assert!(scratch.act_check_finished());
    }

    #[test]
    fn chat_actions_end_at_chatting_end_time() {
        let mut scratch = scratch_with_schedule();
        scratch.add_new_action(NewAction {
            address: "<persona> Klaus Mueller".into(),
            duration: 5,
            description: "conversing about the party".into(),
            pronunciatio: "💬".into(),
            event: (
                "Isabella Rodriguez".into(),
                Some("chat with".into()),
                Some("Klaus Mueller".into()),
            ),
            chatting_with: Some("Klaus Mueller".into()),
            chatting_with_buffer: Some(BTreeMap::from([("Klaus Mueller".into(), 800)])),
            chatting_end_time: Some(at(8, 35, 0)),
            ..NewAction::default()
        });

        scratch.curr_time = Some(at(8, 35, 0));
        assert!(scratch.act_check_finished());
        assert_eq!(scratch.chatting_with_buffer["Klaus Mueller"], 800);
    }

    #[test]
    fn no_action_counts_as_finished() {
        let scratch = Scratch::bootstrap("Isabella Rodriguez");
        assert!(scratch.act_check_finished());
        assert_eq!(scratch.curr_event(), ("Isabella Rodriguez".into(), None, None));
    }

    #[test]
    fn roundtrip_through_json_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.json");

        let mut scratch = scratch_with_schedule();
        scratch.chatting_with_buffer.insert("Klaus Mueller".into(), 799);
        scratch.planned_path = vec![(3, 4), (3, 5)];
        scratch.save(&path).unwrap();

        let loaded = Scratch::load(&path).unwrap();
        assert_eq!(loaded.curr_time, Some(at(8, 30, 0)));
        assert_eq!(loaded.f_daily_schedule.len(), 4);
        assert_eq!(loaded.chatting_with_buffer["Klaus Mueller"], 799);
        assert_eq!(loaded.planned_path, vec![(3, 4), (3, 5)]);
        assert_eq!(loaded.schedule_minutes_sum(), 1440);
    }

    #[test]
    fn schedule_summary_prints_cumulative_clock() {
        let scratch = scratch_with_schedule();
        let summary = scratch.daily_schedule_summary();
        assert!(summary.starts_with("07:00 || sleeping"));
        assert!(summary.contains("09:00 || having breakfast"));
    }
}
