//! Long-term and short-term planning, plus reaction arbitration.
//!
//! On a new day the persona lays out an hourly schedule from broad-stroke
//! goals; during the day finished actions pull the next slot off the
//! schedule, decomposing coarse slots on the way (always keeping about two
//! hours of lookahead decomposed).  Perceived events can interrupt the
//! schedule with a chat or a wait, which rewrites the surrounding window
//! of the schedule to absorb the inserted activity.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::Result;
use chrono::{Duration, NaiveDateTime, Timelike};
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use simulacra_llm::LanguageModel;
use simulacra_memory::{Filling, NewAction, Scratch};
use simulacra_world::Maze;

use crate::prompts;
use crate::retrieve::{new_retrieve, RetrievedBundle};
use crate::Persona;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewDay {
    FirstDay,
    NewDay,
    No,
}

#[derive(Debug, Clone)]
enum Reaction {
    Chat(String),
    Wait(NaiveDateTime),
}

/// The planning entry point.  Returns the action address the execute
/// stage should walk toward.
pub async fn plan(
    persona: &mut Persona,
    maze: &Maze,
    others: &mut BTreeMap<String, Persona>,
    new_day: NewDay,
    retrieved: &BTreeMap<String, RetrievedBundle>,
    llm: &dyn LanguageModel,
) -> Result<String> {
    if new_day != NewDay::No {
        long_term_planning(persona, new_day, llm).await?;
    }

    if persona.scratch.act_check_finished() {
        determine_action(persona, maze, llm).await;
    }

    if let Some(focused) = choose_retrieved(persona, retrieved) {
        if let Some(reaction) = should_react(persona, &focused, others, llm).await {
            match reaction {
                Reaction::Chat(target) => chat_react(persona, maze, &target, others, llm).await,
                Reaction::Wait(until) => wait_react(persona, until, llm).await,
            }
        }
    }

    // Chat-state cleanup: anything but an ongoing "chat with" act clears
    // the chat fields, and every buffered partner except the current one
    // cools down by one tick.
    if persona.scratch.act_event.1.as_deref() != Some("chat with") {
        persona.scratch.chatting_with = None;
        persona.scratch.chat = None;
        persona.scratch.chatting_end_time = None;
    }
    let partner = persona.scratch.chatting_with.clone();
    for (name, count) in persona.scratch.chatting_with_buffer.iter_mut() {
        if Some(name.as_str()) != partner.as_deref() && *count > 0 {
            *count -= 1;
        }
    }

    Ok(persona.scratch.act_address.clone().unwrap_or_default())
}

// ── Long-term planning ────────────────────────────────────────────────────────

async fn long_term_planning(
    persona: &mut Persona,
    new_day: NewDay,
    llm: &dyn LanguageModel,
) -> Result<()> {
    let wake_up_hour = prompts::wake_up_hour(llm, &persona.scratch).await;
    debug!(persona = %persona.name, wake_up_hour, "long-term planning");

    match new_day {
        NewDay::FirstDay => {
            persona.scratch.daily_req =
                prompts::first_daily_plan(llm, &persona.scratch, wake_up_hour).await;
        }
        NewDay::NewDay => revise_identity(persona, llm).await,
        NewDay::No => {}
    }

    persona.scratch.f_daily_schedule =
        generate_hourly_schedule(persona, wake_up_hour, llm).await;
    persona.scratch.f_daily_schedule_hourly_org = persona.scratch.f_daily_schedule.clone();

    let Some(curr_time) = persona.scratch.curr_time else {
        return Ok(());
    };
    let date = persona.scratch.curr_date_str();
    let mut thought = format!("This is {}'s plan for {}:", persona.scratch.name, date);
    for item in &persona.scratch.daily_req {
        thought.push_str(&format!(" {item},"));
    }
    let thought = format!("{}.", thought.trim_end_matches(','));
    let embedding = prompts::embedding_or_default(llm, &persona.a_mem, &thought).await;
    persona.a_mem.add_thought(
        curr_time,
        Some(curr_time + Duration::days(30)),
        (
            persona.scratch.name.clone(),
            Some("plan".to_string()),
            Some(date),
        ),
        thought.clone(),
        BTreeSet::from(["plan".to_string()]),
        5,
        (thought, embedding),
        Filling::default(),
    );
    Ok(())
}

const HOUR_STR: [&str; 24] = [
    "00:00 AM", "01:00 AM", "02:00 AM", "03:00 AM", "04:00 AM", "05:00 AM", "06:00 AM",
    "07:00 AM", "08:00 AM", "09:00 AM", "10:00 AM", "11:00 AM", "12:00 PM", "01:00 PM",
    "02:00 PM", "03:00 PM", "04:00 PM", "05:00 PM", "06:00 PM", "07:00 PM", "08:00 PM",
    "09:00 PM", "10:00 PM", "11:00 PM",
];

/// One activity per hour, re-attempted up to three times when the model
/// produces fewer than five distinct activities, then compressed into
/// `(task, minutes)` runs.
async fn generate_hourly_schedule(
    persona: &mut Persona,
    wake_up_hour: i64,
    llm: &dyn LanguageModel,
) -> Vec<(String, i64)> {
    let mut activities: Vec<String> = Vec::new();
    let mut remaining_sleep = wake_up_hour;
    for _ in 0..3 {
        let distinct: HashSet<&String> = activities.iter().collect();
        if distinct.len() >= 5 {
            break;
        }
        activities.clear();
        for hour_str in HOUR_STR {
            if remaining_sleep > 0 {
                activities.push("sleeping".to_string());
                remaining_sleep -= 1;
            } else {
                activities
                    .push(prompts::hourly_activity(llm, &persona.scratch, &activities, hour_str).await);
            }
        }
    }

    let mut compressed: Vec<(String, i64)> = Vec::new();
    for activity in activities {
        match compressed.last_mut() {
            Some((prev, hours)) if *prev == activity => *hours += 1,
            _ => compressed.push((activity, 1)),
        }
    }
    compressed
        .into_iter()
        .map(|(task, hours)| (task, hours * 60))
        .collect()
}

/// New-day identity revision: digest recent memories into a fresh
/// `currently` summary and a fresh broad-stroke daily plan requirement.
async fn revise_identity(persona: &mut Persona, llm: &dyn LanguageModel) {
    let name = persona.scratch.name.clone();
    let focal_points = vec![
        format!("{}'s plan for {}.", name, persona.scratch.curr_date_str()),
        format!("Important recent events for {}'s life.", name),
    ];
    let retrieved = new_retrieve(persona, &focal_points, 30, llm).await;

    let mut statements = String::from("[Statements]\n");
    for (_, nodes) in &retrieved {
        for node in nodes {
            statements.push_str(&format!(
                "{}: {}\n",
                node.created.format("%A %B %d -- %H:%M %p"),
                node.embedding_key
            ));
        }
    }

    let plan_note = prompts::plan_note(llm, &persona.scratch, &statements).await;
    let thought_note = prompts::thought_note(llm, &persona.scratch, &statements).await;
    let notes = format!("{plan_note}{thought_note}").replace('\n', "");

    if let Some(currently) = prompts::new_currently(llm, &persona.scratch, &notes).await {
        persona.scratch.currently = currently;
    }
    if let Some(req) = prompts::new_daily_plan_req(llm, &persona.scratch).await {
        persona.scratch.daily_plan_req = req;
    }
}

// ── Short-term action determination ───────────────────────────────────────────

/// Sleep never decomposes; any other hour-or-longer slot does.
pub(crate) fn determine_decomp(act_desp: &str, act_dura: i64) -> bool {
    if !act_desp.contains("sleep") && !act_desp.contains("bed") {
        return true;
    }
    if act_desp.contains("sleeping") || act_desp.contains("asleep") || act_desp.contains("in bed") {
        return false;
    }
    if (act_desp.contains("sleep") || act_desp.contains("bed")) && act_dura > 60 {
        return false;
    }
    true
}

async fn decompose_slot(persona: &mut Persona, index: usize, llm: &dyn LanguageModel) {
    let Some((act_desp, act_dura)) = persona.scratch.f_daily_schedule.get(index).cloned() else {
        return;
    };
    if act_dura >= 60 && determine_decomp(&act_desp, act_dura) {
        let decomposed = prompts::task_decomp(llm, &persona.scratch, &act_desp, act_dura).await;
        persona
            .scratch
            .f_daily_schedule
            .splice(index..index + 1, decomposed);
    }
}

async fn determine_action(persona: &mut Persona, maze: &Maze, llm: &dyn LanguageModel) {
    let curr_index = persona.scratch.schedule_index(0);
    let curr_index_60 = persona.scratch.schedule_index(60);

    // First hour of the day: decompose the current slot plus two hours of
    // lookahead in one go.
    if curr_index == 0 {
        decompose_slot(persona, curr_index, llm).await;
        if curr_index_60 + 1 < persona.scratch.f_daily_schedule.len() {
            decompose_slot(persona, curr_index_60 + 1, llm).await;
        }
    }
    if curr_index_60 < persona.scratch.f_daily_schedule.len()
        && persona.scratch.curr_time.is_some_and(|t| t.hour() < 23)
    {
        decompose_slot(persona, curr_index_60, llm).await;
    }

    // The day's schedule must always span the full 1440 minutes.
    let total = persona.scratch.schedule_minutes_sum();
    if total < 1440 {
        persona
            .scratch
            .f_daily_schedule
            .push(("sleeping".to_string(), 1440 - total));
    }

    let (act_desp, act_dura) = persona
        .scratch
        .f_daily_schedule
        .get(curr_index)
        .or_else(|| persona.scratch.f_daily_schedule.last())
        .cloned()
        .unwrap_or_else(|| ("sleeping".to_string(), 60));

    let curr_tile = persona.scratch.curr_tile.unwrap_or((0, 0));
    let act_world = maze.access_tile(curr_tile).world.clone();

    let sectors = persona.s_mem.accessible_sectors(&act_world);
    let act_sector = prompts::action_sector(llm, &persona.scratch, &sectors, &act_desp).await;
    let arenas = persona.s_mem.accessible_arenas(&act_world, &act_sector);
    let act_arena =
        prompts::action_arena(llm, &persona.scratch, &arenas, &act_desp, &act_sector).await;
    let arena_address = format!("{act_world}:{act_sector}:{act_arena}");

    let objects = persona.s_mem.accessible_game_objects(&arena_address);
    let act_game_object = if objects.is_empty() {
        "<random>".to_string()
    } else {
        prompts::action_game_object(llm, &persona.scratch, &objects, &act_desp).await
    };
    let new_address = format!("{arena_address}:{act_game_object}");

    let act_pron = prompts::pronunciatio(llm, &act_desp).await;
    let name = persona.scratch.name.clone();
    let act_event = prompts::action_event_triple(llm, &name, &act_desp).await;
    let act_obj_desp = prompts::act_obj_description(llm, &act_game_object, &act_desp).await;
    let act_obj_pron = prompts::pronunciatio(llm, &act_obj_desp).await;
    let act_obj_event =
        prompts::action_event_triple(llm, &act_game_object, &act_obj_desp).await;

    debug!(persona = %name, address = %new_address, desc = %act_desp, "new action");
    persona.scratch.add_new_action(NewAction {
        address: new_address,
        duration: act_dura,
        description: act_desp,
        pronunciatio: act_pron,
        event: act_event,
        obj_description: Some(act_obj_desp),
        obj_pronunciatio: Some(act_obj_pron),
        obj_event: act_obj_event,
        ..NewAction::default()
    });
}

// ── Reaction arbitration ──────────────────────────────────────────────────────

/// Pick the one perceived event worth reacting to: persona events first,
/// then anything non-idle, else nothing.  Self events never qualify.
fn choose_retrieved(
    persona: &mut Persona,
    retrieved: &BTreeMap<String, RetrievedBundle>,
) -> Option<RetrievedBundle> {
    let pool: Vec<(&String, &RetrievedBundle)> = retrieved
        .iter()
        .filter(|(_, bundle)| bundle.curr_event.subject != persona.name)
        .collect();

    let persona_events: Vec<&RetrievedBundle> = pool
        .iter()
        .filter(|(_, bundle)| !bundle.curr_event.subject.contains(':'))
        .map(|(_, bundle)| *bundle)
        .collect();
    if let Some(bundle) = persona_events.choose(&mut persona.rng) {
        return Some((*bundle).clone());
    }

    let non_idle: Vec<&RetrievedBundle> = pool
        .iter()
        .filter(|(desc, _)| !desc.contains("is idle"))
        .map(|(_, bundle)| *bundle)
        .collect();
    non_idle.choose(&mut persona.rng).map(|b| (*b).clone())
}

fn react_context(focused: &RetrievedBundle) -> String {
    let mut context = String::new();
    for node in &focused.events {
        context.push_str(&format!("{}. ", node.description));
    }
    for node in &focused.thoughts {
        context.push_str(&format!("{}. ", node.description));
    }
    context
}

async fn should_react(
    persona: &Persona,
    focused: &RetrievedBundle,
    others: &BTreeMap<String, Persona>,
    llm: &dyn LanguageModel,
) -> Option<Reaction> {
    if persona.scratch.chatting_with.is_some() {
        return None;
    }
    if persona
        .scratch
        .act_address
        .as_deref()
        .is_some_and(|a| a.contains("<waiting>"))
    {
        return None;
    }

    let subject = &focused.curr_event.subject;
    if subject.contains(':') {
        // Object events never trigger reactions.
        return None;
    }
    let target = others.get(subject)?;

    let both_acting = persona.scratch.act_address.is_some()
        && persona.scratch.act_description.is_some()
        && target.scratch.act_address.is_some()
        && target.scratch.act_description.is_some();
    if !both_acting {
        return None;
    }

    let init_desc = persona.scratch.act_description.as_deref().unwrap_or("");
    let target_desc = target.scratch.act_description.as_deref().unwrap_or("");
    if init_desc.contains("sleeping") || target_desc.contains("sleeping") {
        return None;
    }
    if persona.scratch.curr_time.is_some_and(|t| t.hour() == 23) {
        return None;
    }

    let context = react_context(focused);

    // Chat gate.
    let target_waiting = target
        .scratch
        .act_address
        .as_deref()
        .is_some_and(|a| a.contains("<waiting>"));
    let in_cooldown = persona
        .scratch
        .chatting_with_buffer
        .get(subject)
        .is_some_and(|count| *count > 0);
    if !target_waiting
        && target.scratch.chatting_with.is_none()
        && !in_cooldown
        && prompts::decide_to_talk(llm, &persona.scratch, &target.scratch, &context).await
    {
        return Some(Reaction::Chat(subject.clone()));
    }

    // Wait gate: only when both are headed for the same place and this
    // persona is still on the move.
    if target_desc.contains("waiting") || persona.scratch.planned_path.is_empty() {
        return None;
    }
    if persona.scratch.act_address != target.scratch.act_address {
        return None;
    }
    let react_mode = prompts::decide_to_react(llm, &persona.scratch, &target.scratch, &context).await;
    if react_mode == "1" {
        let start = target.scratch.act_start_time?;
        let duration = target.scratch.act_duration?;
        return Some(Reaction::Wait(start + Duration::minutes(duration - 1)));
    }
    None
}

// ── Reaction effects ──────────────────────────────────────────────────────────

async fn chat_react(
    persona: &mut Persona,
    maze: &Maze,
    target_name: &str,
    others: &mut BTreeMap<String, Persona>,
    llm: &dyn LanguageModel,
) {
    let curr_tile = persona.scratch.curr_tile.unwrap_or((0, 0));
    let tile = maze.access_tile(curr_tile);
    let location = format!("{} in {}", tile.arena, tile.sector);

    let Some(target) = others.get(target_name) else {
        return;
    };
    let convo = prompts::conversation(llm, &persona.scratch, &target.scratch, &location).await;
    let all_utt: String = convo
        .iter()
        .map(|(speaker, utt)| format!("{speaker}: {utt}\n"))
        .collect();
    let duration_min = ((all_utt.len() as i64 / 8) + 29) / 30;
    let summary = prompts::convo_summary(llm, target_name, &convo).await;

    // The clock of the persona who has not moved yet this tick may lag by
    // one step; the end time follows the target's view like the traces do.
    let base_time = target
        .scratch
        .curr_time
        .or(persona.scratch.curr_time)
        .unwrap_or_default();
    let rounded = if base_time.second() != 0 {
        base_time.with_second(0).unwrap_or(base_time) + Duration::minutes(1)
    } else {
        base_time
    };
    let chatting_end_time = rounded + Duration::minutes(duration_min);

    debug!(
        init = %persona.name,
        target = %target_name,
        duration_min,
        end = %chatting_end_time,
        "chat reaction"
    );

    let init_name = persona.name.clone();
    let commit = |me: &str, other: &str| NewAction {
        address: format!("<persona> {other}"),
        duration: duration_min,
        description: summary.clone(),
        pronunciatio: "💬".to_string(),
        event: (
            me.to_string(),
            Some("chat with".to_string()),
            Some(other.to_string()),
        ),
        chatting_with: Some(other.to_string()),
        chat: Some(convo.clone()),
        chatting_with_buffer: Some(BTreeMap::from([(other.to_string(), 800)])),
        chatting_end_time: Some(chatting_end_time),
        obj_event: (String::new(), None, None),
        ..NewAction::default()
    };

    let init_commit = commit(&init_name, target_name);
    create_react(&mut persona.scratch, llm, &summary, duration_min, init_commit).await;

    if let Some(target) = others.get_mut(target_name) {
        let target_commit = commit(target_name, &init_name);
        create_react(&mut target.scratch, llm, &summary, duration_min, target_commit).await;
    }
}

async fn wait_react(persona: &mut Persona, wait_until: NaiveDateTime, llm: &dyn LanguageModel) {
    let name = persona.name.clone();
    let scratch = &mut persona.scratch;
    let Some(curr_time) = scratch.curr_time else {
        return;
    };

    let act_description = scratch.act_description.clone().unwrap_or_default();
    let sub_activity =
        strip_last_char(act_description.rsplit('(').next().unwrap_or("")).to_string();
    let inserted_act = format!("waiting to start {sub_activity}");
    let duration = (wait_until.minute() as i64 + wait_until.hour() as i64 * 60)
        - (curr_time.minute() as i64 + curr_time.hour() as i64 * 60)
        + 1;
    let (x, y) = scratch.curr_tile.unwrap_or((0, 0));

    debug!(persona = %name, until = %wait_until, "wait reaction");
    let commit = NewAction {
        address: format!("<waiting> {x} {y}"),
        duration,
        description: inserted_act.clone(),
        pronunciatio: "⌛".to_string(),
        event: (
            name,
            Some("waiting to start".to_string()),
            Some(sub_activity),
        ),
        obj_event: (String::new(), None, None),
        ..NewAction::default()
    };
    create_react(scratch, llm, &inserted_act, duration, commit).await;
}

/// Insert a reaction into the schedule by rewriting the enclosing window
/// (two or more hours of the hourly-org schedule), then commit the new
/// action.  A failed rewrite leaves the schedule untouched; the window
/// still sums to its original minutes either way.
async fn create_react(
    scratch: &mut Scratch,
    llm: &dyn LanguageModel,
    inserted_act: &str,
    inserted_act_dur: i64,
    commit: NewAction,
) {
    let org_index = scratch.hourly_org_index(0);
    let org = &scratch.f_daily_schedule_hourly_org;
    if org_index < org.len() {
        let min_sum: i64 = org[..org_index].iter().map(|(_, d)| d).sum();
        let start_hour = min_sum / 60;
        let end_hour = if org[org_index].1 >= 120 {
            start_hour + org[org_index].1 / 60
        } else if org_index + 1 < org.len() && org[org_index].1 + org[org_index + 1].1 > 0 {
            start_hour + (org[org_index].1 + org[org_index + 1].1) / 60
        } else {
            start_hour + 2
        };

        let mut dur_sum = 0;
        let mut start_index = None;
        let mut end_index = None;
        for (count, (_, duration)) in scratch.f_daily_schedule.iter().enumerate() {
            if dur_sum >= start_hour * 60 && start_index.is_none() {
                start_index = Some(count);
            }
            if dur_sum >= end_hour * 60 && end_index.is_none() {
                end_index = Some(count);
            }
            dur_sum += duration;
        }

        match generate_new_decomp_schedule(
            scratch,
            llm,
            inserted_act,
            inserted_act_dur,
            start_hour,
            end_hour,
        )
        .await
        {
            Some(new_slots) => {
                let start = start_index.unwrap_or(0);
                let end = end_index.unwrap_or(scratch.f_daily_schedule.len());
                scratch.f_daily_schedule.splice(start..end, new_slots);
            }
            None => warn!(
                persona = %scratch.name,
                "schedule window rewrite failed, keeping the original slots"
            ),
        }
    }

    scratch.add_new_action(commit);
}

async fn generate_new_decomp_schedule(
    scratch: &Scratch,
    llm: &dyn LanguageModel,
    inserted_act: &str,
    inserted_act_dur: i64,
    start_hour: i64,
    end_hour: i64,
) -> Option<Vec<(String, i64)>> {
    let curr_time = scratch.curr_time?;
    let today_min_pass = curr_time.hour() as i64 * 60 + curr_time.minute() as i64 + 1;

    let mut main_slots: Vec<(String, i64)> = Vec::new();
    let mut truncated: Vec<(String, i64)> = Vec::new();
    let mut dur_sum = 0;
    let mut truncated_fin = false;
    for (act, duration) in &scratch.f_daily_schedule {
        if dur_sum >= start_hour * 60 && dur_sum < end_hour * 60 {
            main_slots.push((act.clone(), *duration));
            if dur_sum <= today_min_pass {
                truncated.push((act.clone(), *duration));
            } else if !truncated_fin {
                // The in-progress slot survives only as a zero-minute
                // "(on the way to …)" marker ahead of the insert.
                let overflow = dur_sum - today_min_pass;
                truncated.push((act.clone(), overflow));
                if let Some(last) = truncated.last_mut() {
                    last.1 -= overflow;
                }
                truncated_fin = true;
            }
        }
        dur_sum += duration;
    }
    let last_desc = truncated.last()?.0.clone();

    let prefix = last_desc.split('(').next().unwrap_or("").trim().to_string();
    let tail = strip_last_char(last_desc.rsplit('(').next().unwrap_or("")).to_string();
    let rewritten = format!("{prefix} (on the way to {tail})");
    if let Some(last) = truncated.last_mut() {
        last.0 = rewritten.clone();
    }

    let inserted = if rewritten.contains('(') {
        format!(
            "{} ({inserted_act})",
            rewritten.split('(').next().unwrap_or("").trim()
        )
    } else {
        inserted_act.to_string()
    };
    truncated.push((inserted.clone(), inserted_act_dur));

    prompts::new_decomp_schedule(
        llm,
        scratch,
        &main_slots,
        &truncated,
        start_hour,
        end_hour,
        &inserted,
        inserted_act_dur,
    )
    .await
}

fn strip_last_char(s: &str) -> &str {
    match s.char_indices().last() {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{persona_at, remember_event, small_maze, StubModel};

    #[test]
    fn sleep_is_never_decomposed() {
        assert!(!determine_decomp("sleeping", 360));
        assert!(!determine_decomp("asleep in her bed", 60));
        assert!(!determine_decomp("getting ready for bed", 90));
        assert!(determine_decomp("working on her painting", 180));
        assert!(determine_decomp("getting out of bed", 30));
    }

    fn awake_at_nine(name: &str, tile: (usize, usize)) -> Persona {
        let mut persona = persona_at(name, tile);
        let t = persona.scratch.curr_time.unwrap();
        persona.scratch.curr_time = Some(t.date().and_hms_opt(9, 0, 0).unwrap());
        persona.scratch.f_daily_schedule = vec![("working at the cafe".into(), 1440)];
        persona.scratch.f_daily_schedule_hourly_org = persona.scratch.f_daily_schedule.clone();
        persona.scratch.act_address = Some("the ville:cafe:counter:register".into());
        persona.scratch.act_description = Some("making coffee".into());
        persona.scratch.act_start_time = persona.scratch.curr_time;
        persona.scratch.act_duration = Some(480);
        persona.scratch.act_event = (
            name.to_string(),
            Some("is".into()),
            Some("making coffee".into()),
        );
        persona
    }

    #[tokio::test]
    async fn first_day_schedule_sums_to_1440_with_plan_thought() {
        let maze = small_maze();
        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        let mut others = BTreeMap::new();
        let llm = StubModel::first_day();

        let retrieved = BTreeMap::new();
        plan(&mut persona, &maze, &mut others, NewDay::FirstDay, &retrieved, &llm)
            .await
            .unwrap();

        assert_eq!(
            persona
                .scratch
                .f_daily_schedule_hourly_org
                .iter()
                .map(|(_, d)| d)
                .sum::<i64>(),
            1440
        );
        assert_eq!(persona.scratch.schedule_minutes_sum(), 1440);
        // Hours 0-6 are seeded as sleep from the wake-up hour of 7.
        assert_eq!(
            persona.scratch.f_daily_schedule_hourly_org[0],
            ("sleeping".to_string(), 420)
        );

        let plan_thoughts: Vec<_> = persona
            .a_mem
            .nodes_of(simulacra_memory::NodeKind::Thought)
            .into_iter()
            .filter(|n| n.keywords.contains("plan"))
            .collect();
        assert!(!plan_thoughts.is_empty());
        assert!(persona.scratch.act_address.is_some());
    }

    #[tokio::test]
    async fn painting_decomposes_sleeping_does_not() {
        let maze = small_maze();
        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        let t = persona.scratch.curr_time.unwrap();
        persona.scratch.curr_time = Some(t.date().and_hms_opt(0, 0, 0).unwrap());
        persona.scratch.f_daily_schedule = vec![
            ("working on her painting".into(), 180),
            ("sleeping".into(), 360),
            ("relaxing".into(), 900),
        ];
        persona.scratch.f_daily_schedule_hourly_org = persona.scratch.f_daily_schedule.clone();

        let mut others = BTreeMap::new();
        let llm = StubModel::first_day();
        let retrieved = BTreeMap::new();
        plan(&mut persona, &maze, &mut others, NewDay::No, &retrieved, &llm)
            .await
            .unwrap();

        let schedule = &persona.scratch.f_daily_schedule;
        let painting_slots: Vec<_> = schedule
            .iter()
            .filter(|(task, _)| task.contains("painting"))
            .collect();
        assert!(painting_slots.len() >= 2, "painting slot expands into subtasks");
        assert_eq!(
            painting_slots.iter().map(|(_, d)| d).sum::<i64>(),
            180,
            "decomposition preserves the slot's minutes"
        );
        assert!(schedule.iter().any(|(task, d)| task == "sleeping" && *d == 360));
        assert_eq!(persona.scratch.schedule_minutes_sum(), 1440);
    }

    #[tokio::test]
    async fn two_personas_commit_a_symmetric_chat() {
        let maze = small_maze();
        let mut isabella = awake_at_nine("Isabella Rodriguez", (1, 1));
        let klaus = awake_at_nine("Klaus Mueller", (2, 1));

        // Isabella perceived Klaus making coffee.
        let node = remember_event(
            &mut isabella,
            9,
            "Klaus Mueller",
            "making coffee",
            "Klaus Mueller is making coffee",
        );
        let retrieved = crate::retrieve::retrieve(&isabella, &[node]);

        let mut others = BTreeMap::from([("Klaus Mueller".to_string(), klaus)]);
        let llm = StubModel::chatty();
        plan(&mut isabella, &maze, &mut others, NewDay::No, &retrieved, &llm)
            .await
            .unwrap();

        let klaus = &others["Klaus Mueller"];
        assert_eq!(
            isabella.scratch.act_event,
            (
                "Isabella Rodriguez".to_string(),
                Some("chat with".to_string()),
                Some("Klaus Mueller".to_string())
            )
        );
        assert_eq!(
            klaus.scratch.act_event,
            (
                "Klaus Mueller".to_string(),
                Some("chat with".to_string()),
                Some("Isabella Rodriguez".to_string())
            )
        );
        assert_eq!(isabella.scratch.act_pronunciatio.as_deref(), Some("💬"));
        assert_eq!(klaus.scratch.act_pronunciatio.as_deref(), Some("💬"));
        assert_eq!(
            isabella.scratch.chatting_end_time,
            klaus.scratch.chatting_end_time
        );
        assert_eq!(isabella.scratch.chatting_with_buffer["Klaus Mueller"], 800);
        assert_eq!(klaus.scratch.chatting_with_buffer["Isabella Rodriguez"], 800);
    }

    #[tokio::test]
    async fn no_conversation_at_eleven_pm() {
        let maze = small_maze();
        let mut isabella = awake_at_nine("Isabella Rodriguez", (1, 1));
        let t = isabella.scratch.curr_time.unwrap();
        isabella.scratch.curr_time = Some(t.date().and_hms_opt(23, 0, 0).unwrap());
        let klaus = awake_at_nine("Klaus Mueller", (2, 1));

        let node = remember_event(
            &mut isabella,
            23,
            "Klaus Mueller",
            "making coffee",
            "Klaus Mueller is making coffee",
        );
        let retrieved = crate::retrieve::retrieve(&isabella, &[node]);

        let mut others = BTreeMap::from([("Klaus Mueller".to_string(), klaus)]);
        let llm = StubModel::chatty();
        plan(&mut isabella, &maze, &mut others, NewDay::No, &retrieved, &llm)
            .await
            .unwrap();

        assert_ne!(isabella.scratch.act_event.1.as_deref(), Some("chat with"));
    }

    #[tokio::test]
    async fn cooldown_buffer_blocks_and_decrements() {
        let maze = small_maze();
        let mut isabella = awake_at_nine("Isabella Rodriguez", (1, 1));
        isabella
            .scratch
            .chatting_with_buffer
            .insert("Klaus Mueller".to_string(), 2);
        let klaus = awake_at_nine("Klaus Mueller", (2, 1));

        let node = remember_event(
            &mut isabella,
            9,
            "Klaus Mueller",
            "making coffee",
            "Klaus Mueller is making coffee",
        );
        let retrieved = crate::retrieve::retrieve(&isabella, &[node]);

        let mut others = BTreeMap::from([("Klaus Mueller".to_string(), klaus)]);
        let llm = StubModel::chatty();
        plan(&mut isabella, &maze, &mut others, NewDay::No, &retrieved, &llm)
            .await
            .unwrap();

        assert_ne!(isabella.scratch.act_event.1.as_deref(), Some("chat with"));
        // The cleanup pass cooled the buffer by one.
        assert_eq!(isabella.scratch.chatting_with_buffer["Klaus Mueller"], 1);
    }

    #[tokio::test]
    async fn schedule_rewrite_inserts_the_chat_window() {
        let maze = small_maze();
        let mut isabella = awake_at_nine("Isabella Rodriguez", (1, 1));
        isabella.scratch.f_daily_schedule = vec![
            ("sleeping".into(), 420),
            ("working at the cafe (opening up)".into(), 120),
            ("working at the cafe (serving customers)".into(), 900),
        ];
        isabella.scratch.f_daily_schedule_hourly_org = vec![
            ("sleeping".into(), 420),
            ("working at the cafe".into(), 1020),
        ];
        let klaus = awake_at_nine("Klaus Mueller", (2, 1));

        let node = remember_event(
            &mut isabella,
            9,
            "Klaus Mueller",
            "making coffee",
            "Klaus Mueller is making coffee",
        );
        let retrieved = crate::retrieve::retrieve(&isabella, &[node]);

        let mut others = BTreeMap::from([("Klaus Mueller".to_string(), klaus)]);
        let llm = StubModel::chatty_with_rewrite();
        plan(&mut isabella, &maze, &mut others, NewDay::No, &retrieved, &llm)
            .await
            .unwrap();

        // The rewrite replaced the 7h-24h window (1020 minutes) and the
        // whole day still sums to 1440.
        assert_eq!(isabella.scratch.schedule_minutes_sum(), 1440);
        assert!(isabella
            .scratch
            .f_daily_schedule
            .iter()
            .any(|(task, _)| task.contains("conversing")));
    }
}
