//! Typed wrappers around the language model.
//!
//! Every wrapper owns the minimal prompt text for its question, parses the
//! reply into the shape the pipeline needs, and documents the default it
//! substitutes when the call fails or the reply does not parse.  The
//! simulation must keep ticking through any model outage, so none of these
//! return errors.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use simulacra_llm::{extract_first_int, extract_json_output, LanguageModel};
use simulacra_memory::{AssociativeMemory, Scratch, SpoTriple};

pub const DEFAULT_PRONUNCIATIO: &str = "🙂";
const DEFAULT_WAKE_UP_HOUR: i64 = 8;
const DEFAULT_POIGNANCY: i64 = 4;

/// Look up a cached embedding or ask the service; a failed call degrades
/// to an empty vector, which scores zero relevance everywhere.
pub async fn embedding_or_default(
    llm: &dyn LanguageModel,
    a_mem: &AssociativeMemory,
    key: &str,
) -> Vec<f32> {
    if let Some(cached) = a_mem.cached_embedding(key) {
        return cached.clone();
    }
    match llm.embed(key).await {
        Ok(vector) => vector,
        Err(err) => {
            warn!(%key, %err, "embedding unavailable, storing empty vector");
            Vec::new()
        }
    }
}

/// Integer wake-up hour in `[0, 23]`.  Default: 8.
pub async fn wake_up_hour(llm: &dyn LanguageModel, scratch: &Scratch) -> i64 {
    let prompt = format!(
        "{}\nLifestyle: {}\nAnswer with a single number: {}'s wake up hour (0-23):",
        scratch.identity_summary(),
        scratch.lifestyle,
        scratch.first_name,
    );
    match llm.complete(&prompt).await {
        Ok(reply) => extract_first_int(&reply, 0, 23).unwrap_or(DEFAULT_WAKE_UP_HOUR),
        Err(err) => {
            warn!(%err, "wake_up_hour fell back to default");
            DEFAULT_WAKE_UP_HOUR
        }
    }
}

/// 4-6 broad-stroke goals for the day.  Default: a generic routine.
pub async fn first_daily_plan(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    wake_up_hour: i64,
) -> Vec<String> {
    let prompt = format!(
        "{}\nToday is {}. Write {}'s broad-stroke plan for today, starting with waking up \
         at {}:00. Answer as a JSON array of 4-6 strings.",
        scratch.identity_summary(),
        scratch.curr_date_str(),
        scratch.first_name,
        wake_up_hour,
    );
    if let Ok(reply) = llm.complete(&prompt).await {
        if let Some(items) = extract_json_output::<Vec<String>>(&reply) {
            if !items.is_empty() {
                return items;
            }
        }
    }
    warn!(persona = %scratch.name, "first_daily_plan fell back to default routine");
    vec![
        format!("wake up and complete the morning routine at {wake_up_hour}:00 am"),
        "have breakfast".to_string(),
        "go about the day's work".to_string(),
        "have dinner".to_string(),
        "go to bed early".to_string(),
    ]
}

/// One hourly-schedule slot.  Default: `"resting"`.
pub async fn hourly_activity(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    prior: &[String],
    hour_str: &str,
) -> String {
    let prompt = format!(
        "{}\nDaily plan: {}\nSchedule so far: {}\nAnswer with a short phrase completing \
         \"{} is ...\": what is {} doing at {}?",
        scratch.identity_summary(),
        scratch.daily_req.join(", "),
        prior.join("; "),
        scratch.first_name,
        scratch.first_name,
        hour_str,
    );
    match llm.complete(&prompt).await {
        Ok(reply) => {
            let line = reply.lines().next().unwrap_or("").trim().trim_matches('"');
            if line.is_empty() {
                "resting".to_string()
            } else {
                line.to_string()
            }
        }
        Err(_) => "resting".to_string(),
    }
}

/// Decompose an hourly slot into sub-tasks summing to `duration` minutes.
/// Default: the original slot unchanged.
pub async fn task_decomp(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    task: &str,
    duration: i64,
) -> Vec<(String, i64)> {
    let prompt = format!(
        "{}\nDecompose the task \"{task}\" ({duration} minutes) into 5-minute-grained \
         subtasks. Answer as a JSON array of [\"{} is {task} (subtask)\", minutes] pairs \
         whose minutes sum to {duration}.",
        scratch.identity_summary(),
        scratch.first_name,
    );
    if let Ok(reply) = llm.complete(&prompt).await {
        if let Some(mut slots) = extract_json_output::<Vec<(String, i64)>>(&reply) {
            slots.retain(|(_, d)| *d > 0);
            if !slots.is_empty() {
                // Repair drift so the decomposition spans exactly the slot.
                let sum: i64 = slots.iter().map(|(_, d)| d).sum();
                if sum != duration {
                    if let Some(last) = slots.last_mut() {
                        last.1 += duration - sum;
                    }
                }
                if slots.iter().all(|(_, d)| *d > 0) {
                    return slots;
                }
            }
        }
    }
    warn!(%task, "task_decomp kept the original slot");
    vec![(task.to_string(), duration)]
}

fn pick_option(reply: &str, options: &[String]) -> Option<String> {
    let reply = reply.trim().trim_matches('"').to_lowercase();
    options
        .iter()
        .find(|option| reply.contains(&option.to_lowercase()))
        .cloned()
}

/// Choose the sector an action happens in.  Default: the sector of the
/// persona's living area when known, else the first known sector.
pub async fn action_sector(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    options: &[String],
    act_desp: &str,
) -> String {
    let fallback = || {
        let living_sector = scratch.living_area.split(':').nth(1).unwrap_or("");
        if options.iter().any(|o| o == living_sector) {
            living_sector.to_string()
        } else {
            options.first().cloned().unwrap_or_default()
        }
    };

    let prompt = format!(
        "{}\nFor the action \"{act_desp}\", choose one area. Area options: {}.",
        scratch.identity_summary(),
        options.join(", "),
    );
    match llm.complete(&prompt).await {
        Ok(reply) => pick_option(&reply, options).unwrap_or_else(fallback),
        Err(_) => fallback(),
    }
}

/// Choose the arena within a sector.  Default: the first known arena.
pub async fn action_arena(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    options: &[String],
    act_desp: &str,
    sector: &str,
) -> String {
    let prompt = format!(
        "{}\nFor the action \"{act_desp}\" in {sector}, choose one sub-area. \
         Sub-area options: {}.",
        scratch.identity_summary(),
        options.join(", "),
    );
    match llm.complete(&prompt).await {
        Ok(reply) => pick_option(&reply, options)
            .unwrap_or_else(|| options.first().cloned().unwrap_or_default()),
        Err(_) => options.first().cloned().unwrap_or_default(),
    }
}

/// Choose the game object used by the action.  Default: the first known
/// object (callers substitute `<random>` before asking when none exist).
pub async fn action_game_object(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    options: &[String],
    act_desp: &str,
) -> String {
    let prompt = format!(
        "{}\nFor the action \"{act_desp}\", choose one object. Object options: {}.",
        scratch.identity_summary(),
        options.join(", "),
    );
    match llm.complete(&prompt).await {
        Ok(reply) => pick_option(&reply, options)
            .unwrap_or_else(|| options.first().cloned().unwrap_or_default()),
        Err(_) => options.first().cloned().unwrap_or_default(),
    }
}

/// Emoji for an action description.  Default: 🙂.
pub async fn pronunciatio(llm: &dyn LanguageModel, act_desp: &str) -> String {
    let prompt = format!("Convert the action description to an emoji: \"{act_desp}\". Emoji:");
    match llm.complete(&prompt).await {
        Ok(reply) => {
            let emoji = reply.trim();
            if emoji.is_empty() {
                DEFAULT_PRONUNCIATIO.to_string()
            } else {
                emoji.chars().take(4).collect()
            }
        }
        Err(_) => DEFAULT_PRONUNCIATIO.to_string(),
    }
}

/// `(subject, predicate, object)` for a description.
/// Default: `(subject, "is", description)`.
pub async fn action_event_triple(
    llm: &dyn LanguageModel,
    subject: &str,
    act_desp: &str,
) -> SpoTriple {
    let prompt = format!(
        "Express \"{subject} is {act_desp}\" as an event (subject, predicate, object). \
         Answer as JSON: {{\"subject\": \"{subject}\", \"predicate\": ..., \"object\": ...}}",
    );
    if let Ok(reply) = llm.complete(&prompt).await {
        if let Some(value) = extract_json_output::<Value>(&reply) {
            let field = |k: &str| {
                value
                    .get(k)
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            if let (Some(s), Some(p), Some(o)) =
                (field("subject"), field("predicate"), field("object"))
            {
                return (s, Some(p), Some(o));
            }
        }
    }
    (
        subject.to_string(),
        Some("is".to_string()),
        Some(act_desp.to_string()),
    )
}

/// What the used object is doing while the action runs.
/// Default: `"{object} is idle"`.
pub async fn act_obj_description(
    llm: &dyn LanguageModel,
    game_object: &str,
    act_desp: &str,
) -> String {
    let prompt = format!(
        "Describe the state of the object \"{game_object}\" while someone is {act_desp}. \
         Answer with a short phrase completing \"{game_object} is ...\"."
    );
    match llm.complete(&prompt).await {
        Ok(reply) => {
            let line = reply.lines().next().unwrap_or("").trim().trim_matches('"');
            if line.is_empty() {
                format!("{game_object} is idle")
            } else {
                line.to_string()
            }
        }
        Err(_) => format!("{game_object} is idle"),
    }
}

/// Poignancy in `[1, 10]`.  Idle observations score 1 without asking;
/// the parse default is 4.
pub async fn poignancy(llm: &dyn LanguageModel, scratch: &Scratch, description: &str) -> i64 {
    if description.contains("is idle") {
        return 1;
    }
    let prompt = format!(
        "{}\nOn a scale of 1 to 10, rate the poignancy of this for {} (1 is mundane, \
         10 is life-changing): \"{description}\". Rating:",
        scratch.identity_summary(),
        scratch.name,
    );
    match llm.complete(&prompt).await {
        Ok(reply) => extract_first_int(&reply, 1, 10).unwrap_or(DEFAULT_POIGNANCY),
        Err(_) => DEFAULT_POIGNANCY,
    }
}

/// The `n` focal questions driving a reflection pass.
/// Default: one generic question.
pub async fn focal_points(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    statements: &str,
    n: usize,
) -> Vec<String> {
    let prompt = format!(
        "{statements}\nGiven only the statements above, what are the {n} most salient \
         high-level questions we can answer about the subjects? Answer as a JSON array \
         of {n} strings.",
    );
    if let Ok(reply) = llm.complete(&prompt).await {
        if let Some(questions) = extract_json_output::<Vec<String>>(&reply) {
            if !questions.is_empty() {
                return questions;
            }
        }
    }
    warn!(persona = %scratch.name, "focal_points fell back to a generic question");
    vec![format!("What is important in {}'s life right now?", scratch.name)]
}

/// Up to `n` insights, each citing statement indices as evidence.
/// Default: the blank placeholder citing statement 0.
pub async fn insights_and_evidence(
    llm: &dyn LanguageModel,
    statements: &str,
    n: usize,
) -> Vec<(String, Vec<usize>)> {
    let prompt = format!(
        "{statements}\nWhat {n} high-level insights can you infer from the statements \
         above? Answer as JSON: {{\"insight\": [list of statement numbers cited]}}.",
    );
    if let Ok(reply) = llm.complete(&prompt).await {
        if let Some(map) = extract_json_output::<BTreeMap<String, Vec<usize>>>(&reply) {
            if !map.is_empty() {
                return map.into_iter().collect();
            }
        }
    }
    warn!("insights_and_evidence fell back to the blank placeholder");
    vec![("this is blank".to_string(), vec![0])]
}

/// Yes/no gate for opening a conversation.  Default: no.
pub async fn decide_to_talk(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    target: &Scratch,
    context: &str,
) -> bool {
    let prompt = format!(
        "{context}\n{} is {}. {} is {}. Would {} initiate a conversation with {}? \
         Answer yes or no.",
        scratch.name,
        scratch.act_description.as_deref().unwrap_or("idle"),
        target.name,
        target.act_description.as_deref().unwrap_or("idle"),
        scratch.name,
        target.name,
    );
    match llm.complete(&prompt).await {
        Ok(reply) => reply.to_lowercase().contains("yes"),
        Err(_) => false,
    }
}

/// Reaction gate: `"1"` wait, `"2"` do other things, `"3"` keep going.
/// Default: `"3"`.
pub async fn decide_to_react(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    target: &Scratch,
    context: &str,
) -> String {
    let prompt = format!(
        "{context}\n{} is {}, and {} is {} at the same location. Should {} \
         wait until they finish (1), do other things (2), or keep going (3)? \
         Answer with one number.",
        scratch.name,
        scratch.act_description.as_deref().unwrap_or("idle"),
        target.name,
        target.act_description.as_deref().unwrap_or("idle"),
        scratch.name,
    );
    match llm.complete(&prompt).await {
        Ok(reply) => extract_first_int(&reply, 1, 3)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "3".to_string()),
        Err(_) => "3".to_string(),
    }
}

/// A full conversation transcript between two personas.
/// Default: a minimal two-line greeting.
pub async fn conversation(
    llm: &dyn LanguageModel,
    init: &Scratch,
    target: &Scratch,
    location: &str,
) -> Vec<(String, String)> {
    let prompt = format!(
        "{}\n---\n{}\n---\n{} and {} run into each other at {}. Here is their \
         conversation; answer as lines of \"Name: utterance\".",
        init.identity_summary(),
        target.identity_summary(),
        init.name,
        target.name,
        location,
    );
    if let Ok(reply) = llm.complete(&prompt).await {
        let lines: Vec<(String, String)> = reply
            .lines()
            .filter_map(|line| {
                let (speaker, utterance) = line.split_once(':')?;
                let speaker = speaker.trim().trim_matches('"');
                if speaker == init.name || speaker == target.name {
                    Some((speaker.to_string(), utterance.trim().to_string()))
                } else {
                    None
                }
            })
            .collect();
        if !lines.is_empty() {
            return lines;
        }
    }
    warn!(init = %init.name, target = %target.name, "conversation fell back to a greeting");
    vec![
        (init.name.clone(), format!("Hi {}!", target.first_name)),
        (target.name.clone(), format!("Hi {}!", init.first_name)),
    ]
}

/// One-line summary of a conversation.  Default: `"conversing with {other}"`.
pub async fn convo_summary(
    llm: &dyn LanguageModel,
    other: &str,
    convo: &[(String, String)],
) -> String {
    let transcript: String = convo
        .iter()
        .map(|(speaker, utt)| format!("{speaker}: {utt}\n"))
        .collect();
    let prompt = format!(
        "{transcript}\nSummarize the conversation above in one sentence of the form \
         \"conversing about ...\"."
    );
    match llm.complete(&prompt).await {
        Ok(reply) => {
            let line = reply.lines().next().unwrap_or("").trim().trim_matches('"');
            if line.is_empty() {
                format!("conversing with {other}")
            } else {
                line.to_string()
            }
        }
        Err(_) => format!("conversing with {other}"),
    }
}

/// Rewrite a schedule window to absorb an inserted activity.  `None` when
/// the reply does not parse or does not preserve the window's minutes —
/// callers then leave the schedule untouched.
#[allow(clippy::too_many_arguments)]
pub async fn new_decomp_schedule(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    main_slots: &[(String, i64)],
    truncated_slots: &[(String, i64)],
    start_hour: i64,
    end_hour: i64,
    inserted_act: &str,
    inserted_act_dur: i64,
) -> Option<Vec<(String, i64)>> {
    let window_minutes = (end_hour - start_hour) * 60;
    let render = |slots: &[(String, i64)]| {
        slots
            .iter()
            .map(|(task, d)| format!("[\"{task}\", {d}]"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let prompt = format!(
        "{}\nOriginal schedule from {start_hour}:00 to {end_hour}:00: [{}]\nSchedule so \
         far: [{}]\nRewrite the schedule for that window so it continues with \
         \"{inserted_act}\" for {inserted_act_dur} minutes. Answer as a JSON array of \
         [task, minutes] pairs whose minutes sum to {window_minutes}.",
        scratch.identity_summary(),
        render(main_slots),
        render(truncated_slots),
    );
    let reply = llm.complete(&prompt).await.ok()?;
    let slots = extract_json_output::<Vec<(String, i64)>>(&reply)?;
    let sum: i64 = slots.iter().map(|(_, d)| d).sum();
    if sum == window_minutes && !slots.is_empty() {
        Some(slots)
    } else {
        warn!(sum, window_minutes, "new_decomp_schedule reply did not span the window");
        None
    }
}

// ── Identity revision (new day) ───────────────────────────────────────────────

/// What the persona should remember as they plan the new day.
/// Default: empty (the note is simply omitted).
pub async fn plan_note(llm: &dyn LanguageModel, scratch: &Scratch, statements: &str) -> String {
    let prompt = format!(
        "{statements}\nGiven the statements above, is there anything that {} should \
         remember as they plan for *{}*? Write the response from {}'s perspective.",
        scratch.name,
        scratch.curr_date_str(),
        scratch.name,
    );
    llm.complete(&prompt).await.unwrap_or_default()
}

/// How the persona feels about their recent days.  Default: empty.
pub async fn thought_note(llm: &dyn LanguageModel, scratch: &Scratch, statements: &str) -> String {
    let prompt = format!(
        "{statements}\nGiven the statements above, how might we summarize {}'s feelings \
         about their days up to now? Write the response from {}'s perspective.",
        scratch.name,
        scratch.name,
    );
    llm.complete(&prompt).await.unwrap_or_default()
}

/// A refreshed `currently` line.  `None` keeps the previous one.
pub async fn new_currently(
    llm: &dyn LanguageModel,
    scratch: &Scratch,
    notes: &str,
) -> Option<String> {
    let prompt = format!(
        "{}'s status yesterday: {}\nThoughts at the end of yesterday: {notes}\nIt is now \
         {}. Write {}'s status for today in third person. Follow this format:\n\
         Status: <new status>",
        scratch.name,
        scratch.currently,
        scratch.curr_date_str(),
        scratch.name,
    );
    let reply = llm.complete(&prompt).await.ok()?;
    let status = reply
        .split_once("Status:")
        .map(|(_, rest)| rest)
        .unwrap_or(&reply)
        .trim()
        .to_string();
    (!status.is_empty()).then_some(status)
}

/// A refreshed broad-stroke daily plan requirement.  `None` keeps the
/// previous one.
pub async fn new_daily_plan_req(llm: &dyn LanguageModel, scratch: &Scratch) -> Option<String> {
    let prompt = format!(
        "{}\nToday is {}. Write {}'s daily plan in broad-strokes (4-6 numbered items \
         with times of day), on one line.",
        scratch.identity_summary(),
        scratch.curr_date_str(),
        scratch.name,
    );
    let reply = llm.complete(&prompt).await.ok()?;
    let plan = reply.replace('\n', " ").trim().to_string();
    (!plan.is_empty()).then_some(plan)
}

// ── Post-conversation thoughts ────────────────────────────────────────────────

/// What to remember for planning after the conversation.
/// Default: a neutral stay-the-course note.
pub async fn planning_thought_on_convo(llm: &dyn LanguageModel, name: &str, all_utt: &str) -> String {
    let prompt = format!(
        "[Conversation]\n{all_utt}\nWhat should {name} remember for planning after the \
         conversation above? Answer in one sentence.",
    );
    match llm.complete(&prompt).await {
        Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        _ => "stay the course on today's schedule".to_string(),
    }
}

/// The memorable takeaway from the conversation.
/// Default: a bare record that it happened.
pub async fn memo_on_convo(llm: &dyn LanguageModel, name: &str, all_utt: &str) -> String {
    let prompt = format!(
        "[Conversation]\n{all_utt}\nWhat was most memorable for {name} in the \
         conversation above? Answer in one sentence.",
    );
    match llm.complete(&prompt).await {
        Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        _ => "had a conversation".to_string(),
    }
}
