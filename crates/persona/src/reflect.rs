//! Reflection: turning accumulated experience into higher-level thoughts.
//!
//! Fires when the accumulated poignancy of newly perceived events drains
//! `importance_trigger_curr` to zero, and again right after a conversation
//! ends to record a planning note and a memo citing the chat.

use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use simulacra_llm::LanguageModel;
use simulacra_memory::Filling;

use crate::prompts;
use crate::retrieve::new_retrieve;
use crate::Persona;

/// The main reflection hook, run every tick after planning.
pub async fn reflect(persona: &mut Persona, llm: &dyn LanguageModel) -> Result<()> {
    if reflection_trigger(persona) {
        run_reflect(persona, llm).await?;
        reset_reflection_counter(persona);
    }

    // The tick right before a conversation wraps up, distill it into a
    // planning thought and a memo citing the chat transcript node.
    let (Some(end_time), Some(curr_time)) =
        (persona.scratch.chatting_end_time, persona.scratch.curr_time)
    else {
        return Ok(());
    };
    if curr_time + Duration::seconds(10) != end_time {
        return Ok(());
    }
    let Some(partner) = persona.scratch.chatting_with.clone() else {
        return Ok(());
    };
    let Some(chat_node_id) = persona
        .a_mem
        .last_chat(&partner)
        .map(|node| node.node_id.clone())
    else {
        return Ok(());
    };

    let all_utt: String = persona
        .scratch
        .chat
        .iter()
        .flatten()
        .map(|(speaker, utterance)| format!("{speaker}: {utterance}\n"))
        .collect();
    let evidence = vec![chat_node_id];
    let name = persona.scratch.name.clone();

    let planning = prompts::planning_thought_on_convo(llm, &name, &all_utt).await;
    let planning = format!("For {name}'s planning: {planning}");
    add_thought(persona, &planning, evidence.clone(), curr_time, llm).await;

    let memo = prompts::memo_on_convo(llm, &name, &all_utt).await;
    let memo = format!("{name} {memo}");
    add_thought(persona, &memo, evidence, curr_time, llm).await;

    Ok(())
}

fn reflection_trigger(persona: &Persona) -> bool {
    persona.scratch.importance_trigger_curr <= 0
        && !persona.a_mem.event_and_thought_nodes().is_empty()
}

fn reset_reflection_counter(persona: &mut Persona) {
    persona.scratch.importance_trigger_curr = persona.scratch.importance_trigger_max;
    persona.scratch.importance_ele_n = 0;
}

/// Summarize the most recently accessed memories into focal questions.
async fn generate_focal_points(
    persona: &mut Persona,
    n: usize,
    llm: &dyn LanguageModel,
) -> Vec<String> {
    let mut nodes: Vec<_> = persona
        .a_mem
        .event_and_thought_nodes()
        .into_iter()
        .filter(|node| !node.embedding_key.contains("idle"))
        .cloned()
        .collect();
    nodes.sort_by_key(|node| node.last_accessed);

    let recent = nodes
        .len()
        .saturating_sub(persona.scratch.importance_ele_n);
    let statements: String = nodes[recent..]
        .iter()
        .map(|node| format!("{}\n", node.embedding_key))
        .collect();
    prompts::focal_points(llm, &persona.scratch, &statements, n).await
}

async fn run_reflect(persona: &mut Persona, llm: &dyn LanguageModel) -> Result<()> {
    let focal_points = generate_focal_points(persona, 3, llm).await;
    debug!(persona = %persona.name, ?focal_points, "reflection fired");

    let retrieved = new_retrieve(persona, &focal_points, 30, llm).await;
    let thought_count = persona.scratch.thought_count;
    for (_, nodes) in retrieved {
        let statements: String = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| format!("{index}. {}\n", node.embedding_key))
            .collect();
        let insights = prompts::insights_and_evidence(llm, &statements, thought_count).await;
        let curr_time = persona.scratch.curr_time.unwrap_or_default();
        for (thought, indices) in insights {
            let evidence: Vec<String> = indices
                .iter()
                .filter_map(|&index| nodes.get(index))
                .map(|node| node.node_id.clone())
                .collect();
            add_thought(persona, &thought, evidence, curr_time, llm).await;
        }
    }
    Ok(())
}

/// Record a thought node: triple, keywords, poignancy, embedding, 30-day
/// expiration, evidence filling.
async fn add_thought(
    persona: &mut Persona,
    text: &str,
    evidence: Vec<String>,
    created: NaiveDateTime,
    llm: &dyn LanguageModel,
) {
    let name = persona.scratch.name.clone();
    let (subject, predicate, object) = prompts::action_event_triple(llm, &name, text).await;
    let keywords = [
        Some(subject.clone()),
        predicate.clone(),
        object.clone(),
    ]
    .into_iter()
    .flatten()
    .collect();
    let poignancy = prompts::poignancy(llm, &persona.scratch, text).await;
    let embedding = prompts::embedding_or_default(llm, &persona.a_mem, text).await;
    persona.a_mem.add_thought(
        created,
        Some(created + Duration::days(30)),
        (subject, predicate, object),
        text.to_string(),
        keywords,
        poignancy,
        (text.to_string(), embedding),
        Filling::Nodes(evidence),
    );
}

/// Whisper-inject operator-supplied memories as thought nodes (the
/// `call -- load history <csv>` path).
pub async fn load_history_whispers(
    persona: &mut Persona,
    whispers: &[String],
    at: NaiveDateTime,
    llm: &dyn LanguageModel,
) -> Result<()> {
    for whisper in whispers {
        let text = format!("{} {}", persona.scratch.name, whisper);
        add_thought(persona, &text, Vec::new(), at, llm).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perceive::perceive;
    use crate::test_support::{persona_at, small_maze, StubModel};
    use simulacra_memory::NodeKind;
    use simulacra_world::TileEvent;

    #[tokio::test]
    async fn reflection_fires_once_when_the_trigger_drains() {
        let mut maze = small_maze();
        for (i, tile) in [(0usize, 0usize), (1, 0), (2, 0), (3, 1)].iter().enumerate() {
            maze.add_event_from_tile(
                TileEvent::new(
                    format!("guest {i}"),
                    Some("is".into()),
                    Some("chatting".into()),
                    Some(format!("chatting about topic {i}")),
                ),
                *tile,
            );
        }

        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        persona.scratch.att_bandwidth = 10;
        persona.scratch.importance_trigger_curr = 10;
        let llm = StubModel::reflective();

        // Four non-idle events at poignancy 3 drain the trigger of 10.
        perceive(&mut persona, &maze, &llm).await.unwrap();
        assert!(persona.scratch.importance_trigger_curr <= 0);

        reflect(&mut persona, &llm).await.unwrap();

        let thoughts = persona.a_mem.nodes_of(NodeKind::Thought);
        assert!(
            thoughts.len() >= 15,
            "3 focal points x 5 insights, got {}",
            thoughts.len()
        );
        assert_eq!(
            persona.scratch.importance_trigger_curr,
            persona.scratch.importance_trigger_max
        );
        assert_eq!(persona.scratch.importance_ele_n, 0);

        // Second pass: trigger is reset, nothing new fires.
        let before = persona.a_mem.len();
        reflect(&mut persona, &llm).await.unwrap();
        assert_eq!(persona.a_mem.len(), before);
    }

    #[tokio::test]
    async fn thoughts_expire_thirty_days_out() {
        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        let at = persona.scratch.curr_time.unwrap();
        let llm = StubModel::default();

        load_history_whispers(
            &mut persona,
            &["is planning a Valentine's Day party".to_string()],
            at,
            &llm,
        )
        .await
        .unwrap();

        let thought = &persona.a_mem.nodes_of(NodeKind::Thought)[0];
        assert_eq!(thought.expiration, Some(at + Duration::days(30)));
        assert!(thought.description.contains("Valentine"));
    }

    #[tokio::test]
    async fn conversation_end_produces_planning_and_memo_thoughts() {
        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        let curr_time = persona.scratch.curr_time.unwrap();
        let llm = StubModel::default();

        // A chat that ends ten seconds from now.
        persona.scratch.chatting_with = Some("Klaus Mueller".to_string());
        persona.scratch.chat = Some(vec![
            ("Isabella Rodriguez".into(), "Hi Klaus!".into()),
            ("Klaus Mueller".into(), "Hi Isabella!".into()),
        ]);
        persona.scratch.chatting_end_time = Some(curr_time + Duration::seconds(10));
        persona.a_mem.add_chat(
            curr_time,
            None,
            (
                "Isabella Rodriguez".into(),
                Some("chat with".into()),
                Some("Klaus Mueller".into()),
            ),
            "conversing about the party".into(),
            ["klaus mueller".to_string()].into_iter().collect(),
            4,
            ("conversing about the party".into(), vec![0.1]),
            vec![],
        );

        reflect(&mut persona, &llm).await.unwrap();

        let thoughts = persona.a_mem.nodes_of(NodeKind::Thought);
        assert_eq!(thoughts.len(), 2);
        assert!(thoughts.iter().any(|t| t.description.contains("planning")));
        // Both cite the chat node.
        for thought in thoughts {
            assert_eq!(thought.filling.evidence(), &["node_1".to_string()]);
        }
    }
}
