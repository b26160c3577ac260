//! Vision-limited perception of spaces and events.
//!
//! Spaces seen within `vision_r` grow the spatial tree.  Events are only
//! perceived inside the persona's current arena, nearest-first up to
//! `att_bandwidth`, and an event triple already inside the `retention`
//! window is skipped rather than re-memorized.

use anyhow::Result;
use tracing::debug;

use simulacra_llm::LanguageModel;
use simulacra_memory::{ConceptNode, Filling};
use simulacra_world::{AddressLevel, Maze};

use crate::prompts;
use crate::Persona;

fn leaf(address_or_name: &str) -> &str {
    address_or_name.rsplit(':').next().unwrap_or(address_or_name)
}

/// Perceive the world around the persona and memorize what is new.
/// Returns the freshly added event nodes.
pub async fn perceive(
    persona: &mut Persona,
    maze: &Maze,
    llm: &dyn LanguageModel,
) -> Result<Vec<ConceptNode>> {
    let Some(curr_tile) = persona.scratch.curr_tile else {
        return Ok(Vec::new());
    };
    let Some(curr_time) = persona.scratch.curr_time else {
        return Ok(Vec::new());
    };

    // Space: every tile in the vision square extends the spatial tree.
    let nearby_tiles = maze.get_nearby_tiles(curr_tile, persona.scratch.vision_r);
    for &tile in &nearby_tiles {
        let details = maze.access_tile(tile);
        persona.s_mem.observe(
            &details.world,
            &details.sector,
            &details.arena,
            &details.game_object,
        );
    }

    // Events: same-arena only, deduped by triple, nearest first.
    let curr_arena_path = maze.get_tile_path(curr_tile, AddressLevel::Arena);
    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::new();
    for &tile in &nearby_tiles {
        let details = maze.access_tile(tile);
        if details.events.is_empty() || maze.get_tile_path(tile, AddressLevel::Arena) != curr_arena_path
        {
            continue;
        }
        let dx = tile.0 as f64 - curr_tile.0 as f64;
        let dy = tile.1 as f64 - curr_tile.1 as f64;
        let dist = (dx * dx + dy * dy).sqrt();
        for event in &details.events {
            if seen.insert(event.clone()) {
                candidates.push((dist, event.clone()));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
    candidates.truncate(persona.scratch.att_bandwidth);

    let mut ret_events = Vec::new();
    for (_, event) in candidates {
        let subject = event.subject.clone();
        let (predicate, object, description) = match &event.predicate {
            Some(p) => (
                p.clone(),
                event.object.clone().unwrap_or_default(),
                event.description.clone().unwrap_or_default(),
            ),
            // A blank event reads as the subject being idle.
            None => ("is".to_string(), "idle".to_string(), "idle".to_string()),
        };
        let description = format!("{} is {}", leaf(&subject), description);
        let triple = (
            subject.clone(),
            Some(predicate.clone()),
            Some(object.clone()),
        );

        let latest = persona
            .a_mem
            .latest_event_triples(persona.scratch.retention);
        if latest.contains(&triple) {
            continue;
        }

        let keywords: std::collections::BTreeSet<String> =
            [leaf(&subject).to_string(), leaf(&object).to_string()]
                .into_iter()
                .collect();

        // Embed the parenthesized detail when the description carries one.
        let embedding_key = match description.split_once('(') {
            Some((_, detail)) => detail.trim_end_matches(')').trim().to_string(),
            None => description.clone(),
        };
        let embedding = prompts::embedding_or_default(llm, &persona.a_mem, &embedding_key).await;
        let event_poignancy = prompts::poignancy(llm, &persona.scratch, &embedding_key).await;

        // A perceived self-chat folds the transcript into memory as well.
        let mut filling = Filling::default();
        if subject == persona.name && predicate == "chat with" {
            let act_description = persona
                .scratch
                .act_description
                .clone()
                .unwrap_or_default();
            let chat_embedding =
                prompts::embedding_or_default(llm, &persona.a_mem, &act_description).await;
            let chat_poignancy =
                prompts::poignancy(llm, &persona.scratch, &act_description).await;
            let chat_node = persona.a_mem.add_chat(
                curr_time,
                None,
                persona.scratch.curr_event(),
                act_description.clone(),
                keywords.clone(),
                chat_poignancy,
                (act_description, chat_embedding),
                persona.scratch.chat.clone().unwrap_or_default(),
            );
            filling = Filling::Nodes(vec![chat_node.node_id]);
        }

        let node = persona.a_mem.add_event(
            curr_time,
            None,
            triple,
            description,
            keywords,
            event_poignancy,
            (embedding_key, embedding),
            filling,
        );
        persona.scratch.importance_trigger_curr -= event_poignancy;
        persona.scratch.importance_ele_n += 1;
        ret_events.push(node);
    }

    debug!(persona = %persona.name, perceived = ret_events.len(), "perception complete");
    Ok(ret_events)
}
