//! Memory retrieval.
//!
//! Two flavors: [`retrieve`] pulls keyword-related events and thoughts for
//! each perceived event (reaction context), while [`new_retrieve`] scores
//! the whole non-idle stream against focal-point embeddings on blended
//! recency / relevance / importance (reflection and identity revision).

use std::collections::BTreeMap;

use tracing::debug;

use simulacra_llm::LanguageModel;
use simulacra_memory::ConceptNode;

use crate::prompts;
use crate::Persona;

/// Context bundle for one perceived event.
#[derive(Debug, Clone)]
pub struct RetrievedBundle {
    pub curr_event: ConceptNode,
    pub events: Vec<ConceptNode>,
    pub thoughts: Vec<ConceptNode>,
}

/// Authoritative shaping constants layered on top of the per-persona
/// weights: `[recency, relevance, importance]`.
const SHAPING_WEIGHTS: [f64; 3] = [0.5, 3.0, 2.0];

/// Keyword-indexed context for each perceived event, keyed by the event's
/// description.
pub fn retrieve(persona: &Persona, perceived: &[ConceptNode]) -> BTreeMap<String, RetrievedBundle> {
    let mut retrieved = BTreeMap::new();
    for event in perceived {
        let subject = event.subject.as_str();
        let predicate = event.predicate.as_deref().unwrap_or("");
        let object = event.object.as_deref().unwrap_or("");
        retrieved.insert(
            event.description.clone(),
            RetrievedBundle {
                curr_event: event.clone(),
                events: persona.a_mem.relevant_events(subject, predicate, object),
                thoughts: persona.a_mem.relevant_thoughts(subject, predicate, object),
            },
        );
    }
    retrieved
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Min-max normalize into `[target_min, target_max]`; all-equal inputs
/// collapse to the midpoint.
pub fn normalize(values: &mut [f64], target_min: f64, target_max: f64) {
    let Some(&min) = values.iter().min_by(|a, b| a.total_cmp(b)) else {
        return;
    };
    let max = *values
        .iter()
        .max_by(|a, b| a.total_cmp(b))
        .expect("non-empty");
    let range = max - min;
    if range == 0.0 {
        let midpoint = (target_max - target_min) / 2.0;
        values.iter_mut().for_each(|v| *v = midpoint);
    } else {
        values
            .iter_mut()
            .for_each(|v| *v = (*v - min) * (target_max - target_min) / range + target_min);
    }
}

/// Top-`n_count` nodes for each focal point, scored by blended recency,
/// relevance and importance.  Selected nodes are touched with the current
/// time so later passes see them as recently accessed.
pub async fn new_retrieve(
    persona: &mut Persona,
    focal_points: &[String],
    n_count: usize,
    llm: &dyn LanguageModel,
) -> Vec<(String, Vec<ConceptNode>)> {
    let mut retrieved = Vec::new();
    let Some(curr_time) = persona.scratch.curr_time else {
        return retrieved;
    };

    for focal_pt in focal_points {
        // Candidate pool: every non-idle event and thought, oldest
        // retrieval first.
        let mut candidates: Vec<ConceptNode> = persona
            .a_mem
            .event_and_thought_nodes()
            .into_iter()
            .filter(|node| !node.embedding_key.contains("idle"))
            .cloned()
            .collect();
        candidates.sort_by_key(|node| node.last_accessed);
        if candidates.is_empty() {
            retrieved.push((focal_pt.clone(), Vec::new()));
            continue;
        }

        let mut recency: Vec<f64> = (1..=candidates.len())
            .map(|rank| persona.scratch.recency_decay.powi(rank as i32))
            .collect();
        normalize(&mut recency, 0.0, 1.0);

        let mut importance: Vec<f64> = candidates.iter().map(|n| n.poignancy as f64).collect();
        normalize(&mut importance, 0.0, 1.0);

        let focal_embedding =
            prompts::embedding_or_default(llm, &persona.a_mem, focal_pt).await;
        let mut relevance: Vec<f64> = candidates
            .iter()
            .map(|node| {
                persona
                    .a_mem
                    .cached_embedding(&node.embedding_key)
                    .map(|emb| cosine_similarity(emb, &focal_embedding))
                    .unwrap_or(0.0)
            })
            .collect();
        normalize(&mut relevance, 0.0, 1.0);

        let scratch = &persona.scratch;
        let mut scored: Vec<(usize, f64)> = (0..candidates.len())
            .map(|i| {
                let score = scratch.recency_w * recency[i] * SHAPING_WEIGHTS[0]
                    + scratch.relevance_w * relevance[i] * SHAPING_WEIGHTS[1]
                    + scratch.importance_w * importance[i] * SHAPING_WEIGHTS[2];
                (i, score)
            })
            .collect();
        // Stable sort: ties keep candidate order, so results are
        // deterministic run to run.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(n_count);

        let mut selected = Vec::with_capacity(scored.len());
        for (index, _) in scored {
            let node = &candidates[index];
            persona.a_mem.touch(&node.node_id, curr_time);
            let mut node = node.clone();
            node.last_accessed = curr_time;
            selected.push(node);
        }
        debug!(persona = %persona.name, focal = %focal_pt, selected = selected.len(), "new_retrieve");
        retrieved.push((focal_pt.clone(), selected));
    }

    retrieved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{persona_at, remember_event, StubModel};

    #[test]
    fn normalize_collapses_equal_values_to_midpoint() {
        let mut values = vec![3.0, 3.0, 3.0];
        normalize(&mut values, 0.0, 1.0);
        assert_eq!(values, vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn normalize_scales_to_target_range() {
        let mut values = vec![1.0, 2.0, 3.0];
        normalize(&mut values, 0.0, 1.0);
        assert_eq!(values, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn retrieve_bundles_keyword_matches() {
        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        let node = remember_event(&mut persona, 8, "Klaus Mueller", "reading", "reading a book");
        remember_event(&mut persona, 9, "Klaus Mueller", "writing", "writing a paper");

        let retrieved = retrieve(&persona, &[node.clone()]);
        let bundle = &retrieved[&node.description];
        assert_eq!(bundle.curr_event.node_id, node.node_id);
        // Both events share the "klaus mueller" keyword.
        assert_eq!(bundle.events.len(), 2);
    }

    #[tokio::test]
    async fn new_retrieve_takes_top_k_and_touches_nodes() {
        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        for hour in 7..12 {
            remember_event(
                &mut persona,
                hour,
                "Klaus Mueller",
                "reading",
                &format!("reading at {hour}"),
            );
        }
        let llm = StubModel::default();

        let retrieved =
            new_retrieve(&mut persona, &["what is Klaus doing".to_string()], 3, &llm).await;
        let (_, nodes) = &retrieved[0];
        assert_eq!(nodes.len(), 3);

        let curr_time = persona.scratch.curr_time.unwrap();
        for node in nodes {
            assert_eq!(
                persona.a_mem.node(&node.node_id).unwrap().last_accessed,
                curr_time
            );
        }
    }

    #[tokio::test]
    async fn idle_nodes_are_excluded_from_the_pool() {
        let mut persona = persona_at("Isabella Rodriguez", (1, 1));
        remember_event(&mut persona, 8, "bed", "idle", "idle");

        let llm = StubModel::default();
        let retrieved = new_retrieve(&mut persona, &["anything".to_string()], 10, &llm).await;
        assert!(retrieved[0].1.is_empty());
    }
}
