//! The associative memory stream.
//!
//! Nodes are append-only within a run.  Three most-recent-first sequences
//! (events, thoughts, chats) index into a single id → node map; inverted
//! keyword indices per kind support the relevance lookups in the retrieve
//! stage.  Embeddings are cached by key so the embedding service is asked
//! at most once per distinct text.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::concept::{ConceptNode, Filling, NodeKind, SpoTriple};
use crate::MemoryError;

#[derive(Debug, Default, Clone)]
pub struct AssociativeMemory {
    nodes: HashMap<String, ConceptNode>,
    /// Node ids, most-recent-first, one sequence per kind.
    seq_event: Vec<String>,
    seq_thought: Vec<String>,
    seq_chat: Vec<String>,
    kw_to_event: HashMap<String, Vec<String>>,
    kw_to_thought: HashMap<String, Vec<String>>,
    kw_to_chat: HashMap<String, Vec<String>>,
    kw_strength_event: HashMap<String, u64>,
    kw_strength_thought: HashMap<String, u64>,
    pub embeddings: HashMap<String, Vec<f32>>,
}

impl AssociativeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&ConceptNode> {
        self.nodes.get(id)
    }

    /// Mark a node as retrieved at `at`.
    pub fn touch(&mut self, id: &str, at: NaiveDateTime) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.last_accessed = at;
        }
    }

    fn next_node_id(&self) -> String {
        format!("node_{}", self.nodes.len() + 1)
    }

    // ── Adding nodes ──────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn add_event(
        &mut self,
        created: NaiveDateTime,
        expiration: Option<NaiveDateTime>,
        triple: SpoTriple,
        mut description: String,
        keywords: BTreeSet<String>,
        poignancy: i64,
        embedding_pair: (String, Vec<f32>),
        filling: Filling,
    ) -> ConceptNode {
        // Parenthesized descriptions keep their lead-in plus the detail.
        if let Some(open) = description.find('(') {
            let detail = description[open + 1..].trim_end_matches(')').to_string();
            let lead: Vec<&str> = description.split_whitespace().take(3).collect();
            description = format!("{} {}", lead.join(" "), detail);
        }
        self.add_node(
            NodeKind::Event,
            created,
            expiration,
            triple,
            description,
            keywords,
            poignancy,
            embedding_pair,
            filling,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_thought(
        &mut self,
        created: NaiveDateTime,
        expiration: Option<NaiveDateTime>,
        triple: SpoTriple,
        description: String,
        keywords: BTreeSet<String>,
        poignancy: i64,
        embedding_pair: (String, Vec<f32>),
        filling: Filling,
    ) -> ConceptNode {
        self.add_node(
            NodeKind::Thought,
            created,
            expiration,
            triple,
            description,
            keywords,
            poignancy,
            embedding_pair,
            filling,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_chat(
        &mut self,
        created: NaiveDateTime,
        expiration: Option<NaiveDateTime>,
        triple: SpoTriple,
        description: String,
        keywords: BTreeSet<String>,
        poignancy: i64,
        embedding_pair: (String, Vec<f32>),
        transcript: Vec<(String, String)>,
    ) -> ConceptNode {
        self.add_node(
            NodeKind::Chat,
            created,
            expiration,
            triple,
            description,
            keywords,
            poignancy,
            embedding_pair,
            Filling::Transcript(transcript),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn add_node(
        &mut self,
        kind: NodeKind,
        created: NaiveDateTime,
        expiration: Option<NaiveDateTime>,
        triple: SpoTriple,
        description: String,
        keywords: BTreeSet<String>,
        poignancy: i64,
        embedding_pair: (String, Vec<f32>),
        filling: Filling,
    ) -> ConceptNode {
        let node_id = self.next_node_id();
        let keywords: BTreeSet<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        let (embedding_key, embedding) = embedding_pair;
        let (subject, predicate, object) = triple;

        let node = ConceptNode {
            node_id: node_id.clone(),
            kind,
            created,
            expiration,
            last_accessed: created,
            subject,
            predicate,
            object,
            description,
            embedding_key: embedding_key.clone(),
            poignancy,
            keywords: keywords.clone(),
            filling,
        };

        let (seq, kw_index) = match kind {
            NodeKind::Event => (&mut self.seq_event, &mut self.kw_to_event),
            NodeKind::Thought => (&mut self.seq_thought, &mut self.kw_to_thought),
            NodeKind::Chat => (&mut self.seq_chat, &mut self.kw_to_chat),
        };
        seq.insert(0, node_id.clone());
        for kw in &keywords {
            kw_index.entry(kw.clone()).or_default().insert(0, node_id.clone());
        }

        // Idle markers do not contribute keyword strength.
        let is_idle = node.predicate.as_deref() == Some("is")
            && node.object.as_deref() == Some("idle");
        if !is_idle {
            let strength = match kind {
                NodeKind::Event => Some(&mut self.kw_strength_event),
                NodeKind::Thought => Some(&mut self.kw_strength_thought),
                NodeKind::Chat => None,
            };
            if let Some(strength) = strength {
                for kw in &keywords {
                    *strength.entry(kw.clone()).or_default() += 1;
                }
            }
        }

        self.embeddings.insert(embedding_key, embedding);
        debug!(id = %node.node_id, kind = ?kind, desc = %node.description, "memory node added");
        self.nodes.insert(node_id.clone(), node.clone());
        node
    }

    // ── Sequences & lookups ───────────────────────────────────────────────

    fn seq(&self, kind: NodeKind) -> &[String] {
        match kind {
            NodeKind::Event => &self.seq_event,
            NodeKind::Thought => &self.seq_thought,
            NodeKind::Chat => &self.seq_chat,
        }
    }

    /// Nodes of one kind, most-recent-first.
    pub fn nodes_of(&self, kind: NodeKind) -> Vec<&ConceptNode> {
        self.seq(kind)
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Events and thoughts together — the retrieval candidate pool.
    pub fn event_and_thought_nodes(&self) -> Vec<&ConceptNode> {
        let mut out = self.nodes_of(NodeKind::Event);
        out.extend(self.nodes_of(NodeKind::Thought));
        out
    }

    /// Triples of the most recent `retention` events.  Perception skips
    /// anything already in this window.
    pub fn latest_event_triples(&self, retention: usize) -> HashSet<SpoTriple> {
        self.seq_event
            .iter()
            .take(retention)
            .filter_map(|id| self.nodes.get(id))
            .map(ConceptNode::triple)
            .collect()
    }

    fn relevant(&self, kind: NodeKind, terms: [&str; 3]) -> Vec<ConceptNode> {
        let index = match kind {
            NodeKind::Event => &self.kw_to_event,
            NodeKind::Thought => &self.kw_to_thought,
            NodeKind::Chat => &self.kw_to_chat,
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for term in terms {
            if term.is_empty() {
                continue;
            }
            if let Some(ids) = index.get(&term.to_lowercase()) {
                for id in ids {
                    if seen.insert(id.clone()) {
                        if let Some(node) = self.nodes.get(id) {
                            out.push(node.clone());
                        }
                    }
                }
            }
        }
        out
    }

    pub fn relevant_events(&self, subject: &str, predicate: &str, object: &str) -> Vec<ConceptNode> {
        self.relevant(NodeKind::Event, [subject, predicate, object])
    }

    pub fn relevant_thoughts(&self, subject: &str, predicate: &str, object: &str) -> Vec<ConceptNode> {
        self.relevant(NodeKind::Thought, [subject, predicate, object])
    }

    /// Most recent chat node involving `partner`, if any.
    pub fn last_chat(&self, partner: &str) -> Option<&ConceptNode> {
        self.kw_to_chat
            .get(&partner.to_lowercase())
            .and_then(|ids| ids.first())
            .and_then(|id| self.nodes.get(id))
    }

    pub fn cached_embedding(&self, key: &str) -> Option<&Vec<f32>> {
        self.embeddings.get(key)
    }

    /// Multi-line rendering of one sequence for the operator REPL.
    pub fn render_seq(&self, kind: NodeKind) -> String {
        self.nodes_of(kind)
            .iter()
            .map(|node| node.summary_line())
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ── Persistence ───────────────────────────────────────────────────────

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), MemoryError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut ordered: Vec<&ConceptNode> = self.nodes.values().collect();
        ordered.sort_by_key(|node| node.numeric_id());
        let node_map: serde_json::Map<String, serde_json::Value> = ordered
            .iter()
            .map(|node| {
                (
                    node.node_id.clone(),
                    serde_json::to_value(node).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();

        fs::write(
            dir.join("nodes.json"),
            serde_json::to_string_pretty(&node_map)?,
        )?;
        fs::write(
            dir.join("kw_strength_event.json"),
            serde_json::to_string_pretty(&self.kw_strength_event)?,
        )?;
        fs::write(
            dir.join("kw_strength_thought.json"),
            serde_json::to_string_pretty(&self.kw_strength_thought)?,
        )?;
        fs::write(
            dir.join("embeddings.json"),
            serde_json::to_string_pretty(&self.embeddings)?,
        )?;
        Ok(())
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let dir = dir.as_ref();
        let mut memory = Self::new();

        let nodes_path = dir.join("nodes.json");
        if nodes_path.exists() {
            let raw = fs::read_to_string(nodes_path)?;
            let node_map: HashMap<String, ConceptNode> = serde_json::from_str(&raw)?;

            let mut ordered: Vec<ConceptNode> = node_map.into_values().collect();
            ordered.sort_by_key(ConceptNode::numeric_id);

            for node in ordered {
                // Rebuild sequences and keyword indices front-first so the
                // newest node ends up at position 0.
                let (seq, kw_index) = match node.kind {
                    NodeKind::Event => (&mut memory.seq_event, &mut memory.kw_to_event),
                    NodeKind::Thought => (&mut memory.seq_thought, &mut memory.kw_to_thought),
                    NodeKind::Chat => (&mut memory.seq_chat, &mut memory.kw_to_chat),
                };
                seq.insert(0, node.node_id.clone());
                for kw in &node.keywords {
                    kw_index
                        .entry(kw.clone())
                        .or_default()
                        .insert(0, node.node_id.clone());
                }
                memory.nodes.insert(node.node_id.clone(), node);
            }
        }

        let strength_event = dir.join("kw_strength_event.json");
        if strength_event.exists() {
            memory.kw_strength_event = serde_json::from_str(&fs::read_to_string(strength_event)?)?;
        }
        let strength_thought = dir.join("kw_strength_thought.json");
        if strength_thought.exists() {
            memory.kw_strength_thought =
                serde_json::from_str(&fs::read_to_string(strength_thought)?)?;
        }
        let embeddings = dir.join("embeddings.json");
        if embeddings.exists() {
            memory.embeddings = serde_json::from_str(&fs::read_to_string(embeddings)?)?;
        }

        Ok(memory)
    }
}
