use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::timefmt;

/// `(subject, predicate, object)` — the canonical identity of an event or
/// thought, independent of its free-text description.
pub type SpoTriple = (String, Option<String>, Option<String>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Event,
    Thought,
    Chat,
}

/// What a node cites.
///
/// Thoughts carry the node ids of their evidence; chat nodes carry the
/// conversation transcript; plain events usually carry nothing.  The
/// untagged representation keeps `nodes.json` readable: evidence is an
/// array of ids, a transcript an array of `[speaker, utterance]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filling {
    Nodes(Vec<String>),
    Transcript(Vec<(String, String)>),
}

impl Default for Filling {
    fn default() -> Self {
        Filling::Nodes(Vec::new())
    }
}

impl Filling {
    pub fn evidence(&self) -> &[String] {
        match self {
            Filling::Nodes(ids) => ids,
            Filling::Transcript(_) => &[],
        }
    }

    pub fn transcript(&self) -> Option<&[(String, String)]> {
        match self {
            Filling::Transcript(lines) => Some(lines),
            Filling::Nodes(_) => None,
        }
    }
}

/// One node of the associative memory stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptNode {
    pub node_id: String,
    pub kind: NodeKind,
    #[serde(with = "timefmt")]
    pub created: NaiveDateTime,
    #[serde(with = "timefmt::option")]
    pub expiration: Option<NaiveDateTime>,
    #[serde(with = "timefmt")]
    pub last_accessed: NaiveDateTime,
    pub subject: String,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub description: String,
    /// Key into the persona's embedding table.
    pub embedding_key: String,
    /// Emotional / importance weight in `[1, 10]`.
    pub poignancy: i64,
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub filling: Filling,
}

impl ConceptNode {
    pub fn triple(&self) -> SpoTriple {
        (
            self.subject.clone(),
            self.predicate.clone(),
            self.object.clone(),
        )
    }

    /// Numeric suffix of `node_<n>`; used to restore stream order on load.
    pub fn numeric_id(&self) -> u64 {
        self.node_id
            .rsplit('_')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    /// One-line rendering for the operator REPL.
    pub fn summary_line(&self) -> String {
        format!(
            "{} [{}] ({}, {}, {}) -- {}",
            self.node_id,
            timefmt::format(&self.created),
            self.subject,
            self.predicate.as_deref().unwrap_or("-"),
            self.object.as_deref().unwrap_or("-"),
            self.description,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn node(id: &str) -> ConceptNode {
        let t = NaiveDate::from_ymd_opt(2023, 2, 13)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        ConceptNode {
            node_id: id.to_string(),
            kind: NodeKind::Event,
            created: t,
            expiration: None,
            last_accessed: t,
            subject: "Isabella Rodriguez".to_string(),
            predicate: Some("is".to_string()),
            object: Some("idle".to_string()),
            description: "idle".to_string(),
            embedding_key: "idle".to_string(),
            poignancy: 1,
            keywords: BTreeSet::new(),
            filling: Filling::default(),
        }
    }

    #[test]
    fn numeric_ids_parse() {
        assert_eq!(node("node_12").numeric_id(), 12);
        assert_eq!(node("garbage").numeric_id(), 0);
    }

    #[test]
    fn filling_roundtrips_untagged() {
        let evidence = Filling::Nodes(vec!["node_1".into(), "node_2".into()]);
        let json = serde_json::to_string(&evidence).unwrap();
        assert_eq!(json, r#"["node_1","node_2"]"#);
        assert_eq!(serde_json::from_str::<Filling>(&json).unwrap(), evidence);

        let transcript = Filling::Transcript(vec![("Isabella".into(), "Hi".into())]);
        let json = serde_json::to_string(&transcript).unwrap();
        assert_eq!(serde_json::from_str::<Filling>(&json).unwrap(), transcript);
    }
}
