//! Shared fixtures for the cognition tests: a scripted language model, a
//! small cafe-and-park maze, and persona constructors.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use simulacra_llm::LanguageModel;
use simulacra_memory::{AssociativeMemory, ConceptNode, Filling, Scratch, SpatialTree};
use simulacra_world::{Maze, MazeSheet, TileCoord, TileSeed};

use crate::Persona;

/// Marker-dispatched stub: the first `(marker, reply)` whose marker occurs
/// in the prompt wins; unmatched prompts error so the fallbacks kick in.
/// Embeddings are a deterministic byte-fold of the input.
#[derive(Default)]
pub struct StubModel {
    replies: Vec<(String, String)>,
}

impl StubModel {
    pub fn with(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(marker, reply)| (marker.to_string(), reply.to_string()))
                .collect(),
        }
    }

    pub fn first_day() -> Self {
        Self::with(&[
            ("wake up hour", "7"),
            (
                "broad-stroke plan for today",
                "[\"wake up and complete the morning routine at 7:00 am\", \"have breakfast\", \
                 \"work at the cafe\", \"have dinner\", \"go to bed early\"]",
            ),
            ("doing at 07:00 AM", "waking up and starting her morning routine"),
            ("doing at 08:00 AM", "having breakfast"),
            ("doing at 12:00 PM", "having lunch"),
            ("doing at 06:00 PM", "having dinner"),
            ("doing at 11:00 PM", "sleeping"),
            ("doing at", "working at the cafe"),
            (
                "Decompose the task \"working at the cafe\"",
                "[[\"working at the cafe (brewing coffee)\", 90], \
                 [\"working at the cafe (serving customers)\", 90]]",
            ),
            (
                "Decompose the task \"working on her painting\"",
                "[[\"working on her painting (sketching the outline)\", 90], \
                 [\"working on her painting (mixing colors)\", 90]]",
            ),
            ("poignancy", "3"),
        ])
    }

    pub fn chatty() -> Self {
        Self::with(&[
            ("initiate a conversation", "yes"),
            (
                "Here is their conversation",
                "Isabella Rodriguez: Hi Klaus! How is the counter today?\n\
                 Klaus Mueller: Busy morning, but the coffee is flowing.",
            ),
            (
                "Summarize the conversation",
                "conversing about the morning rush at the cafe",
            ),
            ("poignancy", "3"),
        ])
    }

    pub fn chatty_with_rewrite() -> Self {
        let mut stub = Self::chatty();
        stub.replies.push((
            "Rewrite the schedule".to_string(),
            "[[\"working at the cafe (serving customers)\", 900], \
             [\"working at the cafe (conversing with Klaus)\", 120]]"
                .to_string(),
        ));
        stub
    }

    pub fn reflective() -> Self {
        Self::with(&[
            ("poignancy", "3"),
            (
                "salient high-level questions",
                "[\"What is Isabella working on?\", \"Who does Isabella know?\", \
                 \"What is happening at the cafe?\"]",
            ),
            (
                "high-level insights",
                "{\"Isabella is dedicated to her cafe\": [0], \
                 \"Isabella values her regulars\": [0], \
                 \"The cafe is busy in the mornings\": [1], \
                 \"Isabella enjoys making coffee\": [2], \
                 \"Isabella is planning a party\": [3]}",
            ),
        ])
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        for (marker, reply) in &self.replies {
            if prompt.contains(marker.as_str()) {
                return Ok(reply.clone());
            }
        }
        Err(anyhow!("no scripted reply for prompt"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 8];
        for (index, byte) in text.bytes().enumerate() {
            vector[index % 8] += byte as f32 / 255.0;
        }
        Ok(vector)
    }
}

/// A 5x5 maze: a cafe counter across the top two rows (espresso machine
/// and register), a park garden strip on row 3, open floor elsewhere.
pub fn small_maze() -> Maze {
    let mut tiles = Vec::new();
    for y in 0..2usize {
        for x in 0..4usize {
            let game_object = match (x, y) {
                (0, 0) => "espresso machine",
                (3, 0) => "register",
                _ => "",
            };
            tiles.push(TileSeed {
                x,
                y,
                world: "the ville".into(),
                sector: "cafe".into(),
                arena: "counter".into(),
                game_object: game_object.into(),
                ..TileSeed::default()
            });
        }
    }
    for x in 0..3usize {
        tiles.push(TileSeed {
            x,
            y: 3,
            world: "the ville".into(),
            sector: "park".into(),
            arena: "park garden".into(),
            ..TileSeed::default()
        });
    }

    Maze::from_sheet(MazeSheet {
        maze_name: "test ville".into(),
        width: 5,
        height: 5,
        collision: vec![vec![false; 5]; 5],
        tiles,
    })
    .expect("test maze is well-formed")
}

pub fn test_time(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 2, 13)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// A persona standing at `tile` at 09:00 on the test day.
pub fn persona_at(name: &str, tile: TileCoord) -> Persona {
    let mut scratch = Scratch::bootstrap(name);
    scratch.curr_time = Some(test_time(9));
    scratch.curr_tile = Some(tile);
    scratch.lifestyle = "keeps regular hours".into();
    scratch.living_area = "the ville:cafe".into();
    Persona::from_parts(
        name,
        scratch,
        SpatialTree::new(),
        AssociativeMemory::new(),
        7,
        "the ville:park:park garden",
    )
}

/// Record a `(subject, "is", object)` event node directly in associative
/// memory and return it.
pub fn remember_event(
    persona: &mut Persona,
    hour: u32,
    subject: &str,
    object: &str,
    description: &str,
) -> ConceptNode {
    let keywords = [subject.to_string(), object.to_string()]
        .into_iter()
        .collect();
    persona.a_mem.add_event(
        test_time(hour),
        None,
        (
            subject.to_string(),
            Some("is".to_string()),
            Some(object.to_string()),
        ),
        description.to_string(),
        keywords,
        4,
        (description.to_string(), vec![0.2, 0.4, 0.1]),
        Filling::default(),
    )
}
