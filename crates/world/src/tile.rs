use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An `(x, y)` tile coordinate, `y` down.
pub type TileCoord = (usize, usize);

/// The canonical identity of an event: `(subject, predicate, object)`.
/// The free-text description is deliberately not part of it.
pub type EventTriple = (String, Option<String>, Option<String>);

/// An event placed on a tile.
///
/// `subject` is a colon-joined address for object events, or a persona
/// name.  A *blank* event has predicate, object and description all unset
/// and means "present but idle".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileEvent {
    pub subject: String,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub description: Option<String>,
}

impl TileEvent {
    pub fn new(
        subject: impl Into<String>,
        predicate: Option<String>,
        object: Option<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate,
            object,
            description,
        }
    }

    /// The blank "present but idle" marker for a subject.
    pub fn blank(subject: impl Into<String>) -> Self {
        Self::new(subject, None, None, None)
    }

    pub fn is_blank(&self) -> bool {
        self.predicate.is_none() && self.object.is_none() && self.description.is_none()
    }

    pub fn triple(&self) -> EventTriple {
        (
            self.subject.clone(),
            self.predicate.clone(),
            self.object.clone(),
        )
    }
}

impl fmt::Display for TileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.subject,
            self.predicate.as_deref().unwrap_or("-"),
            self.object.as_deref().unwrap_or("-"),
            self.description.as_deref().unwrap_or("-"),
        )
    }
}

/// One cell of the maze.
///
/// The address fields may be empty strings when a tile belongs to no named
/// area at that nesting level; addresses are always assembled left to
/// right, never by negative indexing, because trailing elements can be
/// absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tile {
    pub world: String,
    pub sector: String,
    pub arena: String,
    pub game_object: String,
    pub spawning_location: String,
    pub collision: bool,
    pub events: BTreeSet<TileEvent>,
}
