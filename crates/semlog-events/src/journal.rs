//! Event journal: begin/end pairs folded into finished relation records.
//!
//! The [`EventJournal`] consumes the published event stream and keeps one
//! open record per live relation (a grasp, a contact, a supported-by). When
//! the matching end arrives the record is closed into a [`FinishedEvent`]
//! with a stable content-derived id. Relations still open when the session
//! ends are closed by [`EventJournal::finish`].
//!
//! # Query API
//!
//! - **Kind**: [`EventJournal::of_kind`]
//! - **Participant**: [`EventJournal::involving`]
//! - **Time window**: [`EventJournal::overlapping`]
//!
//! # Example
//!
//! ```
//! use semlog_core::handle::ObjectHandle;
//! use semlog_core::identity::SemanticEntity;
//! use semlog_events::event::SemanticEvent;
//! use semlog_events::journal::{EventJournal, RelationKind};
//!
//! let hand = SemanticEntity::new(ObjectHandle::new(0, 0), "hand", "Hand");
//! let cup = SemanticEntity::new(ObjectHandle::new(1, 0), "cup", "Cup");
//!
//! let mut journal = EventJournal::new();
//! journal.record(&SemanticEvent::BeginGrasp {
//!     owner: hand.clone(),
//!     object: cup.clone(),
//!     time: 1.0,
//!     grasp_type: "PinchGrasp".into(),
//! });
//! journal.record(&SemanticEvent::EndGrasp { owner: hand, object: cup, time: 2.5 });
//!
//! assert_eq!(journal.of_kind(RelationKind::Grasp).count(), 1);
//! assert_eq!(journal.involving("cup").next().unwrap().end, 2.5);
//! ```

use semlog_core::identity::PairId;
use serde::{Deserialize, Serialize};

use crate::event::SemanticEvent;

// ---------------------------------------------------------------------------
// FinishedEvent
// ---------------------------------------------------------------------------

/// Kind of a journaled relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Grasp,
    Contact,
    SupportedBy,
}

impl RelationKind {
    fn tag(self) -> &'static str {
        match self {
            RelationKind::Grasp => "grasp",
            RelationKind::Contact => "contact",
            RelationKind::SupportedBy => "supported_by",
        }
    }
}

/// A closed relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedEvent {
    /// Hex id derived from kind, participants and start time.
    pub id: String,
    pub kind: RelationKind,
    /// Semantic ids: `[owner, object]`, `[self, other]` or
    /// `[supported, supporting]`.
    pub participants: [String; 2],
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grasp_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<PairId>,
    /// `true` if the end was synthesized at session finish.
    #[serde(default)]
    pub closed_at_finish: bool,
}

impl FinishedEvent {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
struct OpenRelation {
    kind: RelationKind,
    participants: [String; 2],
    start: f64,
    grasp_type: Option<String>,
    pair_id: Option<PairId>,
}

impl OpenRelation {
    fn close(self, end: f64, closed_at_finish: bool) -> FinishedEvent {
        FinishedEvent {
            id: relation_id(self.kind, &self.participants, self.start),
            kind: self.kind,
            participants: self.participants,
            start: self.start,
            end,
            grasp_type: self.grasp_type,
            pair_id: self.pair_id,
            closed_at_finish,
        }
    }
}

fn relation_id(kind: RelationKind, participants: &[String; 2], start: f64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.tag().as_bytes());
    for p in participants {
        hasher.update(&[0u8]);
        hasher.update(p.as_bytes());
    }
    hasher.update(&start.to_bits().to_le_bytes());
    hasher.finalize().to_hex()[..32].to_owned()
}

// ---------------------------------------------------------------------------
// EventJournal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EventJournal {
    open: Vec<OpenRelation>,
    finished: Vec<FinishedEvent>,
    unmatched_ends: u64,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one published event into the journal.
    pub fn record(&mut self, event: &SemanticEvent) {
        match event {
            SemanticEvent::BeginGrasp {
                owner,
                object,
                time,
                grasp_type,
            } => self.open.push(OpenRelation {
                kind: RelationKind::Grasp,
                participants: [owner.id.clone(), object.id.clone()],
                start: *time,
                grasp_type: Some(grasp_type.clone()),
                pair_id: None,
            }),
            SemanticEvent::EndGrasp {
                owner,
                object,
                time,
            } => self.close_pair(RelationKind::Grasp, &owner.id, &object.id, *time),
            SemanticEvent::BeginContact(r) => self.open.push(OpenRelation {
                kind: RelationKind::Contact,
                participants: [r.self_entity.id.clone(), r.other.id.clone()],
                start: r.time,
                grasp_type: None,
                pair_id: None,
            }),
            SemanticEvent::EndContact {
                self_entity,
                other,
                time,
            } => self.close_pair(RelationKind::Contact, &self_entity.id, &other.id, *time),
            SemanticEvent::BeginSupportedBy {
                supported,
                supporting,
                time,
                pair_id,
            } => self.open.push(OpenRelation {
                kind: RelationKind::SupportedBy,
                participants: [supported.id.clone(), supporting.id.clone()],
                start: *time,
                grasp_type: None,
                pair_id: Some(*pair_id),
            }),
            SemanticEvent::EndSupportedBy { pair_id1, time, .. } => {
                let pos = self.open.iter().position(|o| {
                    o.kind == RelationKind::SupportedBy && o.pair_id == Some(*pair_id1)
                });
                self.close(pos, RelationKind::SupportedBy, *time);
            }
        }
    }

    fn close_pair(&mut self, kind: RelationKind, a: &str, b: &str, time: f64) {
        let pos = self
            .open
            .iter()
            .position(|o| o.kind == kind && o.participants[0] == a && o.participants[1] == b);
        self.close(pos, kind, time);
    }

    fn close(&mut self, pos: Option<usize>, kind: RelationKind, time: f64) {
        match pos {
            Some(pos) => {
                let relation = self.open.remove(pos);
                self.finished.push(relation.close(time, false));
            }
            None => self.note_unmatched(kind, time),
        }
    }

    fn note_unmatched(&mut self, kind: RelationKind, time: f64) {
        self.unmatched_ends += 1;
        tracing::warn!(kind = kind.tag(), time, "end event without an open relation");
    }

    /// Close every open relation at `time`, oldest first.
    pub fn finish(&mut self, time: f64) {
        let mut open = std::mem::take(&mut self.open);
        open.sort_by(|a, b| a.start.total_cmp(&b.start));
        self.finished
            .extend(open.into_iter().map(|o| o.close(time, true)));
    }

    /// Finished relations in closing order.
    pub fn finished(&self) -> &[FinishedEvent] {
        &self.finished
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn unmatched_ends(&self) -> u64 {
        self.unmatched_ends
    }

    pub fn len(&self) -> usize {
        self.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finished.is_empty()
    }

    pub fn of_kind(&self, kind: RelationKind) -> impl Iterator<Item = &FinishedEvent> {
        self.finished.iter().filter(move |f| f.kind == kind)
    }

    /// Relations with `id` as either participant.
    pub fn involving<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a FinishedEvent> {
        self.finished
            .iter()
            .filter(move |f| f.participants.iter().any(|p| p == id))
    }

    /// Relations whose `[start, end]` intersects `[from, to]`.
    pub fn overlapping(&self, from: f64, to: f64) -> impl Iterator<Item = &FinishedEvent> {
        self.finished
            .iter()
            .filter(move |f| f.start <= to && f.end >= from)
    }

    /// One JSON object per line, in closing order.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for f in &self.finished {
            out.push_str(&serde_json::to_string(f)?);
            out.push('\n');
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
