//! Persisted world-state document shape and its index contract.

use semlog_core::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// One rigid entity whose pose changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub loc: Vec3,
    pub rot: Quat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneRecord {
    pub name: String,
    pub loc: Vec3,
    pub rot: Quat,
}

/// A skeletal entity with every bone of its rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkelEntityRecord {
    pub id: String,
    pub loc: Vec3,
    pub rot: Quat,
    pub bones: Vec<BoneRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazeRecord {
    /// Id of the gazed entity, empty when the ray hits nothing annotated.
    pub entity_id: String,
    pub target: Vec3,
    pub origin: Vec3,
}

/// One world-state sample, already converted to the target frame.
///
/// `skel_entities` is present whenever skeletal entities are tracked (even
/// if none of them moved); `gaze` only when the gaze changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldStateDocument {
    pub timestamp: f64,
    pub entities: Vec<EntityRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skel_entities: Option<Vec<SkelEntityRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaze: Option<GazeRecord>,
}

impl WorldStateDocument {
    /// Number of entity and skeletal entity records.
    pub fn record_count(&self) -> usize {
        self.entities.len() + self.skel_entities.as_ref().map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// Indexes
// ---------------------------------------------------------------------------

/// An ascending single-field index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    /// `1` for ascending.
    pub order: i32,
}

impl IndexKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: 1,
        }
    }
}

/// Fields indexed once at the end of a world-state session.
pub const INDEX_FIELDS: [&str; 5] = [
    "timestamp",
    "entities.id",
    "skel_entities.id",
    "skel_entities.bones.name",
    "gaze.entity_id",
];

pub fn world_state_indexes() -> Vec<IndexKey> {
    INDEX_FIELDS.iter().map(|f| IndexKey::ascending(*f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_sections_are_omitted() {
        let doc = WorldStateDocument {
            timestamp: 1.5,
            entities: vec![EntityRecord {
                id: "cup".into(),
                loc: Vec3::new(0.01, 0.02, 0.03),
                rot: Quat::IDENTITY,
            }],
            skel_entities: None,
            gaze: None,
        };
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["timestamp"], 1.5);
        assert_eq!(v["entities"][0]["id"], "cup");
        assert_eq!(v["entities"][0]["loc"]["y"], 0.02);
        assert_eq!(v["entities"][0]["rot"]["w"], 1.0);
        assert!(v.get("skel_entities").is_none());
        assert!(v.get("gaze").is_none());
    }

    #[test]
    fn empty_skeletal_list_is_kept() {
        let doc = WorldStateDocument {
            timestamp: 0.0,
            entities: Vec::new(),
            skel_entities: Some(Vec::new()),
            gaze: None,
        };
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["skel_entities"], serde_json::json!([]));
        let back: WorldStateDocument = serde_json::from_value(v).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn index_contract() {
        let idx = world_state_indexes();
        assert_eq!(idx.len(), 5);
        assert!(idx.iter().all(|k| k.order == 1));
        assert_eq!(idx[3].field, "skel_entities.bones.name");
    }
}
