//! Session configuration.
//!
//! Every section has serde defaults, so a config file only needs the values
//! it changes:
//!
//! ```
//! use semlog_engine::config::SessionConfig;
//!
//! let cfg = SessionConfig::from_json_str(r#"{ "session": { "task_id": "kitchen" } }"#).unwrap();
//! assert_eq!(cfg.session.task_id, "kitchen");
//! assert_eq!(cfg.events.grasp_gap, 0.55);
//! ```

use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use semlog_core::math::{FrameConversion, PoseThresholds};
use semlog_events::contact::{ContactShapeConfig, DEFAULT_MANIPULATOR_CONTACT_GAP, DEFAULT_REGION_CONTACT_GAP};
use semlog_events::grasp::{DEFAULT_GRASP_GAP, DEFAULT_UNPAUSE_TRIGGER};
use semlog_events::manipulator::ManipulatorConfig;
use semlog_events::supported_by::SupportedByConfig;
use serde::{Deserialize, Serialize};

use crate::world_state::writer::WriterKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub task_id: String,
    /// Generated at session start when absent.
    pub episode_id: Option<String>,
    /// Seed for reproducible episode ids.
    pub seed: Option<u64>,
    /// Fixed simulation step in seconds.
    pub fixed_dt: f64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            task_id: "default_task".into(),
            episode_id: None,
            seed: None,
            fixed_dt: 1.0 / 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldStateConfig {
    pub enabled: bool,
    /// Seconds between samples; `0` samples every tick.
    pub update_rate: f64,
    pub linear_distance: f64,
    /// Radians.
    pub angular_distance: f64,
    pub writer: WriterKind,
    pub overwrite: bool,
    pub output_dir: PathBuf,
    /// Database for the store writer; defaults to the task id.
    pub database: Option<String>,
    pub unit_scale: f64,
    pub gaze_tolerance: f64,
    pub remove_static_items: bool,
}

impl Default for WorldStateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_rate: 0.0,
            linear_distance: 0.5,
            angular_distance: 0.1,
            writer: WriterKind::Json,
            overwrite: false,
            output_dir: PathBuf::from("semlog_out"),
            database: None,
            unit_scale: 0.01,
            gaze_tolerance: 3.0,
            remove_static_items: true,
        }
    }
}

impl WorldStateConfig {
    pub fn thresholds(&self) -> PoseThresholds {
        PoseThresholds::new(self.linear_distance, self.angular_distance)
    }

    pub fn conversion(&self) -> FrameConversion {
        FrameConversion {
            unit_scale: self.unit_scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub log_grasps: bool,
    pub log_contacts: bool,
    pub log_supported_by: bool,
    pub grasp_gap: f64,
    pub manipulator_contact_gap: f64,
    pub region_contact_gap: f64,
    pub supported_by_poll_interval: f64,
    pub max_vertical_speed: f64,
    pub unpause_trigger: f64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        let sb = SupportedByConfig::default();
        Self {
            log_grasps: true,
            log_contacts: true,
            log_supported_by: true,
            grasp_gap: DEFAULT_GRASP_GAP,
            manipulator_contact_gap: DEFAULT_MANIPULATOR_CONTACT_GAP,
            region_contact_gap: DEFAULT_REGION_CONTACT_GAP,
            supported_by_poll_interval: sb.poll_interval,
            max_vertical_speed: sb.max_vertical_speed,
            unpause_trigger: DEFAULT_UNPAUSE_TRIGGER,
        }
    }
}

impl EventsConfig {
    pub fn manipulator(&self) -> ManipulatorConfig {
        ManipulatorConfig {
            grasp_gap: self.grasp_gap,
            contact_gap: self.manipulator_contact_gap,
            unpause_trigger: self.unpause_trigger,
            log_grasps: self.log_grasps,
            log_contacts: self.log_contacts,
        }
    }

    pub fn contact_region(&self) -> ContactShapeConfig {
        ContactShapeConfig {
            contact_gap: self.region_contact_gap,
            supported_by: self.log_supported_by.then_some(SupportedByConfig {
                poll_interval: self.supported_by_poll_interval,
                max_vertical_speed: self.max_vertical_speed,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session: SessionSection,
    pub world_state: WorldStateConfig,
    pub events: EventsConfig,
}

impl SessionConfig {
    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.task_id.trim().is_empty() {
            return Err(invalid("session.task_id", "must not be empty"));
        }
        if self.session.episode_id.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(invalid("session.episode_id", "must not be empty when set"));
        }
        positive("session.fixed_dt", self.session.fixed_dt)?;

        let ws = &self.world_state;
        non_negative("world_state.update_rate", ws.update_rate)?;
        non_negative("world_state.linear_distance", ws.linear_distance)?;
        non_negative("world_state.angular_distance", ws.angular_distance)?;
        positive("world_state.unit_scale", ws.unit_scale)?;
        non_negative("world_state.gaze_tolerance", ws.gaze_tolerance)?;

        let ev = &self.events;
        positive("events.grasp_gap", ev.grasp_gap)?;
        positive("events.manipulator_contact_gap", ev.manipulator_contact_gap)?;
        positive("events.region_contact_gap", ev.region_contact_gap)?;
        positive("events.supported_by_poll_interval", ev.supported_by_poll_interval)?;
        non_negative("events.max_vertical_speed", ev.max_vertical_speed)?;
        if !ev.unpause_trigger.is_finite() {
            return Err(invalid("events.unpause_trigger", "must be finite"));
        }
        Ok(())
    }

    /// The configured episode id, or a fresh one (seeded when
    /// `session.seed` is set).
    pub fn resolve_episode_id(&self) -> String {
        if let Some(id) = &self.session.episode_id {
            return id.clone();
        }
        match self.session.seed {
            Some(seed) => generate_episode_id(&mut Pcg64::seed_from_u64(seed)),
            None => generate_episode_id(&mut rand::thread_rng()),
        }
    }

    /// Store database name.
    pub fn database(&self) -> &str {
        self.world_state
            .database
            .as_deref()
            .unwrap_or(&self.session.task_id)
    }
}

/// Random 128-bit id as 32 lowercase hex digits.
pub fn generate_episode_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:032x}", rng.gen::<u128>())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be positive and finite, got {value}")))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be non-negative and finite, got {value}")))
    }
}
