use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::alert::MqttAlertConfig;
use crate::detect::{default_detection_classes, DetectionFilter};
use crate::intrusion::DisappearPolicy;
use crate::pipeline::PipelineConfig;
use crate::tracker::{
    TrackerConfig, DEFAULT_MAX_DISAPPEARED_FRAMES, DEFAULT_TRACKING_DISTANCE_THRESHOLD,
};

pub const CONFIG_ENV: &str = "ZONE_GUARD_CONFIG";

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_LOG_FILE: &str = "logs.csv";
const DEFAULT_ZONES_FILE: &str = "zones.json";
const DEFAULT_ALERT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Deserialize, Default)]
struct ZoneGuardConfigFile {
    video_source: Option<String>,
    model_path: Option<String>,
    confidence_threshold: Option<f32>,
    tracking_distance_threshold: Option<f32>,
    max_disappeared_frames: Option<u32>,
    log_file: Option<PathBuf>,
    zones_file: Option<PathBuf>,
    detection_classes: Option<BTreeMap<String, u32>>,
    alert_enabled: Option<bool>,
    alert_type: Option<String>,
    alert_queue_capacity: Option<usize>,
    exit_on_disappear: Option<bool>,
    event_db: Option<String>,
    mqtt: Option<MqttAlertConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertType {
    Console,
    Mqtt,
    None,
}

impl FromStr for AlertType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "console" => Ok(AlertType::Console),
            "mqtt" => Ok(AlertType::Mqtt),
            "none" => Ok(AlertType::None),
            "gui" => {
                log::warn!("GUI popup alerts are not supported; using console alerts");
                Ok(AlertType::Console)
            }
            other => Err(anyhow!(
                "unknown alert_type {:?} (expected console, mqtt or none)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneGuardConfig {
    /// Camera or file the detector reads. Not used by the pipeline itself.
    pub video_source: Option<String>,
    pub model_path: Option<String>,
    pub confidence_threshold: f32,
    pub tracking_distance_threshold: f32,
    pub max_disappeared_frames: u32,
    pub log_file: PathBuf,
    pub zones_file: PathBuf,
    pub detection_classes: BTreeMap<String, u32>,
    pub alert_enabled: bool,
    pub alert_type: AlertType,
    pub alert_queue_capacity: usize,
    pub exit_on_disappear: bool,
    /// Optional hash-chained SQLite copy of the event log.
    pub event_db: Option<String>,
    pub mqtt: MqttAlertConfig,
}

impl Default for ZoneGuardConfig {
    fn default() -> Self {
        Self {
            video_source: None,
            model_path: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            tracking_distance_threshold: DEFAULT_TRACKING_DISTANCE_THRESHOLD,
            max_disappeared_frames: DEFAULT_MAX_DISAPPEARED_FRAMES,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            zones_file: PathBuf::from(DEFAULT_ZONES_FILE),
            detection_classes: default_detection_classes(),
            alert_enabled: true,
            alert_type: AlertType::Console,
            alert_queue_capacity: DEFAULT_ALERT_QUEUE_CAPACITY,
            exit_on_disappear: false,
            event_db: None,
            mqtt: MqttAlertConfig::default(),
        }
    }
}

impl ZoneGuardConfig {
    /// Load from `path`, or the file named by `ZONE_GUARD_CONFIG`, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => ZoneGuardConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ZoneGuardConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let alert_type = match file.alert_type.as_deref() {
            Some(kind) => kind.parse()?,
            None => defaults.alert_type,
        };
        Ok(Self {
            video_source: file.video_source,
            model_path: file.model_path,
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            tracking_distance_threshold: file
                .tracking_distance_threshold
                .unwrap_or(defaults.tracking_distance_threshold),
            max_disappeared_frames: file
                .max_disappeared_frames
                .unwrap_or(defaults.max_disappeared_frames),
            log_file: file.log_file.unwrap_or(defaults.log_file),
            zones_file: file.zones_file.unwrap_or(defaults.zones_file),
            detection_classes: file
                .detection_classes
                .unwrap_or(defaults.detection_classes),
            alert_enabled: file.alert_enabled.unwrap_or(defaults.alert_enabled),
            alert_type,
            alert_queue_capacity: file
                .alert_queue_capacity
                .unwrap_or(defaults.alert_queue_capacity),
            exit_on_disappear: file
                .exit_on_disappear
                .unwrap_or(defaults.exit_on_disappear),
            event_db: file.event_db.filter(|db| !db.trim().is_empty()),
            mqtt: file.mqtt.unwrap_or(defaults.mqtt),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("ZONE_GUARD_LOG_FILE") {
            if !path.trim().is_empty() {
                self.log_file = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("ZONE_GUARD_ZONES_FILE") {
            if !path.trim().is_empty() {
                self.zones_file = PathBuf::from(path);
            }
        }
        if let Ok(value) = std::env::var("ZONE_GUARD_CONFIDENCE") {
            self.confidence_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("ZONE_GUARD_CONFIDENCE must be a number"))?;
        }
        if let Ok(value) = std::env::var("ZONE_GUARD_DISTANCE") {
            self.tracking_distance_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("ZONE_GUARD_DISTANCE must be a number of pixels"))?;
        }
        if let Ok(value) = std::env::var("ZONE_GUARD_MAX_DISAPPEARED") {
            self.max_disappeared_frames = value.trim().parse().map_err(|_| {
                anyhow!("ZONE_GUARD_MAX_DISAPPEARED must be a non-negative integer")
            })?;
        }
        if let Ok(value) = std::env::var("ZONE_GUARD_ALERT_TYPE") {
            if !value.trim().is_empty() {
                self.alert_type = value.parse()?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if !self.tracking_distance_threshold.is_finite() || self.tracking_distance_threshold <= 0.0
        {
            return Err(anyhow!(
                "tracking_distance_threshold must be a positive number, got {}",
                self.tracking_distance_threshold
            ));
        }
        if self.alert_queue_capacity == 0 {
            return Err(anyhow!("alert_queue_capacity must be greater than zero"));
        }
        if self.alert_enabled && self.alert_type == AlertType::Mqtt && self.mqtt.host.trim().is_empty()
        {
            return Err(anyhow!("mqtt.host is required when alert_type is mqtt"));
        }
        Ok(())
    }

    /// Effective alert channel once `alert_enabled` is taken into account.
    pub fn effective_alert_type(&self) -> AlertType {
        if self.alert_enabled {
            self.alert_type
        } else {
            AlertType::None
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            filter: DetectionFilter::new(self.confidence_threshold, &self.detection_classes),
            tracker: TrackerConfig {
                tracking_distance_threshold: self.tracking_distance_threshold,
                max_disappeared_frames: self.max_disappeared_frames,
            },
            disappear_policy: if self.exit_on_disappear {
                DisappearPolicy::EmitExited
            } else {
                DisappearPolicy::Silent
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<ZoneGuardConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ZoneGuardConfig::default();
        assert_eq!(cfg.confidence_threshold, 0.5);
        assert_eq!(cfg.tracking_distance_threshold, 50.0);
        assert_eq!(cfg.max_disappeared_frames, 0);
        assert_eq!(cfg.log_file, PathBuf::from("logs.csv"));
        assert_eq!(cfg.detection_classes.get("truck"), Some(&7));
        assert_eq!(cfg.effective_alert_type(), AlertType::Console);
        cfg.validate().unwrap();
    }

    #[test]
    fn alert_type_parses_case_insensitively() {
        assert_eq!("MQTT".parse::<AlertType>().unwrap(), AlertType::Mqtt);
        assert!("pager".parse::<AlertType>().is_err());
    }

    #[test]
    fn gui_alert_type_falls_back_to_console() {
        assert_eq!("gui".parse::<AlertType>().unwrap(), AlertType::Console);
        assert_eq!(" GUI ".parse::<AlertType>().unwrap(), AlertType::Console);
    }

    #[test]
    fn disabled_alerts_override_alert_type() {
        let cfg = ZoneGuardConfig {
            alert_enabled: false,
            alert_type: AlertType::Mqtt,
            ..ZoneGuardConfig::default()
        };
        assert_eq!(cfg.effective_alert_type(), AlertType::None);
    }

    #[test]
    fn pipeline_config_reflects_settings() {
        let cfg = ZoneGuardConfig {
            exit_on_disappear: true,
            max_disappeared_frames: 3,
            ..ZoneGuardConfig::default()
        };
        let pipeline = cfg.pipeline_config();
        assert_eq!(pipeline.disappear_policy, DisappearPolicy::EmitExited);
        assert_eq!(pipeline.tracker.max_disappeared_frames, 3);
        assert_eq!(pipeline.filter.confidence_threshold(), 0.5);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let bad_confidence = ZoneGuardConfig {
            confidence_threshold: 1.5,
            ..ZoneGuardConfig::default()
        };
        assert!(bad_confidence.validate().is_err());
        let bad_distance = ZoneGuardConfig {
            tracking_distance_threshold: f32::NAN,
            ..ZoneGuardConfig::default()
        };
        assert!(bad_distance.validate().is_err());
    }
}
