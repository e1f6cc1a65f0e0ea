use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cooldown::CooldownPolicy;

const DEFAULT_BACKEND_URL: &str = "http://localhost:3000/api/v1";
const DEFAULT_INTERNAL_KEY: &str = "internal-secret-key";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_FRAME_STRIDE: u32 = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_AREA_SQM: f64 = 50.0;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 640;
const DEFAULT_PERSON_CLASS_ID: u32 = 0;
const DEFAULT_MODEL_CONFIDENCE_FLOOR: f32 = 0.25;
const DEFAULT_MODEL_IOU_THRESHOLD: f32 = 0.45;

const DEFAULT_CLASS_NAMES: &[(u32, &str)] = &[
    (0, "person"),
    (1, "weapon"),
    (2, "fire"),
    (3, "fight"),
    (4, "panic"),
    (5, "crowd"),
    (6, "Jumping"),
    (7, "Running-Behavior"),
    (8, "Sitting"),
    (9, "Standing"),
    (10, "Unusual Hand Gesture"),
    (11, "Walking"),
    (12, "suspicious package"),
];
const DEFAULT_CRITICAL_CLASSES: &[u32] = &[1, 2, 3, 4, 12];
const DEFAULT_WARNING_CLASSES: &[u32] = &[5, 7, 10];

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    backend: Option<BackendConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertConfigFile>,
    stream: Option<StreamConfigFile>,
    classes: Option<ClassConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    base_url: Option<String>,
    internal_key: Option<String>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    frame_stride: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    default_area_sqm: Option<f64>,
    cooldown_policy: Option<CooldownPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    reconnect_backoff_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassConfigFile {
    /// Class id (as a string key) to display name.
    names: Option<BTreeMap<String, String>>,
    critical: Option<Vec<u32>>,
    warning: Option<Vec<u32>>,
    person_class_id: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_floor: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub backend: BackendSettings,
    pub detection: DetectionSettings,
    pub alerts: AlertSettings,
    pub stream: StreamSettings,
    pub classes: ClassSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub base_url: String,
    pub internal_key: String,
    pub request_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            internal_key: DEFAULT_INTERNAL_KEY.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub frame_stride: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            frame_stride: DEFAULT_FRAME_STRIDE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub default_area_sqm: f64,
    pub cooldown_policy: CooldownPolicy,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            default_area_sqm: DEFAULT_AREA_SQM,
            cooldown_policy: CooldownPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub reconnect_backoff: Duration,
    pub read_timeout: Duration,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            target_fps: DEFAULT_STREAM_FPS,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSettings {
    pub names: BTreeMap<u32, String>,
    pub critical: Vec<u32>,
    pub warning: Vec<u32>,
    pub person_class_id: u32,
}

impl Default for ClassSettings {
    fn default() -> Self {
        Self {
            names: DEFAULT_CLASS_NAMES
                .iter()
                .map(|(id, name)| (*id, name.to_string()))
                .collect(),
            critical: DEFAULT_CRITICAL_CLASSES.to_vec(),
            warning: DEFAULT_WARNING_CLASSES.to_vec(),
            person_class_id: DEFAULT_PERSON_CLASS_ID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackendKind {
    Stub,
    Tract,
}

impl FromStr for ModelBackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "stub" => Ok(ModelBackendKind::Stub),
            "tract" => Ok(ModelBackendKind::Tract),
            other => Err(anyhow!(
                "unknown model backend '{}'; expected 'stub' or 'tract'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub backend: ModelBackendKind,
    pub path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_floor: f32,
    pub iou_threshold: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: ModelBackendKind::Stub,
            path: None,
            input_width: DEFAULT_FRAME_WIDTH,
            input_height: DEFAULT_FRAME_HEIGHT,
            confidence_floor: DEFAULT_MODEL_CONFIDENCE_FLOOR,
            iou_threshold: DEFAULT_MODEL_IOU_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Load from `SENTINEL_CONFIG` (if set), apply env overrides, and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file path (if any), apply env overrides, and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Result<Self> {
        let backend_file = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            base_url: backend_file
                .base_url
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            internal_key: backend_file
                .internal_key
                .unwrap_or_else(|| DEFAULT_INTERNAL_KEY.to_string()),
            request_timeout: Duration::from_millis(
                backend_file
                    .request_timeout_ms
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            confidence_threshold: detection_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            frame_stride: detection_file.frame_stride.unwrap_or(DEFAULT_FRAME_STRIDE),
        };

        let alert_file = file.alerts.unwrap_or_default();
        let alerts = AlertSettings {
            cooldown: Duration::from_secs(alert_file.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS)),
            default_area_sqm: alert_file.default_area_sqm.unwrap_or(DEFAULT_AREA_SQM),
            cooldown_policy: alert_file.cooldown_policy.unwrap_or_default(),
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            reconnect_backoff: Duration::from_millis(
                stream_file
                    .reconnect_backoff_ms
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF_MS),
            ),
            read_timeout: Duration::from_millis(
                stream_file.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
            target_fps: stream_file.target_fps.unwrap_or(DEFAULT_STREAM_FPS),
            width: stream_file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: stream_file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
        };

        let class_file = file.classes.unwrap_or_default();
        let defaults = ClassSettings::default();
        let names = match class_file.names {
            Some(raw) => parse_class_names(raw)?,
            None => defaults.names,
        };
        let classes = ClassSettings {
            names,
            critical: class_file.critical.unwrap_or(defaults.critical),
            warning: class_file.warning.unwrap_or(defaults.warning),
            person_class_id: class_file.person_class_id.unwrap_or(defaults.person_class_id),
        };

        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            backend: match model_file.backend {
                Some(name) => name.parse()?,
                None => ModelBackendKind::Stub,
            },
            path: model_file.path,
            input_width: model_file.input_width.unwrap_or(stream.width),
            input_height: model_file.input_height.unwrap_or(stream.height),
            confidence_floor: model_file
                .confidence_floor
                .unwrap_or(DEFAULT_MODEL_CONFIDENCE_FLOOR),
            iou_threshold: model_file
                .iou_threshold
                .unwrap_or(DEFAULT_MODEL_IOU_THRESHOLD),
        };

        Ok(Self {
            backend,
            detection,
            alerts,
            stream,
            classes,
            model,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("SENTINEL_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(key) = non_empty_env("SENTINEL_INTERNAL_KEY") {
            self.backend.internal_key = key;
        }
        if let Some(value) = non_empty_env("SENTINEL_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Some(value) = non_empty_env("SENTINEL_FRAME_STRIDE") {
            self.detection.frame_stride = value
                .parse()
                .map_err(|_| anyhow!("SENTINEL_FRAME_STRIDE must be a positive integer"))?;
        }
        if let Some(value) = non_empty_env("SENTINEL_COOLDOWN_SECS") {
            let seconds: u64 = value.parse().map_err(|_| {
                anyhow!("SENTINEL_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alerts.cooldown = Duration::from_secs(seconds);
        }
        if let Some(value) = non_empty_env("SENTINEL_RECONNECT_BACKOFF_MS") {
            let millis: u64 = value.parse().map_err(|_| {
                anyhow!("SENTINEL_RECONNECT_BACKOFF_MS must be an integer number of milliseconds")
            })?;
            self.stream.reconnect_backoff = Duration::from_millis(millis);
        }
        if let Some(value) = non_empty_env("SENTINEL_MODEL_BACKEND") {
            self.model.backend = value.parse()?;
        }
        if let Some(path) = non_empty_env("SENTINEL_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.backend.base_url)
            .map_err(|e| anyhow!("invalid backend base_url '{}': {}", self.backend.base_url, e))?;

        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("confidence_threshold must be within [0, 1], got {}", threshold);
        }
        if self.detection.frame_stride == 0 {
            bail!("frame_stride must be greater than zero");
        }
        if self.alerts.cooldown.is_zero() {
            bail!("cooldown must be greater than zero");
        }
        if self.alerts.default_area_sqm.is_nan() || self.alerts.default_area_sqm < 0.0 {
            bail!("default_area_sqm must be a non-negative number");
        }
        if self.backend.request_timeout.is_zero() {
            bail!("request_timeout must be greater than zero");
        }

        let critical: BTreeSet<u32> = self.classes.critical.iter().copied().collect();
        let overlap: Vec<u32> = self
            .classes
            .warning
            .iter()
            .copied()
            .filter(|id| critical.contains(id))
            .collect();
        if !overlap.is_empty() {
            bail!(
                "class ids {:?} are listed as both critical and warning",
                overlap
            );
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_class_names(raw: BTreeMap<String, String>) -> Result<BTreeMap<u32, String>> {
    raw.into_iter()
        .map(|(id, name)| {
            let id: u32 = id
                .trim()
                .parse()
                .map_err(|_| anyhow!("class id '{}' is not a non-negative integer", id))?;
            Ok((id, name))
        })
        .collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        cfg.validate().expect("defaults are valid");
        assert_eq!(cfg.classes.names.get(&12).map(String::as_str), Some("suspicious package"));
        assert_eq!(cfg.detection.frame_stride, 5);
        assert_eq!(cfg.alerts.cooldown, Duration::from_secs(10));
    }

    #[test]
    fn overlapping_severity_sets_are_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.classes.warning.push(1);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("both critical and warning"));
    }

    #[test]
    fn zero_stride_and_bad_threshold_are_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.detection.frame_stride = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.detection.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn class_name_keys_must_be_integers() {
        let mut raw = BTreeMap::new();
        raw.insert("weapon".to_string(), "weapon".to_string());
        assert!(parse_class_names(raw).is_err());
    }

    #[test]
    fn model_backend_names_parse() {
        assert_eq!("Tract".parse::<ModelBackendKind>().unwrap(), ModelBackendKind::Tract);
        assert!("onnxruntime".parse::<ModelBackendKind>().is_err());
    }
}
