use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::ObjectClass;
use crate::pipeline::{DetectionSettings, PipelineConfig, RecordingSettings};
use crate::record::OutputFormat;
use crate::source::SourceSelector;

const DEFAULT_SOURCE: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_MODEL: &str = "stub://detector";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_DETECT_EVERY: u32 = 1;
const DEFAULT_OUTPUT_DIR: &str = "recordings";
const DEFAULT_SEGMENT_SECS: u64 = 600;

const MAX_DIMENSION: u32 = 8192;
const MAX_FPS: u32 = 240;

/// Capture sizes the CLI tools offer as presets.
pub const RESOLUTION_PRESETS: [(u32, u32); 3] = [(640, 480), (1280, 720), (1920, 1080)];
/// Frame rates the CLI tools offer as presets.
pub const SUPPORTED_FPS: [u32; 3] = [15, 30, 60];

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    detection: Option<DetectionConfigFile>,
    recording: Option<RecordingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    enabled: Option<bool>,
    model: Option<String>,
    confidence_threshold: Option<f32>,
    classes: Option<Vec<String>>,
    detect_every: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    output_dir: Option<PathBuf>,
    format: Option<String>,
    segment_secs: Option<u64>,
}

/// Load configuration: file named by `CAMWATCH_CONFIG` (if any), then
/// `CAMWATCH_*` environment overrides, then validation.
pub fn load() -> Result<PipelineConfig> {
    let config_path = std::env::var("CAMWATCH_CONFIG").ok().map(PathBuf::from);
    load_with_file(config_path.as_deref())
}

/// Like [`load`] with an explicit config file path (e.g. from a CLI flag)
/// taking precedence over `CAMWATCH_CONFIG`.
pub fn load_with_file(path: Option<&Path>) -> Result<PipelineConfig> {
    let file_cfg = match path {
        Some(path) => Some(read_config_file(path)?),
        None => None,
    };
    let mut cfg = from_file(file_cfg.unwrap_or_default())?;
    apply_env(&mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn from_file(file: CamwatchConfigFile) -> Result<PipelineConfig> {
    let detection = DetectionSettings {
        enabled: file
            .detection
            .as_ref()
            .and_then(|detection| detection.enabled)
            .unwrap_or(false),
        model: file
            .detection
            .as_ref()
            .and_then(|detection| detection.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        confidence_threshold: file
            .detection
            .as_ref()
            .and_then(|detection| detection.confidence_threshold)
            .unwrap_or(DEFAULT_CONFIDENCE),
        class_filter: match file.detection.as_ref().and_then(|d| d.classes.clone()) {
            Some(labels) => Some(parse_class_labels(&labels)?),
            None => None,
        },
        detect_every: file
            .detection
            .as_ref()
            .and_then(|detection| detection.detect_every)
            .unwrap_or(DEFAULT_DETECT_EVERY),
    };
    let recording = RecordingSettings {
        output_dir: file
            .recording
            .as_ref()
            .and_then(|recording| recording.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        format: match file.recording.as_ref().and_then(|r| r.format.clone()) {
            Some(raw) => OutputFormat::parse(&raw).map_err(|err| anyhow!("{err}"))?,
            None => OutputFormat::Mp4,
        },
        segment_duration: Duration::from_secs(
            file.recording
                .and_then(|recording| recording.segment_secs)
                .unwrap_or(DEFAULT_SEGMENT_SECS),
        ),
    };
    Ok(PipelineConfig {
        source: file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        width: file.width.unwrap_or(DEFAULT_WIDTH),
        height: file.height.unwrap_or(DEFAULT_HEIGHT),
        fps: file.fps.unwrap_or(DEFAULT_FPS),
        detection,
        recording,
    })
}

fn apply_env(cfg: &mut PipelineConfig) -> Result<()> {
    if let Ok(source) = std::env::var("CAMWATCH_SOURCE") {
        if !source.trim().is_empty() {
            cfg.source = source;
        }
    }
    if let Ok(width) = std::env::var("CAMWATCH_WIDTH") {
        cfg.width = width
            .parse()
            .map_err(|_| anyhow!("CAMWATCH_WIDTH must be an integer number of pixels"))?;
    }
    if let Ok(height) = std::env::var("CAMWATCH_HEIGHT") {
        cfg.height = height
            .parse()
            .map_err(|_| anyhow!("CAMWATCH_HEIGHT must be an integer number of pixels"))?;
    }
    if let Ok(fps) = std::env::var("CAMWATCH_FPS") {
        cfg.fps = fps
            .parse()
            .map_err(|_| anyhow!("CAMWATCH_FPS must be an integer frame rate"))?;
    }
    if let Ok(enabled) = std::env::var("CAMWATCH_DETECT") {
        cfg.detection.enabled = parse_bool(&enabled)
            .ok_or_else(|| anyhow!("CAMWATCH_DETECT must be a boolean (true/false)"))?;
    }
    if let Ok(model) = std::env::var("CAMWATCH_MODEL") {
        if !model.trim().is_empty() {
            cfg.detection.model = model;
        }
    }
    if let Ok(confidence) = std::env::var("CAMWATCH_CONFIDENCE") {
        cfg.detection.confidence_threshold = confidence
            .parse()
            .map_err(|_| anyhow!("CAMWATCH_CONFIDENCE must be a number in 0.0..=1.0"))?;
    }
    if let Ok(classes) = std::env::var("CAMWATCH_CLASSES") {
        let labels = split_csv(&classes);
        if !labels.is_empty() {
            cfg.detection.class_filter = Some(parse_class_labels(&labels)?);
        }
    }
    if let Ok(every) = std::env::var("CAMWATCH_DETECT_EVERY") {
        cfg.detection.detect_every = every
            .parse()
            .map_err(|_| anyhow!("CAMWATCH_DETECT_EVERY must be an integer"))?;
    }
    if let Ok(dir) = std::env::var("CAMWATCH_OUTPUT_DIR") {
        if !dir.trim().is_empty() {
            cfg.recording.output_dir = PathBuf::from(dir);
        }
    }
    if let Ok(format) = std::env::var("CAMWATCH_FORMAT") {
        cfg.recording.format = OutputFormat::parse(&format).map_err(|err| anyhow!("{err}"))?;
    }
    if let Ok(secs) = std::env::var("CAMWATCH_SEGMENT_SECS") {
        let seconds: u64 = secs
            .parse()
            .map_err(|_| anyhow!("CAMWATCH_SEGMENT_SECS must be an integer number of seconds"))?;
        cfg.recording.segment_duration = Duration::from_secs(seconds);
    }
    Ok(())
}

fn validate(cfg: &PipelineConfig) -> Result<()> {
    SourceSelector::parse(&cfg.source)?;
    if cfg.width == 0 || cfg.width > MAX_DIMENSION {
        return Err(anyhow!("width must be in 1..={MAX_DIMENSION}"));
    }
    if cfg.height == 0 || cfg.height > MAX_DIMENSION {
        return Err(anyhow!("height must be in 1..={MAX_DIMENSION}"));
    }
    if cfg.fps == 0 || cfg.fps > MAX_FPS {
        return Err(anyhow!("fps must be in 1..={MAX_FPS}"));
    }
    let threshold = cfg.detection.confidence_threshold;
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(anyhow!("confidence_threshold must be in 0.0..=1.0"));
    }
    if cfg.detection.detect_every == 0 {
        return Err(anyhow!("detect_every must be at least 1"));
    }
    if cfg.recording.segment_duration.as_secs() == 0 {
        return Err(anyhow!("segment_secs must be greater than zero"));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

/// Parse a comma-separated class list, e.g. `"person,vehicle"`.
pub fn parse_class_list(raw: &str) -> Result<Vec<ObjectClass>> {
    let labels = split_csv(raw);
    if labels.is_empty() {
        return Err(anyhow!("class list is empty"));
    }
    parse_class_labels(&labels)
}

fn parse_class_labels(labels: &[String]) -> Result<Vec<ObjectClass>> {
    labels
        .iter()
        .map(|label| {
            ObjectClass::parse_label(label).ok_or_else(|| {
                anyhow!(
                    "unknown object class '{}' (expected person, vehicle, animal, package or unknown)",
                    label
                )
            })
        })
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
