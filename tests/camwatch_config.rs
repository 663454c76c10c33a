use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camwatch::config;
use camwatch::{ObjectClass, OutputFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMWATCH_CONFIG",
        "CAMWATCH_SOURCE",
        "CAMWATCH_WIDTH",
        "CAMWATCH_HEIGHT",
        "CAMWATCH_FPS",
        "CAMWATCH_DETECT",
        "CAMWATCH_MODEL",
        "CAMWATCH_CONFIDENCE",
        "CAMWATCH_CLASSES",
        "CAMWATCH_DETECT_EVERY",
        "CAMWATCH_OUTPUT_DIR",
        "CAMWATCH_FORMAT",
        "CAMWATCH_SEGMENT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "stub://clip?frames=25",
        "width": 1280,
        "height": 720,
        "fps": 15,
        "detection": {
            "enabled": true,
            "model": "stub://detector",
            "confidence_threshold": 0.5,
            "classes": ["person", "vehicle"]
        },
        "recording": {
            "output_dir": "clips",
            "format": "cwr",
            "segment_secs": 120
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_FPS", "60");
    std::env::set_var("CAMWATCH_CONFIDENCE", "0.75");

    let cfg = config::load().expect("load config");

    assert_eq!(cfg.source, "stub://clip?frames=25");
    assert_eq!((cfg.width, cfg.height), (1280, 720));
    assert_eq!(cfg.fps, 60);
    assert!(cfg.detection.enabled);
    assert_eq!(cfg.detection.model, "stub://detector");
    assert_eq!(cfg.detection.confidence_threshold, 0.75);
    assert_eq!(
        cfg.detection.class_filter,
        Some(vec![ObjectClass::Person, ObjectClass::Vehicle])
    );
    assert_eq!(cfg.recording.output_dir, PathBuf::from("clips"));
    assert_eq!(cfg.recording.format, OutputFormat::Cwr);
    assert_eq!(cfg.recording.segment_duration, Duration::from_secs(120));

    clear_env();
}

#[test]
fn environment_overrides_defaults_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMWATCH_SOURCE", "/dev/video3");
    std::env::set_var("CAMWATCH_DETECT", "on");
    std::env::set_var("CAMWATCH_CLASSES", "person, package");
    std::env::set_var("CAMWATCH_FORMAT", "avi");
    std::env::set_var("CAMWATCH_SEGMENT_SECS", "45");

    let cfg = config::load().expect("load config");

    assert_eq!(cfg.source, "/dev/video3");
    assert_eq!((cfg.width, cfg.height, cfg.fps), (640, 480, 30));
    assert!(cfg.detection.enabled);
    assert_eq!(
        cfg.detection.class_filter,
        Some(vec![ObjectClass::Person, ObjectClass::Package])
    );
    assert_eq!(cfg.recording.format, OutputFormat::Avi);
    assert_eq!(cfg.recording.segment_duration, Duration::from_secs(45));

    clear_env();
}

#[test]
fn explicit_config_path_wins_over_the_environment_pointer() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut env_file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut env_file, br#"{"fps": 15}"#).expect("write config");
    let mut flag_file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut flag_file, br#"{"fps": 60}"#).expect("write config");

    std::env::set_var("CAMWATCH_CONFIG", env_file.path());

    let cfg = config::load_with_file(Some(flag_file.path())).expect("load config");
    assert_eq!(cfg.fps, 60);

    clear_env();
}

#[test]
fn invalid_environment_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMWATCH_FPS", "fast");
    assert!(config::load().is_err());
    clear_env();

    std::env::set_var("CAMWATCH_CONFIDENCE", "1.5");
    assert!(config::load().is_err());
    clear_env();

    std::env::set_var("CAMWATCH_CLASSES", "person,dragon");
    assert!(config::load().is_err());
    clear_env();

    std::env::set_var("CAMWATCH_FORMAT", "mkv");
    assert!(config::load().is_err());

    clear_env();
}
