//! Integration tests for live capture through `PipelineController`.
//!
//! These tests verify that:
//! 1. Frames flow from a live source and stop returns the pipeline to idle
//! 2. Published detections always describe the frame they are paired with
//! 3. Detection can be switched on and off while capturing
//! 4. Stop interrupts a blocked read instead of waiting out the frame
//! 5. Source death surfaces as the error state with a stable reason code
//! 6. Filter commands sent at runtime narrow and restore the published boxes

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use camwatch::{PipelineConfig, PipelineController, PipelineState};

fn live_config(source: &str, fps: u32) -> PipelineConfig {
    PipelineConfig {
        source: source.to_string(),
        width: 64,
        height: 48,
        fps,
        ..PipelineConfig::default()
    }
}

/// Poll `ready` until it returns true or the deadline passes.
fn wait_for(deadline: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn frames_flow_and_stop_returns_to_idle() {
    let controller =
        PipelineController::start(live_config("stub://camera", 100)).expect("start pipeline");

    assert!(
        wait_for(Duration::from_secs(5), || controller
            .status()
            .frames_published
            >= 3),
        "no frames arrived within the deadline"
    );
    assert_eq!(controller.state(), PipelineState::Capturing);

    let published = controller.latest().expect("a published frame");
    assert_eq!((published.frame.width, published.frame.height), (64, 48));
    assert!(
        published.detections.is_none(),
        "detection is off by default"
    );

    let final_status = controller.stop().expect("stop pipeline");
    assert_eq!(final_status.state, PipelineState::Idle);
    assert!(final_status.frames_published >= 3);
    assert!(final_status.recording.is_none());
    assert!(
        !final_status.finished,
        "live capture never finishes on its own"
    );
}

#[test]
fn published_detections_describe_their_own_frame() {
    let mut config = live_config("stub://camera", 100);
    config.detection.enabled = true;

    let controller = PipelineController::start(config).expect("start pipeline");

    // Watch a handful of distinct frames; every one must carry detections
    // computed from exactly that frame, never a neighbor's.
    let mut seen = BTreeSet::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.len() < 5 && Instant::now() < deadline {
        if let Some(published) = controller.latest() {
            let detections = published
                .detections
                .as_ref()
                .expect("detection runs on every frame when enabled");
            assert_eq!(
                detections.frame_seq, published.frame.seq,
                "published detections must describe the published frame"
            );
            seen.insert(published.frame.seq);
        }
        std::thread::sleep(Duration::from_millis(7));
    }
    assert!(seen.len() >= 5, "expected a stream of distinct frames");

    controller.stop().expect("stop pipeline");
}

#[test]
fn detection_toggles_while_capturing() {
    let controller =
        PipelineController::start(live_config("stub://camera", 100)).expect("start pipeline");

    assert!(wait_for(Duration::from_secs(5), || controller
        .latest()
        .is_some()));
    let plain = controller.latest().expect("a published frame");
    assert!(plain.detections.is_none());

    controller.enable_detection();
    assert!(
        wait_for(Duration::from_secs(5), || controller
            .latest()
            .is_some_and(|published| published.detections.is_some())),
        "no detections appeared after enable"
    );

    let tagged_seq = controller.latest().expect("a published frame").frame.seq;
    controller.disable_detection();
    assert!(
        wait_for(Duration::from_secs(5), || controller.latest().is_some_and(
            |published| published.frame.seq > tagged_seq && published.detections.is_none()
        )),
        "frames kept carrying detections after disable"
    );

    controller.stop().expect("stop pipeline");
}

#[test]
fn runtime_filter_commands_narrow_and_restore_published_boxes() {
    let mut config = live_config("stub://camera", 100);
    config.detection.enabled = true;

    let controller = PipelineController::start(config).expect("start pipeline");

    assert!(
        wait_for(Duration::from_secs(5), || controller
            .latest()
            .is_some_and(|published| published.detections.is_some())),
        "no detections appeared"
    );

    // An empty allow list drops every box no matter how confident the
    // detector is about it.
    let tagged_seq = controller.latest().expect("a published frame").frame.seq;
    controller.set_confidence_threshold(0.0);
    controller.set_class_filter(Some(Vec::new()));

    // Commands are picked up between frames; allow one in-flight frame,
    // then every published set must come back empty.
    let mut emptied = BTreeSet::new();
    assert!(
        wait_for(Duration::from_secs(5), || {
            if let Some(published) = controller.latest() {
                if published.frame.seq > tagged_seq + 1 {
                    let detections = published
                        .detections
                        .as_ref()
                        .expect("detection stays enabled while filtered");
                    assert!(
                        detections.items.is_empty(),
                        "frame {} still carries boxes past the empty class filter",
                        detections.frame_seq
                    );
                    emptied.insert(published.frame.seq);
                }
            }
            emptied.len() >= 5
        }),
        "expected a stream of filtered frames"
    );

    // Clearing the filter lets boxes through again; the zeroed threshold
    // passes whatever the detector reports.
    let restored_seq = controller.latest().expect("a published frame").frame.seq;
    controller.set_class_filter(None);
    assert!(
        wait_for(Duration::from_secs(5), || controller.latest().is_some_and(
            |published| published.frame.seq > restored_seq + 1
                && published
                    .detections
                    .as_ref()
                    .is_some_and(|detections| !detections.items.is_empty())
        )),
        "no boxes reappeared after the class filter was cleared"
    );

    controller.stop().expect("stop pipeline");
}

#[test]
fn stop_interrupts_a_blocked_live_read() {
    // At 1 fps an uninterrupted read blocks for about a second.
    let controller =
        PipelineController::start(live_config("stub://camera", 1)).expect("start pipeline");

    assert!(wait_for(Duration::from_secs(3), || controller
        .latest()
        .is_some()));

    let begun = Instant::now();
    let final_status = controller.stop().expect("stop pipeline");
    assert!(
        begun.elapsed() < Duration::from_millis(500),
        "stop must interrupt the in-flight read, not wait out the frame interval"
    );
    assert_eq!(final_status.state, PipelineState::Idle);
}

#[test]
fn source_death_surfaces_error_with_stable_code() {
    let controller = PipelineController::start(live_config("stub://camera?fail-after=3", 100))
        .expect("start pipeline");

    assert!(
        wait_for(Duration::from_secs(5), || controller.state()
            == PipelineState::Error),
        "pipeline should die once the source stops producing frames"
    );

    let status = controller.status();
    assert_eq!(status.frames_published, 3);
    assert!(status.recording.is_none());
    let report = status.last_error.expect("an error report");
    assert_eq!(report.code, "SOURCE_UNAVAILABLE");

    // Stop still joins the worker cleanly after a fatal error.
    let final_status = controller.stop().expect("stop pipeline");
    assert_eq!(final_status.state, PipelineState::Error);
}
