//! Integration tests for file playback through `PipelineController`.
//!
//! These tests verify that:
//! 1. Playback ends exactly once in the stopped state with finished latched
//! 2. Playback is paced to the media's native rate
//! 3. Pause holds the position and resume continues from it
//! 4. Seek repositions playback and shows the reached frame even paused
//! 5. A corrupt recording fails at start with a stable reason code

use std::time::{Duration, Instant};

use camwatch::{PipelineConfig, PipelineController, PipelineState};

fn clip_config(selector: &str) -> PipelineConfig {
    PipelineConfig {
        source: selector.to_string(),
        width: 16,
        height: 16,
        fps: 100,
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
fn playback_finishes_exactly_once_and_ends_stopped() {
    let controller =
        PipelineController::start(clip_config("stub://clip?frames=10&fps=100&width=16&height=16"))
            .expect("start pipeline");

    assert!(
        wait_for(Duration::from_secs(10), || controller.status().finished),
        "playback never finished"
    );
    let status = controller.status();
    assert_eq!(status.state, PipelineState::Stopped);
    assert_eq!(status.frames_published, 10);
    assert!(status.last_error.is_none());
    let position = status.position.expect("file playback reports a position");
    assert_eq!(position.frame_index, 9);
    assert_eq!(position.total_frames, Some(10));

    // finished stays latched and nothing publishes after the end.
    std::thread::sleep(Duration::from_millis(50));
    let later = controller.status();
    assert!(later.finished);
    assert_eq!(later.frames_published, 10);

    let final_status = controller.stop().expect("stop pipeline");
    assert_eq!(final_status.state, PipelineState::Stopped);
    assert!(final_status.finished);
}

#[test]
fn playback_is_paced_to_the_media_rate() {
    // Ten frames at 10 fps is about a second of playback; finishing in a
    // few milliseconds would mean pacing is broken.
    let started = Instant::now();
    let controller =
        PipelineController::start(clip_config("stub://clip?frames=10&fps=10&width=16&height=16"))
            .expect("start pipeline");
    assert!(
        wait_for(Duration::from_secs(10), || controller.status().finished),
        "playback never finished"
    );
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(700),
        "ten frames at 10 fps finished in {elapsed:?}"
    );
    controller.stop().expect("stop pipeline");
}

#[test]
fn pause_holds_the_position_and_resume_continues() {
    let controller = PipelineController::start(clip_config(
        "stub://clip?frames=500&fps=100&width=16&height=16",
    ))
    .expect("start pipeline");

    assert!(wait_for(Duration::from_secs(5), || controller
        .status()
        .frames_published
        >= 5));
    controller.pause();
    assert!(wait_for(Duration::from_secs(5), || controller.state()
        == PipelineState::Paused));

    let held = controller.status().position.expect("position during playback");
    std::thread::sleep(Duration::from_millis(150));
    let still = controller.status().position.expect("position while paused");
    assert_eq!(
        still.frame_index, held.frame_index,
        "pause must hold the position"
    );

    controller.resume();
    assert!(
        wait_for(Duration::from_secs(5), || controller
            .status()
            .position
            .is_some_and(|position| position.frame_index > held.frame_index)),
        "playback did not continue after resume"
    );
    assert_eq!(controller.state(), PipelineState::Capturing);

    controller.stop().expect("stop pipeline");
}

#[test]
fn seek_repositions_and_shows_the_reached_frame_while_paused() {
    let controller = PipelineController::start(clip_config(
        "stub://clip?frames=200&fps=100&width=16&height=16",
    ))
    .expect("start pipeline");

    assert!(wait_for(Duration::from_secs(5), || controller
        .status()
        .frames_published
        >= 2));
    controller.pause();
    assert!(wait_for(Duration::from_secs(5), || controller.state()
        == PipelineState::Paused));

    controller.seek(150);
    assert!(
        wait_for(Duration::from_secs(5), || controller
            .latest()
            .is_some_and(|published| published.frame.seq == 150)),
        "the frame at the seek target was never shown"
    );
    assert_eq!(
        controller.state(),
        PipelineState::Paused,
        "seek must not unpause playback"
    );
    let position = controller.status().position.expect("position after seek");
    assert_eq!(position.frame_index, 150);

    // Resume plays on from the new position, not the old one.
    controller.resume();
    assert!(wait_for(Duration::from_secs(5), || controller
        .status()
        .position
        .is_some_and(|position| position.frame_index > 150)));

    controller.stop().expect("stop pipeline");
}

#[test]
fn corrupt_recording_fails_at_start_with_stable_code() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("mangled.cwr");
    std::fs::write(&path, b"this is not a recording at all").expect("write junk");

    let config = clip_config(path.to_str().expect("utf8 path"));
    let err = PipelineController::start(config).expect_err("corrupt media must not start");
    assert_eq!(err.code(), "SOURCE_UNAVAILABLE");
}
