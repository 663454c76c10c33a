// Rationale: frames must not be serialized wholesale; persistence goes through SegmentWriter.
use camwatch::Frame;
use serde::Serialize;

#[derive(Serialize)]
struct Wrapper {
    frame: Frame,
}

fn main() {}
