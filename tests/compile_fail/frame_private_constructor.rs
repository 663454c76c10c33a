// Rationale: frames are minted by capture sources, never constructed by callers.
use camwatch::{Frame, PixelFormat};

fn main() {
    let _frame = Frame::new(vec![0u8; 12], 2, 2, PixelFormat::Rgb24, 0, 0);
}
