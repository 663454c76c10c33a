// Rationale: frame pixel bytes must remain private and only readable through data().
use camwatch::Frame;

fn main() {
    let frame: Frame = unsafe { std::mem::MaybeUninit::zeroed().assume_init() };
    let _bytes = frame.data;
}
