// Rationale: the segment container codec is an implementation detail of the record module.
use camwatch::record::container::ContainerReader;

fn main() {
    let _reader = ContainerReader::open("clip.cwr");
}
