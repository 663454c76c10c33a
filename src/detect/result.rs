use std::fmt;

/// One detected object, in pixel coordinates of the frame it was found in.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Left edge of the bounding box, pixels.
    pub x: f32,
    /// Top edge of the bounding box, pixels.
    pub y: f32,
    /// Box width, pixels.
    pub width: f32,
    /// Box height, pixels.
    pub height: f32,
    /// Confidence score in 0.0..=1.0.
    pub confidence: f32,
    /// Coarse object class.
    pub class: ObjectClass,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Person,
    Vehicle,
    Animal,
    Package,
    Unknown,
}

impl ObjectClass {
    /// Lowercase label used in overlays, logs and config files.
    pub fn label(&self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Vehicle => "vehicle",
            ObjectClass::Animal => "animal",
            ObjectClass::Package => "package",
            ObjectClass::Unknown => "unknown",
        }
    }

    /// Parse a label back into a class. Case-insensitive; `None` for
    /// anything that is not a known label.
    pub fn parse_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "person" => Some(ObjectClass::Person),
            "vehicle" => Some(ObjectClass::Vehicle),
            "animal" => Some(ObjectClass::Animal),
            "package" => Some(ObjectClass::Package),
            "unknown" => Some(ObjectClass::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// All detections produced for a single frame.
///
/// `frame_seq` carries the sequence id of the frame the boxes belong to, so
/// consumers can tell whether a detection set matches the frame they hold.
#[derive(Clone, Debug, Default)]
pub struct Detections {
    pub frame_seq: u64,
    pub items: Vec<Detection>,
}

impl Detections {
    /// An empty detection set for the given frame.
    pub fn empty(frame_seq: u64) -> Self {
        Self {
            frame_seq,
            items: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for class in [
            ObjectClass::Person,
            ObjectClass::Vehicle,
            ObjectClass::Animal,
            ObjectClass::Package,
            ObjectClass::Unknown,
        ] {
            assert_eq!(ObjectClass::parse_label(class.label()), Some(class));
        }
    }

    #[test]
    fn parse_label_is_case_insensitive() {
        assert_eq!(ObjectClass::parse_label(" Person "), Some(ObjectClass::Person));
        assert_eq!(ObjectClass::parse_label("VEHICLE"), Some(ObjectClass::Vehicle));
        assert_eq!(ObjectClass::parse_label("bicycle"), None);
    }
}
