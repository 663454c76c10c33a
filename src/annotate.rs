//! Overlay rendering: bounding boxes and class labels drawn straight into
//! RGB24 pixels. Pure with respect to its inputs; the source frame is never
//! modified.

use crate::detect::{Detection, Detections};
use crate::frame::Frame;

const GLYPH_ROWS: usize = 12;
const GLYPH_ADVANCE: usize = 8;
const LABEL_STRIP_HEIGHT: usize = GLYPH_ROWS + 2;

/// Colors and line weight for the overlay.
#[derive(Clone, Debug)]
pub struct AnnotationStyle {
    /// Box edge color, RGB.
    pub box_color: [u8; 3],
    /// Label text color, RGB.
    pub text_color: [u8; 3],
    /// Label background color, RGB.
    pub label_background: [u8; 3],
    /// Box edge thickness in pixels.
    pub thickness: u32,
    /// Append the confidence percentage to the label.
    pub show_confidence: bool,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            box_color: [255, 0, 0],
            text_color: [255, 255, 255],
            label_background: [0, 0, 0],
            thickness: 3,
            show_confidence: true,
        }
    }
}

/// Draw every detection onto a copy of `frame` and return the copy.
///
/// Boxes are drawn in input order, so later detections paint over earlier
/// ones where they overlap. Boxes are clamped to the frame; degenerate
/// boxes are skipped. With no detections the frame is returned unchanged
/// (metadata included).
pub fn annotate(frame: &Frame, detections: &Detections, style: &AnnotationStyle) -> Frame {
    if detections.items.is_empty() {
        return frame.clone();
    }

    let width = frame.width as usize;
    let height = frame.height as usize;
    let mut pixels = frame.data().to_vec();

    for det in &detections.items {
        draw_detection(&mut pixels, width, height, det, style);
    }

    frame.with_pixels(pixels)
}

fn draw_detection(
    pixels: &mut [u8],
    width: usize,
    height: usize,
    det: &Detection,
    style: &AnnotationStyle,
) {
    if width == 0 || height == 0 {
        return;
    }

    let x1 = (det.x.floor() as i64).clamp(0, width as i64 - 1);
    let y1 = (det.y.floor() as i64).clamp(0, height as i64 - 1);
    let x2 = ((det.x + det.width).ceil() as i64).clamp(0, width as i64 - 1);
    let y2 = ((det.y + det.height).ceil() as i64).clamp(0, height as i64 - 1);

    if x1 >= x2 || y1 >= y2 {
        return;
    }

    let t = style.thickness.max(1) as i64;

    // Top, bottom, left, right edges.
    for y in y1..=(y1 + t - 1).min(y2) {
        for x in x1..=x2 {
            put_pixel(pixels, width, x as usize, y as usize, style.box_color);
        }
    }
    for y in (y2 - t + 1).max(y1)..=y2 {
        for x in x1..=x2 {
            put_pixel(pixels, width, x as usize, y as usize, style.box_color);
        }
    }
    for x in x1..=(x1 + t - 1).min(x2) {
        for y in y1..=y2 {
            put_pixel(pixels, width, x as usize, y as usize, style.box_color);
        }
    }
    for x in (x2 - t + 1).max(x1)..=x2 {
        for y in y1..=y2 {
            put_pixel(pixels, width, x as usize, y as usize, style.box_color);
        }
    }

    let text = if style.show_confidence {
        format!("{} {:.0}%", det.class.label(), det.confidence * 100.0)
    } else {
        det.class.label().to_string()
    };
    draw_label(pixels, width, height, x1 as usize, y1 as usize, &text, style);
}

fn draw_label(
    pixels: &mut [u8],
    width: usize,
    height: usize,
    box_x: usize,
    box_y: usize,
    text: &str,
    style: &AnnotationStyle,
) {
    // Above the box when there is room, inside it when the box touches the
    // top of the frame.
    let strip_top = if box_y >= LABEL_STRIP_HEIGHT {
        box_y - LABEL_STRIP_HEIGHT
    } else {
        box_y
    };

    let strip_width = text.chars().count() * GLYPH_ADVANCE + 2;
    for y in strip_top..(strip_top + LABEL_STRIP_HEIGHT).min(height) {
        for x in box_x..(box_x + strip_width).min(width) {
            put_pixel(pixels, width, x, y, style.label_background);
        }
    }

    draw_text(
        pixels,
        width,
        height,
        text,
        box_x + 1,
        strip_top + 1,
        style.text_color,
    );
}

fn draw_text(
    pixels: &mut [u8],
    width: usize,
    height: usize,
    text: &str,
    start_x: usize,
    start_y: usize,
    color: [u8; 3],
) {
    let mut x = start_x;
    for ch in text.chars() {
        if let Some(pattern) = glyph(ch) {
            for (row, bits) in pattern.iter().enumerate() {
                let py = start_y + row;
                if py >= height {
                    break;
                }
                for col in 0..GLYPH_ADVANCE {
                    let px = x + col;
                    if px >= width {
                        break;
                    }
                    if (bits >> (7 - col)) & 1 == 1 {
                        put_pixel(pixels, width, px, py, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
        if x >= width {
            break;
        }
    }
}

#[inline]
fn put_pixel(pixels: &mut [u8], width: usize, x: usize, y: usize, color: [u8; 3]) {
    let idx = (y * width + x) * 3;
    pixels[idx..idx + 3].copy_from_slice(&color);
}

/// 8x12 bitmap glyphs, one byte per row, MSB leftmost. Covers the characters
/// the label text can contain; anything else renders as a blank advance.
fn glyph(ch: char) -> Option<[u8; GLYPH_ROWS]> {
    Some(match ch {
        'a' => [0x00, 0x00, 0x00, 0x3C, 0x02, 0x3E, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'b' => [0x00, 0x40, 0x40, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x62, 0x5C, 0x00, 0x00],
        'c' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x40, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'd' => [0x00, 0x02, 0x02, 0x3A, 0x46, 0x42, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'e' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x7E, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'g' => [0x00, 0x00, 0x00, 0x3A, 0x46, 0x42, 0x46, 0x3A, 0x02, 0x3C, 0x00, 0x00],
        'h' => [0x00, 0x40, 0x40, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'i' => [0x00, 0x08, 0x00, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'k' => [0x00, 0x40, 0x40, 0x44, 0x48, 0x70, 0x48, 0x44, 0x42, 0x41, 0x00, 0x00],
        'l' => [0x00, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'm' => [0x00, 0x00, 0x00, 0x76, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x00, 0x00],
        'n' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'o' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'p' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x42, 0x62, 0x5C, 0x40, 0x40, 0x00, 0x00],
        'r' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x40, 0x40, 0x40, 0x40, 0x40, 0x00, 0x00],
        's' => [0x00, 0x00, 0x00, 0x3E, 0x40, 0x3C, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        't' => [0x00, 0x10, 0x10, 0x7C, 0x10, 0x10, 0x10, 0x10, 0x10, 0x0C, 0x00, 0x00],
        'u' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'v' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x24, 0x24, 0x18, 0x18, 0x00, 0x00],
        'w' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x5A, 0x66, 0x42, 0x42, 0x00, 0x00],
        'x' => [0x00, 0x00, 0x00, 0x42, 0x24, 0x18, 0x18, 0x24, 0x42, 0x42, 0x00, 0x00],
        'y' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x26, 0x1A, 0x02, 0x3C, 0x00, 0x00],
        '0' => [0x00, 0x3C, 0x42, 0x46, 0x4A, 0x52, 0x62, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '1' => [0x00, 0x08, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        '2' => [0x00, 0x3C, 0x42, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x7E, 0x00, 0x00],
        '3' => [0x00, 0x3C, 0x42, 0x02, 0x1C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '4' => [0x00, 0x04, 0x0C, 0x14, 0x24, 0x44, 0x7E, 0x04, 0x04, 0x04, 0x00, 0x00],
        '5' => [0x00, 0x7E, 0x40, 0x40, 0x7C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '6' => [0x00, 0x1C, 0x20, 0x40, 0x7C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '7' => [0x00, 0x7E, 0x02, 0x04, 0x08, 0x08, 0x10, 0x10, 0x20, 0x20, 0x00, 0x00],
        '8' => [0x00, 0x3C, 0x42, 0x42, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '9' => [0x00, 0x3C, 0x42, 0x42, 0x42, 0x3E, 0x02, 0x04, 0x08, 0x70, 0x00, 0x00],
        ':' => [0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00],
        '%' => [0x00, 0x62, 0x64, 0x08, 0x10, 0x10, 0x20, 0x26, 0x46, 0x00, 0x00, 0x00],
        ' ' => [0x00; GLYPH_ROWS],
        _ => return None,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;
    use crate::frame::make_test_frame;

    fn detection(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            class: ObjectClass::Person,
        }
    }

    fn pixel(frame: &Frame, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * frame.width as usize + x) * 3;
        [frame.data()[idx], frame.data()[idx + 1], frame.data()[idx + 2]]
    }

    #[test]
    fn input_frame_is_never_modified() {
        let frame = make_test_frame(64, 48, 1);
        let before = frame.data().to_vec();
        let detections = Detections {
            frame_seq: 1,
            items: vec![detection(10.0, 20.0, 30.0, 20.0)],
        };

        let out = annotate(&frame, &detections, &AnnotationStyle::default());
        assert_eq!(frame.data(), &before[..]);
        assert_ne!(out.data(), frame.data());
        assert_eq!(out.seq, frame.seq);
        assert_eq!(out.pts_ms, frame.pts_ms);
    }

    #[test]
    fn no_detections_leaves_pixels_untouched() {
        let frame = make_test_frame(32, 24, 2);
        let out = annotate(&frame, &Detections::empty(2), &AnnotationStyle::default());
        assert_eq!(out.data(), frame.data());
    }

    #[test]
    fn box_edges_are_painted_and_interior_is_not() {
        let frame = make_test_frame(64, 64, 0);
        let style = AnnotationStyle {
            thickness: 1,
            ..AnnotationStyle::default()
        };
        let detections = Detections {
            frame_seq: 0,
            items: vec![detection(20.0, 30.0, 20.0, 20.0)],
        };

        let out = annotate(&frame, &detections, &style);
        assert_eq!(pixel(&out, 20, 30), style.box_color);
        assert_eq!(pixel(&out, 40, 50), style.box_color);
        // Interior stays as the source produced it.
        assert_eq!(pixel(&out, 30, 40), pixel(&frame, 30, 40));
    }

    #[test]
    fn oversized_boxes_are_clamped_not_panicking() {
        let frame = make_test_frame(32, 24, 0);
        let detections = Detections {
            frame_seq: 0,
            items: vec![detection(-50.0, -50.0, 500.0, 500.0)],
        };

        let out = annotate(&frame, &detections, &AnnotationStyle::default());
        assert_eq!(pixel(&out, 0, 23), AnnotationStyle::default().box_color);
        assert_eq!(pixel(&out, 31, 23), AnnotationStyle::default().box_color);
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let frame = make_test_frame(32, 24, 0);
        let detections = Detections {
            frame_seq: 0,
            items: vec![detection(10.0, 10.0, 0.0, 0.0)],
        };

        let out = annotate(&frame, &detections, &AnnotationStyle::default());
        assert_eq!(out.data(), frame.data());
    }

    #[test]
    fn label_strip_is_drawn_above_the_box() {
        let frame = make_test_frame(128, 96, 0);
        let style = AnnotationStyle::default();
        let detections = Detections {
            frame_seq: 0,
            items: vec![detection(10.0, 40.0, 40.0, 30.0)],
        };

        let out = annotate(&frame, &detections, &style);
        // Strip starts LABEL_STRIP_HEIGHT rows above the box top.
        assert_eq!(pixel(&out, 12, 40 - LABEL_STRIP_HEIGHT), style.label_background);
    }

    #[test]
    fn label_moves_inside_when_box_touches_the_top() {
        let frame = make_test_frame(128, 96, 0);
        let style = AnnotationStyle::default();
        let detections = Detections {
            frame_seq: 0,
            items: vec![detection(10.0, 0.0, 60.0, 40.0)],
        };

        let out = annotate(&frame, &detections, &style);
        // No room above: the strip begins at the box top.
        assert_eq!(pixel(&out, 12, 1), style.label_background);
    }

    #[test]
    fn every_label_character_has_a_glyph() {
        for class in [
            ObjectClass::Person,
            ObjectClass::Vehicle,
            ObjectClass::Animal,
            ObjectClass::Package,
            ObjectClass::Unknown,
        ] {
            let text = format!("{} 100%", class.label());
            for ch in text.chars() {
                assert!(glyph(ch).is_some(), "missing glyph for {ch:?}");
            }
        }
    }
}
