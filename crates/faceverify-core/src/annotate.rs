//! Draw search results onto the query image.
//!
//! Each query face gets a box: green with the matched identity and distance
//! when something was found, red otherwise.

use crate::engine::FaceMatches;
use crate::error::{Error, Result};
use crate::types::FacialArea;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

pub const MATCH_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
pub const NO_MATCH_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const BOX_THICKNESS: u32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;

/// DejaVu Sans Mono Bold, see `assets/DejaVu-LICENSE`.
static LABEL_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono-Bold.ttf");

/// Outline every query face and label it with its best match.
pub fn annotate(image: &mut RgbImage, results: &[FaceMatches]) -> Result<()> {
    let font = FontRef::try_from_slice(LABEL_FONT)?;
    let scale = PxScale::from(LABEL_FONT_SIZE);

    for face in results {
        let (color, label) = match face.best() {
            Some(best) => (
                MATCH_COLOR,
                format!("{} {:.2}", identity_label(&best.identity), best.distance),
            ),
            None => (NO_MATCH_COLOR, "UNKNOWN".to_string()),
        };
        draw_box(image, &face.source, color);
        draw_label(image, &face.source, &label, color, &font, scale);
    }
    Ok(())
}

/// Write the annotated image, format chosen by extension.
pub fn save(image: &RgbImage, path: &Path) -> Result<()> {
    image.save(path).map_err(|source| Error::Save {
        path: path.display().to_string(),
        source,
    })?;
    tracing::info!(path = %path.display(), "annotated image written");
    Ok(())
}

/// Person name for a database image: its directory name, else its file stem.
fn identity_label(identity: &str) -> String {
    let path = Path::new(identity);
    path.parent()
        .and_then(|p| p.file_name())
        .or_else(|| path.file_stem())
        .map(|s| s.to_string_lossy().to_uppercase())
        .unwrap_or_default()
}

fn draw_box(image: &mut RgbImage, area: &FacialArea, color: Rgb<u8>) {
    let (w, h) = (area.w.max(1), area.h.max(1));
    for inset in 0..BOX_THICKNESS {
        if w <= 2 * inset || h <= 2 * inset {
            break;
        }
        let rect = Rect::at((area.x + inset) as i32, (area.y + inset) as i32)
            .of_size(w - 2 * inset, h - 2 * inset);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Filled label box above the face, or inside its top edge when there is
/// no room above.
fn draw_label(
    image: &mut RgbImage,
    area: &FacialArea,
    text: &str,
    background: Rgb<u8>,
    font: &FontRef<'_>,
    scale: PxScale,
) {
    let (text_w, text_h) = text_size(scale, font, text);
    let box_w = text_w + 2 * LABEL_PADDING;
    let box_h = text_h + 2 * LABEL_PADDING;
    let y = area.y.checked_sub(box_h).unwrap_or(area.y);

    draw_filled_rect_mut(image, Rect::at(area.x as i32, y as i32).of_size(box_w, box_h), background);
    draw_text_mut(
        image,
        TEXT_COLOR,
        (area.x + LABEL_PADDING) as i32,
        (y + LABEL_PADDING) as i32,
        scale,
        font,
        text,
    );
}
