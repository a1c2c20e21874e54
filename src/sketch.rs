//! Synthetic line drawings standing in for kiosk canvas captures.

use image::{Rgba, RgbaImage};
use rand::Rng;

pub const CANVAS_SIDE: u32 = 64;

const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TEMPLATES: usize = 5;

/// Render template `kind` with random placement, scale and wobble.
///
/// Kinds beyond the built-in templates reuse them rotated, so any category
/// index gets a distinct shape.
pub fn render_sketch<R: Rng + ?Sized>(kind: usize, rng: &mut R) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(CANVAS_SIDE, CANVAS_SIDE, PAPER);
    let angle = (kind / TEMPLATES) as f32 * 0.7;
    let (sin, cos) = angle.sin_cos();
    let scale = rng.random_range(0.75..0.95) * CANVAS_SIDE as f32 / 2.0;
    let center = (
        CANVAS_SIDE as f32 / 2.0 + rng.random_range(-3.0..3.0),
        CANVAS_SIDE as f32 / 2.0 + rng.random_range(-3.0..3.0),
    );
    for stroke in template(kind % TEMPLATES) {
        let points: Vec<(f32, f32)> = stroke
            .iter()
            .map(|&(x, y)| {
                let x = x + rng.random_range(-0.03..0.03);
                let y = y + rng.random_range(-0.03..0.03);
                let (x, y) = (x * cos - y * sin, x * sin + y * cos);
                (center.0 + x * scale, center.1 + y * scale)
            })
            .collect();
        for pair in points.windows(2) {
            draw_line(&mut canvas, pair[0], pair[1]);
        }
    }
    canvas
}

/// Strokes of each template in unit coordinates, y pointing down.
fn template(kind: usize) -> Vec<Vec<(f32, f32)>> {
    match kind {
        // Hat: brim and crown.
        0 => vec![
            vec![(-0.9, 0.5), (0.9, 0.5)],
            vec![(-0.5, 0.5), (-0.45, -0.5), (0.45, -0.5), (0.5, 0.5)],
        ],
        // Crescent moon.
        1 => {
            let outer = arc(0.0, 0.0, 0.8, 0.6, 5.7);
            let inner = arc(0.35, 0.0, 0.6, 1.2, 5.1);
            vec![outer, inner]
        }
        // Wedge of cheese with holes.
        2 => vec![
            vec![(-0.8, 0.6), (0.8, 0.6), (0.8, -0.2), (-0.8, 0.6)],
            arc(0.3, 0.3, 0.12, 0.0, std::f32::consts::TAU),
        ],
        // Question mark.
        3 => vec![
            arc(0.0, -0.35, 0.4, 3.3, 7.6),
            vec![(0.0, 0.05), (0.0, 0.4)],
            vec![(-0.05, 0.7), (0.05, 0.7)],
        ],
        _ => vec![vec![(-0.8, -0.8), (0.8, 0.8)], vec![(-0.8, 0.8), (0.8, -0.8)]],
    }
}

fn arc(cx: f32, cy: f32, radius: f32, from: f32, to: f32) -> Vec<(f32, f32)> {
    const STEPS: usize = 24;
    (0..=STEPS)
        .map(|step| {
            let t = from + (to - from) * step as f32 / STEPS as f32;
            (cx + radius * t.cos(), cy + radius * t.sin())
        })
        .collect()
}

/// Two-pixel-wide line; pixels off the canvas are skipped.
fn draw_line(canvas: &mut RgbaImage, from: (f32, f32), to: (f32, f32)) {
    let steps = ((to.0 - from.0).abs().max((to.1 - from.1).abs()) * 2.0).ceil() as usize;
    for step in 0..=steps.max(1) {
        let t = step as f32 / steps.max(1) as f32;
        let x = (from.0 + (to.0 - from.0) * t).round() as i64;
        let y = (from.1 + (to.1 - from.1) * t).round() as i64;
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let (px, py) = (x + dx, y + dy);
            if (0..i64::from(canvas.width())).contains(&px) && (0..i64::from(canvas.height())).contains(&py) {
                canvas.put_pixel(px as u32, py as u32, INK);
            }
        }
    }
}
