//! Fixed 9-step sequential BuPu ramp (ColorBrewer), light → dark.

use plotters::style::RGBColor;

pub const BUPU_9: [RGBColor; 9] = [
    RGBColor(247, 252, 253),
    RGBColor(224, 236, 244),
    RGBColor(191, 211, 230),
    RGBColor(158, 188, 218),
    RGBColor(140, 150, 198),
    RGBColor(140, 107, 177),
    RGBColor(136, 65, 157),
    RGBColor(129, 15, 124),
    RGBColor(77, 0, 75),
];

/// Fill for isoforms without an expression value.
pub const NO_DATA_COLOR: RGBColor = RGBColor(211, 211, 211);

pub const MIDPOINT: f64 = 0.5;

/// Linear min/max scaling into [0, 1]; a flat range maps to the midpoint.
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span.abs() <= f64::EPSILON {
        return MIDPOINT;
    }
    ((value - min) / span).clamp(0.0, 1.0)
}

pub fn ramp_index(normalized: f64) -> usize {
    let last = (BUPU_9.len() - 1) as f64;
    (normalized.clamp(0.0, 1.0) * last).round() as usize
}

pub fn ramp_color(normalized: f64) -> RGBColor {
    BUPU_9[ramp_index(normalized)]
}

pub fn to_hex(color: RGBColor) -> String {
    let RGBColor(r, g, b) = color;
    format!("#{r:02X}{g:02X}{b:02X}")
}
