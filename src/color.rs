//! Colour space handling for baked vertex colours.
//!
//! Particle simulations author vertex colours in gamma (sRGB) space. When the
//! host renders in linear space the baked colours must be converted before the
//! mesh is handed to the canvas renderer.

use serde::{Deserialize, Serialize};

/// Colour space the host renders in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorSpace {
    #[default]
    Gamma,
    Linear,
}

/// Convert a single sRGB-encoded channel to linear.
pub fn gamma_to_linear(c: f32) -> f32 {
    // https://en.wikipedia.org/wiki/SRGB#From_sRGB_to_CIE_XYZ
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Convert an RGBA colour from gamma to linear. Alpha is left untouched.
pub fn gamma_to_linear_rgba(color: [f32; 4]) -> [f32; 4] {
    [
        gamma_to_linear(color[0]),
        gamma_to_linear(color[1]),
        gamma_to_linear(color[2]),
        color[3],
    ]
}
