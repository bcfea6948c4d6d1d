//! Depth pixel codec
//!
//! The depth camera packs metric depth into the 24 bits of the B/G/R channels:
//! `depth_m = 1000 * (R + G*256 + B*65536) / (256^3 - 1)`.
//! Pixels are stored BGRA, so R lives at byte offset 2.

/// Far plane of the encoding
pub const DEPTH_MAX_METERS: f64 = 1000.0;

const CODE_MAX: f64 = 16_777_215.0;

/// One code step in meters; also the round-trip error bound
pub const DEPTH_RESOLUTION_METERS: f64 = DEPTH_MAX_METERS / CODE_MAX;

/// Decode one BGRA pixel to meters.
pub fn decode_depth(bgra: [u8; 4]) -> f64 {
    let [b, g, r, _] = bgra;
    let code = r as f64 + g as f64 * 256.0 + b as f64 * 65_536.0;
    DEPTH_MAX_METERS * code / CODE_MAX
}

/// Encode meters into a BGRA pixel (alpha 255). Values are clamped to [0, 1000].
pub fn encode_depth(depth_m: f64) -> [u8; 4] {
    let clamped = if depth_m.is_nan() {
        0.0
    } else {
        depth_m.clamp(0.0, DEPTH_MAX_METERS)
    };
    let code = (clamped / DEPTH_MAX_METERS * CODE_MAX).round() as u32;
    let r = (code & 0xff) as u8;
    let g = ((code >> 8) & 0xff) as u8;
    let b = ((code >> 16) & 0xff) as u8;
    [b, g, r, 255]
}
