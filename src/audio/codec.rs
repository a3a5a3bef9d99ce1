//! Linear PCM conversion between f32 samples and the i16 wire format
//!
//! Both transport directions carry mono little-endian i16 PCM. Capture
//! quantizes before a segment crosses to the transport; playback
//! dequantizes frames back into the normalized float range the output
//! device consumes.

/// Fixed-point scale for 16-bit linear PCM
const PCM_SCALE: f32 = 32767.0;

/// Quantize normalized f32 samples to i16
///
/// Samples outside [-1.0, 1.0] are clamped to the representable range.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * PCM_SCALE).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Dequantize i16 samples back to normalized f32
#[must_use]
pub fn dequantize(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Encode i16 samples as little-endian bytes for a binary frame
#[must_use]
pub fn to_wire(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian binary frame into i16 samples
///
/// Returns `None` for an empty frame or one with an odd byte length;
/// the caller logs and drops such frames.
#[must_use]
pub fn from_wire(bytes: &[u8]) -> Option<Vec<i16>> {
    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
    )
}
