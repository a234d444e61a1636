//! Versioned binary encoding for vectors stored in BLOB columns.
//!
//! Layout (version 1):
//! - float vector: `[version u8][len u32 LE][len x f32 LE]`
//! - topic vector: `[version u8][len u32 LE][ceil(len / 8) bytes, LSB-first]`

use crate::error::{PipelineError, Result};
use crate::strategy::TopicVector;

pub const CODEC_VERSION: u8 = 1;

const HEADER_LEN: usize = 1 + 4;

fn write_header(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| PipelineError::Codec(format!("vector too long to encode: {len}")))?;
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

/// returns (declared length, payload)
fn read_header(blob: &[u8]) -> Result<(usize, &[u8])> {
    if blob.len() < HEADER_LEN {
        return Err(PipelineError::Codec(format!("blob shorter than header: {} bytes", blob.len())));
    }
    if blob[0] != CODEC_VERSION {
        return Err(PipelineError::Codec(format!("unsupported codec version {}", blob[0])));
    }
    let len = u32::from_le_bytes([blob[1], blob[2], blob[3], blob[4]]) as usize;
    Ok((len, &blob[HEADER_LEN..]))
}

/// Encode an embedding or center
pub fn encode_vector(vector: &[f32]) -> Result<Vec<u8>> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Codec("vector contains non-finite values".to_string()));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + std::mem::size_of_val(vector));
    write_header(&mut out, vector.len())?;
    for value in vector {
        out.extend_from_slice(&value.to_le_bytes());
    }
    Ok(out)
}

pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    let (len, payload) = read_header(blob)?;
    let expected = len
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| PipelineError::Codec("vector length overflow".to_string()))?;
    if payload.len() != expected {
        return Err(PipelineError::Codec(format!(
            "invalid vector payload: expected {expected} bytes, got {}",
            payload.len()
        )));
    }
    let mut out = Vec::with_capacity(len);
    for chunk in payload.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(PipelineError::Codec("vector contains non-finite values".to_string()));
        }
        out.push(value);
    }
    Ok(out)
}

/// Encode a binary topic vector as packed bits
pub fn encode_topics(topics: &TopicVector) -> Result<Vec<u8>> {
    let bits = topics.as_bits();
    let mut out = Vec::with_capacity(HEADER_LEN + bits.len().div_ceil(8));
    write_header(&mut out, bits.len())?;
    for byte_bits in bits.chunks(8) {
        let byte = byte_bits
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &set)| if set { acc | (1 << i) } else { acc });
        out.push(byte);
    }
    Ok(out)
}

pub fn decode_topics(blob: &[u8]) -> Result<TopicVector> {
    let (len, payload) = read_header(blob)?;
    if payload.len() != len.div_ceil(8) {
        return Err(PipelineError::Codec(format!(
            "invalid topic payload: expected {} bytes, got {}",
            len.div_ceil(8),
            payload.len()
        )));
    }
    let bits = (0..len).map(|i| payload[i / 8] & (1 << (i % 8)) != 0).collect();
    Ok(TopicVector::new(bits))
}
