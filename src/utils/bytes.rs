use super::error::EngineError;

/// Decode a raw little-endian f32 buffer.
///
/// The source bytes come straight from disk so they carry no alignment
/// guarantee; `pod_collect_to_vec` copies into a correctly aligned Vec.
pub fn f32_buffer_from_bytes(bytes: &[u8]) -> Result<Vec<f32>, EngineError> {
    if bytes.len() % std::mem::size_of::<f32>() != 0 {
        return Err(EngineError::InvalidWeightData(format!(
            "weight buffer is {} bytes, not a multiple of {}",
            bytes.len(),
            std::mem::size_of::<f32>()
        )));
    }

    let mut values: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);
    if cfg!(target_endian = "big") {
        for v in values.iter_mut() {
            *v = f32::from_bits(u32::from_le(v.to_bits()));
        }
    }
    Ok(values)
}

/// Encode f32 values as little-endian bytes, the on-disk weight format.
pub fn f32_buffer_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
