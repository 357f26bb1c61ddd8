//! Little-endian field access for the fixed-layout record files.

pub(crate) const BYTES_PER_F32: usize = 4;
pub(crate) const BYTES_PER_U32: usize = 4;

#[inline]
pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
pub(crate) fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
pub(crate) fn write_i32(bytes: &mut [u8], at: usize, value: i32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Decodes a packed run of f32 values without copying the buffer.
pub(crate) fn f32_values(bytes: &[u8]) -> impl ExactSizeIterator<Item = f32> + '_ {
    bytes
        .chunks_exact(BYTES_PER_F32)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn write_f32_values(bytes: &mut [u8], values: &[f32]) {
    for (dst, value) in bytes.chunks_exact_mut(BYTES_PER_F32).zip(values) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_values_roundtrip_bits() {
        let values = [0.0f32, -1.5, f32::MIN_POSITIVE, 1.0e30, -0.0];
        let mut bytes = vec![0u8; values.len() * BYTES_PER_F32];
        write_f32_values(&mut bytes, &values);

        let decoded: Vec<f32> = f32_values(&bytes).collect();
        for (a, b) in values.iter().zip(&decoded) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_i32_fields() {
        let mut bytes = vec![0u8; 8];
        write_i32(&mut bytes, 4, -7);
        assert_eq!(read_i32(&bytes, 4), -7);
        assert_eq!(read_u32(&bytes, 0), 0);
    }
}
