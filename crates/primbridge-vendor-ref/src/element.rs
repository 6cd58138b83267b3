use half::f16;
use primbridge_cudnn::api::VendorDataType;

/// Reads one element stored in `bytes` as `f32`.
pub(crate) fn decode(data_type: VendorDataType, bytes: &[u8]) -> f32 {
    match data_type {
        VendorDataType::Float => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        VendorDataType::Double => f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]) as f32,
        VendorDataType::Half => f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
        VendorDataType::Int8 | VendorDataType::Int8x4 => f32::from(bytes[0] as i8),
        VendorDataType::Int32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
        }
        VendorDataType::Uint8 => f32::from(bytes[0]),
    }
}

/// Stores `value` into `out`. Integer targets round to nearest and saturate.
pub(crate) fn encode(data_type: VendorDataType, value: f32, out: &mut [u8]) {
    match data_type {
        VendorDataType::Float => out[..4].copy_from_slice(&value.to_le_bytes()),
        VendorDataType::Double => out[..8].copy_from_slice(&f64::from(value).to_le_bytes()),
        VendorDataType::Half => out[..2].copy_from_slice(&f16::from_f32(value).to_le_bytes()),
        VendorDataType::Int8 | VendorDataType::Int8x4 => {
            out[0] = (value.round() as i8) as u8;
        }
        VendorDataType::Int32 => out[..4].copy_from_slice(&(value.round() as i32).to_le_bytes()),
        VendorDataType::Uint8 => out[0] = value.round() as u8,
    }
}
