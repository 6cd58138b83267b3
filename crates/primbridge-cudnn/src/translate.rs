//! Framework tensor metadata to vendor tensor layouts.

use primbridge::{BridgeError, BridgeResult, DataType, MemoryDesc};
use smallvec::SmallVec;

use crate::api::{TensorNdConfig, VendorDataType, DIM_MAX, MIN_RANK};

pub type VendorDims = SmallVec<[i32; DIM_MAX]>;

/// Vendor-ready layout of one tensor role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorTensor {
    pub data_type: VendorDataType,
    pub dims: VendorDims,
    pub strides: VendorDims,
}

impl VendorTensor {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn nd_config(&self) -> TensorNdConfig<'_> {
        TensorNdConfig {
            data_type: self.data_type,
            dims: &self.dims,
            strides: &self.strides,
        }
    }
}

/// Copies the first `rank` values and pads with ones up to `max(rank, MIN_RANK)`.
pub fn convert_dims(values: &[usize], rank: usize) -> BridgeResult<VendorDims> {
    if values.len() < rank {
        return Err(BridgeError::invalid_arguments(format!(
            "expected {rank} extents, got {}",
            values.len()
        )));
    }
    let mut out = VendorDims::new();
    for &value in &values[..rank] {
        let converted = i32::try_from(value).map_err(|_| {
            BridgeError::invalid_arguments(format!("extent {value} does not fit the vendor int"))
        })?;
        out.push(converted);
    }
    while out.len() < rank.max(MIN_RANK) {
        out.push(1);
    }
    Ok(out)
}

pub fn convert_data_type(data_type: DataType) -> BridgeResult<VendorDataType> {
    match data_type {
        DataType::F32 => Ok(VendorDataType::Float),
        DataType::F16 => Ok(VendorDataType::Half),
        DataType::S32 => Ok(VendorDataType::Int32),
        DataType::S8 => Ok(VendorDataType::Int8),
        DataType::U8 => Ok(VendorDataType::Uint8),
        DataType::Bf16 | DataType::F64 => Err(BridgeError::UnimplementedType(data_type)),
    }
}

/// Translates padded extents, strides and element type of `md`.
pub fn translate_tensor(md: &MemoryDesc) -> BridgeResult<VendorTensor> {
    let rank = md.rank();
    if rank > DIM_MAX {
        return Err(BridgeError::InvalidRank {
            rank,
            max: DIM_MAX,
        });
    }
    let dims = convert_dims(md.padded_dims(), rank)?;
    let strides = convert_dims(md.strides(), rank)?;
    let data_type = convert_data_type(md.data_type())?;
    Ok(VendorTensor {
        data_type,
        dims,
        strides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_low_ranks_with_unit_extents() {
        let dims = convert_dims(&[3, 5], 2).unwrap();
        assert_eq!(dims.as_slice(), &[3, 5, 1, 1]);
    }

    #[test]
    fn keeps_ranks_above_minimum() {
        let dims = convert_dims(&[1, 2, 3, 4, 5, 6], 6).unwrap();
        assert_eq!(dims.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn rejects_extents_beyond_i32() {
        let err = convert_dims(&[usize::MAX], 1).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArguments(_)));
    }
}
