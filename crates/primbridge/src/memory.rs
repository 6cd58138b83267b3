//! Device-independent tensor metadata.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Scalar element types understood by primitive descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    F32,
    F16,
    Bf16,
    S32,
    S8,
    U8,
    F64,
}

impl DataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::S8 | DataType::U8 => 1,
            DataType::F16 | DataType::Bf16 => 2,
            DataType::F32 | DataType::S32 => 4,
            DataType::F64 => 8,
        }
    }
}

/// Logical tensor description: extents, padded extents and per-axis element strides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDesc {
    data_type: DataType,
    dims: Vec<usize>,
    padded_dims: Vec<usize>,
    strides: Vec<usize>,
}

impl MemoryDesc {
    /// Dense row-major layout over `dims`.
    pub fn contiguous(dims: impl Into<Vec<usize>>, data_type: DataType) -> BridgeResult<Self> {
        let dims = dims.into();
        let strides = contiguous_strides_or_error(&dims, || {
            BridgeError::invalid_arguments(format!("strides for dims {dims:?} overflow usize"))
        })?;
        Self {
            data_type,
            padded_dims: dims.clone(),
            dims,
            strides,
        }
        .validated()
    }

    /// Explicit strides over unpadded dims.
    pub fn strided(
        dims: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
        data_type: DataType,
    ) -> BridgeResult<Self> {
        let dims = dims.into();
        let strides = strides.into();
        if dims.len() != strides.len() {
            return Err(BridgeError::invalid_arguments(format!(
                "dims {dims:?} and strides {strides:?} differ in rank"
            )));
        }
        checked_element_count_or_error(&dims, || {
            BridgeError::invalid_arguments(format!("element count of {dims:?} overflows usize"))
        })?;
        Self {
            data_type,
            padded_dims: dims.clone(),
            dims,
            strides,
        }
        .validated()
    }

    /// Replaces the padded extents and recomputes dense strides over them.
    pub fn with_padded_dims(mut self, padded_dims: impl Into<Vec<usize>>) -> BridgeResult<Self> {
        let padded_dims = padded_dims.into();
        if padded_dims.len() != self.dims.len() {
            return Err(BridgeError::invalid_arguments(format!(
                "padded dims {padded_dims:?} do not match rank of {:?}",
                self.dims
            )));
        }
        if let Some(axis) = (0..padded_dims.len()).find(|&axis| padded_dims[axis] < self.dims[axis])
        {
            return Err(BridgeError::invalid_arguments(format!(
                "padded extent {} on axis {axis} is smaller than logical extent {}",
                padded_dims[axis], self.dims[axis]
            )));
        }
        self.strides = contiguous_strides_or_error(&padded_dims, || {
            BridgeError::invalid_arguments(format!(
                "strides for padded dims {padded_dims:?} overflow usize"
            ))
        })?;
        self.padded_dims = padded_dims;
        self.validated()
    }

    fn validated(self) -> BridgeResult<Self> {
        self.checked_size_in_bytes()?;
        Ok(self)
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn padded_dims(&self) -> &[usize] {
        &self.padded_dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn has_zero_dim(&self) -> bool {
        self.dims.iter().any(|&dim| dim == 0)
    }

    /// Number of logical elements; zero for degenerate shapes.
    pub fn nelems(&self) -> usize {
        self.dims.iter().product()
    }

    /// Bytes spanned by the furthest element addressed through padded dims and strides.
    ///
    /// Descriptors built through the constructors never overflow; a deserialized one that
    /// does saturates, so allocating for it fails.
    pub fn size_in_bytes(&self) -> usize {
        self.checked_size_in_bytes().unwrap_or(usize::MAX)
    }

    pub fn checked_size_in_bytes(&self) -> BridgeResult<usize> {
        if self.has_zero_dim() {
            return Ok(0);
        }
        let overflow = || {
            BridgeError::invalid_arguments(format!(
                "extent of padded dims {:?} with strides {:?} overflows usize",
                self.padded_dims, self.strides
            ))
        };
        let mut last = 0usize;
        for (dim, stride) in self.padded_dims.iter().zip(&self.strides) {
            let reach = (dim - 1).checked_mul(*stride).ok_or_else(overflow)?;
            last = last.checked_add(reach).ok_or_else(overflow)?;
        }
        last.checked_add(1)
            .and_then(|count| count.checked_mul(self.data_type.size_in_bytes()))
            .ok_or_else(overflow)
    }
}

/// Computes `product(dims)` with overflow checking.
pub fn checked_element_count_or_error<E, F>(dims: &[usize], mut on_overflow: F) -> Result<usize, E>
where
    F: FnMut() -> E,
{
    let mut count = 1usize;
    for dim in dims {
        count = count.checked_mul(*dim).ok_or_else(&mut on_overflow)?;
    }
    Ok(count)
}

/// Builds row-major contiguous strides with overflow checking.
pub fn contiguous_strides_or_error<E, F>(
    dims: &[usize],
    mut on_overflow: F,
) -> Result<Vec<usize>, E>
where
    F: FnMut() -> E,
{
    let mut strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride = stride
            .checked_mul(dims[axis].max(1))
            .ok_or_else(&mut on_overflow)?;
    }
    Ok(strides)
}
