//! Primitive descriptors consumed by vendor bridges.
//!
//! These types play the part of the validated operation description a primitive
//! framework hands to a backend: tensor metadata per argument, the algorithm kind and the
//! attributes (quantization scales) attached to the operation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::memory::MemoryDesc;

/// Named execution arguments. Discriminants follow the framework's argument ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Arg {
    Src0,
    Src1,
    Dst,
    Workspace,
    DiffSrc,
    DiffDst,
}

impl Arg {
    /// Single-input primitives name their input `Src`, which shares the id of `Src0`.
    pub const SRC: Arg = Arg::Src0;

    pub fn id(self) -> i32 {
        match self {
            Arg::Src0 => 1,
            Arg::Src1 => 2,
            Arg::Dst => 17,
            Arg::Workspace => 64,
            Arg::DiffSrc => 129,
            Arg::DiffDst => 145,
        }
    }
}

/// Elementwise binary algorithms known to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryAlg {
    Add,
    Mul,
    Min,
    Max,
    Sub,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LrnAlg {
    AcrossChannels,
    WithinChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropKind {
    ForwardTraining,
    ForwardInference,
    Backward,
}

/// Operation attributes. Only runtime scales are modeled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveAttr {
    scales: BTreeMap<Arg, Vec<f32>>,
}

const DEFAULT_SCALES: [f32; 1] = [1.0];

impl PrimitiveAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scales(mut self, arg: Arg, scales: Vec<f32>) -> BridgeResult<Self> {
        self.set_scales(arg, scales)?;
        Ok(self)
    }

    pub fn set_scales(&mut self, arg: Arg, scales: Vec<f32>) -> BridgeResult<()> {
        if scales.is_empty() {
            return Err(BridgeError::invalid_arguments(format!(
                "scale vector for {arg:?} must not be empty"
            )));
        }
        self.scales.insert(arg, scales);
        Ok(())
    }

    /// Scale vector attached to `arg`, `[1.0]` when none was set.
    pub fn scales(&self, arg: Arg) -> &[f32] {
        self.scales
            .get(&arg)
            .map(Vec::as_slice)
            .unwrap_or(&DEFAULT_SCALES)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryDesc {
    pub alg: BinaryAlg,
    pub src0: MemoryDesc,
    pub src1: MemoryDesc,
    pub dst: MemoryDesc,
    pub attr: PrimitiveAttr,
}

impl BinaryDesc {
    /// Validates the broadcast contract: all ranks equal, `src0` matches `dst`, and every
    /// `src1` extent either matches `dst` or is one.
    pub fn new(
        alg: BinaryAlg,
        src0: MemoryDesc,
        src1: MemoryDesc,
        dst: MemoryDesc,
        attr: PrimitiveAttr,
    ) -> BridgeResult<Self> {
        if src0.rank() != dst.rank() || src1.rank() != dst.rank() {
            return Err(BridgeError::invalid_arguments(format!(
                "binary operands must share a rank (src0 {}, src1 {}, dst {})",
                src0.rank(),
                src1.rank(),
                dst.rank()
            )));
        }
        if src0.dims() != dst.dims() {
            return Err(BridgeError::invalid_arguments(format!(
                "src0 dims {:?} must match dst dims {:?}",
                src0.dims(),
                dst.dims()
            )));
        }
        let broadcastable = src1
            .dims()
            .iter()
            .zip(dst.dims())
            .all(|(&lhs, &rhs)| lhs == rhs || lhs == 1);
        if !broadcastable {
            return Err(BridgeError::invalid_arguments(format!(
                "src1 dims {:?} cannot broadcast to dst dims {:?}",
                src1.dims(),
                dst.dims()
            )));
        }
        Ok(Self {
            alg,
            src0,
            src1,
            dst,
            attr,
        })
    }

    pub fn has_zero_dim(&self) -> bool {
        self.src0.has_zero_dim() || self.src1.has_zero_dim() || self.dst.has_zero_dim()
    }
}

/// Local response normalization description shared by the forward and backward passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrnDesc {
    pub prop_kind: PropKind,
    pub alg: LrnAlg,
    pub data_desc: MemoryDesc,
    pub diff_data_desc: Option<MemoryDesc>,
    pub local_size: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
}

impl LrnDesc {
    pub fn forward(
        prop_kind: PropKind,
        alg: LrnAlg,
        data_desc: MemoryDesc,
        local_size: usize,
        alpha: f32,
        beta: f32,
        k: f32,
    ) -> BridgeResult<Self> {
        if prop_kind == PropKind::Backward {
            return Err(BridgeError::invalid_arguments(
                "forward LRN requires a forward propagation kind",
            ));
        }
        Self::validated(prop_kind, alg, data_desc, None, local_size, alpha, beta, k)
    }

    pub fn backward(
        alg: LrnAlg,
        data_desc: MemoryDesc,
        diff_data_desc: MemoryDesc,
        local_size: usize,
        alpha: f32,
        beta: f32,
        k: f32,
    ) -> BridgeResult<Self> {
        if diff_data_desc.dims() != data_desc.dims() {
            return Err(BridgeError::invalid_arguments(format!(
                "diff data dims {:?} must match data dims {:?}",
                diff_data_desc.dims(),
                data_desc.dims()
            )));
        }
        Self::validated(
            PropKind::Backward,
            alg,
            data_desc,
            Some(diff_data_desc),
            local_size,
            alpha,
            beta,
            k,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn validated(
        prop_kind: PropKind,
        alg: LrnAlg,
        data_desc: MemoryDesc,
        diff_data_desc: Option<MemoryDesc>,
        local_size: usize,
        alpha: f32,
        beta: f32,
        k: f32,
    ) -> BridgeResult<Self> {
        if data_desc.rank() < 3 {
            return Err(BridgeError::invalid_arguments(format!(
                "LRN needs batch, channel and at least one spatial axis, got rank {}",
                data_desc.rank()
            )));
        }
        if local_size == 0 {
            return Err(BridgeError::invalid_arguments("LRN local size must be positive"));
        }
        Ok(Self {
            prop_kind,
            alg,
            data_desc,
            diff_data_desc,
            local_size,
            alpha,
            beta,
            k,
        })
    }

    pub fn is_training(&self) -> bool {
        self.prop_kind == PropKind::ForwardTraining
    }

    pub fn has_zero_dim(&self) -> bool {
        self.data_desc.has_zero_dim()
            || self
                .diff_data_desc
                .as_ref()
                .is_some_and(MemoryDesc::has_zero_dim)
    }
}

/// Operation handed to a backend for compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveDesc {
    Binary(BinaryDesc),
    LrnForward(LrnDesc),
    LrnBackward(LrnDesc),
}

impl PrimitiveDesc {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PrimitiveDesc::Binary(_) => "binary",
            PrimitiveDesc::LrnForward(_) => "lrn_forward",
            PrimitiveDesc::LrnBackward(_) => "lrn_backward",
        }
    }

    /// Any role with a zero logical extent makes the whole primitive a no-op.
    pub fn has_zero_dim(&self) -> bool {
        match self {
            PrimitiveDesc::Binary(desc) => desc.has_zero_dim(),
            PrimitiveDesc::LrnForward(desc) | PrimitiveDesc::LrnBackward(desc) => {
                desc.has_zero_dim()
            }
        }
    }
}
