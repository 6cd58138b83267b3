use primbridge::{Arg, BinaryAlg, BinaryDesc, BridgeError, BridgeResult, ExecCtx};

use super::check_capacity;
use crate::api::{
    NanPropagation, OpTensorArgs, OpTensorConfig, OpTensorOp, RawOpTensorDescriptor,
    RawTensorDescriptor, VendorDataType,
};
use crate::coefficients::{resolve_coefficients, Coefficients};
use crate::descriptor::DescriptorSet;
use crate::engine::CudnnEngine;
use crate::stream::CudnnStream;
use crate::translate::translate_tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryRole {
    Src0,
    Src1,
    Dst,
}

impl BinaryRole {
    pub const NUM_IO: usize = 3;
    pub const ALL: [BinaryRole; Self::NUM_IO] =
        [BinaryRole::Src0, BinaryRole::Src1, BinaryRole::Dst];

    pub fn arg(self) -> Arg {
        match self {
            BinaryRole::Src0 => Arg::Src0,
            BinaryRole::Src1 => Arg::Src1,
            BinaryRole::Dst => Arg::Dst,
        }
    }
}

pub fn convert_alg_kind(alg: BinaryAlg) -> BridgeResult<OpTensorOp> {
    match alg {
        BinaryAlg::Add => Ok(OpTensorOp::Add),
        BinaryAlg::Mul => Ok(OpTensorOp::Mul),
        BinaryAlg::Min => Ok(OpTensorOp::Min),
        BinaryAlg::Max => Ok(OpTensorOp::Max),
        BinaryAlg::Sub | BinaryAlg::Div => Err(BridgeError::unimplemented(
            "binary",
            format!("algorithm {alg:?} has no cuDNN op tensor mapping"),
        )),
    }
}

/// Elementwise binary op compiled to one `cudnnOpTensor` call.
#[derive(Debug)]
pub struct BinaryImpl {
    descriptors: DescriptorSet,
    op_desc: RawOpTensorDescriptor,
    tensors: [RawTensorDescriptor; BinaryRole::NUM_IO],
    bytes: [usize; BinaryRole::NUM_IO],
    coefficients: Coefficients,
}

impl BinaryImpl {
    pub(crate) fn init(desc: &BinaryDesc, engine: &CudnnEngine) -> BridgeResult<Self> {
        let layouts = [
            translate_tensor(&desc.src0)?,
            translate_tensor(&desc.src1)?,
            translate_tensor(&desc.dst)?,
        ];
        let op = convert_alg_kind(desc.alg)?;
        let coefficients = resolve_coefficients(desc.src0.data_type(), &desc.attr);

        let mut descriptors = DescriptorSet::new(engine.dnn().clone());
        let tensors = [
            descriptors.create_tensor(&layouts[0])?,
            descriptors.create_tensor(&layouts[1])?,
            descriptors.create_tensor(&layouts[2])?,
        ];
        let op_desc = descriptors.create_op_tensor(OpTensorConfig {
            op,
            compute_type: VendorDataType::Float,
            nan_propagation: NanPropagation::NotPropagate,
        })?;

        Ok(Self {
            descriptors,
            op_desc,
            tensors,
            bytes: [
                desc.src0.size_in_bytes(),
                desc.src1.size_in_bytes(),
                desc.dst.size_in_bytes(),
            ],
            coefficients,
        })
    }

    pub(crate) fn execute(&self, ctx: &ExecCtx, stream: &CudnnStream) -> BridgeResult<()> {
        let accesses = [
            ctx.input(Arg::Src0)?,
            ctx.input(Arg::Src1)?,
            ctx.output(Arg::Dst)?,
        ];
        for (role, access) in BinaryRole::ALL.iter().zip(&accesses) {
            check_capacity(role.arg(), access, self.bytes[*role as usize])?;
        }

        stream.run_interop(&accesses, |interop| {
            let args = OpTensorArgs {
                op_desc: self.op_desc,
                alpha1: self.coefficients.alpha0,
                a_desc: self.tensors[BinaryRole::Src0 as usize],
                a: interop.memory(&accesses[BinaryRole::Src0 as usize])?,
                alpha2: self.coefficients.alpha1,
                b_desc: self.tensors[BinaryRole::Src1 as usize],
                b: interop.memory(&accesses[BinaryRole::Src1 as usize])?,
                beta: self.coefficients.beta,
                c_desc: self.tensors[BinaryRole::Dst as usize],
                c: interop.memory(&accesses[BinaryRole::Dst as usize])?,
            };
            Ok(interop.dnn().op_tensor(interop.dnn_handle(), &args)?)
        })
    }

    pub fn coefficients(&self) -> Coefficients {
        self.coefficients
    }

    pub(crate) fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }
}
