use primbridge::{
    Access, Arg, BridgeError, BridgeResult, ExecCtx, LrnAlg, LrnDesc, MemoryDesc, PropKind,
};

use super::check_capacity;
use crate::api::{
    AddTensorArgs, LrnBackwardArgs, LrnConfig, LrnForwardArgs, LrnMode, RawLrnDescriptor,
    RawTensorDescriptor, LRN_MAX_N, LRN_MIN_BETA, LRN_MIN_K, LRN_MIN_N,
};
use crate::descriptor::DescriptorSet;
use crate::engine::CudnnEngine;
use crate::stream::CudnnStream;
use crate::translate::translate_tensor;

const BLEND_ALPHA: f32 = 1.0;
const BLEND_BETA: f32 = 0.0;

/// Logical buffers an LRN pass touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrnRole {
    Src,
    Dst,
    Workspace,
    DiffSrc,
    DiffDst,
}

impl LrnRole {
    pub fn arg(self) -> Arg {
        match self {
            LrnRole::Src => Arg::SRC,
            LrnRole::Dst => Arg::Dst,
            LrnRole::Workspace => Arg::Workspace,
            LrnRole::DiffSrc => Arg::DiffSrc,
            LrnRole::DiffDst => Arg::DiffDst,
        }
    }
}

fn lrn_params(desc: &LrnDesc) -> BridgeResult<LrnConfig> {
    if desc.alg != LrnAlg::AcrossChannels {
        return Err(BridgeError::unimplemented(
            "lrn",
            "cuDNN only normalizes across channels",
        ));
    }
    let n = u32::try_from(desc.local_size)
        .ok()
        .filter(|n| (LRN_MIN_N..=LRN_MAX_N).contains(n))
        .ok_or_else(|| {
            BridgeError::unimplemented(
                "lrn",
                format!(
                    "local size {} outside [{LRN_MIN_N}, {LRN_MAX_N}]",
                    desc.local_size
                ),
            )
        })?;
    let config = LrnConfig {
        n,
        alpha: f64::from(desc.alpha),
        beta: f64::from(desc.beta),
        k: f64::from(desc.k),
    };
    if config.k < LRN_MIN_K || config.beta < LRN_MIN_BETA {
        return Err(BridgeError::unimplemented(
            "lrn",
            format!(
                "k {} and beta {} must be at least {LRN_MIN_K} and {LRN_MIN_BETA}",
                config.k, config.beta
            ),
        ));
    }
    Ok(config)
}

fn diff_desc(desc: &LrnDesc) -> BridgeResult<&MemoryDesc> {
    desc.diff_data_desc
        .as_ref()
        .ok_or_else(|| BridgeError::invalid_arguments("backward LRN needs a diff data descriptor"))
}

/// Forward LRN. Inference writes `dst`; training also copies `dst` into the workspace
/// that the backward pass consumes.
#[derive(Debug)]
pub struct LrnForwardImpl {
    descriptors: DescriptorSet,
    lrn_desc: RawLrnDescriptor,
    src_desc: RawTensorDescriptor,
    dst_desc: RawTensorDescriptor,
    bytes: usize,
    training: bool,
}

impl LrnForwardImpl {
    pub(crate) fn init(desc: &LrnDesc, engine: &CudnnEngine) -> BridgeResult<Self> {
        if desc.prop_kind == PropKind::Backward {
            return Err(BridgeError::invalid_arguments(
                "forward LRN compiled from a backward description",
            ));
        }
        let config = lrn_params(desc)?;
        let src = translate_tensor(&desc.data_desc)?;
        let dst = translate_tensor(&desc.data_desc)?;

        let mut descriptors = DescriptorSet::new(engine.dnn().clone());
        let src_desc = descriptors.create_tensor(&src)?;
        let dst_desc = descriptors.create_tensor(&dst)?;
        let lrn_desc = descriptors.create_lrn(config)?;

        Ok(Self {
            descriptors,
            lrn_desc,
            src_desc,
            dst_desc,
            bytes: desc.data_desc.size_in_bytes(),
            training: desc.is_training(),
        })
    }

    pub(crate) fn execute(&self, ctx: &ExecCtx, stream: &CudnnStream) -> BridgeResult<()> {
        let src = ctx.input(LrnRole::Src.arg())?;
        let dst = ctx.output(LrnRole::Dst.arg())?;
        let ws = if self.training {
            ctx.output(LrnRole::Workspace.arg())?
        } else {
            dst.clone()
        };
        let accesses = [src, dst, ws];
        for (role, access) in [LrnRole::Src, LrnRole::Dst, LrnRole::Workspace]
            .iter()
            .zip(&accesses)
        {
            check_capacity(role.arg(), access, self.bytes)?;
        }

        stream.run_interop(&accesses, |interop| {
            let x = interop.memory(&accesses[0])?;
            let y = interop.memory(&accesses[1])?;
            let ws = interop.memory(&accesses[2])?;
            let dnn = interop.dnn();
            dnn.lrn_cross_channel_forward(
                interop.dnn_handle(),
                &LrnForwardArgs {
                    lrn_desc: self.lrn_desc,
                    mode: LrnMode::CrossChannelDim1,
                    alpha: BLEND_ALPHA,
                    x_desc: self.src_desc,
                    x,
                    beta: BLEND_BETA,
                    y_desc: self.dst_desc,
                    y,
                },
            )?;
            if self.training {
                dnn.add_tensor(
                    interop.dnn_handle(),
                    &AddTensorArgs {
                        alpha: BLEND_ALPHA,
                        a_desc: self.dst_desc,
                        a: y,
                        beta: BLEND_BETA,
                        c_desc: self.dst_desc,
                        c: ws,
                    },
                )?;
            }
            Ok(())
        })
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub(crate) fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }
}

/// Backward LRN: reads src, workspace (the forward dst) and diff-dst, writes diff-src.
#[derive(Debug)]
pub struct LrnBackwardImpl {
    descriptors: DescriptorSet,
    lrn_desc: RawLrnDescriptor,
    src_desc: RawTensorDescriptor,
    dst_desc: RawTensorDescriptor,
    diff_src_desc: RawTensorDescriptor,
    diff_dst_desc: RawTensorDescriptor,
    data_bytes: usize,
    diff_bytes: usize,
}

impl LrnBackwardImpl {
    pub(crate) fn init(desc: &LrnDesc, engine: &CudnnEngine) -> BridgeResult<Self> {
        let config = lrn_params(desc)?;
        let diff = diff_desc(desc)?;
        let src = translate_tensor(&desc.data_desc)?;
        let dst = translate_tensor(&desc.data_desc)?;
        let diff_src = translate_tensor(diff)?;
        let diff_dst = translate_tensor(diff)?;

        let mut descriptors = DescriptorSet::new(engine.dnn().clone());
        let src_desc = descriptors.create_tensor(&src)?;
        let dst_desc = descriptors.create_tensor(&dst)?;
        let diff_src_desc = descriptors.create_tensor(&diff_src)?;
        let diff_dst_desc = descriptors.create_tensor(&diff_dst)?;
        let lrn_desc = descriptors.create_lrn(config)?;

        Ok(Self {
            descriptors,
            lrn_desc,
            src_desc,
            dst_desc,
            diff_src_desc,
            diff_dst_desc,
            data_bytes: desc.data_desc.size_in_bytes(),
            diff_bytes: diff.size_in_bytes(),
        })
    }

    pub(crate) fn execute(&self, ctx: &ExecCtx, stream: &CudnnStream) -> BridgeResult<()> {
        let accesses: [Access; 4] = [
            ctx.input(LrnRole::Src.arg())?,
            ctx.input(LrnRole::Workspace.arg())?,
            ctx.output(LrnRole::DiffSrc.arg())?,
            ctx.input(LrnRole::DiffDst.arg())?,
        ];
        let required = [
            (LrnRole::Src, self.data_bytes),
            (LrnRole::Workspace, self.data_bytes),
            (LrnRole::DiffSrc, self.diff_bytes),
            (LrnRole::DiffDst, self.diff_bytes),
        ];
        for ((role, bytes), access) in required.iter().zip(&accesses) {
            check_capacity(role.arg(), access, *bytes)?;
        }

        stream.run_interop(&accesses, |interop| {
            let args = LrnBackwardArgs {
                lrn_desc: self.lrn_desc,
                mode: LrnMode::CrossChannelDim1,
                alpha: BLEND_ALPHA,
                y_desc: self.dst_desc,
                y: interop.memory(&accesses[1])?,
                dy_desc: self.diff_dst_desc,
                dy: interop.memory(&accesses[3])?,
                x_desc: self.src_desc,
                x: interop.memory(&accesses[0])?,
                beta: BLEND_BETA,
                dx_desc: self.diff_src_desc,
                dx: interop.memory(&accesses[2])?,
            };
            Ok(interop
                .dnn()
                .lrn_cross_channel_backward(interop.dnn_handle(), &args)?)
        })
    }

    pub(crate) fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }
}
