use std::sync::Arc;

use primbridge_cudnn::api::{
    AddTensorArgs, DnnLibrary, LrnBackwardArgs, LrnConfig, LrnForwardArgs, OpTensorArgs,
    OpTensorConfig, RawDnnHandle, RawLrnDescriptor, RawOpTensorDescriptor, RawStream,
    RawTensorDescriptor, TensorNdConfig, VendorDataType, VendorLibraryKind, VendorResult,
    DIM_MAX, DNN_STATUS_BAD_PARAM, DNN_STATUS_NOT_INITIALIZED, DNN_STATUS_NOT_SUPPORTED,
    LRN_MAX_N, LRN_MIN_BETA, LRN_MIN_K, LRN_MIN_N, MIN_RANK,
};

use crate::kernels::{self, LrnParams, OpTensorInputs};
use crate::state::{dnn_error, HandleState, State, TensorLayout};
use crate::{DescriptorEvent, DescriptorKind, Shared};

const LIB: VendorLibraryKind = VendorLibraryKind::Dnn;

pub(crate) struct RefDnn {
    shared: Arc<Shared>,
}

impl RefDnn {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

fn created(state: &mut State, kind: DescriptorKind, id: usize) {
    state.log_descriptor(DescriptorEvent::Created { kind, id });
}

fn destroyed(state: &mut State, kind: DescriptorKind, id: usize) {
    state.log_descriptor(DescriptorEvent::Destroyed { kind, id });
}

fn validate_layout(
    config: &TensorNdConfig<'_>,
    call: &'static str,
) -> VendorResult<TensorLayout> {
    let rank = config.dims.len();
    if rank != config.strides.len() || rank < MIN_RANK {
        return Err(dnn_error(call, DNN_STATUS_BAD_PARAM));
    }
    if rank > DIM_MAX || config.data_type == VendorDataType::Int8x4 {
        return Err(dnn_error(call, DNN_STATUS_NOT_SUPPORTED));
    }
    let to_extent = |value: &i32| usize::try_from(*value).ok().filter(|&value| value > 0);
    let dims: Option<Vec<usize>> = config.dims.iter().map(to_extent).collect();
    let strides: Option<Vec<usize>> = config.strides.iter().map(to_extent).collect();
    match (dims, strides) {
        (Some(dims), Some(strides)) => Ok(TensorLayout {
            data_type: config.data_type,
            dims,
            strides,
        }),
        _ => Err(dnn_error(call, DNN_STATUS_BAD_PARAM)),
    }
}

fn broadcasts(src: &TensorLayout, dst: &TensorLayout) -> bool {
    src.dims.len() == dst.dims.len()
        && src
            .dims
            .iter()
            .zip(&dst.dims)
            .all(|(&src, &dst)| src == dst || src == 1)
}

fn lrn_config(
    state: &State,
    desc: RawLrnDescriptor,
    call: &'static str,
) -> VendorResult<LrnParams> {
    let config = state
        .lrns
        .get(&desc.0)
        .copied()
        .flatten()
        .ok_or_else(|| dnn_error(call, DNN_STATUS_BAD_PARAM))?;
    Ok(LrnParams {
        n: config.n as usize,
        alpha: config.alpha,
        beta: config.beta,
        k: config.k,
    })
}

impl DnnLibrary for RefDnn {
    fn name(&self) -> &str {
        "ref-dnn"
    }

    fn create_handle(&self) -> VendorResult<RawDnnHandle> {
        const CALL: &str = "cudnnCreate";
        let mut state = self.shared.enter(LIB, CALL)?;
        let context = state.require_context(LIB, CALL, DNN_STATUS_NOT_INITIALIZED)?;
        let id = state.next_id();
        state.dnn_handles.insert(
            id,
            HandleState {
                context,
                stream: None,
            },
        );
        state.stats.dnn_handles_created += 1;
        Ok(RawDnnHandle(id))
    }

    fn destroy_handle(&self, handle: RawDnnHandle) -> VendorResult<()> {
        const CALL: &str = "cudnnDestroy";
        let mut state = self.shared.enter(LIB, CALL)?;
        if state.dnn_handles.remove(&handle.0).is_none() {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }
        state.stats.dnn_handles_destroyed += 1;
        Ok(())
    }

    fn set_stream(&self, handle: RawDnnHandle, stream: RawStream) -> VendorResult<()> {
        const CALL: &str = "cudnnSetStream";
        let mut state = self.shared.enter(LIB, CALL)?;
        let stream_ctx = state.streams.get(&stream.0).copied();
        let entry = state
            .dnn_handles
            .get_mut(&handle.0)
            .ok_or_else(|| dnn_error(CALL, DNN_STATUS_BAD_PARAM))?;
        if stream_ctx != Some(entry.context) {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }
        entry.stream = Some(stream.0);
        Ok(())
    }

    fn create_tensor_descriptor(&self) -> VendorResult<RawTensorDescriptor> {
        let mut state = self.shared.enter(LIB, "cudnnCreateTensorDescriptor")?;
        let id = state.next_id();
        state.tensors.insert(id, None);
        created(&mut state, DescriptorKind::Tensor, id);
        Ok(RawTensorDescriptor(id))
    }

    fn set_tensor_nd_descriptor(
        &self,
        desc: RawTensorDescriptor,
        config: TensorNdConfig<'_>,
    ) -> VendorResult<()> {
        const CALL: &str = "cudnnSetTensorNdDescriptor";
        let mut state = self.shared.enter(LIB, CALL)?;
        let layout = validate_layout(&config, CALL)?;
        let slot = state
            .tensors
            .get_mut(&desc.0)
            .ok_or_else(|| dnn_error(CALL, DNN_STATUS_BAD_PARAM))?;
        *slot = Some(layout);
        Ok(())
    }

    fn destroy_tensor_descriptor(&self, desc: RawTensorDescriptor) -> VendorResult<()> {
        const CALL: &str = "cudnnDestroyTensorDescriptor";
        let mut state = self.shared.enter(LIB, CALL)?;
        if state.tensors.remove(&desc.0).is_none() {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }
        destroyed(&mut state, DescriptorKind::Tensor, desc.0);
        Ok(())
    }

    fn create_op_tensor_descriptor(&self) -> VendorResult<RawOpTensorDescriptor> {
        let mut state = self.shared.enter(LIB, "cudnnCreateOpTensorDescriptor")?;
        let id = state.next_id();
        state.op_tensors.insert(id, None);
        created(&mut state, DescriptorKind::OpTensor, id);
        Ok(RawOpTensorDescriptor(id))
    }

    fn set_op_tensor_descriptor(
        &self,
        desc: RawOpTensorDescriptor,
        config: OpTensorConfig,
    ) -> VendorResult<()> {
        const CALL: &str = "cudnnSetOpTensorDescriptor";
        let mut state = self.shared.enter(LIB, CALL)?;
        if config.compute_type != VendorDataType::Float {
            return Err(dnn_error(CALL, DNN_STATUS_NOT_SUPPORTED));
        }
        let slot = state
            .op_tensors
            .get_mut(&desc.0)
            .ok_or_else(|| dnn_error(CALL, DNN_STATUS_BAD_PARAM))?;
        *slot = Some(config);
        Ok(())
    }

    fn destroy_op_tensor_descriptor(&self, desc: RawOpTensorDescriptor) -> VendorResult<()> {
        const CALL: &str = "cudnnDestroyOpTensorDescriptor";
        let mut state = self.shared.enter(LIB, CALL)?;
        if state.op_tensors.remove(&desc.0).is_none() {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }
        destroyed(&mut state, DescriptorKind::OpTensor, desc.0);
        Ok(())
    }

    fn create_lrn_descriptor(&self) -> VendorResult<RawLrnDescriptor> {
        let mut state = self.shared.enter(LIB, "cudnnCreateLRNDescriptor")?;
        let id = state.next_id();
        state.lrns.insert(id, None);
        created(&mut state, DescriptorKind::Lrn, id);
        Ok(RawLrnDescriptor(id))
    }

    fn set_lrn_descriptor(&self, desc: RawLrnDescriptor, config: LrnConfig) -> VendorResult<()> {
        const CALL: &str = "cudnnSetLRNDescriptor";
        let mut state = self.shared.enter(LIB, CALL)?;
        let valid = (LRN_MIN_N..=LRN_MAX_N).contains(&config.n)
            && config.k >= LRN_MIN_K
            && config.beta >= LRN_MIN_BETA;
        if !valid {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }
        let slot = state
            .lrns
            .get_mut(&desc.0)
            .ok_or_else(|| dnn_error(CALL, DNN_STATUS_BAD_PARAM))?;
        *slot = Some(config);
        Ok(())
    }

    fn destroy_lrn_descriptor(&self, desc: RawLrnDescriptor) -> VendorResult<()> {
        const CALL: &str = "cudnnDestroyLRNDescriptor";
        let mut state = self.shared.enter(LIB, CALL)?;
        if state.lrns.remove(&desc.0).is_none() {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }
        destroyed(&mut state, DescriptorKind::Lrn, desc.0);
        Ok(())
    }

    fn op_tensor(&self, handle: RawDnnHandle, args: &OpTensorArgs) -> VendorResult<()> {
        const CALL: &str = "cudnnOpTensor";
        let mut state = self.shared.enter(LIB, CALL)?;
        let bound = state.launch(CALL, handle.0)?;
        let op = state
            .op_tensors
            .get(&args.op_desc.0)
            .copied()
            .flatten()
            .ok_or_else(|| dnn_error(CALL, DNN_STATUS_BAD_PARAM))?;
        let a_layout = state.tensor(args.a_desc.0, CALL)?;
        let b_layout = state.tensor(args.b_desc.0, CALL)?;
        let c_layout = state.tensor(args.c_desc.0, CALL)?;
        if a_layout.dims != c_layout.dims || !broadcasts(&b_layout, &c_layout) {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }

        let a = state.read_tensor(&a_layout, args.a, bound.context, CALL)?;
        let b = state.read_tensor(&b_layout, args.b, bound.context, CALL)?;
        let prior = if args.beta != 0.0 {
            Some(state.read_tensor(&c_layout, args.c, bound.context, CALL)?)
        } else {
            None
        };
        let out = kernels::op_tensor(
            &OpTensorInputs {
                op: op.op,
                alpha1: args.alpha1,
                a: &a,
                alpha2: args.alpha2,
                b: &b,
                b_dims: &b_layout.dims,
                beta: args.beta,
                c_dims: &c_layout.dims,
            },
            prior.as_deref(),
        );
        state.write_tensor(&c_layout, args.c, bound.context, &out, CALL)
    }

    fn add_tensor(&self, handle: RawDnnHandle, args: &AddTensorArgs) -> VendorResult<()> {
        const CALL: &str = "cudnnAddTensor";
        let mut state = self.shared.enter(LIB, CALL)?;
        let bound = state.launch(CALL, handle.0)?;
        let a_layout = state.tensor(args.a_desc.0, CALL)?;
        let c_layout = state.tensor(args.c_desc.0, CALL)?;
        if !broadcasts(&a_layout, &c_layout) {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }

        let a = state.read_tensor(&a_layout, args.a, bound.context, CALL)?;
        let prior = if args.beta != 0.0 {
            Some(state.read_tensor(&c_layout, args.c, bound.context, CALL)?)
        } else {
            None
        };
        let out = kernels::add_tensor(
            args.alpha,
            &a,
            &a_layout.dims,
            args.beta,
            &c_layout.dims,
            prior.as_deref(),
        );
        state.write_tensor(&c_layout, args.c, bound.context, &out, CALL)
    }

    fn lrn_cross_channel_forward(
        &self,
        handle: RawDnnHandle,
        args: &LrnForwardArgs,
    ) -> VendorResult<()> {
        const CALL: &str = "cudnnLRNCrossChannelForward";
        let mut state = self.shared.enter(LIB, CALL)?;
        let bound = state.launch(CALL, handle.0)?;
        let params = lrn_config(&state, args.lrn_desc, CALL)?;
        let x_layout = state.tensor(args.x_desc.0, CALL)?;
        let y_layout = state.tensor(args.y_desc.0, CALL)?;
        if x_layout.dims != y_layout.dims {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }

        let x = state.read_tensor(&x_layout, args.x, bound.context, CALL)?;
        let prior = if args.beta != 0.0 {
            Some(state.read_tensor(&y_layout, args.y, bound.context, CALL)?)
        } else {
            None
        };
        let normalized = kernels::lrn_forward(&x_layout.dims, &x, params);
        let out = kernels::add_tensor(
            args.alpha,
            &normalized,
            &y_layout.dims,
            args.beta,
            &y_layout.dims,
            prior.as_deref(),
        );
        state.write_tensor(&y_layout, args.y, bound.context, &out, CALL)
    }

    fn lrn_cross_channel_backward(
        &self,
        handle: RawDnnHandle,
        args: &LrnBackwardArgs,
    ) -> VendorResult<()> {
        const CALL: &str = "cudnnLRNCrossChannelBackward";
        let mut state = self.shared.enter(LIB, CALL)?;
        let bound = state.launch(CALL, handle.0)?;
        let params = lrn_config(&state, args.lrn_desc, CALL)?;
        let y_layout = state.tensor(args.y_desc.0, CALL)?;
        let dy_layout = state.tensor(args.dy_desc.0, CALL)?;
        let x_layout = state.tensor(args.x_desc.0, CALL)?;
        let dx_layout = state.tensor(args.dx_desc.0, CALL)?;
        let same_dims = [&dy_layout, &x_layout, &dx_layout]
            .iter()
            .all(|layout| layout.dims == y_layout.dims);
        if !same_dims {
            return Err(dnn_error(CALL, DNN_STATUS_BAD_PARAM));
        }

        let y = state.read_tensor(&y_layout, args.y, bound.context, CALL)?;
        let dy = state.read_tensor(&dy_layout, args.dy, bound.context, CALL)?;
        let x = state.read_tensor(&x_layout, args.x, bound.context, CALL)?;
        let prior = if args.beta != 0.0 {
            Some(state.read_tensor(&dx_layout, args.dx, bound.context, CALL)?)
        } else {
            None
        };
        let grad = kernels::lrn_backward(&x_layout.dims, &x, &y, &dy, params);
        let out = kernels::add_tensor(
            args.alpha,
            &grad,
            &dx_layout.dims,
            args.beta,
            &dx_layout.dims,
            prior.as_deref(),
        );
        state.write_tensor(&dx_layout, args.dx, bound.context, &out, CALL)
    }
}
