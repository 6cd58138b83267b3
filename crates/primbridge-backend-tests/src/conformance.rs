//! Engine-agnostic conformance checks. Every function takes an engine, runs one scenario end
//! to end through the public bridge API and panics on mismatch.

use std::thread;

use primbridge::{
    Access, Arg, BinaryAlg, BinaryDesc, BridgeError, DataType, ExecCtx, LrnAlg, LrnDesc,
    ManagedBuffer, MemoryDesc, PrimitiveAttr, PropKind,
};
use primbridge_cudnn::{
    BinaryPrimitive, CompiledPrimitive, CudnnEngine, CudnnStream, LrnBackwardPrimitive,
    LrnForwardPrimitive,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::reference::{self, LrnParams};

const MAPPED_ALGS: [BinaryAlg; 4] = [
    BinaryAlg::Add,
    BinaryAlg::Mul,
    BinaryAlg::Min,
    BinaryAlg::Max,
];

const LRN_PARAMS: LrnParams = LrnParams {
    local_size: 5,
    alpha: 0.5,
    beta: 0.75,
    k: 2.0,
};

fn random_values(rng: &mut StdRng, data_type: DataType, len: usize) -> Vec<f32> {
    (0..len)
        .map(|_| match data_type {
            DataType::S32 | DataType::S8 => rng.gen_range(-20i32..=20) as f32,
            DataType::U8 => rng.gen_range(0i32..=20) as f32,
            _ => reference::quantize(data_type, rng.gen_range(-2.0f32..2.0)),
        })
        .collect()
}

fn upload(stream: &CudnnStream, md: &MemoryDesc, values: &[f32]) -> ManagedBuffer {
    let buffer = stream.engine().buffer_for(md).unwrap();
    stream.upload(&buffer, reference::encode(md, values)).unwrap();
    buffer
}

fn download(stream: &CudnnStream, md: &MemoryDesc, buffer: &ManagedBuffer) -> Vec<f32> {
    let bytes = stream.download(buffer).unwrap();
    reference::decode(md, &bytes)
}

fn binary_desc(
    alg: BinaryAlg,
    dst_dims: &[usize],
    src1_dims: &[usize],
    dt: DataType,
) -> BinaryDesc {
    BinaryDesc::new(
        alg,
        MemoryDesc::contiguous(dst_dims.to_vec(), dt).unwrap(),
        MemoryDesc::contiguous(src1_dims.to_vec(), dt).unwrap(),
        MemoryDesc::contiguous(dst_dims.to_vec(), dt).unwrap(),
        PrimitiveAttr::new(),
    )
    .unwrap()
}

/// Runs `desc` once on `stream` with fresh random inputs and checks the destination.
fn run_binary_case(stream: &CudnnStream, desc: &BinaryDesc, rng: &mut StdRng, tol: f32) {
    let primitive = BinaryPrimitive::new(desc, stream.engine()).unwrap();
    let lhs = random_values(rng, desc.src0.data_type(), desc.src0.nelems());
    let rhs = random_values(rng, desc.src1.data_type(), desc.src1.nelems());
    let src0 = upload(stream, &desc.src0, &lhs);
    let src1 = upload(stream, &desc.src1, &rhs);
    let dst = stream.engine().buffer_for(&desc.dst).unwrap();

    let ctx = ExecCtx::new()
        .with_arg(Arg::Src0, &src0)
        .with_arg(Arg::Src1, &src1)
        .with_arg(Arg::Dst, &dst);
    primitive.execute(&ctx, stream).unwrap();

    let expected = reference::binary(
        desc.alg,
        &lhs,
        &rhs,
        desc.dst.dims(),
        desc.src1.dims(),
        1.0,
        1.0,
        desc.dst.data_type(),
    );
    reference::assert_close(&download(stream, &desc.dst, &dst), &expected, tol);
}

fn random_dims(rng: &mut StdRng, rank: usize) -> Vec<usize> {
    (0..rank).map(|_| rng.gen_range(1..=3)).collect()
}

pub fn binary_matches_reference_for_every_rank(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for rank in 1..=8 {
        let dims = random_dims(&mut rng, rank);
        let src1_dims: Vec<usize> = dims
            .iter()
            .map(|&dim| if rng.gen_bool(0.3) { 1 } else { dim })
            .collect();
        let alg = MAPPED_ALGS[rng.gen_range(0..MAPPED_ALGS.len())];
        let desc = binary_desc(alg, &dims, &src1_dims, DataType::F32);
        run_binary_case(&stream, &desc, &mut rng, 1e-6);
    }
}

pub fn binary_broadcasts_scalar_operand(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    for alg in MAPPED_ALGS {
        let desc = binary_desc(alg, &[2, 3, 4, 5], &[1, 1, 1, 1], DataType::F32);
        run_binary_case(&stream, &desc, &mut rng, 1e-6);
    }
}

pub fn binary_supports_half_and_integer_types(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    for (data_type, tol) in [
        (DataType::F16, 1e-3),
        (DataType::S32, 0.0),
        (DataType::U8, 0.0),
        (DataType::S8, 0.0),
    ] {
        let desc = binary_desc(BinaryAlg::Max, &[2, 4, 3], &[2, 1, 3], data_type);
        run_binary_case(&stream, &desc, &mut rng, tol);
    }
}

/// Signed 8-bit sources fold their first scale into the blend coefficients; a destination
/// scale is ignored.
pub fn binary_applies_int8_source_scales(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let dims = [2, 3, 2, 2];
    let src = MemoryDesc::contiguous(dims, DataType::S8).unwrap();
    let dst_md = MemoryDesc::contiguous(dims, DataType::F32).unwrap();
    let attr = PrimitiveAttr::new()
        .with_scales(Arg::Src0, vec![0.5, 8.0])
        .unwrap()
        .with_scales(Arg::Src1, vec![0.25])
        .unwrap()
        .with_scales(Arg::Dst, vec![4.0])
        .unwrap();
    let desc = BinaryDesc::new(BinaryAlg::Add, src.clone(), src.clone(), dst_md.clone(), attr)
        .unwrap();
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    match primitive.compiled() {
        CompiledPrimitive::Binary(binary) => {
            let coeffs = binary.coefficients();
            assert_eq!((coeffs.alpha0, coeffs.alpha1, coeffs.beta), (0.5, 0.25, 0.0));
        }
        other => panic!("expected a binary primitive, got {}", other.kind_name()),
    }

    let mut rng = StdRng::seed_from_u64(13);
    let lhs = random_values(&mut rng, DataType::S8, src.nelems());
    let rhs = random_values(&mut rng, DataType::S8, src.nelems());
    let src0 = upload(&stream, &src, &lhs);
    let src1 = upload(&stream, &src, &rhs);
    let dst = engine.buffer_for(&dst_md).unwrap();
    let ctx = ExecCtx::new()
        .with_arg(Arg::Src0, &src0)
        .with_arg(Arg::Src1, &src1)
        .with_arg(Arg::Dst, &dst);
    primitive.execute(&ctx, &stream).unwrap();

    let expected = reference::binary(
        BinaryAlg::Add,
        &lhs,
        &rhs,
        &dims,
        &dims,
        0.5,
        0.25,
        DataType::F32,
    );
    reference::assert_close(&download(&stream, &dst_md, &dst), &expected, 1e-6);
}

pub fn binary_ignores_scales_on_float_sources(engine: &CudnnEngine) {
    let md = MemoryDesc::contiguous([2, 2, 2, 2], DataType::F32).unwrap();
    let attr = PrimitiveAttr::new()
        .with_scales(Arg::Src0, vec![3.0])
        .unwrap();
    let desc = BinaryDesc::new(BinaryAlg::Mul, md.clone(), md.clone(), md, attr).unwrap();
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    let CompiledPrimitive::Binary(binary) = primitive.compiled() else {
        panic!("expected a binary primitive");
    };
    assert_eq!(binary.coefficients().alpha0, 1.0);
    assert_eq!(binary.coefficients().alpha1, 1.0);
}

pub fn binary_runs_in_place(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let md = MemoryDesc::contiguous([3, 2, 4], DataType::F32).unwrap();
    let desc =
        BinaryDesc::new(BinaryAlg::Add, md.clone(), md.clone(), md.clone(), PrimitiveAttr::new())
            .unwrap();
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();

    let mut rng = StdRng::seed_from_u64(17);
    let lhs = random_values(&mut rng, DataType::F32, md.nelems());
    let rhs = random_values(&mut rng, DataType::F32, md.nelems());
    let acc = upload(&stream, &md, &lhs);
    let other = upload(&stream, &md, &rhs);
    let ctx = ExecCtx::new()
        .with_arg(Arg::Src0, &acc)
        .with_arg(Arg::Src1, &other)
        .with_arg(Arg::Dst, &acc);
    primitive.execute(&ctx, &stream).unwrap();

    let expected = reference::binary(
        BinaryAlg::Add,
        &lhs,
        &rhs,
        md.dims(),
        md.dims(),
        1.0,
        1.0,
        DataType::F32,
    );
    reference::assert_close(&download(&stream, &md, &acc), &expected, 1e-6);
}

pub fn binary_respects_padded_layout(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let dims = [2, 3, 4, 5];
    let padded = MemoryDesc::contiguous(dims, DataType::F32)
        .unwrap()
        .with_padded_dims([2, 4, 4, 8])
        .unwrap();
    let desc = BinaryDesc::new(
        BinaryAlg::Mul,
        padded.clone(),
        padded.clone(),
        padded,
        PrimitiveAttr::new(),
    )
    .unwrap();
    assert_eq!(desc.dst.size_in_bytes(), 2 * 4 * 4 * 8 * 4);
    let mut rng = StdRng::seed_from_u64(19);
    run_binary_case(&stream, &desc, &mut rng, 1e-6);
}

pub fn binary_rejects_rank_above_vendor_limit(engine: &CudnnEngine) {
    let dims = [1usize; 9];
    let desc = binary_desc(BinaryAlg::Add, &dims, &dims, DataType::F32);
    let err = BinaryPrimitive::new(&desc, engine).unwrap_err();
    assert_eq!(err, BridgeError::InvalidRank { rank: 9, max: 8 });
}

pub fn binary_rejects_unmapped_algorithms(engine: &CudnnEngine) {
    for alg in [BinaryAlg::Sub, BinaryAlg::Div] {
        let desc = binary_desc(alg, &[2, 2], &[2, 2], DataType::F32);
        let err = BinaryPrimitive::new(&desc, engine).unwrap_err();
        assert!(
            matches!(err, BridgeError::Unimplemented { what: "binary", .. }),
            "{alg:?} produced {err:?}"
        );
    }
}

pub fn binary_rejects_unmapped_types(engine: &CudnnEngine) {
    for data_type in [DataType::Bf16, DataType::F64] {
        let desc = binary_desc(BinaryAlg::Add, &[2, 2], &[2, 2], data_type);
        let err = BinaryPrimitive::new(&desc, engine).unwrap_err();
        assert_eq!(err, BridgeError::UnimplementedType(data_type));
    }
}

pub fn zero_extent_binary_is_noop(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let desc = binary_desc(BinaryAlg::Add, &[2, 0, 3], &[1, 0, 3], DataType::F32);
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    assert!(primitive.compiled().is_noop());
    assert_eq!(primitive.compiled().descriptor_count(), 0);
    primitive.execute(&ExecCtx::new(), &stream).unwrap();
    stream.wait().unwrap();
}

pub fn binary_reports_missing_argument(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let desc = binary_desc(BinaryAlg::Add, &[2, 2, 2], &[2, 2, 2], DataType::F32);
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    let buffer = engine.buffer_for(&desc.dst).unwrap();
    let ctx = ExecCtx::new()
        .with_arg(Arg::Src0, &buffer)
        .with_arg(Arg::Dst, &buffer);
    let err = primitive.execute(&ctx, &stream).unwrap_err();
    assert_eq!(err, BridgeError::MissingArgument(Arg::Src1));
}

pub fn binary_rejects_undersized_buffer(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let desc = binary_desc(BinaryAlg::Add, &[4, 4, 4], &[4, 4, 4], DataType::F32);
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    let full = engine.buffer_for(&desc.dst).unwrap();
    let short = engine.alloc_buffer(16).unwrap();
    let ctx = ExecCtx::new()
        .with_arg(Arg::Src0, &full)
        .with_arg(Arg::Src1, &short)
        .with_arg(Arg::Dst, &full);
    let err = primitive.execute(&ctx, &stream).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)), "{err:?}");
}

fn lrn_forward_desc(prop_kind: PropKind, md: &MemoryDesc) -> LrnDesc {
    LrnDesc::forward(
        prop_kind,
        LrnAlg::AcrossChannels,
        md.clone(),
        LRN_PARAMS.local_size,
        LRN_PARAMS.alpha,
        LRN_PARAMS.beta,
        LRN_PARAMS.k,
    )
    .unwrap()
}

pub fn lrn_inference_matches_reference(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    for dims in [vec![2, 7, 3, 3], vec![1, 4, 5]] {
        let md = MemoryDesc::contiguous(dims.clone(), DataType::F32).unwrap();
        let primitive =
            LrnForwardPrimitive::new(&lrn_forward_desc(PropKind::ForwardInference, &md), engine)
                .unwrap();
        let mut rng = StdRng::seed_from_u64(23);
        let x = random_values(&mut rng, DataType::F32, md.nelems());
        let src = upload(&stream, &md, &x);
        let dst = engine.buffer_for(&md).unwrap();
        let ctx = ExecCtx::new()
            .with_arg(Arg::SRC, &src)
            .with_arg(Arg::Dst, &dst);
        primitive.execute(&ctx, &stream).unwrap();

        let expected = reference::lrn_forward(&dims, &x, LRN_PARAMS);
        reference::assert_close(&download(&stream, &md, &dst), &expected, 1e-4);
    }
}

pub fn lrn_training_fills_workspace_with_dst(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let dims = vec![2, 6, 2, 3];
    let md = MemoryDesc::contiguous(dims.clone(), DataType::F32).unwrap();
    let primitive =
        LrnForwardPrimitive::new(&lrn_forward_desc(PropKind::ForwardTraining, &md), engine)
            .unwrap();
    let mut rng = StdRng::seed_from_u64(29);
    let x = random_values(&mut rng, DataType::F32, md.nelems());
    let src = upload(&stream, &md, &x);
    let dst = engine.buffer_for(&md).unwrap();
    let ws = engine.buffer_for(&md).unwrap();
    let ctx = ExecCtx::new()
        .with_arg(Arg::SRC, &src)
        .with_arg(Arg::Dst, &dst)
        .with_arg(Arg::Workspace, &ws);
    primitive.execute(&ctx, &stream).unwrap();

    let y = download(&stream, &md, &dst);
    reference::assert_close(&y, &reference::lrn_forward(&dims, &x, LRN_PARAMS), 1e-4);
    assert_eq!(stream.download(&ws).unwrap(), stream.download(&dst).unwrap());

    let missing = ExecCtx::new()
        .with_arg(Arg::SRC, &src)
        .with_arg(Arg::Dst, &dst);
    let err = primitive.execute(&missing, &stream).unwrap_err();
    assert_eq!(err, BridgeError::MissingArgument(Arg::Workspace));
}

pub fn lrn_backward_matches_reference(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let dims = vec![2, 7, 2, 2];
    let md = MemoryDesc::contiguous(dims.clone(), DataType::F32).unwrap();
    let forward =
        LrnForwardPrimitive::new(&lrn_forward_desc(PropKind::ForwardTraining, &md), engine)
            .unwrap();
    let backward_desc = LrnDesc::backward(
        LrnAlg::AcrossChannels,
        md.clone(),
        md.clone(),
        LRN_PARAMS.local_size,
        LRN_PARAMS.alpha,
        LRN_PARAMS.beta,
        LRN_PARAMS.k,
    )
    .unwrap();
    let backward = LrnBackwardPrimitive::new(&backward_desc, engine).unwrap();
    assert_eq!(backward.compiled().descriptor_count(), 5);

    let mut rng = StdRng::seed_from_u64(31);
    let x = random_values(&mut rng, DataType::F32, md.nelems());
    let dy = random_values(&mut rng, DataType::F32, md.nelems());
    let src = upload(&stream, &md, &x);
    let diff_dst = upload(&stream, &md, &dy);
    let dst = engine.buffer_for(&md).unwrap();
    let ws = engine.buffer_for(&md).unwrap();
    let diff_src = engine.buffer_for(&md).unwrap();

    let forward_ctx = ExecCtx::new()
        .with_arg(Arg::SRC, &src)
        .with_arg(Arg::Dst, &dst)
        .with_arg(Arg::Workspace, &ws);
    forward.execute(&forward_ctx, &stream).unwrap();
    let backward_ctx = ExecCtx::new()
        .with_arg(Arg::SRC, &src)
        .with_arg(Arg::Workspace, &ws)
        .with_arg(Arg::DiffDst, &diff_dst)
        .with_arg(Arg::DiffSrc, &diff_src);
    backward.execute(&backward_ctx, &stream).unwrap();

    let expected = reference::lrn_backward(&dims, &x, &dy, LRN_PARAMS);
    reference::assert_close(&download(&stream, &md, &diff_src), &expected, 1e-4);
}

pub fn lrn_rejects_unsupported_configurations(engine: &CudnnEngine) {
    let md = MemoryDesc::contiguous([1, 8, 2, 2], DataType::F32).unwrap();
    let within = LrnDesc::forward(
        PropKind::ForwardInference,
        LrnAlg::WithinChannel,
        md.clone(),
        3,
        1e-4,
        0.75,
        1.0,
    )
    .unwrap();
    let across = |local_size, beta, k| {
        LrnDesc::forward(
            PropKind::ForwardInference,
            LrnAlg::AcrossChannels,
            md.clone(),
            local_size,
            1e-4,
            beta,
            k,
        )
        .unwrap()
    };
    let too_wide = across(17, 0.75, 1.0);
    let flat_beta = across(3, 0.0, 1.0);
    let tiny_k = across(3, 0.75, 0.0);
    for desc in [within, too_wide, flat_beta, tiny_k] {
        let err = LrnForwardPrimitive::new(&desc, engine).unwrap_err();
        assert!(
            matches!(err, BridgeError::Unimplemented { what: "lrn", .. }),
            "{desc:?} produced {err:?}"
        );
    }
}

pub fn zero_extent_lrn_is_noop(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let md = MemoryDesc::contiguous([0, 4, 2, 2], DataType::F32).unwrap();
    let forward =
        LrnForwardPrimitive::new(&lrn_forward_desc(PropKind::ForwardTraining, &md), engine)
            .unwrap();
    assert!(forward.compiled().is_noop());
    forward.execute(&ExecCtx::new(), &stream).unwrap();

    let backward_desc =
        LrnDesc::backward(LrnAlg::AcrossChannels, md.clone(), md, 5, 1e-4, 0.75, 1.0).unwrap();
    let backward = LrnBackwardPrimitive::new(&backward_desc, engine).unwrap();
    assert_eq!(backward.compiled().descriptor_count(), 0);
    backward.execute(&ExecCtx::new(), &stream).unwrap();
}

pub fn repeated_execution_reuses_descriptors(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let desc = binary_desc(BinaryAlg::Min, &[2, 3, 4], &[2, 1, 4], DataType::F32);
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    let count = primitive.compiled().descriptor_count();
    let mut rng = StdRng::seed_from_u64(37);
    for _ in 0..4 {
        let lhs = random_values(&mut rng, DataType::F32, desc.src0.nelems());
        let rhs = random_values(&mut rng, DataType::F32, desc.src1.nelems());
        let src0 = upload(&stream, &desc.src0, &lhs);
        let src1 = upload(&stream, &desc.src1, &rhs);
        let dst = engine.buffer_for(&desc.dst).unwrap();
        let ctx = ExecCtx::new()
            .with_arg(Arg::Src0, &src0)
            .with_arg(Arg::Src1, &src1)
            .with_arg(Arg::Dst, &dst);
        primitive.execute(&ctx, &stream).unwrap();
        let expected = reference::binary(
            BinaryAlg::Min,
            &lhs,
            &rhs,
            desc.dst.dims(),
            desc.src1.dims(),
            1.0,
            1.0,
            DataType::F32,
        );
        reference::assert_close(&download(&stream, &desc.dst, &dst), &expected, 1e-6);
    }
    assert_eq!(primitive.compiled().descriptor_count(), count);
}

/// One primitive shared by several threads, each driving its own stream.
pub fn concurrent_streams_share_a_primitive(engine: &CudnnEngine) {
    let desc = binary_desc(BinaryAlg::Add, &[2, 3, 3, 2], &[1, 3, 1, 2], DataType::F32);
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    thread::scope(|scope| {
        for seed in 0..4u64 {
            let desc = &desc;
            let primitive = &primitive;
            scope.spawn(move || {
                let stream = engine.create_stream().unwrap();
                let mut rng = StdRng::seed_from_u64(100 + seed);
                for _ in 0..3 {
                    let lhs = random_values(&mut rng, DataType::F32, desc.src0.nelems());
                    let rhs = random_values(&mut rng, DataType::F32, desc.src1.nelems());
                    let src0 = upload(&stream, &desc.src0, &lhs);
                    let src1 = upload(&stream, &desc.src1, &rhs);
                    let dst = engine.buffer_for(&desc.dst).unwrap();
                    let ctx = ExecCtx::new()
                        .with_arg(Arg::Src0, &src0)
                        .with_arg(Arg::Src1, &src1)
                        .with_arg(Arg::Dst, &dst);
                    primitive.execute(&ctx, &stream).unwrap();
                    let expected = reference::binary(
                        BinaryAlg::Add,
                        &lhs,
                        &rhs,
                        desc.dst.dims(),
                        desc.src1.dims(),
                        1.0,
                        1.0,
                        DataType::F32,
                    );
                    let actual = download(&stream, &desc.dst, &dst);
                    reference::assert_close(&actual, &expected, 1e-6);
                }
            });
        }
    });
}

/// Streams executing against the same input buffers must neither block each other forever
/// nor observe anything but the shared inputs.
pub fn concurrent_streams_share_input_buffers(engine: &CudnnEngine) {
    let desc = binary_desc(BinaryAlg::Mul, &[2, 4, 3, 2], &[2, 4, 3, 2], DataType::F32);
    let primitive = BinaryPrimitive::new(&desc, engine).unwrap();
    let setup = engine.create_stream().unwrap();
    let mut rng = StdRng::seed_from_u64(131);
    let lhs = random_values(&mut rng, DataType::F32, desc.src0.nelems());
    let rhs = random_values(&mut rng, DataType::F32, desc.src1.nelems());
    let src0 = upload(&setup, &desc.src0, &lhs);
    let src1 = upload(&setup, &desc.src1, &rhs);
    setup.wait().unwrap();
    let expected = reference::binary(
        BinaryAlg::Mul,
        &lhs,
        &rhs,
        desc.dst.dims(),
        desc.src1.dims(),
        1.0,
        1.0,
        DataType::F32,
    );

    thread::scope(|scope| {
        for _ in 0..4 {
            let (desc, primitive, expected) = (&desc, &primitive, &expected);
            let (src0, src1) = (&src0, &src1);
            scope.spawn(move || {
                let stream = engine.create_stream().unwrap();
                let dst = engine.buffer_for(&desc.dst).unwrap();
                let ctx = ExecCtx::new()
                    .with_arg(Arg::Src0, src0)
                    .with_arg(Arg::Src1, src1)
                    .with_arg(Arg::Dst, &dst);
                for _ in 0..200 {
                    primitive.execute(&ctx, &stream).unwrap();
                }
                reference::assert_close(&download(&stream, &desc.dst, &dst), expected, 1e-6);
            });
        }
    });
}

pub fn stream_handles_are_created_once_per_stream(engine: &CudnnEngine) {
    let first = engine.create_stream().unwrap();
    let second = engine.create_stream().unwrap();
    assert_eq!(first.dnn_handle().unwrap(), first.dnn_handle().unwrap());
    assert_eq!(first.blas_handle().unwrap(), first.blas_handle().unwrap());
    assert_ne!(first.dnn_handle().unwrap(), second.dnn_handle().unwrap());
    assert_ne!(first.blas_handle().unwrap(), second.blas_handle().unwrap());
    assert_ne!(first.native_stream(), second.native_stream());
    assert_eq!(first.native_context(), engine.native_context());
    assert_eq!(second.native_context(), engine.native_context());
}

/// The interop body observes data uploaded by an earlier, un-awaited queue operation.
pub fn interop_waits_for_pending_upload(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let buffer = engine.alloc_buffer(payload.len()).unwrap();
    let _pending = stream.upload(&buffer, payload.clone()).unwrap();

    let access = Access::read(&buffer);
    let seen = stream
        .run_interop(std::slice::from_ref(&access), |interop| {
            assert_eq!(interop.native_stream(), stream.native_stream());
            assert_eq!(interop.native_context(), engine.native_context());
            let ptr = interop.memory(&access)?;
            let mut host = vec![0u8; payload.len()];
            engine.driver().memcpy_dtoh(&mut host, ptr)?;
            Ok(host)
        })
        .unwrap();
    assert_eq!(seen, payload);
}

/// Buffers not listed in the region's accesses have no device address inside it.
pub fn interop_rejects_undeclared_buffers(engine: &CudnnEngine) {
    let stream = engine.create_stream().unwrap();
    let declared = engine.alloc_buffer(64).unwrap();
    let undeclared = engine.alloc_buffer(64).unwrap();
    let access = Access::read(&declared);
    let err = stream
        .run_interop(std::slice::from_ref(&access), |interop| {
            interop.memory(&Access::read(&undeclared)).map(|_| ())
        })
        .unwrap_err();
    assert!(matches!(err, BridgeError::Runtime(_)), "{err:?}");
}
