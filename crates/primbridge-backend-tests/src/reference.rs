//! Host-side reference computations and tensor byte codecs.

use half::f16;
use primbridge::{BinaryAlg, DataType, MemoryDesc};

/// Byte offset of each logical element of `md`, in row-major order.
pub fn logical_offsets(md: &MemoryDesc) -> Vec<usize> {
    let dims = md.dims();
    let strides = md.strides();
    let elem = md.data_type().size_in_bytes();
    (0..md.nelems())
        .map(|linear| {
            let mut rem = linear;
            let mut offset = 0;
            for axis in (0..dims.len()).rev() {
                offset += (rem % dims[axis]) * strides[axis];
                rem /= dims[axis];
            }
            offset * elem
        })
        .collect()
}

/// Rounds `value` the way a store into `data_type` does.
pub fn quantize(data_type: DataType, value: f32) -> f32 {
    match data_type {
        DataType::F32 => value,
        DataType::F64 => value,
        DataType::F16 => f16::from_f32(value).to_f32(),
        DataType::Bf16 => half::bf16::from_f32(value).to_f32(),
        DataType::S32 => value.round() as i32 as f32,
        DataType::S8 => value.round() as i8 as f32,
        DataType::U8 => value.round() as u8 as f32,
    }
}

fn encode_element(data_type: DataType, value: f32, out: &mut [u8]) {
    match data_type {
        DataType::F32 => out.copy_from_slice(&value.to_le_bytes()),
        DataType::F64 => out.copy_from_slice(&f64::from(value).to_le_bytes()),
        DataType::F16 => out.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
        DataType::Bf16 => out.copy_from_slice(&half::bf16::from_f32(value).to_le_bytes()),
        DataType::S32 => out.copy_from_slice(&(value.round() as i32).to_le_bytes()),
        DataType::S8 => out[0] = value.round() as i8 as u8,
        DataType::U8 => out[0] = value.round() as u8,
    }
}

fn decode_element(data_type: DataType, bytes: &[u8]) -> f32 {
    match data_type {
        DataType::F32 => f32::from_le_bytes(bytes.try_into().unwrap()),
        DataType::F64 => f64::from_le_bytes(bytes.try_into().unwrap()) as f32,
        DataType::F16 => f16::from_le_bytes(bytes.try_into().unwrap()).to_f32(),
        DataType::Bf16 => half::bf16::from_le_bytes(bytes.try_into().unwrap()).to_f32(),
        DataType::S32 => i32::from_le_bytes(bytes.try_into().unwrap()) as f32,
        DataType::S8 => f32::from(bytes[0] as i8),
        DataType::U8 => f32::from(bytes[0]),
    }
}

/// Lays out logical `values` in the (possibly padded) buffer of `md`.
pub fn encode(md: &MemoryDesc, values: &[f32]) -> Vec<u8> {
    assert_eq!(values.len(), md.nelems(), "value count must match the descriptor");
    let elem = md.data_type().size_in_bytes();
    let mut bytes = vec![0u8; md.size_in_bytes()];
    for (offset, &value) in logical_offsets(md).iter().zip(values) {
        encode_element(md.data_type(), value, &mut bytes[*offset..*offset + elem]);
    }
    bytes
}

pub fn decode(md: &MemoryDesc, bytes: &[u8]) -> Vec<f32> {
    let elem = md.data_type().size_in_bytes();
    logical_offsets(md)
        .iter()
        .map(|&offset| decode_element(md.data_type(), &bytes[offset..offset + elem]))
        .collect()
}

fn broadcast_index(dst_dims: &[usize], src_dims: &[usize], linear: usize) -> usize {
    let mut rem = linear;
    let mut index = 0;
    let mut stride = 1;
    for axis in (0..dst_dims.len()).rev() {
        let idx = rem % dst_dims[axis];
        rem /= dst_dims[axis];
        if src_dims[axis] != 1 {
            index += idx * stride;
        }
        stride *= src_dims[axis];
    }
    index
}

/// `dst = alg(alpha0 * src0, alpha1 * broadcast(src1))`, rounded to `dst_type`.
#[allow(clippy::too_many_arguments)]
pub fn binary(
    alg: BinaryAlg,
    src0: &[f32],
    src1: &[f32],
    dst_dims: &[usize],
    src1_dims: &[usize],
    alpha0: f32,
    alpha1: f32,
    dst_type: DataType,
) -> Vec<f32> {
    src0.iter()
        .enumerate()
        .map(|(i, &a)| {
            let b = src1[broadcast_index(dst_dims, src1_dims, i)];
            let (a, b) = (alpha0 * a, alpha1 * b);
            let value = match alg {
                BinaryAlg::Add => a + b,
                BinaryAlg::Mul => a * b,
                BinaryAlg::Min => a.min(b),
                BinaryAlg::Max => a.max(b),
                BinaryAlg::Sub => a - b,
                BinaryAlg::Div => a / b,
            };
            quantize(dst_type, value)
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct LrnParams {
    pub local_size: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
}

fn geometry(dims: &[usize]) -> (usize, usize, usize) {
    (dims[0], dims[1], dims[2..].iter().product())
}

fn scales(dims: &[usize], x: &[f32], params: LrnParams) -> Vec<f64> {
    let (batch, channels, inner) = geometry(dims);
    let n = params.local_size;
    let mut out = vec![0.0; x.len()];
    for b in 0..batch {
        for c in 0..channels {
            let lo = c.saturating_sub((n - 1) / 2);
            let hi = (c + n / 2 + 1).min(channels);
            for s in 0..inner {
                let sum: f64 = (lo..hi)
                    .map(|cc| f64::from(x[(b * channels + cc) * inner + s]).powi(2))
                    .sum();
                out[(b * channels + c) * inner + s] =
                    f64::from(params.k) + f64::from(params.alpha) / n as f64 * sum;
            }
        }
    }
    out
}

/// Across-channel LRN over an NC... tensor in logical row-major order.
pub fn lrn_forward(dims: &[usize], x: &[f32], params: LrnParams) -> Vec<f32> {
    scales(dims, x, params)
        .iter()
        .zip(x)
        .map(|(scale, &v)| (f64::from(v) / scale.powf(f64::from(params.beta))) as f32)
        .collect()
}

pub fn lrn_backward(dims: &[usize], x: &[f32], dy: &[f32], params: LrnParams) -> Vec<f32> {
    let (batch, channels, inner) = geometry(dims);
    let n = params.local_size;
    let beta = f64::from(params.beta);
    let scale = scales(dims, x, params);
    let y = lrn_forward(dims, x, params);
    let mut dx = vec![0.0; x.len()];
    for b in 0..batch {
        for c in 0..channels {
            for s in 0..inner {
                let at = |cc: usize| (b * channels + cc) * inner + s;
                let i = at(c);
                let mut grad = f64::from(dy[i]) * scale[i].powf(-beta);
                for j in 0..channels {
                    let lo = j.saturating_sub((n - 1) / 2);
                    let hi = (j + n / 2 + 1).min(channels);
                    if (lo..hi).contains(&c) {
                        let k = at(j);
                        grad -= 2.0 * f64::from(params.alpha) * beta / n as f64
                            * f64::from(x[i])
                            * f64::from(dy[k])
                            * f64::from(y[k])
                            / scale[k];
                    }
                }
                dx[i] = grad as f32;
            }
        }
    }
    dx
}

/// Asserts elementwise closeness with a mixed absolute/relative tolerance.
pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let bound = tol * (1.0 + e.abs());
        assert!(
            (a - e).abs() <= bound,
            "element {i}: got {a}, expected {e} (tolerance {bound})"
        );
    }
}
