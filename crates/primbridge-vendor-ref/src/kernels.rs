//! Host kernels over logical row-major element vectors.

use primbridge_cudnn::api::OpTensorOp;

/// Maps a linear index of `dst_dims` to the linear index of a tensor whose unit extents
/// broadcast.
pub(crate) fn broadcast_index(dst_dims: &[usize], src_dims: &[usize], linear: usize) -> usize {
    let mut rem = linear;
    let mut src_index = 0usize;
    let mut src_stride = 1usize;
    for axis in (0..dst_dims.len()).rev() {
        let idx = rem % dst_dims[axis];
        rem /= dst_dims[axis];
        if src_dims[axis] != 1 {
            src_index += idx * src_stride;
        }
        src_stride *= src_dims[axis];
    }
    src_index
}

fn apply(op: OpTensorOp, lhs: f32, rhs: f32) -> f32 {
    match op {
        OpTensorOp::Add => lhs + rhs,
        OpTensorOp::Mul => lhs * rhs,
        // `f32::min`/`max` drop a NaN operand, matching the not-propagate policy.
        OpTensorOp::Min => lhs.min(rhs),
        OpTensorOp::Max => lhs.max(rhs),
    }
}

pub(crate) struct OpTensorInputs<'a> {
    pub op: OpTensorOp,
    pub alpha1: f32,
    pub a: &'a [f32],
    pub alpha2: f32,
    pub b: &'a [f32],
    pub b_dims: &'a [usize],
    pub beta: f32,
    pub c_dims: &'a [usize],
}

/// `C = op(alpha1 * A, alpha2 * B) + beta * C`. `prior` is only read when `beta != 0`.
pub(crate) fn op_tensor(inputs: &OpTensorInputs<'_>, prior: Option<&[f32]>) -> Vec<f32> {
    (0..inputs.a.len())
        .map(|i| {
            let b = inputs.b[broadcast_index(inputs.c_dims, inputs.b_dims, i)];
            let value = apply(inputs.op, inputs.alpha1 * inputs.a[i], inputs.alpha2 * b);
            blend(value, inputs.beta, prior.map(|c| c[i]))
        })
        .collect()
}

/// `C = alpha * A + beta * C` with `A` broadcast into `C`.
pub(crate) fn add_tensor(
    alpha: f32,
    a: &[f32],
    a_dims: &[usize],
    beta: f32,
    c_dims: &[usize],
    prior: Option<&[f32]>,
) -> Vec<f32> {
    let count: usize = c_dims.iter().product();
    (0..count)
        .map(|i| blend(alpha * a[broadcast_index(c_dims, a_dims, i)], beta, prior.map(|c| c[i])))
        .collect()
}

fn blend(value: f32, beta: f32, prior: Option<f32>) -> f32 {
    match prior {
        Some(prior) if beta != 0.0 => value + beta * prior,
        _ => value,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LrnParams {
    pub n: usize,
    pub alpha: f64,
    pub beta: f64,
    pub k: f64,
}

/// Channel window `[c - (n-1)/2, c + n/2]` clipped to `[0, channels)`.
fn window(c: usize, n: usize, channels: usize) -> std::ops::Range<usize> {
    let lo = c.saturating_sub((n - 1) / 2);
    let hi = (c + n / 2 + 1).min(channels);
    lo..hi
}

/// Splits dims into `(batch, channels, inner)` around channel axis 1.
fn lrn_geometry(dims: &[usize]) -> (usize, usize, usize) {
    let batch = dims.first().copied().unwrap_or(1);
    let channels = dims.get(1).copied().unwrap_or(1);
    let inner = dims.iter().skip(2).product();
    (batch, channels, inner)
}

fn lrn_scales(dims: &[usize], x: &[f32], params: LrnParams) -> Vec<f64> {
    let (batch, channels, inner) = lrn_geometry(dims);
    let mut scales = vec![0.0f64; x.len()];
    for b in 0..batch {
        for c in 0..channels {
            for s in 0..inner {
                let sum: f64 = window(c, params.n, channels)
                    .map(|cc| {
                        let v = f64::from(x[(b * channels + cc) * inner + s]);
                        v * v
                    })
                    .sum();
                scales[(b * channels + c) * inner + s] =
                    params.k + params.alpha / params.n as f64 * sum;
            }
        }
    }
    scales
}

/// `y = x * scale^-beta`, `scale = k + alpha / n * sum(x^2 over the channel window)`.
pub(crate) fn lrn_forward(dims: &[usize], x: &[f32], params: LrnParams) -> Vec<f32> {
    lrn_scales(dims, x, params)
        .iter()
        .zip(x)
        .map(|(scale, &v)| (f64::from(v) * scale.powf(-params.beta)) as f32)
        .collect()
}

/// Gradient of [`lrn_forward`] given the forward output `y`.
pub(crate) fn lrn_backward(
    dims: &[usize],
    x: &[f32],
    y: &[f32],
    dy: &[f32],
    params: LrnParams,
) -> Vec<f32> {
    let (batch, channels, inner) = lrn_geometry(dims);
    let scales = lrn_scales(dims, x, params);
    let coeff = 2.0 * params.alpha * params.beta / params.n as f64;
    let mut dx = vec![0.0f32; x.len()];
    for b in 0..batch {
        for c in 0..channels {
            for s in 0..inner {
                let at = |cc: usize| (b * channels + cc) * inner + s;
                let i = at(c);
                // Outputs whose window contains channel `c`.
                let lo = c.saturating_sub(params.n / 2);
                let hi = (c + (params.n - 1) / 2 + 1).min(channels);
                let cross: f64 = (lo..hi)
                    .map(|cc| {
                        let j = at(cc);
                        f64::from(dy[j]) * f64::from(y[j]) / scales[j]
                    })
                    .sum();
                let direct = f64::from(dy[i]) * scales[i].powf(-params.beta);
                dx[i] = (direct - coeff * f64::from(x[i]) * cross) as f32;
            }
        }
    }
    dx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_index_skips_unit_axes() {
        let dst = [2, 3];
        let src = [1, 3];
        let mapped: Vec<usize> = (0..6).map(|i| broadcast_index(&dst, &src, i)).collect();
        assert_eq!(mapped, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn lrn_window_is_centered_for_odd_sizes() {
        assert_eq!(window(0, 3, 4), 0..2);
        assert_eq!(window(2, 3, 4), 1..4);
        assert_eq!(window(1, 4, 4), 0..4);
    }
}
