use primbridge::{Arg, DataType, PrimitiveAttr};

/// Blending scalars of `C = op(alpha0 * A, alpha1 * B) + beta * C`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub alpha0: f32,
    pub alpha1: f32,
    pub beta: f32,
}

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            alpha0: 1.0,
            alpha1: 1.0,
            beta: 0.0,
        }
    }
}

/// Signed 8-bit sources are requantized by the first scale of each input. Destination
/// scales are not applied.
pub fn resolve_coefficients(src0_type: DataType, attr: &PrimitiveAttr) -> Coefficients {
    let mut coeffs = Coefficients::default();
    if src0_type == DataType::S8 {
        coeffs.alpha0 = first_scale(attr, Arg::Src0);
        coeffs.alpha1 = first_scale(attr, Arg::Src1);
    }
    coeffs
}

fn first_scale(attr: &PrimitiveAttr, arg: Arg) -> f32 {
    attr.scales(arg).first().copied().unwrap_or(1.0)
}
