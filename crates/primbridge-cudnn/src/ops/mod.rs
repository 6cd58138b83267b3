//! Compiled primitives.

mod binary;
mod lrn;

use primbridge::{
    Access, Arg, BinaryDesc, BridgeError, BridgeResult, ExecCtx, LrnDesc, PrimitiveDesc,
};

use crate::engine::CudnnEngine;
use crate::stream::CudnnStream;

pub use binary::{convert_alg_kind, BinaryImpl, BinaryRole};
pub use lrn::{LrnBackwardImpl, LrnForwardImpl, LrnRole};

/// A primitive description compiled into vendor descriptors.
///
/// Shapes with a zero extent in any role compile to `Noop`, which owns no descriptors and
/// never touches the stream.
#[derive(Debug)]
pub enum CompiledPrimitive {
    Noop { kind: &'static str },
    Binary(BinaryImpl),
    LrnForward(LrnForwardImpl),
    LrnBackward(LrnBackwardImpl),
}

impl CompiledPrimitive {
    pub fn init(desc: &PrimitiveDesc, engine: &CudnnEngine) -> BridgeResult<Self> {
        if desc.has_zero_dim() {
            tracing::debug!(kind = desc.kind_name(), "zero-extent primitive compiled as no-op");
            return Ok(CompiledPrimitive::Noop {
                kind: desc.kind_name(),
            });
        }
        let compiled = match desc {
            PrimitiveDesc::Binary(desc) => {
                CompiledPrimitive::Binary(BinaryImpl::init(desc, engine)?)
            }
            PrimitiveDesc::LrnForward(desc) => {
                CompiledPrimitive::LrnForward(LrnForwardImpl::init(desc, engine)?)
            }
            PrimitiveDesc::LrnBackward(desc) => {
                CompiledPrimitive::LrnBackward(LrnBackwardImpl::init(desc, engine)?)
            }
        };
        tracing::debug!(
            kind = compiled.kind_name(),
            descriptors = compiled.descriptor_count(),
            "compiled primitive"
        );
        Ok(compiled)
    }

    pub fn execute(&self, ctx: &ExecCtx, stream: &CudnnStream) -> BridgeResult<()> {
        match self {
            CompiledPrimitive::Noop { .. } => Ok(()),
            CompiledPrimitive::Binary(prim) => prim.execute(ctx, stream),
            CompiledPrimitive::LrnForward(prim) => prim.execute(ctx, stream),
            CompiledPrimitive::LrnBackward(prim) => prim.execute(ctx, stream),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            CompiledPrimitive::Noop { kind } => *kind,
            CompiledPrimitive::Binary(_) => "binary",
            CompiledPrimitive::LrnForward(_) => "lrn_forward",
            CompiledPrimitive::LrnBackward(_) => "lrn_backward",
        }
    }

    /// Number of vendor descriptors currently owned.
    pub fn descriptor_count(&self) -> usize {
        match self {
            CompiledPrimitive::Noop { .. } => 0,
            CompiledPrimitive::Binary(prim) => prim.descriptors().len(),
            CompiledPrimitive::LrnForward(prim) => prim.descriptors().len(),
            CompiledPrimitive::LrnBackward(prim) => prim.descriptors().len(),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, CompiledPrimitive::Noop { .. })
    }
}

macro_rules! typed_primitive {
    ($(#[$meta:meta])* $name:ident, $desc:ty, $variant:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            compiled: CompiledPrimitive,
        }

        impl $name {
            pub fn new(desc: &$desc, engine: &CudnnEngine) -> BridgeResult<Self> {
                let compiled =
                    CompiledPrimitive::init(&PrimitiveDesc::$variant(desc.clone()), engine)?;
                Ok(Self { compiled })
            }

            pub fn execute(&self, ctx: &ExecCtx, stream: &CudnnStream) -> BridgeResult<()> {
                self.compiled.execute(ctx, stream)
            }

            pub fn compiled(&self) -> &CompiledPrimitive {
                &self.compiled
            }
        }
    };
}

typed_primitive!(
    /// Elementwise binary primitive.
    BinaryPrimitive,
    BinaryDesc,
    Binary
);
typed_primitive!(
    /// Forward local response normalization.
    LrnForwardPrimitive,
    LrnDesc,
    LrnForward
);
typed_primitive!(
    /// Backward local response normalization.
    LrnBackwardPrimitive,
    LrnDesc,
    LrnBackward
);

fn check_capacity(arg: Arg, access: &Access, required: usize) -> BridgeResult<()> {
    let bytes = access.buffer().bytes();
    if bytes < required {
        return Err(BridgeError::invalid_arguments(format!(
            "buffer bound to {arg:?} holds {bytes} bytes, tensor needs {required}"
        )));
    }
    Ok(())
}
