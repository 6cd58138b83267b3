//! Ownership of vendor descriptors.
//!
//! A [`DescriptorSet`] records every descriptor as soon as the vendor hands it out, before
//! it is configured, so a failure at any later step unwinds exactly what was created.
//! Descriptors are destroyed in reverse creation order.

use std::fmt;
use std::sync::Arc;

use primbridge::BridgeResult;

use crate::api::{
    DnnLibrary, LrnConfig, OpTensorConfig, RawLrnDescriptor, RawOpTensorDescriptor,
    RawTensorDescriptor,
};
use crate::translate::VendorTensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnedDescriptor {
    Tensor(RawTensorDescriptor),
    OpTensor(RawOpTensorDescriptor),
    Lrn(RawLrnDescriptor),
}

impl OwnedDescriptor {
    fn kind(self) -> &'static str {
        match self {
            OwnedDescriptor::Tensor(_) => "tensor",
            OwnedDescriptor::OpTensor(_) => "op_tensor",
            OwnedDescriptor::Lrn(_) => "lrn",
        }
    }
}

pub struct DescriptorSet {
    dnn: Arc<dyn DnnLibrary>,
    owned: Vec<OwnedDescriptor>,
}

impl fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("owned", &self.owned)
            .finish()
    }
}

impl DescriptorSet {
    pub fn new(dnn: Arc<dyn DnnLibrary>) -> Self {
        Self {
            dnn,
            owned: Vec::new(),
        }
    }

    pub fn create_tensor(&mut self, tensor: &VendorTensor) -> BridgeResult<RawTensorDescriptor> {
        let desc = self.dnn.create_tensor_descriptor()?;
        self.owned.push(OwnedDescriptor::Tensor(desc));
        self.dnn.set_tensor_nd_descriptor(desc, tensor.nd_config())?;
        tracing::debug!(
            descriptor = desc.0,
            rank = tensor.rank(),
            dims = ?tensor.dims.as_slice(),
            "created tensor descriptor"
        );
        Ok(desc)
    }

    pub fn create_op_tensor(
        &mut self,
        config: OpTensorConfig,
    ) -> BridgeResult<RawOpTensorDescriptor> {
        let desc = self.dnn.create_op_tensor_descriptor()?;
        self.owned.push(OwnedDescriptor::OpTensor(desc));
        self.dnn.set_op_tensor_descriptor(desc, config)?;
        tracing::debug!(descriptor = desc.0, op = ?config.op, "created op tensor descriptor");
        Ok(desc)
    }

    pub fn create_lrn(&mut self, config: LrnConfig) -> BridgeResult<RawLrnDescriptor> {
        let desc = self.dnn.create_lrn_descriptor()?;
        self.owned.push(OwnedDescriptor::Lrn(desc));
        self.dnn.set_lrn_descriptor(desc, config)?;
        tracing::debug!(descriptor = desc.0, n = config.n, "created LRN descriptor");
        Ok(desc)
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    /// Destroys everything still owned, newest first. Calling it again is a no-op.
    ///
    /// Destroy failures are logged and skipped; each descriptor is attempted exactly once.
    pub fn release(&mut self) {
        while let Some(desc) = self.owned.pop() {
            let result = match desc {
                OwnedDescriptor::Tensor(raw) => self.dnn.destroy_tensor_descriptor(raw),
                OwnedDescriptor::OpTensor(raw) => self.dnn.destroy_op_tensor_descriptor(raw),
                OwnedDescriptor::Lrn(raw) => self.dnn.destroy_lrn_descriptor(raw),
            };
            match result {
                Ok(()) => tracing::debug!(kind = desc.kind(), "destroyed descriptor"),
                Err(err) => tracing::warn!(
                    kind = desc.kind(),
                    error = %err,
                    "failed to destroy descriptor"
                ),
            }
        }
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.release();
    }
}
