use std::collections::HashMap;

use crate::error::{BridgeError, BridgeResult};
use crate::primitive::Arg;
use crate::runtime::{Access, ManagedBuffer};

/// Named-argument table passed to primitive execution.
#[derive(Debug, Clone, Default)]
pub struct ExecCtx {
    args: HashMap<Arg, ManagedBuffer>,
}

impl ExecCtx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, arg: Arg, buffer: &ManagedBuffer) -> Self {
        self.insert(arg, buffer);
        self
    }

    pub fn insert(&mut self, arg: Arg, buffer: &ManagedBuffer) {
        self.args.insert(arg, buffer.clone());
    }

    pub fn buffer(&self, arg: Arg) -> BridgeResult<&ManagedBuffer> {
        self.args.get(&arg).ok_or(BridgeError::MissingArgument(arg))
    }

    pub fn input(&self, arg: Arg) -> BridgeResult<Access> {
        self.buffer(arg).map(Access::read)
    }

    pub fn output(&self, arg: Arg) -> BridgeResult<Access> {
        self.buffer(arg).map(Access::write)
    }
}
