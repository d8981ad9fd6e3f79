//! Static variable descriptors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    DenseTensor,
    Scalar,
}

impl Default for VarKind {
    fn default() -> Self {
        Self::DenseTensor
    }
}

/// Compile-time description of a variable owned by a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDesc {
    pub name: String,

    #[serde(default)]
    pub kind: VarKind,

    #[serde(default)]
    pub shape: Vec<usize>,

    /// Survives across invocations; never freed by the dispatcher
    #[serde(default)]
    pub persistable: bool,
}

impl VarDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::default(),
            shape: Vec::new(),
            persistable: false,
        }
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_kind(mut self, kind: VarKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn persistable(mut self, persistable: bool) -> Self {
        self.persistable = persistable;
        self
    }
}
