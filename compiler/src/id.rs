// id.rs — Stable arena identifiers for tkc
//
// Every value, block, and layout group is addressed by a small integer index
// into its owning arena. Memo tables and analysis results key on these IDs,
// never on references, so inserting instructions during a rewrite cannot
// invalidate them.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

/// Index of a value (argument, constant, or instruction) in `Module::values`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueId(pub u32);

/// Index of a basic block in `Module::blocks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub u32);

/// Index of a layout-equivalence group in `LayoutAnalysis::groups`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(pub u32);

/// Process-unique identity of a module. Analyses record it so a pass can
/// detect being handed results computed over some other module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ModuleId(pub u32);

static NEXT_MODULE: AtomicU32 = AtomicU32::new(0);

impl ModuleId {
    /// Allocate a fresh module identity.
    pub fn fresh() -> Self {
        ModuleId(NEXT_MODULE.fetch_add(1, Ordering::Relaxed))
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl GroupId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
