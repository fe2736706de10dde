// lower.rs — Final lowering seam
//
// The last stage hands the placed module to a `KernelLowering`
// implementation, which produces the low-level module for machine-code
// generation. `ListingLowering` is the built-in implementation: it renders a
// target-annotated instruction listing with shared-memory offsets and async
// wait points.
//
// Preconditions: copy insertion and allocation ran on `module`; `layouts` and
//                `alloc` describe its current state.
// Postconditions: on success the `LowModule` is owned by the caller and
//                 carries a fresh id from the `LowContext`.
// Failure modes: `LowerError` when the target cannot express an instruction.
// Side effects: advances the `LowContext` id counter.

use std::fmt::Write as _;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::alloc::SharedAllocation;
use crate::id::ValueId;
use crate::ir::{CopyKind, Module, Opcode};
use crate::layout::LayoutAnalysis;
use crate::target::Target;

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LowerError {
    #[error("`{op}` is not supported on {target}: {reason}")]
    Unsupported {
        op: String,
        target: String,
        reason: String,
    },
    #[error("lowering failed: {0}")]
    Failed(String),
}

// ── Context and output ─────────────────────────────────────────────────────

/// Allocation context for low-level modules; hands out module identities.
#[derive(Debug, Default)]
pub struct LowContext {
    next_id: u32,
    names: Vec<String>,
}

impl LowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a module named `name`.
    pub fn allocate(&mut self, name: &str) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.names.push(name.to_string());
        id
    }

    /// Names of every module lowered through this context, by id.
    pub fn module_names(&self) -> &[String] {
        &self.names
    }
}

/// Low-level module ready for machine-code generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowModule {
    pub id: u32,
    pub name: String,
    pub target: String,
    pub num_warps: u32,
    pub shared_bytes: u64,
    pub text: String,
}

/// Everything a lowering needs besides the module itself.
#[derive(Debug, Clone, Copy)]
pub struct LowerInput<'a> {
    pub layouts: &'a LayoutAnalysis,
    pub alloc: &'a SharedAllocation,
    pub target: &'a Target,
    pub arch: u32,
    pub num_warps: u32,
}

/// Final lowering to a machine-code-ready module.
pub trait KernelLowering {
    fn lower(
        &self,
        module: &Module,
        input: &LowerInput<'_>,
        ctx: &mut LowContext,
    ) -> Result<LowModule, LowerError>;
}

// ── Listing lowering ───────────────────────────────────────────────────────

/// Renders an annotated instruction listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingLowering;

impl KernelLowering for ListingLowering {
    fn lower(
        &self,
        module: &Module,
        input: &LowerInput<'_>,
        ctx: &mut LowContext,
    ) -> Result<LowModule, LowerError> {
        let mut text = String::new();
        let _ = writeln!(text, ".kernel {}", module.name);
        let _ = writeln!(text, ".target {}", input.target.name);
        let _ = writeln!(text, ".warps {}", input.num_warps);
        let _ = writeln!(text, ".shared {}", input.alloc.allocated_size());
        for buf in &input.alloc.buffers {
            let _ = writeln!(
                text,
                ".buffer g{} offset={} size={} stages={}",
                buf.group.0, buf.offset, buf.size, buf.num_buffers
            );
        }

        for b in module.block_ids() {
            let block = module.block(b);
            let _ = writeln!(text, "{}:", block.label);
            let mut pending_async: Vec<ValueId> = Vec::new();
            for &v in &block.insts {
                let Some(inst) = module.inst(v) else {
                    continue;
                };
                if inst.op == Opcode::Copy(CopyKind::AsyncToShared) && input.arch < 80 {
                    return Err(LowerError::Unsupported {
                        op: inst.op.mnemonic().to_string(),
                        target: input.target.name.clone(),
                        reason: "asynchronous copies need sm_80 or newer".to_string(),
                    });
                }
                let reads_pending = inst.operands.iter().any(|o| pending_async.contains(o));
                if !pending_async.is_empty() && (reads_pending || inst.op.is_terminator()) {
                    let _ = writeln!(text, "  async_wait");
                    pending_async.clear();
                }

                let mut line = format!("  {}", module.format_inst(v));
                if inst.op.has_result() {
                    if let Some(buf) = input.alloc.buffer_of(input.layouts, v) {
                        let _ = write!(line, " @smem[{}]", buf.offset);
                    }
                }
                let _ = writeln!(text, "{line}");

                if inst.op == Opcode::Copy(CopyKind::AsyncToShared) {
                    pending_async.push(v);
                }
            }
        }

        let id = ctx.allocate(&module.name);
        debug!(module = %module.name, id, bytes = text.len(), "lowered to listing");
        Ok(LowModule {
            id,
            name: module.name.clone(),
            target: input.target.name.clone(),
            num_warps: input.num_warps,
            shared_bytes: input.alloc.allocated_size(),
            text,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
