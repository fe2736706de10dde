// verify.rs — Structural and SSA verification of kernel modules
//
// Produces machine-checkable evidence that a module is well formed. The
// pipeline runs it before copy insertion and again on the rewritten module.
//
// Preconditions: none; any module may be checked.
// Postconditions: `IrCert::all_pass()` iff V1-V5 hold.
// Failure modes: none; violations are reported as failed obligations.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::cfg::Cfg;
use crate::id::{BlockId, ValueId};
use crate::ir::{Module, Opcode, ValueKind};

/// Machine-checkable evidence for IR well-formedness (V1-V5).
#[derive(Debug, Clone)]
pub struct IrCert {
    /// V1: The module has an entry block; every block ends in exactly one
    /// terminator and holds no other terminator.
    pub v1_terminators: bool,
    /// V2: Operand counts match opcode arity and every operand names a
    /// value-producing definition.
    pub v2_operands: bool,
    /// V3: Every definition dominates each of its uses (phi uses at the end
    /// of the incoming block).
    pub v3_ssa_dominance: bool,
    /// V4: Phis lead their block and list each predecessor exactly once,
    /// with incoming values of the phi's type.
    pub v4_phi_shape: bool,
    /// V5: Copies preserve their operand's type.
    pub v5_copy_types: bool,
}

impl crate::pass::StageCert for IrCert {
    fn all_pass(&self) -> bool {
        self.v1_terminators
            && self.v2_operands
            && self.v3_ssa_dominance
            && self.v4_phi_shape
            && self.v5_copy_types
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("V1_terminators", self.v1_terminators),
            ("V2_operands", self.v2_operands),
            ("V3_ssa_dominance", self.v3_ssa_dominance),
            ("V4_phi_shape", self.v4_phi_shape),
            ("V5_copy_types", self.v5_copy_types),
        ]
    }
}

/// Verify a module.
pub fn verify_module(module: &Module) -> IrCert {
    let cfg = Cfg::build(module);
    let positions: HashMap<ValueId, (BlockId, usize)> = module
        .block_ids()
        .flat_map(|b| {
            module
                .block(b)
                .insts
                .iter()
                .enumerate()
                .map(move |(i, &v)| (v, (b, i)))
        })
        .collect();

    IrCert {
        v1_terminators: verify_v1_terminators(module),
        v2_operands: verify_v2_operands(module),
        v3_ssa_dominance: verify_v3_dominance(module, &cfg, &positions),
        v4_phi_shape: verify_v4_phi_shape(module, &cfg),
        v5_copy_types: verify_v5_copy_types(module),
    }
}

fn verify_v1_terminators(module: &Module) -> bool {
    if module.entry().is_none() {
        return false;
    }
    module.blocks.iter().all(|block| {
        let Some((&last, rest)) = block.insts.split_last() else {
            return false;
        };
        module.is_terminator(last) && rest.iter().all(|&v| !module.is_terminator(v))
    })
}

fn verify_v2_operands(module: &Module) -> bool {
    let n = module.value_count();
    module.program_order().into_iter().all(|(_, v)| {
        let Some(inst) = module.inst(v) else {
            return false;
        };
        let arity_ok = inst.op.arity() == Some(inst.operands.len());
        let defs_ok = inst.operands.iter().all(|&o| {
            o.index() < n
                && match &module.value(o).kind {
                    ValueKind::Inst(def) => def.op.has_result(),
                    _ => true,
                }
        });
        arity_ok && defs_ok
    })
}

fn verify_v3_dominance(
    module: &Module,
    cfg: &Cfg,
    positions: &HashMap<ValueId, (BlockId, usize)>,
) -> bool {
    for (use_block, user) in module.program_order() {
        let Some(inst) = module.inst(user) else {
            continue;
        };
        let use_pos = positions[&user].1;
        for (k, &operand) in inst.operands.iter().enumerate() {
            if !matches!(module.value(operand).kind, ValueKind::Inst(_)) {
                continue;
            }
            let Some(&(def_block, def_pos)) = positions.get(&operand) else {
                // Operand instruction is not placed in any block.
                return false;
            };
            let ok = match &inst.op {
                Opcode::Phi { blocks } => match blocks.get(k) {
                    Some(&incoming) => cfg.dominates(def_block, incoming),
                    None => false,
                },
                _ => {
                    if def_block == use_block {
                        def_pos < use_pos
                    } else {
                        cfg.strictly_dominates(def_block, use_block)
                    }
                }
            };
            if !ok {
                return false;
            }
        }
    }
    true
}

fn verify_v4_phi_shape(module: &Module, cfg: &Cfg) -> bool {
    for b in module.block_ids() {
        let mut leading = true;
        for &v in &module.block(b).insts {
            let Some(Opcode::Phi { blocks }) = module.opcode(v) else {
                leading = false;
                continue;
            };
            if !leading {
                return false;
            }
            let listed: HashSet<BlockId> = blocks.iter().copied().collect();
            let preds: HashSet<BlockId> = cfg.preds(b).iter().copied().collect();
            if listed.len() != blocks.len() || listed != preds {
                return false;
            }
            let ty = module.ty(v);
            let inst = module.inst(v);
            if inst.is_some_and(|i| i.operands.iter().any(|&o| module.ty(o) != ty)) {
                return false;
            }
        }
    }
    true
}

fn verify_v5_copy_types(module: &Module) -> bool {
    module.program_order().into_iter().all(|(_, v)| {
        match module.inst(v) {
            Some(inst) if matches!(inst.op, Opcode::Copy(_)) => inst
                .operands
                .first()
                .is_some_and(|&o| module.ty(o) == module.ty(v)),
            _ => true,
        }
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
