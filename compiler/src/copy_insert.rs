// copy_insert.rs — Copy insertion across the shared/register boundary
//
// Rewrites a module so that every operand arrives in the residency its
// consumer expects. Where a value's layout disagrees with the demand of an
// operand slot, a copy is inserted and the operand edge is rewired to it.
// Copies of the same value in the same direction are reused wherever an
// earlier copy dominates the new use site.
//
// Preconditions: `layouts` was computed over `module` in its current state
//                (same module identity and value count); otherwise `run`
//                panics.
// Postconditions: only copy instructions are added; the only other change is
//                 operand rewiring to those copies. The analysis is not
//                 updated; callers re-run alignment and layout analysis.
// Failure modes: contract violations panic.
// Side effects: mutates `module` (emits `tracing` events).

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::cfg::Cfg;
use crate::id::{BlockId, ValueId};
use crate::ir::{CopyDirection, CopyKind, InsertPoint, Module, Opcode};
use crate::layout::LayoutAnalysis;

/// Counts reported by one run of the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    pub to_shared: usize,
    pub from_shared: usize,
    /// Operand edges rewired to an existing copy.
    pub reused: usize,
}

impl CopyStats {
    pub fn inserted(&self) -> usize {
        self.to_shared + self.from_shared
    }
}

/// The copy-insertion transform.
#[derive(Debug, Clone, Copy)]
pub struct CopyInsertion {
    use_async: bool,
}

/// Program point where an operand is consumed.
#[derive(Debug, Clone, Copy)]
enum UseSite {
    /// Immediately before `user` in `block`.
    Before { block: BlockId, user: ValueId },
    /// End of `block`, before its terminator (phi incoming edge).
    BlockEnd(BlockId),
}

impl UseSite {
    fn block(self) -> BlockId {
        match self {
            UseSite::Before { block, .. } | UseSite::BlockEnd(block) => block,
        }
    }

    fn insert_point(self) -> InsertPoint {
        match self {
            UseSite::Before { user, .. } => InsertPoint::Before(user),
            UseSite::BlockEnd(block) => InsertPoint::BlockEnd(block),
        }
    }
}

impl CopyInsertion {
    /// `use_async` emits the non-blocking variant for copies into shared
    /// memory.
    pub fn new(use_async: bool) -> Self {
        CopyInsertion { use_async }
    }

    pub fn run(&self, module: &mut Module, layouts: &LayoutAnalysis) -> CopyStats {
        assert_eq!(
            layouts.module_id(),
            module.id(),
            "layout analysis was computed for a different module"
        );
        assert_eq!(
            layouts.value_count(),
            module.value_count(),
            "layout analysis is stale: computed over {} values, module has {}",
            layouts.value_count(),
            module.value_count()
        );

        let cfg = Cfg::build(module);
        let mut memo: HashMap<(ValueId, CopyDirection), Vec<ValueId>> = HashMap::new();
        let mut stats = CopyStats::default();

        // Use sites in dominance order: blocks in reverse postorder
        // (unreachable blocks trail in declaration order), and within a
        // block its own users first, then the phi edges leaving it. A
        // dominating site therefore always gets its copy first, and a phi
        // edge can reuse a copy made earlier in its predecessor.
        let mut blocks = cfg.reverse_postorder().to_vec();
        blocks.extend(module.block_ids().filter(|&b| !cfg.is_reachable(b)));
        let mut edges_from: HashMap<BlockId, Vec<(BlockId, ValueId, usize)>> = HashMap::new();
        for &b in &blocks {
            for &v in &module.block(b).insts {
                if let Some(Opcode::Phi { blocks: preds }) = module.opcode(v) {
                    for (k, &pred) in preds.iter().enumerate() {
                        edges_from.entry(pred).or_default().push((b, v, k));
                    }
                }
            }
        }
        let mut work = Vec::new();
        for &b in &blocks {
            for &v in &module.block(b).insts {
                let Some(inst) = module.inst(v) else {
                    continue;
                };
                if !inst.op.is_phi() {
                    work.extend((0..inst.operands.len()).map(|k| (b, v, k)));
                }
            }
            work.extend(edges_from.remove(&b).unwrap_or_default());
        }

        for (block, user, k) in work {
            let Some(inst) = module.inst(user).cloned() else {
                continue;
            };
            let operand = inst.operands[k];
            if module.ty(operand).rank() == 0 {
                continue;
            }
            let want_shared = match &inst.op {
                Opcode::Phi { .. } => layouts.is_shared(user),
                op if op.is_shared_operand(k) => true,
                op if op.accepts_any_residency(k) => continue,
                _ => false,
            };
            if layouts.is_shared(operand) == want_shared {
                continue;
            }

            let direction = if want_shared {
                CopyDirection::ToShared
            } else {
                CopyDirection::FromShared
            };
            let site = match &inst.op {
                Opcode::Phi { blocks } => UseSite::BlockEnd(blocks[k]),
                _ => UseSite::Before { block, user },
            };

            let existing = memo.get(&(operand, direction)).and_then(|copies| {
                copies
                    .iter()
                    .copied()
                    .find(|&c| dominates_site(module, &cfg, c, site))
            });
            if let Some(copy) = existing {
                module.set_operand(user, k, copy);
                stats.reused += 1;
                debug!(
                    value = %module.display_name(operand),
                    copy = %module.display_name(copy),
                    user = %module.display_name(user),
                    "reused copy"
                );
                continue;
            }

            let kind = match direction {
                CopyDirection::ToShared if self.use_async => CopyKind::AsyncToShared,
                CopyDirection::ToShared => CopyKind::ToShared,
                CopyDirection::FromShared => CopyKind::FromShared,
            };
            let ty = module.ty(operand).clone();
            let copy = module.insert(
                site.insert_point(),
                Opcode::Copy(kind),
                vec![operand],
                ty,
                None,
            );
            module.set_operand(user, k, copy);
            memo.entry((operand, direction)).or_default().push(copy);
            match direction {
                CopyDirection::ToShared => stats.to_shared += 1,
                CopyDirection::FromShared => stats.from_shared += 1,
            }
            debug!(
                value = %module.display_name(operand),
                copy = %module.display_name(copy),
                kind = Opcode::Copy(kind).mnemonic(),
                block = %module.block(site.block()).label,
                "inserted copy"
            );
        }

        info!(
            module = %module.name,
            to_shared = stats.to_shared,
            from_shared = stats.from_shared,
            reused = stats.reused,
            "copy insertion done"
        );
        stats
    }
}

/// The copy's current position precedes `site` on every path from entry.
fn dominates_site(module: &Module, cfg: &Cfg, copy: ValueId, site: UseSite) -> bool {
    let Some((copy_block, copy_pos)) = module.position(copy) else {
        return false;
    };
    match site {
        UseSite::Before { block, user } => {
            if copy_block == block {
                module.position(user).is_some_and(|(_, pos)| copy_pos < pos)
            } else {
                cfg.strictly_dominates(copy_block, block)
            }
        }
        UseSite::BlockEnd(block) => copy_block == block || cfg.strictly_dominates(copy_block, block),
    }
}

// ── Placement verification ─────────────────────────────────────────────────

/// Machine-checkable evidence that operands meet residency demands (P1-P3).
#[derive(Debug, Clone)]
pub struct PlacementCert {
    /// P1: Shared operand slots receive shared values.
    pub p1_shared_slots: bool,
    /// P2: Register operand slots receive register values.
    pub p2_register_slots: bool,
    /// P3: Phi incoming values share the phi's residency.
    pub p3_phi_residency: bool,
}

impl crate::pass::StageCert for PlacementCert {
    fn all_pass(&self) -> bool {
        self.p1_shared_slots && self.p2_register_slots && self.p3_phi_residency
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_shared_slots", self.p1_shared_slots),
            ("P2_register_slots", self.p2_register_slots),
            ("P3_phi_residency", self.p3_phi_residency),
        ]
    }
}

/// Check residency demands against a layout analysis of the rewritten module.
pub fn verify_placement(module: &Module, layouts: &LayoutAnalysis) -> PlacementCert {
    let mut cert = PlacementCert {
        p1_shared_slots: true,
        p2_register_slots: true,
        p3_phi_residency: true,
    };
    for (_, user) in module.program_order() {
        let Some(inst) = module.inst(user) else {
            continue;
        };
        for (k, &operand) in inst.operands.iter().enumerate() {
            if module.ty(operand).rank() == 0 {
                continue;
            }
            let shared = layouts.is_shared(operand);
            if inst.op.is_phi() {
                cert.p3_phi_residency &= shared == layouts.is_shared(user);
            } else if inst.op.is_shared_operand(k) {
                cert.p1_shared_slots &= shared;
            } else if !inst.op.accepts_any_residency(k) {
                cert.p2_register_slots &= !shared;
            }
        }
    }
    cert
}

// ── Tests ──────────────────────────────────────────────────────────────────
