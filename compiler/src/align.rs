// align.rs — Alignment analysis
//
// Infers, for every value, the largest power of two dividing it (for
// pointers, the byte address), the length of runs of consecutive values
// along the fastest axis, and the length of runs of equal values. Layout
// analysis uses the facts to pick vector widths.
//
// Preconditions: none; the analysis is total.
// Postconditions: one fact per value id in the module; values with no
//                 derivable guarantee get `AlignFact::UNKNOWN`.
// Failure modes: none.
// Side effects: none (emits `tracing` events).

use serde::Serialize;
use tracing::{debug, info};

use crate::id::ValueId;
use crate::ir::{BinaryOp, ConstValue, Module, Opcode, ValueKind};

/// Upper bound for inferred alignment (and the alignment of the constant 0).
pub const MAX_ALIGNMENT: u64 = 1 << 12;

/// Divisibility, contiguity and constancy guarantees for one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AlignFact {
    pub alignment: u64,
    pub contiguity: u64,
    pub constancy: u64,
}

impl AlignFact {
    /// No guarantee.
    pub const UNKNOWN: AlignFact = AlignFact {
        alignment: 1,
        contiguity: 1,
        constancy: 1,
    };

    pub fn new(alignment: u64, contiguity: u64, constancy: u64) -> Self {
        AlignFact {
            alignment: alignment.clamp(1, MAX_ALIGNMENT),
            contiguity: contiguity.max(1),
            constancy: constancy.max(1),
        }
    }

    /// Greatest fact implied by both `self` and `other`.
    pub fn meet(self, other: AlignFact) -> AlignFact {
        AlignFact {
            alignment: self.alignment.min(other.alignment),
            contiguity: gcd(self.contiguity, other.contiguity),
            constancy: gcd(self.constancy, other.constancy),
        }
    }
}

impl Default for AlignFact {
    fn default() -> Self {
        AlignFact::UNKNOWN
    }
}

/// Alignment facts for every value of a module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentAnalysis {
    facts: Vec<AlignFact>,
}

impl AlignmentAnalysis {
    /// Analyse `module`, iterating phis to a fixed point.
    pub fn run(module: &Module) -> AlignmentAnalysis {
        let mut state: Vec<Option<AlignFact>> = vec![None; module.value_count()];

        for (v, data) in module.values() {
            match &data.kind {
                ValueKind::Argument { align, .. } => {
                    state[v.index()] = Some(AlignFact::new(*align, 1, 1));
                }
                ValueKind::Constant(value) => {
                    let numel = data.ty.numel();
                    let fact = match value {
                        ConstValue::Int(c) => AlignFact::new(pow2_divisor(*c), 1, numel),
                        ConstValue::Float(_) => AlignFact::new(1, 1, numel),
                    };
                    state[v.index()] = Some(fact);
                }
                ValueKind::Inst(_) => {}
            }
        }

        let order = module.program_order();
        let mut rounds = 0;
        loop {
            rounds += 1;
            let mut changed = false;
            for &(_, v) in &order {
                let Some(new) = transfer(module, v, &state) else {
                    continue;
                };
                let merged = match state[v.index()] {
                    Some(old) => old.meet(new),
                    None => new,
                };
                if state[v.index()] != Some(merged) {
                    state[v.index()] = Some(merged);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let facts: Vec<AlignFact> = state.into_iter().map(Option::unwrap_or_default).collect();
        for (v, fact) in facts.iter().enumerate() {
            if *fact != AlignFact::UNKNOWN {
                debug!(
                    value = %module.display_name(ValueId(v as u32)),
                    alignment = fact.alignment,
                    contiguity = fact.contiguity,
                    constancy = fact.constancy,
                    "align fact"
                );
            }
        }
        info!(module = %module.name, values = facts.len(), rounds, "alignment analysis done");
        AlignmentAnalysis { facts }
    }

    /// Fact for `v`; values the analysis never saw have no guarantee.
    pub fn fact(&self, v: ValueId) -> AlignFact {
        self.facts.get(v.index()).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// JSON report of every value with a non-trivial fact, by printed name.
    pub fn report(&self, module: &Module) -> serde_json::Value {
        let values: Vec<serde_json::Value> = module
            .values()
            .filter(|&(v, _)| self.fact(v) != AlignFact::UNKNOWN)
            .map(|(v, _)| {
                let f = self.fact(v);
                serde_json::json!({
                    "value": module.display_name(v),
                    "alignment": f.alignment,
                    "contiguity": f.contiguity,
                    "constancy": f.constancy,
                })
            })
            .collect();
        serde_json::json!({ "kernel": module.name, "values": values })
    }
}

// ── Transfer functions ─────────────────────────────────────────────────────

/// New fact for instruction `v`, or `None` while a phi has no computed
/// incoming value yet.
fn transfer(module: &Module, v: ValueId, state: &[Option<AlignFact>]) -> Option<AlignFact> {
    let inst = module.inst(v)?;
    let ty = module.ty(v);
    let get = |k: usize| {
        inst.operands
            .get(k)
            .and_then(|o| state[o.index()])
            .unwrap_or_default()
    };

    let fact = match &inst.op {
        Opcode::Range { start, end } => {
            AlignFact::new(pow2_divisor(*start), end.abs_diff(*start), 1)
        }
        Opcode::Splat => AlignFact::new(get(0).alignment, 1, ty.numel()),
        Opcode::Broadcast | Opcode::Cast | Opcode::Copy(_) => get(0),
        Opcode::Reshape => {
            let a = get(0);
            let last = ty.shape.last().copied().unwrap_or(1) as u64;
            AlignFact::new(a.alignment, gcd(a.contiguity, last), gcd(a.constancy, last))
        }
        Opcode::PtrAdd => {
            let elem_bytes = ty.elem.pointee().map(|s| s.bytes()).unwrap_or(1);
            let (a, b) = (get(0), get(1));
            let offset_align = b.alignment.saturating_mul(elem_bytes);
            additive(a, AlignFact { alignment: offset_align.min(MAX_ALIGNMENT), ..b })
        }
        Opcode::Binary(BinaryOp::Add) | Opcode::Binary(BinaryOp::Sub) => additive(get(0), get(1)),
        Opcode::Binary(BinaryOp::Mul) => {
            let (a, b) = (get(0), get(1));
            AlignFact::new(
                a.alignment.saturating_mul(b.alignment),
                1,
                gcd(a.constancy, b.constancy),
            )
        }
        Opcode::Binary(_) => AlignFact::new(1, 1, gcd(get(0).constancy, get(1).constancy)),
        Opcode::Phi { .. } => {
            return inst
                .operands
                .iter()
                .filter_map(|o| state[o.index()])
                .reduce(AlignFact::meet);
        }
        Opcode::Unary(_)
        | Opcode::Load
        | Opcode::Store
        | Opcode::Dot
        | Opcode::Trans
        | Opcode::Br { .. }
        | Opcode::CondBr { .. }
        | Opcode::Ret => AlignFact::UNKNOWN,
    };
    Some(fact)
}

fn additive(a: AlignFact, b: AlignFact) -> AlignFact {
    AlignFact::new(
        a.alignment.min(b.alignment),
        gcd(a.contiguity, b.constancy).max(gcd(b.contiguity, a.constancy)),
        gcd(a.constancy, b.constancy),
    )
}

/// Largest power of two dividing `c`, capped at `MAX_ALIGNMENT`.
pub fn pow2_divisor(c: i64) -> u64 {
    if c == 0 {
        return MAX_ALIGNMENT;
    }
    let tz = c.unsigned_abs().trailing_zeros();
    if tz >= MAX_ALIGNMENT.trailing_zeros() {
        MAX_ALIGNMENT
    } else {
        1 << tz
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// ── Tests ──────────────────────────────────────────────────────────────────
