// layout.rs — Layout analysis
//
// Partitions values into groups that must share a layout, then picks one
// layout per group: distributed across lanes, resident in shared memory, or
// packed for the matrix-multiply unit. Groups come from a union-find over
// layout-preserving operand edges; the layout comes from the demands placed
// on any member.
//
// Preconditions: `align` was computed over `module` in its current state.
// Postconditions: every value id of the module belongs to exactly one group;
//                 groups are numbered in order of their smallest member.
// Invariant: no group holds both a shared producer and a value computed in
//            registers, so residency survives copy insertion and re-analysis.
// Failure modes: none; a phi that is both a dot accumulator and read at a
//                shared slot resolves to shared and sets its group's
//                `conflict` flag. Copy insertion reconciles the accumulator.
// Side effects: none (emits `tracing` events).

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::align::AlignmentAnalysis;
use crate::cfg::Cfg;
use crate::id::{GroupId, ModuleId, ValueId};
use crate::ir::{Module, Opcode, Type};

// ── Options ────────────────────────────────────────────────────────────────

/// Device and launch parameters that shape layout descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayoutOptions {
    pub num_warps: u32,
    pub num_stages: u32,
    /// Compute capability, e.g. 80 for sm_80.
    pub arch: u32,
    pub warp_size: u32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            num_warps: 4,
            num_stages: 2,
            arch: 80,
            warp_size: 32,
        }
    }
}

// ── Layout descriptors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LayoutKind {
    Distributed,
    Shared,
    MmaOperand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    Distributed {
        shape: Vec<u32>,
        order: Vec<u32>,
        size_per_thread: Vec<u32>,
        threads_per_warp: Vec<u32>,
        warps_per_cta: Vec<u32>,
    },
    Shared {
        shape: Vec<u32>,
        order: Vec<u32>,
        vec: u32,
        per_phase: u32,
        max_phase: u32,
        num_buffers: u32,
        elem_bytes: u32,
    },
    MmaOperand {
        shape: Vec<u32>,
        version: u32,
        warps_per_tile: Vec<u32>,
    },
}

impl Layout {
    pub fn kind(&self) -> LayoutKind {
        match self {
            Layout::Distributed { .. } => LayoutKind::Distributed,
            Layout::Shared { .. } => LayoutKind::Shared,
            Layout::MmaOperand { .. } => LayoutKind::MmaOperand,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.kind() == LayoutKind::Shared
    }

    pub fn shape(&self) -> &[u32] {
        match self {
            Layout::Distributed { shape, .. }
            | Layout::Shared { shape, .. }
            | Layout::MmaOperand { shape, .. } => shape,
        }
    }
}

/// Values that must agree on one layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutGroup {
    pub id: GroupId,
    /// Ascending value ids.
    pub members: Vec<ValueId>,
    pub layout: Layout,
    /// A member was demanded both as a dot accumulator and in shared memory.
    pub conflict: bool,
    /// Contains a phi with an incoming value on a back edge.
    pub loop_carried: bool,
}

// ── Analysis ───────────────────────────────────────────────────────────────

/// Layout assignment for every value of one module.
#[derive(Debug, Clone)]
pub struct LayoutAnalysis {
    module_id: ModuleId,
    value_count: usize,
    group_of: Vec<GroupId>,
    groups: Vec<LayoutGroup>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Demands {
    /// Has a shared producer or a phi read at a shared slot.
    shared: bool,
    /// Has a dot result.
    mma: bool,
    conflict: bool,
}

impl LayoutAnalysis {
    pub fn run(module: &Module, align: &AlignmentAnalysis, options: &LayoutOptions) -> Self {
        let n = module.value_count();
        let cfg = Cfg::build(module);
        let mut uf = UnionFind::new(n);
        let is_tensor = |v: ValueId| module.ty(v).rank() > 0;
        // Phis read where shared memory is required.
        let mut at_shared_slot = vec![false; n];
        for (_, v) in module.program_order() {
            let Some(inst) = module.inst(v) else {
                continue;
            };
            for (k, &o) in inst.operands.iter().enumerate() {
                if inst.op.is_shared_operand(k) && module.opcode(o).is_some_and(Opcode::is_phi) {
                    at_shared_slot[o.index()] = true;
                }
            }
        }
        // Residency fixed by the defining opcode: `Some(true)` for shared
        // producers, `Some(false)` for everything computed in registers
        // (arguments and constants included). Phis take their group's.
        let bound = |v: ValueId| match module.opcode(v) {
            Some(op) if op.is_phi() => None,
            Some(op) => Some(op.produces_shared()),
            None => Some(false),
        };
        let joins = |v: ValueId, phi_ok: bool| match bound(v) {
            Some(shared) => !shared,
            None => phi_ok && !at_shared_slot[v.index()],
        };

        // ── Register edges ──
        let mut phis = Vec::new();
        for (_, v) in module.program_order() {
            let Some(inst) = module.inst(v) else {
                continue;
            };
            match &inst.op {
                Opcode::Store => {
                    if let [ptr, value] = inst.operands[..] {
                        if is_tensor(ptr)
                            && is_tensor(value)
                            && joins(ptr, false)
                            && joins(value, false)
                        {
                            uf.union(ptr.index(), value.index());
                        }
                    }
                }
                Opcode::Phi { .. } => phis.push(v),
                op => {
                    // A phi joins a register group only as a dot accumulator,
                    // and not when it is also read at a shared slot.
                    let phi_ok = matches!(op, Opcode::Dot);
                    for (k, &o) in inst.operands.iter().enumerate() {
                        if op.is_layout_preserving(k)
                            && is_tensor(v)
                            && is_tensor(o)
                            && joins(v, phi_ok)
                            && joins(o, phi_ok)
                        {
                            uf.union(v.index(), o.index());
                        }
                    }
                }
            }
        }

        // ── Shared edges: phis outside register groups join shared incomings ──
        let mut in_register_group = vec![false; n];
        for i in 0..n {
            let v = ValueId(i as u32);
            if bound(v) == Some(false) && is_tensor(v) {
                let root = uf.find(i);
                in_register_group[root] = true;
            }
        }
        for &phi in &phis {
            if !is_tensor(phi) || in_register_group[uf.find(phi.index())] {
                continue;
            }
            let Some(inst) = module.inst(phi) else {
                continue;
            };
            for &o in &inst.operands {
                if bound(o) == Some(true) && is_tensor(o) {
                    uf.union(phi.index(), o.index());
                }
            }
        }

        // ── Group numbering: by smallest member ──
        let mut root_to_group: Vec<Option<GroupId>> = vec![None; n];
        let mut group_of = Vec::with_capacity(n);
        let mut members: Vec<Vec<ValueId>> = Vec::new();
        for i in 0..n {
            let root = uf.find(i);
            let g = match root_to_group[root] {
                Some(g) => g,
                None => {
                    let g = GroupId(members.len() as u32);
                    root_to_group[root] = Some(g);
                    members.push(Vec::new());
                    g
                }
            };
            group_of.push(g);
            members[g.index()].push(ValueId(i as u32));
        }

        // ── Demands ──
        let mut demands = vec![Demands::default(); members.len()];
        let mut loop_carried = vec![false; members.len()];
        for (v, _) in module.values() {
            if is_tensor(v) && (bound(v) == Some(true) || at_shared_slot[v.index()]) {
                demands[group_of[v.index()].index()].shared = true;
            }
        }
        for (block, v) in module.program_order() {
            let Some(inst) = module.inst(v) else {
                continue;
            };
            let g = group_of[v.index()].index();
            if inst.op == Opcode::Dot && is_tensor(v) {
                demands[g].mma = true;
                // An accumulator phi also read at a shared slot was kept out
                // of this group.
                if let Some(&acc) = inst.operands.get(2) {
                    if at_shared_slot[acc.index()] && is_tensor(acc) {
                        demands[group_of[acc.index()].index()].conflict = true;
                    }
                }
            }
            if let Opcode::Phi { blocks } = &inst.op {
                if blocks.iter().any(|&from| cfg.is_back_edge(from, block)) {
                    loop_carried[g] = true;
                }
            }
        }

        // ── Layout selection ──
        let groups: Vec<LayoutGroup> = members
            .into_iter()
            .enumerate()
            .map(|(i, members)| {
                let id = GroupId(i as u32);
                let d = demands[i];
                let conflict = d.conflict;
                let layout = if d.shared {
                    shared_layout(module, &members, loop_carried[i], options)
                } else if d.mma {
                    mma_layout(module, &members, options)
                } else {
                    distributed_layout(module, align, &members, options)
                };
                if conflict {
                    warn!(
                        group = id.0,
                        "accumulator phi read at a shared slot; resolved to shared"
                    );
                }
                if members.len() > 1 || layout.kind() != LayoutKind::Distributed {
                    debug!(
                        group = id.0,
                        members = members.len(),
                        kind = ?layout.kind(),
                        "layout group"
                    );
                }
                LayoutGroup {
                    id,
                    members,
                    layout,
                    conflict,
                    loop_carried: loop_carried[i],
                }
            })
            .collect();

        let shared = groups.iter().filter(|g| g.layout.is_shared()).count();
        info!(
            module = %module.name,
            groups = groups.len(),
            shared,
            "layout analysis done"
        );

        LayoutAnalysis {
            module_id: module.id(),
            value_count: n,
            group_of,
            groups,
        }
    }

    /// Identity of the module this analysis was computed over.
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Number of values the module had when analysed.
    pub fn value_count(&self) -> usize {
        self.value_count
    }

    /// Panics if `v` was not part of the analysed module.
    pub fn group_of(&self, v: ValueId) -> GroupId {
        assert!(
            v.index() < self.value_count,
            "value {v:?} was not seen by layout analysis ({} values)",
            self.value_count
        );
        self.group_of[v.index()]
    }

    pub fn group(&self, id: GroupId) -> &LayoutGroup {
        &self.groups[id.index()]
    }

    pub fn groups(&self) -> &[LayoutGroup] {
        &self.groups
    }

    pub fn layout_of(&self, v: ValueId) -> &Layout {
        &self.group(self.group_of(v)).layout
    }

    pub fn is_shared(&self, v: ValueId) -> bool {
        self.layout_of(v).is_shared()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &LayoutGroup> {
        self.groups.iter().filter(|g| g.conflict)
    }

    /// JSON report of non-trivial groups, members by printed name.
    pub fn report(&self, module: &Module) -> serde_json::Value {
        let groups: Vec<serde_json::Value> = self
            .groups
            .iter()
            .filter(|g| g.members.iter().any(|&v| module.ty(v).rank() > 0))
            .map(|g| {
                let names: Vec<String> =
                    g.members.iter().map(|&v| module.display_name(v)).collect();
                serde_json::json!({
                    "id": g.id,
                    "members": names,
                    "layout": g.layout,
                    "conflict": g.conflict,
                    "loop_carried": g.loop_carried,
                })
            })
            .collect();
        serde_json::json!({ "kernel": module.name, "groups": groups })
    }
}

// ── Descriptor construction ────────────────────────────────────────────────

/// Highest-rank member, lowest id among equals.
fn representative<'m>(module: &'m Module, members: &[ValueId]) -> &'m Type {
    let mut best = module.ty(members[0]);
    for &v in &members[1..] {
        let ty = module.ty(v);
        if ty.rank() > best.rank() {
            best = ty;
        }
    }
    best
}

/// Fastest-varying axis first.
fn default_order(rank: usize) -> Vec<u32> {
    (0..rank as u32).rev().collect()
}

fn distributed_layout(
    module: &Module,
    align: &AlignmentAnalysis,
    members: &[ValueId],
    options: &LayoutOptions,
) -> Layout {
    let shape = representative(module, members).shape.clone();
    let rank = shape.len();
    if rank == 0 {
        return Layout::Distributed {
            shape,
            order: Vec::new(),
            size_per_thread: Vec::new(),
            threads_per_warp: Vec::new(),
            warps_per_cta: Vec::new(),
        };
    }
    let last = rank - 1;

    // Widest access any pointer in the group supports, in elements.
    let mut vec = 1u64;
    for &v in members {
        let ty = module.ty(v);
        let Some(pointee) = ty.elem.pointee() else {
            continue;
        };
        let bytes = pointee.bytes();
        let fact = align.fact(v);
        let width = fact
            .contiguity
            .min((fact.alignment / bytes).max(1))
            .min((16 / bytes).max(1));
        vec = vec.max(width);
    }
    let vec = (vec as u32).min(shape[last]).max(1);

    let mut size_per_thread = vec![1u32; rank];
    size_per_thread[last] = vec;

    let order = default_order(rank);
    let mut threads_per_warp = vec![1u32; rank];
    let mut remaining = options.warp_size.max(1);
    for &axis in &order {
        let axis = axis as usize;
        let extent = shape[axis].div_ceil(size_per_thread[axis]).max(1);
        let t = extent
            .checked_next_power_of_two()
            .map_or(remaining, |p| remaining.min(p));
        threads_per_warp[axis] = t;
        remaining /= t;
    }
    threads_per_warp[0] *= remaining;

    let mut warps_per_cta = vec![1u32; rank];
    warps_per_cta[0] = options.num_warps;

    Layout::Distributed {
        shape,
        order,
        size_per_thread,
        threads_per_warp,
        warps_per_cta,
    }
}

fn shared_layout(
    module: &Module,
    members: &[ValueId],
    loop_carried: bool,
    options: &LayoutOptions,
) -> Layout {
    let ty = representative(module, members);
    let shape = ty.shape.clone();
    let elem_bytes = ty.elem.bytes().max(1) as u32;
    let last_dim = shape.last().copied().unwrap_or(1).max(1);

    let vec = (16 / elem_bytes).max(1).min(last_dim);
    let per_phase = (128 / last_dim.saturating_mul(elem_bytes)).max(1);
    let max_phase = (8 / per_phase).max(1);
    let num_buffers = if !loop_carried {
        1
    } else if options.arch >= 80 && options.num_stages > 2 {
        options.num_stages
    } else {
        2
    };

    Layout::Shared {
        order: default_order(shape.len()),
        shape,
        vec,
        per_phase,
        max_phase,
        num_buffers,
        elem_bytes,
    }
}

fn mma_layout(module: &Module, members: &[ValueId], options: &LayoutOptions) -> Layout {
    let shape = representative(module, members).shape.clone();
    let version = if options.arch >= 80 {
        2
    } else if options.arch >= 70 {
        1
    } else {
        0
    };

    let warps_per_tile = if shape.len() >= 2 {
        let mut wpt = [1u32, 1u32];
        while wpt[0] * wpt[1] < options.num_warps {
            if shape[0] / (wpt[0] * 2) >= 16 {
                wpt[0] *= 2;
            } else if shape[1] / (wpt[1] * 2) >= 8 {
                wpt[1] *= 2;
            } else {
                wpt[0] *= 2;
            }
        }
        wpt.to_vec()
    } else {
        vec![options.num_warps]
    };

    Layout::MmaOperand {
        shape,
        version,
        warps_per_tile,
    }
}

// ── Union-find ─────────────────────────────────────────────────────────────

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller root wins so roots stay stable.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::parse_module;

    fn analyse(source: &str, options: LayoutOptions) -> (Module, LayoutAnalysis) {
        let m = parse_module(source).expect("test kernel must resolve");
        let align = AlignmentAnalysis::run(&m);
        let layouts = LayoutAnalysis::run(&m, &align, &options);
        (m, layouts)
    }

    fn value(m: &Module, name: &str) -> ValueId {
        m.values()
            .find(|(_, d)| d.name.as_deref() == Some(name))
            .map(|(v, _)| v)
            .unwrap_or_else(|| panic!("no value named {name}"))
    }

    const MATMUL: &str = "\
kernel mm(%a: ptr<f16> align(16), %b: ptr<f16> align(16)) {
  %acc0 = const 0.0 : f32[64, 64]
  %off = const 0 : i32[64, 32]
entry:
  %sa = splat %a : ptr<f16>[64, 32]
  %pa = ptradd %sa, %off : ptr<f16>[64, 32]
  %x = load %pa : f16[64, 32]
  %e = exp %x : f16[64, 32]
  %sb = splat %b : ptr<f16>[32, 64]
  %y = load %sb : f16[32, 64]
  %yt = trans %y : f16[32, 64]
  %d = dot %e, %yt, %acc0 : f32[64, 64]
  ret
}
";

    #[test]
    fn groups_follow_layout_preserving_edges() {
        let (m, l) = analyse(MATMUL, LayoutOptions::default());
        let g = |n: &str| l.group_of(value(&m, n));
        assert_eq!(g("sa"), g("pa"));
        assert_eq!(g("pa"), g("x"));
        assert_eq!(g("x"), g("e"));
        assert_eq!(g("acc0"), g("d"));
        assert_ne!(g("e"), g("d"));
        assert_ne!(g("y"), g("yt"));
        // Scalars are singletons.
        assert_ne!(g("a"), g("sa"));
    }

    #[test]
    fn demands_pick_layout_kinds() {
        let (m, l) = analyse(MATMUL, LayoutOptions::default());
        let kind = |n: &str| l.layout_of(value(&m, n)).kind();
        assert_eq!(kind("e"), LayoutKind::Distributed);
        assert_eq!(kind("d"), LayoutKind::MmaOperand);
        assert_eq!(kind("yt"), LayoutKind::Shared);
        assert!(l.is_shared(value(&m, "yt")));
        assert_eq!(l.conflicts().count(), 0);
    }

    #[test]
    fn groups_numbered_by_smallest_member() {
        let (_, l) = analyse(MATMUL, LayoutOptions::default());
        let firsts: Vec<ValueId> = l.groups().iter().map(|g| g.members[0]).collect();
        let mut sorted = firsts.clone();
        sorted.sort();
        assert_eq!(firsts, sorted);
        for (i, g) in l.groups().iter().enumerate() {
            assert_eq!(g.id.index(), i);
        }
    }

    #[test]
    fn descriptor_metadata() {
        let (m, l) = analyse(MATMUL, LayoutOptions::default());
        match l.layout_of(value(&m, "yt")) {
            Layout::Shared {
                vec,
                per_phase,
                max_phase,
                num_buffers,
                elem_bytes,
                order,
                ..
            } => {
                assert_eq!(*elem_bytes, 2);
                assert_eq!(*vec, 8);
                assert_eq!(*per_phase, 1);
                assert_eq!(*max_phase, 8);
                assert_eq!(*num_buffers, 1);
                assert_eq!(order, &vec![1, 0]);
            }
            other => panic!("expected shared layout, got {:?}", other),
        }
        match l.layout_of(value(&m, "d")) {
            Layout::MmaOperand {
                version,
                warps_per_tile,
                ..
            } => {
                assert_eq!(*version, 2);
                assert_eq!(warps_per_tile.iter().product::<u32>(), 4);
            }
            other => panic!("expected mma layout, got {:?}", other),
        }
        match l.layout_of(value(&m, "x")) {
            Layout::Distributed {
                threads_per_warp,
                warps_per_cta,
                size_per_thread,
                ..
            } => {
                assert_eq!(threads_per_warp.iter().product::<u32>(), 32);
                assert_eq!(warps_per_cta, &vec![4, 1]);
                assert_eq!(size_per_thread[0], 1);
            }
            other => panic!("expected distributed layout, got {:?}", other),
        }
    }

    #[test]
    fn mma_version_follows_arch() {
        let volta = LayoutOptions {
            arch: 70,
            ..LayoutOptions::default()
        };
        let (m, l) = analyse(MATMUL, volta);
        assert!(matches!(
            l.layout_of(value(&m, "d")),
            Layout::MmaOperand { version: 1, .. }
        ));
    }

    const PIPELINED: &str = "\
kernel k(%a: f16[32, 32], %b: f16[32, 32], %c: i1) {
  %z = const 0.0 : f32[32, 32]
entry:
  %s0 = copy_to_shared %a : f16[32, 32]
  br loop
loop:
  %x = phi [%s0, entry], [%s1, loop] : f16[32, 32]
  %acc = phi [%z, entry], [%d, loop] : f32[32, 32]
  %bs = copy_to_shared %b : f16[32, 32]
  %d = dot %x, %bs, %acc : f32[32, 32]
  %s1 = copy_to_shared %a : f16[32, 32]
  cbr %c, loop, exit
exit:
  ret
}
";

    #[test]
    fn loop_carried_shared_group_is_multi_buffered() {
        let (m, l) = analyse(PIPELINED, LayoutOptions::default());
        let x = value(&m, "x");
        assert_eq!(l.group_of(x), l.group_of(value(&m, "s0")));
        assert_eq!(l.group_of(x), l.group_of(value(&m, "s1")));
        let group = l.group(l.group_of(x));
        assert!(group.loop_carried);
        assert!(matches!(group.layout, Layout::Shared { num_buffers: 2, .. }));

        let deep = LayoutOptions {
            num_stages: 4,
            ..LayoutOptions::default()
        };
        let (m, l) = analyse(PIPELINED, deep);
        assert!(matches!(
            l.layout_of(value(&m, "x")),
            Layout::Shared { num_buffers: 4, .. }
        ));
        assert!(matches!(
            l.layout_of(value(&m, "bs")),
            Layout::Shared { num_buffers: 1, .. }
        ));
    }

    #[test]
    fn phi_at_shared_slot_demands_shared() {
        let (m, l) = analyse(
            "\
kernel k(%a: f16[16, 16], %c: i1) {
  %z = const 0.0 : f32[16, 16]
entry:
  br loop
loop:
  %x = phi [%a, entry], [%n, loop] : f16[16, 16]
  %d = dot %x, %x, %z : f32[16, 16]
  %n = exp %x : f16[16, 16]
  cbr %c, loop, exit
exit:
  ret
}
",
            LayoutOptions::default(),
        );
        assert!(l.is_shared(value(&m, "x")));
        assert!(!l.is_shared(value(&m, "a")));
        assert!(!l.is_shared(value(&m, "n")));
    }

    #[test]
    fn shared_values_do_not_join_register_users() {
        let (m, l) = analyse(MATMUL, LayoutOptions::default());
        let yt = value(&m, "yt");
        assert_eq!(l.group(l.group_of(yt)).members, vec![yt]);
    }

    #[test]
    fn conflicting_demands_resolve_to_shared() {
        let (m, l) = analyse(
            "\
kernel k(%a: f32[16, 16], %c: i1) {
entry:
  br loop
loop:
  %x = phi [%a, entry], [%d, loop] : f32[16, 16]
  %d = dot %x, %x, %x : f32[16, 16]
  cbr %c, loop, exit
exit:
  ret
}
",
            LayoutOptions::default(),
        );
        let x = value(&m, "x");
        let d = value(&m, "d");
        assert_ne!(l.group_of(x), l.group_of(d));
        assert!(l.is_shared(x));
        assert_eq!(l.layout_of(d).kind(), LayoutKind::MmaOperand);
        assert!(l.group(l.group_of(x)).conflict);
        assert!(!l.group(l.group_of(d)).conflict);
        assert_eq!(l.conflicts().count(), 1);
    }

    #[test]
    fn shared_incoming_does_not_pull_register_group() {
        let (m, l) = analyse(
            "\
kernel k(%a: f16[16, 16], %b: f16[16, 16], %c: i1) {
entry:
  %s = copy_to_shared %a : f16[16, 16]
  br loop
loop:
  %x = phi [%s, entry], [%d, loop] : f16[16, 16]
  %bs = copy_to_shared %b : f16[16, 16]
  %d = dot %bs, %bs, %x : f16[16, 16]
  %n = neg %d : f16[16, 16]
  cbr %c, loop, exit
exit:
  ret
}
",
            LayoutOptions::default(),
        );
        let x = value(&m, "x");
        assert_eq!(l.group_of(x), l.group_of(value(&m, "n")));
        assert_ne!(l.group_of(x), l.group_of(value(&m, "s")));
        assert!(!l.is_shared(x));
        assert!(l.is_shared(value(&m, "s")));
        assert_eq!(l.conflicts().count(), 0);
    }

    #[test]
    #[should_panic(expected = "not seen by layout analysis")]
    fn unknown_value_panics() {
        let (_, l) = analyse(MATMUL, LayoutOptions::default());
        l.group_of(ValueId(9999));
    }

    #[test]
    fn huge_blocks_get_descriptors_without_overflow() {
        use crate::ir::{ConstValue, ElemType, ScalarType};
        let mut m = Module::new("huge");
        let entry = m.add_block("entry");
        let wide_f64 = Type::tensor(ElemType::Scalar(ScalarType::F64), &[536_870_912]);
        let long_f32 = Type::tensor(ElemType::Scalar(ScalarType::F32), &[u32::MAX]);
        let cube = Type::tensor(ElemType::Scalar(ScalarType::I32), &[u32::MAX; 3]);
        let x = m.add_argument("x", wide_f64.clone(), 1);
        let y = m.add_argument("y", long_f32.clone(), 1);
        let c = m.add_constant(Some("c"), ConstValue::Int(0), cube);
        let t = m.append(entry, Opcode::Trans, vec![x], wide_f64, Some("t"));
        let e = m.append(
            entry,
            Opcode::Unary(crate::ir::UnaryOp::Exp),
            vec![y],
            long_f32,
            Some("e"),
        );
        m.append(entry, Opcode::Ret, Vec::new(), Type::void(), None);

        let align = AlignmentAnalysis::run(&m);
        assert_eq!(align.fact(c).constancy, u64::MAX);
        let l = LayoutAnalysis::run(&m, &align, &LayoutOptions::default());
        assert!(matches!(
            l.layout_of(t),
            Layout::Shared { per_phase: 1, .. }
        ));
        match l.layout_of(e) {
            Layout::Distributed {
                threads_per_warp, ..
            } => assert_eq!(threads_per_warp, &vec![32]),
            other => panic!("expected distributed layout, got {:?}", other),
        }
    }
}
