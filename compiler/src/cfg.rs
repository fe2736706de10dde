// cfg.rs — Control-flow graph and dominator tree
//
// Builds predecessor/successor lists from block terminators and computes
// immediate dominators with the iterative two-finger algorithm over reverse
// postorder.
//
// Preconditions: none. Blocks without a terminator simply have no successors.
// Postconditions: `idom(entry) == None`; every reachable non-entry block has
//                 an immediate dominator; unreachable blocks have none.
// Failure modes: none.
// Side effects: none.

use crate::id::BlockId;
use crate::ir::Module;

/// CFG with dominator information for one module.
#[derive(Debug, Clone)]
pub struct Cfg {
    preds: Vec<Vec<BlockId>>,
    succs: Vec<Vec<BlockId>>,
    rpo: Vec<BlockId>,
    /// Position of each block in `rpo`; `None` if unreachable.
    rpo_index: Vec<Option<usize>>,
    idom: Vec<Option<BlockId>>,
}

impl Cfg {
    pub fn build(module: &Module) -> Cfg {
        let n = module.blocks.len();
        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        for b in module.block_ids() {
            for s in module.successors(b) {
                if !succs[b.index()].contains(&s) {
                    succs[b.index()].push(s);
                    preds[s.index()].push(b);
                }
            }
        }

        let rpo = reverse_postorder(&succs, module.entry());
        let mut rpo_index = vec![None; n];
        for (i, b) in rpo.iter().enumerate() {
            rpo_index[b.index()] = Some(i);
        }

        let mut cfg = Cfg {
            preds,
            succs,
            rpo,
            rpo_index,
            idom: vec![None; n],
        };
        cfg.compute_dominators();
        cfg
    }

    pub fn preds(&self, b: BlockId) -> &[BlockId] {
        &self.preds[b.index()]
    }

    pub fn succs(&self, b: BlockId) -> &[BlockId] {
        &self.succs[b.index()]
    }

    /// Reachable blocks in reverse postorder (entry first).
    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.rpo_index[b.index()].is_some()
    }

    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.idom[b.index()]
    }

    /// `a` dominates `b` (reflexive). An unreachable `b` is dominated by
    /// every block; an unreachable `a` dominates only itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b || !self.is_reachable(b) {
            return true;
        }
        if !self.is_reachable(a) {
            return false;
        }
        let mut cur = b;
        while let Some(up) = self.idom[cur.index()] {
            if up == a {
                return true;
            }
            cur = up;
        }
        false
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// The edge `from -> to` closes a loop.
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.is_reachable(from) && self.dominates(to, from)
    }

    fn compute_dominators(&mut self) {
        let Some(&entry) = self.rpo.first() else {
            return;
        };
        // Working idoms indexed by block; entry points at itself during the
        // fixed point and is reset afterwards.
        let mut doms: Vec<Option<BlockId>> = vec![None; self.preds.len()];
        doms[entry.index()] = Some(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in self.rpo.iter().skip(1) {
                let new_idom = self.preds[b.index()]
                    .iter()
                    .copied()
                    .filter(|p| doms[p.index()].is_some())
                    .reduce(|x, y| self.intersect(&doms, x, y));
                if new_idom.is_some() && doms[b.index()] != new_idom {
                    doms[b.index()] = new_idom;
                    changed = true;
                }
            }
        }

        doms[entry.index()] = None;
        self.idom = doms;
    }

    fn intersect(&self, doms: &[Option<BlockId>], mut a: BlockId, mut b: BlockId) -> BlockId {
        let order = |x: BlockId| self.rpo_index[x.index()].unwrap_or(usize::MAX);
        while a != b {
            while order(a) > order(b) {
                a = doms[a.index()].unwrap_or(a);
            }
            while order(b) > order(a) {
                b = doms[b.index()].unwrap_or(b);
            }
        }
        a
    }
}

fn reverse_postorder(succs: &[Vec<BlockId>], entry: Option<BlockId>) -> Vec<BlockId> {
    let Some(entry) = entry else {
        return Vec::new();
    };
    let mut visited = vec![false; succs.len()];
    let mut post = Vec::with_capacity(succs.len());
    // Explicit stack of (block, next successor index).
    let mut stack = vec![(entry, 0usize)];
    visited[entry.index()] = true;
    while let Some((b, i)) = stack.pop() {
        if let Some(&s) = succs[b.index()].get(i) {
            stack.push((b, i + 1));
            if !visited[s.index()] {
                visited[s.index()] = true;
                stack.push((s, 0));
            }
        } else {
            post.push(b);
        }
    }
    post.reverse();
    post
}

// ── Tests ──────────────────────────────────────────────────────────────────
