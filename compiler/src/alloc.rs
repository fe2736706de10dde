// alloc.rs — Shared-memory allocation
//
// One buffer per shared layout group. A buffer is as large as the largest
// member, times the group's buffer count; buffers are laid out back to back
// in group order. The static footprint is the sum of buffer sizes.
//
// Preconditions: `layouts` was computed over `module` in its current state.
// Postconditions: buffers do not overlap; `total` is the end of the last one.
// Failure modes: none; capacity is checked by the pipeline.
// Side effects: none (emits `tracing` events).

use serde::Serialize;
use tracing::info;

use crate::id::{GroupId, ValueId};
use crate::ir::Module;
use crate::layout::{Layout, LayoutAnalysis};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedBuffer {
    pub group: GroupId,
    pub offset: u64,
    pub size: u64,
    pub num_buffers: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedAllocation {
    pub buffers: Vec<SharedBuffer>,
    pub total: u64,
}

impl SharedAllocation {
    pub fn run(module: &Module, layouts: &LayoutAnalysis) -> Self {
        let mut buffers = Vec::new();
        let mut offset = 0u64;
        for group in layouts.groups() {
            let Layout::Shared { num_buffers, .. } = group.layout else {
                continue;
            };
            let largest = group
                .members
                .iter()
                .map(|&v| module.ty(v).bytes())
                .max()
                .unwrap_or(0);
            let size = largest.saturating_mul(num_buffers as u64);
            if size == 0 {
                continue;
            }
            buffers.push(SharedBuffer {
                group: group.id,
                offset,
                size,
                num_buffers,
            });
            offset = offset.saturating_add(size);
        }
        info!(
            module = %module.name,
            buffers = buffers.len(),
            bytes = offset,
            "shared memory allocated"
        );
        SharedAllocation {
            buffers,
            total: offset,
        }
    }

    /// Static shared-memory footprint in bytes.
    pub fn allocated_size(&self) -> u64 {
        self.total
    }

    pub fn buffer(&self, group: GroupId) -> Option<&SharedBuffer> {
        self.buffers.iter().find(|b| b.group == group)
    }

    /// Buffer holding `v`, if `v` lives in shared memory.
    pub fn buffer_of(&self, layouts: &LayoutAnalysis, v: ValueId) -> Option<&SharedBuffer> {
        self.buffer(layouts.group_of(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignmentAnalysis;
    use crate::layout::LayoutOptions;
    use crate::resolve::parse_module;

    fn allocate(source: &str, options: LayoutOptions) -> (Module, LayoutAnalysis, SharedAllocation) {
        let m = parse_module(source).unwrap();
        let align = AlignmentAnalysis::run(&m);
        let layouts = LayoutAnalysis::run(&m, &align, &options);
        let alloc = SharedAllocation::run(&m, &layouts);
        (m, layouts, alloc)
    }

    #[test]
    fn buffers_are_laid_out_back_to_back() {
        let (_, _, alloc) = allocate(
            "\
kernel k(%a: f16[64, 32], %b: f32[32, 64]) {
entry:
  %x = copy_to_shared %a : f16[64, 32]
  %y = trans %b : f32[32, 64]
  ret
}
",
            LayoutOptions::default(),
        );
        assert_eq!(alloc.buffers.len(), 2);
        assert_eq!(alloc.buffers[0].offset, 0);
        assert_eq!(alloc.buffers[0].size, 4096);
        assert_eq!(alloc.buffers[1].offset, 4096);
        assert_eq!(alloc.buffers[1].size, 8192);
        assert_eq!(alloc.allocated_size(), 12288);
    }

    #[test]
    fn loop_carried_group_counts_once_per_buffer() {
        let src = "\
kernel k(%a: f16[32, 32], %c: i1) {
  %z = const 0.0 : f32[32, 32]
entry:
  %s0 = copy_to_shared %a : f16[32, 32]
  br loop
loop:
  %x = phi [%s0, entry], [%s1, loop] : f16[32, 32]
  %t = copy_from_shared %x : f16[32, 32]
  %s1 = copy_to_shared %t : f16[32, 32]
  cbr %c, loop, exit
exit:
  ret
}
";
        let (m, layouts, alloc) = allocate(src, LayoutOptions::default());
        assert_eq!(alloc.buffers.len(), 1);
        assert_eq!(alloc.total, 2 * 2048);
        let x = m
            .values()
            .find(|(_, d)| d.name.as_deref() == Some("x"))
            .map(|(v, _)| v)
            .unwrap();
        assert_eq!(alloc.buffer_of(&layouts, x).unwrap().num_buffers, 2);

        let deep = LayoutOptions {
            num_stages: 3,
            ..LayoutOptions::default()
        };
        let (_, _, alloc) = allocate(src, deep);
        assert_eq!(alloc.total, 3 * 2048);
    }

    #[test]
    fn no_shared_values_means_zero_footprint() {
        let (_, _, alloc) = allocate(
            "kernel k(%a: f32[8]) {\nentry:\n  %e = exp %a : f32[8]\n  ret\n}\n",
            LayoutOptions::default(),
        );
        assert!(alloc.buffers.is_empty());
        assert_eq!(alloc.allocated_size(), 0);
    }

    #[test]
    fn oversized_buffers_saturate_the_footprint() {
        use crate::ir::{ElemType, Opcode, ScalarType, Type};
        let mut m = Module::new("huge");
        let entry = m.add_block("entry");
        let ty = Type::tensor(ElemType::Scalar(ScalarType::F64), &[u32::MAX, u32::MAX]);
        let x = m.add_argument("x", ty.clone(), 1);
        let y = m.add_argument("y", ty.clone(), 1);
        m.append(entry, Opcode::Trans, vec![x], ty.clone(), Some("tx"));
        m.append(entry, Opcode::Trans, vec![y], ty, Some("ty"));
        m.append(entry, Opcode::Ret, Vec::new(), Type::void(), None);

        let align = AlignmentAnalysis::run(&m);
        let layouts = LayoutAnalysis::run(&m, &align, &LayoutOptions::default());
        let alloc = SharedAllocation::run(&m, &layouts);
        assert_eq!(alloc.buffers.len(), 2);
        assert_eq!(alloc.buffers[0].size, u64::MAX);
        assert_eq!(alloc.buffers[1].offset, u64::MAX);
        assert_eq!(alloc.allocated_size(), u64::MAX);
    }
}
