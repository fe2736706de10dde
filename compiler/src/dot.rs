// dot.rs — Graphviz DOT output for kernel def-use graphs
//
// One node per value, one edge per operand. Values sharing a layout group
// with other values are drawn inside a cluster labelled with the group's
// layout; shared-memory residents are filled, copies are dashed, and phi
// inputs along loop back edges are bold.
//
// Preconditions: `layouts` was computed over `module` in its current state.
// Postconditions: returns a valid DOT string representing the module.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::cfg::Cfg;
use crate::id::ValueId;
use crate::ir::{Module, Opcode, ValueKind};
use crate::layout::{LayoutAnalysis, LayoutKind};

/// Emit the module's def-use graph as a Graphviz DOT string.
pub fn emit_dot(module: &Module, layouts: &LayoutAnalysis) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", sanitize(&module.name)).unwrap();
    writeln!(buf, "    rankdir=TB;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    let drawn = |v: ValueId| !module.is_terminator(v);

    for group in layouts.groups() {
        let members: Vec<ValueId> = group.members.iter().copied().filter(|&v| drawn(v)).collect();
        if members.is_empty() {
            continue;
        }
        if members.len() == 1 {
            write_node(&mut buf, module, layouts, members[0], "    ");
            continue;
        }
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_g{} {{", group.id.0).unwrap();
        let mut label = format!("g{}: {}", group.id.0, kind_name(group.layout.kind()));
        if group.loop_carried {
            label.push_str(", loop-carried");
        }
        if group.conflict {
            label.push_str(", conflict");
        }
        writeln!(buf, "        label=\"{label}\";").unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();
        for v in members {
            write_node(&mut buf, module, layouts, v, "        ");
        }
        writeln!(buf, "    }}").unwrap();
    }

    writeln!(buf).unwrap();
    let cfg = Cfg::build(module);
    for (block, user) in module.program_order() {
        if !drawn(user) {
            continue;
        }
        let Some(inst) = module.inst(user) else {
            continue;
        };
        for (k, &op) in inst.operands.iter().enumerate() {
            let mut attrs = Vec::new();
            if let Opcode::Phi { blocks } = &inst.op {
                if cfg.is_back_edge(blocks[k], block) {
                    attrs.push("style=bold".to_string());
                    attrs.push("constraint=false".to_string());
                }
                attrs.push(format!("label=\"{}\"", module.block(blocks[k]).label));
            } else if inst.operands.len() > 1 {
                attrs.push(format!("label=\"{k}\""));
            }
            write!(buf, "    v{} -> v{}", op.0, user.0).unwrap();
            if !attrs.is_empty() {
                write!(buf, " [{}]", attrs.join(", ")).unwrap();
            }
            writeln!(buf, ";").unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

fn kind_name(kind: LayoutKind) -> &'static str {
    match kind {
        LayoutKind::Distributed => "distributed",
        LayoutKind::Shared => "shared",
        LayoutKind::MmaOperand => "mma",
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn write_node(buf: &mut String, module: &Module, layouts: &LayoutAnalysis, v: ValueId, indent: &str) {
    let data = module.value(v);
    let what = match &data.kind {
        ValueKind::Argument { .. } => "arg".to_string(),
        ValueKind::Constant(_) => "const".to_string(),
        ValueKind::Inst(inst) => inst.op.mnemonic().to_string(),
    };
    let label = format!("{}\\n{} : {}", module.display_name(v), what, data.ty);
    let mut attrs = vec![format!("label=\"{label}\"")];
    match &data.kind {
        ValueKind::Argument { .. } | ValueKind::Constant(_) => attrs.push("shape=ellipse".into()),
        ValueKind::Inst(inst) if matches!(inst.op, Opcode::Copy(_)) => {
            attrs.push("shape=box".into());
            attrs.push("style=\"dashed,rounded\"".into());
        }
        ValueKind::Inst(_) => attrs.push("shape=box".into()),
    }
    if layouts.is_shared(v) {
        attrs.push("fillcolor=lightblue".into());
        if !attrs.iter().any(|a| a.starts_with("style=")) {
            attrs.push("style=filled".into());
        } else {
            attrs.retain(|a| !a.starts_with("style="));
            attrs.push("style=\"dashed,rounded,filled\"".into());
        }
    }
    writeln!(buf, "{indent}v{} [{}];", v.0, attrs.join(", ")).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignmentAnalysis;
    use crate::layout::LayoutOptions;
    use crate::resolve::parse_module;

    fn emit(source: &str) -> String {
        let m = parse_module(source).unwrap();
        let align = AlignmentAnalysis::run(&m);
        let layouts = LayoutAnalysis::run(&m, &align, &LayoutOptions::default());
        emit_dot(&m, &layouts)
    }

    const LOOP: &str = "\
kernel acc_loop(%a: f16[16, 16], %c: i1) {
  %z = const 0.0 : f32[16, 16]
entry:
  %bs = copy_to_shared %a : f16[16, 16]
  br loop
loop:
  %acc = phi [%z, entry], [%d, loop] : f32[16, 16]
  %t = copy_from_shared %bs : f16[16, 16]
  %d = dot %t, %bs, %acc : f32[16, 16]
  cbr %c, loop, exit
exit:
  ret
}
";

    #[test]
    fn valid_dot_structure() {
        let dot = emit(LOOP);
        assert!(dot.starts_with("digraph acc_loop {"));
        assert!(dot.trim_end().ends_with('}'));
        assert_eq!(dot.matches('{').count(), dot.matches('}').count());
    }

    #[test]
    fn terminators_are_not_drawn() {
        let dot = emit(LOOP);
        assert!(!dot.contains("\\ncbr"));
        assert!(!dot.contains("\\nret"));
    }

    #[test]
    fn shared_nodes_are_filled_and_copies_dashed() {
        let dot = emit(LOOP);
        let bs = dot.lines().find(|l| l.contains("%bs\\n")).unwrap();
        assert!(bs.contains("fillcolor=lightblue"));
        assert!(bs.contains("dashed"));
        let t = dot.lines().find(|l| l.contains("%t\\n")).unwrap();
        assert!(!t.contains("fillcolor"));
    }

    #[test]
    fn back_edge_is_bold() {
        let dot = emit(LOOP);
        let edge = dot
            .lines()
            .find(|l| l.contains("label=\"loop\""))
            .unwrap();
        assert!(edge.contains("style=bold"));
        let entry = dot
            .lines()
            .find(|l| l.contains("label=\"entry\""))
            .unwrap();
        assert!(!entry.contains("style=bold"));
    }

    #[test]
    fn accumulator_group_is_clustered() {
        let dot = emit(LOOP);
        assert!(dot.contains("subgraph cluster_g"));
        assert!(dot.contains(": mma, loop-carried"));
    }

    #[test]
    fn deterministic_output() {
        assert_eq!(emit(LOOP), emit(LOOP));
    }
}
