// resolve.rs — Build kernel modules from the parsed AST
//
// Walks each parsed kernel, resolves value names, block labels, opcode names
// and type expressions, and builds one `Module` per kernel. Value references
// may point forward (phi incoming values on back edges), so instructions are
// created first and their operands filled in a second pass.
//
// Preconditions: `program` is a well-formed AST from the parser.
// Postconditions: returns one module per kernel that resolved without errors,
//                 plus all accumulated diagnostics.
// Failure modes: unknown names, unknown opcodes, malformed operands and type
//                errors produce `Diagnostic` entries. Resolution continues
//                past errors; a kernel with errors yields no module.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::*;
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::id::{BlockId, ValueId};
use crate::ir::{ConstValue, ElemType, Module, Opcode, ScalarType, Type, MAX_BLOCK_ELEMENTS};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub modules: Vec<Module>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Resolve every kernel in a parsed program.
pub fn resolve(program: &Program) -> ResolveResult {
    let mut modules = Vec::new();
    let mut diagnostics = Vec::new();
    for kernel in &program.kernels {
        let mut ctx = KernelCtx::new(&kernel.name.name);
        ctx.resolve_kernel(kernel);
        let failed = crate::diag::has_errors(&ctx.diagnostics);
        diagnostics.extend(ctx.diagnostics);
        if !failed {
            modules.push(ctx.module);
        }
    }
    ResolveResult {
        modules,
        diagnostics,
    }
}

/// Lex, parse and resolve `source` into modules.
///
/// Returns every diagnostic (lex, parse, resolve) when any of them is an
/// error.
pub fn parse_modules(source: &str) -> Result<Vec<Module>, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    let mut diagnostics: Vec<Diagnostic> = parsed
        .errors
        .iter()
        .map(|e| {
            Diagnostic::error(e.to_string())
                .with_code(codes::E0100)
                .with_span(*e.span())
        })
        .collect();
    let Some(program) = parsed.program else {
        return Err(diagnostics);
    };
    let result = resolve(&program);
    diagnostics.extend(result.diagnostics);
    if crate::diag::has_errors(&diagnostics) {
        return Err(diagnostics);
    }
    Ok(result.modules)
}

/// Like [`parse_modules`], for a source containing exactly one kernel.
pub fn parse_module(source: &str) -> Result<Module, Vec<Diagnostic>> {
    let mut modules = parse_modules(source)?;
    if modules.len() != 1 {
        return Err(vec![Diagnostic::error(format!(
            "expected exactly one kernel, found {}",
            modules.len()
        ))
        .with_code(codes::E0100)]);
    }
    Ok(modules.remove(0))
}

// ── Internal context ────────────────────────────────────────────────────────

/// An instruction whose value operands are resolved after all definitions
/// are known.
struct PendingOperands {
    inst: ValueId,
    refs: Vec<ValueRef>,
}

struct KernelCtx {
    module: Module,
    diagnostics: Vec<Diagnostic>,
    values: HashMap<String, ValueId>,
    blocks: HashMap<String, BlockId>,
    pending: Vec<PendingOperands>,
}

impl KernelCtx {
    fn new(name: &str) -> Self {
        KernelCtx {
            module: Module::new(name),
            diagnostics: Vec::new(),
            values: HashMap::new(),
            blocks: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn error(&mut self, code: DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::error(message).with_code(code).with_span(span));
    }

    fn resolve_kernel(&mut self, kernel: &KernelDef) {
        for param in &kernel.params {
            self.resolve_param(param);
        }

        // Blocks first, so branches and phis may name later labels.
        for item in &kernel.items {
            if let Item::Label(label) = item {
                if self.blocks.contains_key(&label.name) {
                    self.error(
                        codes::E0105,
                        label.span,
                        format!("duplicate block label `{}`", label.name),
                    );
                    continue;
                }
                let b = self.module.add_block(&label.name);
                self.blocks.insert(label.name.clone(), b);
            }
        }

        let mut current: Option<BlockId> = None;
        for item in &kernel.items {
            match item {
                Item::Label(label) => {
                    current = self.blocks.get(&label.name).copied();
                }
                Item::Inst(inst) if inst.opcode.name == "const" => {
                    if current.is_some() {
                        self.error(
                            codes::E0108,
                            inst.span,
                            "constants must be declared before the first block".to_string(),
                        );
                        continue;
                    }
                    self.resolve_const(inst);
                }
                Item::Inst(inst) => match current {
                    Some(block) => self.resolve_inst(block, inst),
                    None => self.error(
                        codes::E0108,
                        inst.span,
                        format!("`{}` appears before any block label", inst.opcode.name),
                    ),
                },
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            let mut operands = Vec::with_capacity(p.refs.len());
            for r in &p.refs {
                match self.values.get(&r.name) {
                    Some(&v) => operands.push(v),
                    None => self.error(
                        codes::E0101,
                        r.span,
                        format!("undefined value `%{}`", r.name),
                    ),
                }
            }
            if operands.len() == p.refs.len() {
                self.module.set_operands(p.inst, operands);
            }
        }
    }

    // ── Definitions ─────────────────────────────────────────────────────

    fn define(&mut self, name: &ValueRef, v: ValueId) {
        if self.values.insert(name.name.clone(), v).is_some() {
            self.error(
                codes::E0105,
                name.span,
                format!("duplicate definition of `%{}`", name.name),
            );
        }
    }

    fn resolve_param(&mut self, param: &Param) {
        let Some(ty) = self.resolve_type(&param.ty) else {
            return;
        };
        let mut align = 1u64;
        for attr in &param.attrs {
            if attr.name.name != "align" {
                self.error(
                    codes::E0104,
                    attr.span,
                    format!("unknown argument attribute `{}`", attr.name.name),
                );
                continue;
            }
            if attr.value <= 0 || !(attr.value as u64).is_power_of_two() {
                self.error(
                    codes::E0104,
                    attr.span,
                    format!("alignment must be a positive power of two, got {}", attr.value),
                );
                continue;
            }
            align = attr.value as u64;
        }
        let v = self.module.add_argument(&param.name.name, ty, align);
        self.define(&param.name, v);
    }

    fn resolve_const(&mut self, inst: &InstDef) {
        let Some(result) = &inst.result else {
            self.error(
                codes::E0107,
                inst.span,
                "constant needs a result name".to_string(),
            );
            return;
        };
        let value = match inst.operands.as_slice() {
            [Operand::Int(v, _)] => ConstValue::Int(*v),
            [Operand::Float(v, _)] => ConstValue::Float(*v),
            _ => {
                self.error(
                    codes::E0104,
                    inst.span,
                    "`const` takes exactly one numeric literal".to_string(),
                );
                return;
            }
        };
        let Some(ty) = self.result_type(inst) else {
            return;
        };
        let v = self
            .module
            .add_constant(Some(&result.name), value, ty);
        self.define(result, v);
    }

    // ── Instructions ────────────────────────────────────────────────────

    fn resolve_inst(&mut self, block: BlockId, inst: &InstDef) {
        let Some((op, refs)) = self.resolve_opcode(inst) else {
            return;
        };

        let ty = if op.has_result() {
            if inst.result.is_none() {
                self.error(
                    codes::E0107,
                    inst.span,
                    format!("`{}` produces a value and needs a result name", op.mnemonic()),
                );
                return;
            }
            match self.result_type(inst) {
                Some(ty) => ty,
                None => return,
            }
        } else {
            if inst.result.is_some() || inst.ty.is_some() {
                self.error(
                    codes::E0107,
                    inst.span,
                    format!("`{}` does not produce a value", op.mnemonic()),
                );
                return;
            }
            Type::void()
        };

        let name = inst.result.as_ref().map(|r| r.name.as_str());
        let v = self.module.append(block, op, Vec::new(), ty, name);
        if let Some(result) = &inst.result {
            self.define(result, v);
        }
        self.pending.push(PendingOperands { inst: v, refs });
    }

    /// Map an instruction's opcode and non-value operands to an `Opcode`,
    /// returning the value operands still to be resolved.
    fn resolve_opcode(&mut self, inst: &InstDef) -> Option<(Opcode, Vec<ValueRef>)> {
        let name = inst.opcode.name.as_str();
        match name {
            "range" => match inst.operands.as_slice() {
                [Operand::Int(start, _), Operand::Int(end, _)]
                    if start < end && end.abs_diff(*start) <= MAX_BLOCK_ELEMENTS =>
                {
                    Some((
                        Opcode::Range {
                            start: *start,
                            end: *end,
                        },
                        Vec::new(),
                    ))
                }
                _ => {
                    self.error(
                        codes::E0104,
                        inst.span,
                        format!(
                            "`range` takes two integers `start, end` with start < end \
                             and at most {MAX_BLOCK_ELEMENTS} values"
                        ),
                    );
                    None
                }
            },
            "br" => match inst.operands.as_slice() {
                [Operand::Label(target)] => {
                    let target = self.block_ref(target)?;
                    Some((Opcode::Br { target }, Vec::new()))
                }
                _ => {
                    self.error(
                        codes::E0104,
                        inst.span,
                        "`br` takes one block label".to_string(),
                    );
                    None
                }
            },
            "cbr" => match inst.operands.as_slice() {
                [Operand::Value(cond), Operand::Label(then_l), Operand::Label(else_l)] => {
                    let then_block = self.block_ref(then_l);
                    let else_block = self.block_ref(else_l);
                    Some((
                        Opcode::CondBr {
                            then_block: then_block?,
                            else_block: else_block?,
                        },
                        vec![cond.clone()],
                    ))
                }
                _ => {
                    self.error(
                        codes::E0104,
                        inst.span,
                        "`cbr` takes a condition value and two block labels".to_string(),
                    );
                    None
                }
            },
            "phi" => {
                let mut blocks = Vec::new();
                let mut refs = Vec::new();
                let mut ok = !inst.operands.is_empty();
                for operand in &inst.operands {
                    match operand {
                        Operand::Incoming(value, label) => {
                            match self.block_ref(label) {
                                Some(b) => blocks.push(b),
                                None => ok = false,
                            }
                            refs.push(value.clone());
                        }
                        other => {
                            self.error(
                                codes::E0104,
                                other.span(),
                                "phi operands must be `[%value, label]` pairs".to_string(),
                            );
                            return None;
                        }
                    }
                }
                if inst.operands.is_empty() {
                    self.error(
                        codes::E0104,
                        inst.span,
                        "phi needs at least one incoming value".to_string(),
                    );
                }
                ok.then_some((Opcode::Phi { blocks }, refs))
            }
            _ => {
                let Some(op) = Opcode::from_mnemonic(name) else {
                    self.error(
                        codes::E0103,
                        inst.opcode.span,
                        format!("unknown opcode `{name}`"),
                    );
                    return None;
                };
                let mut refs = Vec::new();
                for operand in &inst.operands {
                    match operand {
                        Operand::Value(v) => refs.push(v.clone()),
                        other => {
                            self.error(
                                codes::E0104,
                                other.span(),
                                format!("`{name}` takes value operands only"),
                            );
                            return None;
                        }
                    }
                }
                let expected = op.arity().unwrap_or(refs.len());
                if refs.len() != expected {
                    self.error(
                        codes::E0104,
                        inst.span,
                        format!(
                            "`{name}` takes {expected} operand(s), got {}",
                            refs.len()
                        ),
                    );
                    return None;
                }
                Some((op, refs))
            }
        }
    }

    fn block_ref(&mut self, label: &Ident) -> Option<BlockId> {
        match self.blocks.get(&label.name) {
            Some(&b) => Some(b),
            None => {
                self.error(
                    codes::E0102,
                    label.span,
                    format!("undefined block label `{}`", label.name),
                );
                None
            }
        }
    }

    // ── Types ───────────────────────────────────────────────────────────

    fn result_type(&mut self, inst: &InstDef) -> Option<Type> {
        match &inst.ty {
            Some(ty) => self.resolve_type(ty),
            None => {
                self.error(
                    codes::E0107,
                    inst.span,
                    format!("`{}` needs a result type", inst.opcode.name),
                );
                None
            }
        }
    }

    fn resolve_type(&mut self, ty: &TypeExpr) -> Option<Type> {
        let elem = match (ty.base.name.as_str(), &ty.pointee) {
            ("ptr", Some(pointee)) => ElemType::Ptr(self.scalar(pointee)?),
            ("ptr", None) => {
                self.error(
                    codes::E0106,
                    ty.span,
                    "pointer type needs a pointee, e.g. `ptr<f16>`".to_string(),
                );
                return None;
            }
            (_, Some(_)) => {
                self.error(
                    codes::E0106,
                    ty.span,
                    format!("type `{}` takes no pointee", ty.base.name),
                );
                return None;
            }
            (_, None) => ElemType::Scalar(self.scalar(&ty.base)?),
        };
        let mut shape = Vec::with_capacity(ty.shape.len());
        for &d in &ty.shape {
            match u32::try_from(d) {
                Ok(d) if d > 0 => shape.push(d),
                _ => {
                    self.error(
                        codes::E0106,
                        ty.span,
                        format!("block dimension must be positive, got {d}"),
                    );
                    return None;
                }
            }
        }
        let resolved = Type { elem, shape };
        if resolved.numel() > MAX_BLOCK_ELEMENTS {
            self.error(
                codes::E0106,
                ty.span,
                format!(
                    "block of {} elements exceeds the limit of {MAX_BLOCK_ELEMENTS}",
                    resolved.numel()
                ),
            );
            return None;
        }
        Some(resolved)
    }

    fn scalar(&mut self, name: &Ident) -> Option<ScalarType> {
        let s = ScalarType::from_name(&name.name);
        if s.is_none() {
            self.error(
                codes::E0106,
                name.span,
                format!("unknown type `{}`", name.name),
            );
        }
        s
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueKind;

    fn resolve_source(source: &str) -> ResolveResult {
        let result = crate::parser::parse(source);
        assert!(
            result.errors.is_empty(),
            "parse errors in test: {:?}",
            result.errors
        );
        let program = result.program.expect("parse failed in test");
        resolve(&program)
    }

    fn resolve_ok(source: &str) -> Module {
        let result = resolve_source(source);
        assert!(
            !crate::diag::has_errors(&result.diagnostics),
            "unexpected errors: {:#?}",
            result.diagnostics
        );
        assert_eq!(result.modules.len(), 1);
        result.modules.into_iter().next().unwrap()
    }

    fn error_codes(source: &str) -> Vec<DiagCode> {
        let result = resolve_source(source);
        assert!(result.modules.is_empty(), "module built despite errors");
        result.diagnostics.iter().filter_map(|d| d.code).collect()
    }

    const LOOP: &str = "\
kernel k(%a: ptr<f16>[16, 16] align(16), %n: i1) {
  %z = const 0.0 : f32[16, 16]
entry:
  br loop
loop:
  %acc = phi [%z, entry], [%next, loop] : f32[16, 16]
  %x = load %a : f16[16, 16]
  %next = dot %x, %x, %acc : f32[16, 16]
  cbr %n, loop, exit
exit:
  ret
}
";

    #[test]
    fn builds_blocks_args_and_constants() {
        let m = resolve_ok(LOOP);
        assert_eq!(m.name, "k");
        assert_eq!(m.args.len(), 2);
        assert_eq!(m.consts.len(), 1);
        assert_eq!(m.blocks.len(), 3);
        match m.value(m.args[0]).kind {
            ValueKind::Argument { align, .. } => assert_eq!(align, 16),
            ref other => panic!("expected argument, got {:?}", other),
        }
        assert_eq!(m.successors(BlockId(1)), vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn phi_forward_reference_is_resolved() {
        let m = resolve_ok(LOOP);
        let loop_b = m.block_by_label("loop").unwrap();
        let phi = m.block(loop_b).insts[0];
        let next = m.block(loop_b).insts[2];
        let inst = m.inst(phi).unwrap();
        assert_eq!(inst.operands[1], next);
        assert_eq!(
            inst.op,
            Opcode::Phi {
                blocks: vec![BlockId(0), loop_b]
            }
        );
    }

    #[test]
    fn print_matches_source_syntax() {
        let m = resolve_ok(LOOP);
        let printed = m.to_string();
        let reparsed = parse_module(&printed).expect("printed module must re-parse");
        assert_eq!(reparsed.to_string(), printed);
    }

    #[test]
    fn undefined_value() {
        let codes = error_codes("kernel k() {\nentry:\n  %y = exp %x : f32[4]\n  ret\n}\n");
        assert_eq!(codes, vec![codes::E0101]);
    }

    #[test]
    fn undefined_label() {
        let codes = error_codes("kernel k() {\nentry:\n  br nowhere\n}\n");
        assert_eq!(codes, vec![codes::E0102]);
    }

    #[test]
    fn unknown_opcode() {
        let codes = error_codes("kernel k(%x: f32[4]) {\nentry:\n  %y = frobnicate %x : f32[4]\n  ret\n}\n");
        assert_eq!(codes, vec![codes::E0103]);
    }

    #[test]
    fn wrong_operand_count() {
        let codes = error_codes("kernel k(%x: f32[4]) {\nentry:\n  %y = add %x : f32[4]\n  ret\n}\n");
        assert_eq!(codes, vec![codes::E0104]);
    }

    #[test]
    fn duplicate_definition() {
        let codes = error_codes(
            "kernel k(%x: f32[4]) {\nentry:\n  %x = exp %x : f32[4]\n  ret\n}\n",
        );
        assert_eq!(codes, vec![codes::E0105]);
    }

    #[test]
    fn unknown_type_and_bad_dimension() {
        let codes = error_codes("kernel k(%x: f7[4], %y: f32[0]) {\nentry:\n  ret\n}\n");
        assert_eq!(codes, vec![codes::E0106, codes::E0106]);
    }

    #[test]
    fn oversized_blocks_are_rejected() {
        let codes = error_codes(
            "kernel k(%x: f32[4294967295], %y: i32[4294967295, 4294967295, 4294967295]) {\nentry:\n  ret\n}\n",
        );
        assert_eq!(codes, vec![codes::E0106, codes::E0106]);

        // Exactly at the limit is fine.
        resolve_ok("kernel k(%x: i8[4096, 4096]) {\nentry:\n  ret\n}\n");
    }

    #[test]
    fn range_width_is_bounded() {
        let codes = error_codes(
            "kernel k() {\nentry:\n  %r = range -4611686018427387904, 4611686018427387904 : i32[16]\n  ret\n}\n",
        );
        assert_eq!(codes, vec![codes::E0104]);
    }

    #[test]
    fn result_rules() {
        let codes = error_codes(
            "kernel k(%x: f32[4], %p: ptr<f32>[4]) {\nentry:\n  %y = exp %x\n  %s = store %p, %x\n  ret\n}\n",
        );
        assert_eq!(codes, vec![codes::E0107, codes::E0107]);
    }

    #[test]
    fn constants_after_first_block_rejected() {
        let codes = error_codes("kernel k() {\nentry:\n  %c = const 1 : i32\n  ret\n}\n");
        assert_eq!(codes, vec![codes::E0108]);
    }

    #[test]
    fn bad_alignment_attribute() {
        let codes = error_codes("kernel k(%p: ptr<f16> align(12)) {\nentry:\n  ret\n}\n");
        assert_eq!(codes, vec![codes::E0104]);
    }

    #[test]
    fn parse_errors_surface_as_diagnostics() {
        let diags = parse_modules("kernel k( {\n").unwrap_err();
        assert!(diags.iter().all(|d| d.code == Some(codes::E0100)));
        assert!(!diags.is_empty());
    }

    #[test]
    fn parse_module_requires_one_kernel() {
        let diags = parse_module("kernel a() {\n}\nkernel b() {\n}\n").unwrap_err();
        assert!(diags[0].message.contains("exactly one kernel"));
    }
}
