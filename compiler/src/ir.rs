// ir.rs — Kernel IR consumed and rewritten by the placement passes
//
// A `Module` owns one kernel: its arguments, leaf constants, ordered basic
// blocks, and a value arena indexed by `ValueId`. Instructions refer to their
// operands by ID only, so inserting a copy never invalidates anyone's handle.
//
// Preconditions: none (data + construction API).
// Postconditions: every instruction lives in exactly one block; insertion
//                 positions are explicit (`InsertPoint`), there is no cursor.
// Failure modes: none — malformed programs are caught by `verify`.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::id::{BlockId, ModuleId, ValueId};

// ── Types ──────────────────────────────────────────────────────────────────

/// Element scalar types understood by the placement passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    I1,
    I8,
    I16,
    I32,
    I64,
    F16,
    Bf16,
    F32,
    F64,
}

impl ScalarType {
    /// Storage size in bytes (i1 is stored as one byte).
    pub fn bytes(self) -> u64 {
        match self {
            ScalarType::I1 | ScalarType::I8 => 1,
            ScalarType::I16 | ScalarType::F16 | ScalarType::Bf16 => 2,
            ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::I1 => "i1",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::F16 => "f16",
            ScalarType::Bf16 => "bf16",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "i1" => ScalarType::I1,
            "i8" => ScalarType::I8,
            "i16" => ScalarType::I16,
            "i32" => ScalarType::I32,
            "i64" => ScalarType::I64,
            "f16" => ScalarType::F16,
            "bf16" => ScalarType::Bf16,
            "f32" => ScalarType::F32,
            "f64" => ScalarType::F64,
            _ => return None,
        })
    }
}

/// Element type of a value: a scalar, a pointer to a scalar, or nothing
/// (instructions without a result).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElemType {
    Void,
    Scalar(ScalarType),
    Ptr(ScalarType),
}

impl ElemType {
    pub fn bytes(self) -> u64 {
        match self {
            ElemType::Void => 0,
            ElemType::Scalar(s) => s.bytes(),
            ElemType::Ptr(_) => 8,
        }
    }

    pub fn pointee(self) -> Option<ScalarType> {
        match self {
            ElemType::Ptr(s) => Some(s),
            _ => None,
        }
    }
}

/// Largest block the front-end accepts, in elements. Also bounds the width
/// of a `range`.
pub const MAX_BLOCK_ELEMENTS: u64 = 1 << 24;

/// A value type: element type plus block shape (empty shape = scalar).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Type {
    pub elem: ElemType,
    pub shape: Vec<u32>,
}

impl Type {
    pub fn void() -> Self {
        Type {
            elem: ElemType::Void,
            shape: Vec::new(),
        }
    }

    pub fn scalar(s: ScalarType) -> Self {
        Type {
            elem: ElemType::Scalar(s),
            shape: Vec::new(),
        }
    }

    pub fn ptr(pointee: ScalarType) -> Self {
        Type {
            elem: ElemType::Ptr(pointee),
            shape: Vec::new(),
        }
    }

    pub fn tensor(elem: ElemType, shape: &[u32]) -> Self {
        Type {
            elem,
            shape: shape.to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements (1 for scalars), saturating at `u64::MAX`.
    pub fn numel(&self) -> u64 {
        self.shape
            .iter()
            .fold(1u64, |n, &d| n.saturating_mul(d as u64))
    }

    /// Total storage size in bytes, saturating at `u64::MAX`.
    pub fn bytes(&self) -> u64 {
        self.numel().saturating_mul(self.elem.bytes())
    }

    pub fn is_void(&self) -> bool {
        self.elem == ElemType::Void
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.elem {
            ElemType::Void => write!(f, "void")?,
            ElemType::Scalar(s) => write!(f, "{}", s.name())?,
            ElemType::Ptr(s) => write!(f, "ptr<{}>", s.name())?,
        }
        if !self.shape.is_empty() {
            let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
            write!(f, "[{}]", dims.join(", "))?;
        }
        Ok(())
    }
}

// ── Opcodes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Max,
    Lt,
}

/// Which way a copy moves data across the shared/register boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CopyDirection {
    ToShared,
    FromShared,
}

/// The emitted kind of a copy instruction. `AsyncToShared` is the
/// non-blocking variant of `ToShared`; it moves data in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CopyKind {
    ToShared,
    AsyncToShared,
    FromShared,
}

impl CopyKind {
    pub fn direction(self) -> CopyDirection {
        match self {
            CopyKind::ToShared | CopyKind::AsyncToShared => CopyDirection::ToShared,
            CopyKind::FromShared => CopyDirection::FromShared,
        }
    }

    pub fn is_async(self) -> bool {
        self == CopyKind::AsyncToShared
    }
}

/// Closed set of kernel operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    /// `range start, end`: the integers `start..end` along one axis.
    Range { start: i64, end: i64 },
    Splat,
    Broadcast,
    Reshape,
    Cast,
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Pointer plus element offset.
    PtrAdd,
    Load,
    /// `store ptr, value`.
    Store,
    /// `dot a, b, acc`: matrix multiply-accumulate.
    Dot,
    Trans,
    Copy(CopyKind),
    /// Operand `i` flows in from `blocks[i]`.
    Phi { blocks: Vec<BlockId> },
    Br { target: BlockId },
    CondBr { then_block: BlockId, else_block: BlockId },
    Ret,
}

impl Opcode {
    /// Parse a mnemonic that carries no immediates or block references.
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Some(match name {
            "splat" => Opcode::Splat,
            "broadcast" => Opcode::Broadcast,
            "reshape" => Opcode::Reshape,
            "cast" => Opcode::Cast,
            "neg" => Opcode::Unary(UnaryOp::Neg),
            "exp" => Opcode::Unary(UnaryOp::Exp),
            "log" => Opcode::Unary(UnaryOp::Log),
            "sqrt" => Opcode::Unary(UnaryOp::Sqrt),
            "abs" => Opcode::Unary(UnaryOp::Abs),
            "add" => Opcode::Binary(BinaryOp::Add),
            "sub" => Opcode::Binary(BinaryOp::Sub),
            "mul" => Opcode::Binary(BinaryOp::Mul),
            "div" => Opcode::Binary(BinaryOp::Div),
            "rem" => Opcode::Binary(BinaryOp::Rem),
            "max" => Opcode::Binary(BinaryOp::Max),
            "lt" => Opcode::Binary(BinaryOp::Lt),
            "ptradd" => Opcode::PtrAdd,
            "load" => Opcode::Load,
            "store" => Opcode::Store,
            "dot" => Opcode::Dot,
            "trans" => Opcode::Trans,
            "copy_to_shared" => Opcode::Copy(CopyKind::ToShared),
            "async_copy_to_shared" => Opcode::Copy(CopyKind::AsyncToShared),
            "copy_from_shared" => Opcode::Copy(CopyKind::FromShared),
            "ret" => Opcode::Ret,
            _ => return None,
        })
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Range { .. } => "range",
            Opcode::Splat => "splat",
            Opcode::Broadcast => "broadcast",
            Opcode::Reshape => "reshape",
            Opcode::Cast => "cast",
            Opcode::Unary(UnaryOp::Neg) => "neg",
            Opcode::Unary(UnaryOp::Exp) => "exp",
            Opcode::Unary(UnaryOp::Log) => "log",
            Opcode::Unary(UnaryOp::Sqrt) => "sqrt",
            Opcode::Unary(UnaryOp::Abs) => "abs",
            Opcode::Binary(BinaryOp::Add) => "add",
            Opcode::Binary(BinaryOp::Sub) => "sub",
            Opcode::Binary(BinaryOp::Mul) => "mul",
            Opcode::Binary(BinaryOp::Div) => "div",
            Opcode::Binary(BinaryOp::Rem) => "rem",
            Opcode::Binary(BinaryOp::Max) => "max",
            Opcode::Binary(BinaryOp::Lt) => "lt",
            Opcode::PtrAdd => "ptradd",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Dot => "dot",
            Opcode::Trans => "trans",
            Opcode::Copy(CopyKind::ToShared) => "copy_to_shared",
            Opcode::Copy(CopyKind::AsyncToShared) => "async_copy_to_shared",
            Opcode::Copy(CopyKind::FromShared) => "copy_from_shared",
            Opcode::Phi { .. } => "phi",
            Opcode::Br { .. } => "br",
            Opcode::CondBr { .. } => "cbr",
            Opcode::Ret => "ret",
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Opcode::Br { .. } | Opcode::CondBr { .. } | Opcode::Ret)
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Opcode::Phi { .. })
    }

    /// Whether the instruction defines a value other instructions may use.
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            Opcode::Store | Opcode::Br { .. } | Opcode::CondBr { .. } | Opcode::Ret
        )
    }

    /// Number of value operands, or `None` when it depends on the instance (phi).
    pub fn arity(&self) -> Option<usize> {
        match self {
            Opcode::Range { .. } | Opcode::Br { .. } | Opcode::Ret => Some(0),
            Opcode::Splat
            | Opcode::Broadcast
            | Opcode::Reshape
            | Opcode::Cast
            | Opcode::Unary(_)
            | Opcode::Load
            | Opcode::Trans
            | Opcode::Copy(_)
            | Opcode::CondBr { .. } => Some(1),
            Opcode::Binary(_) | Opcode::PtrAdd | Opcode::Store => Some(2),
            Opcode::Dot => Some(3),
            Opcode::Phi { blocks } => Some(blocks.len()),
        }
    }

    /// Operand `k` must be resident in shared memory when it reaches this
    /// instruction.
    pub fn is_shared_operand(&self, k: usize) -> bool {
        match self {
            Opcode::Dot => k < 2,
            Opcode::Trans => k == 0,
            Opcode::Copy(CopyKind::FromShared) => k == 0,
            _ => false,
        }
    }

    /// Operand `k` may arrive in either residency without conversion.
    pub fn accepts_any_residency(&self, k: usize) -> bool {
        match self {
            Opcode::Copy(CopyKind::ToShared) | Opcode::Copy(CopyKind::AsyncToShared) => k == 0,
            _ => false,
        }
    }

    /// The result of this instruction lives in shared memory.
    pub fn produces_shared(&self) -> bool {
        matches!(
            self,
            Opcode::Trans | Opcode::Copy(CopyKind::ToShared) | Opcode::Copy(CopyKind::AsyncToShared)
        )
    }

    /// Operand `k` is forced into the same layout as the result.
    pub fn is_layout_preserving(&self, k: usize) -> bool {
        match self {
            Opcode::Splat
            | Opcode::Broadcast
            | Opcode::Reshape
            | Opcode::Cast
            | Opcode::Unary(_)
            | Opcode::Binary(_)
            | Opcode::PtrAdd => true,
            Opcode::Load => k == 0,
            Opcode::Dot => k == 2,
            _ => false,
        }
    }

    /// Control-flow successors of a terminator (empty otherwise).
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Opcode::Br { target } => vec![*target],
            Opcode::CondBr {
                then_block,
                else_block,
            } => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }
}

// ── Values ─────────────────────────────────────────────────────────────────

/// Literal payload of a leaf constant (splatted over the constant's shape).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Float(v) => {
                let s = format!("{v}");
                if s.contains('.') {
                    write!(f, "{s}")
                } else {
                    write!(f, "{s}.0")
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub op: Opcode,
    pub operands: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValueKind {
    /// Kernel argument; `align` is the declared divisibility (1 = none).
    Argument { index: u32, align: u64 },
    Constant(ConstValue),
    Inst(Instruction),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueData {
    pub name: Option<String>,
    pub ty: Type,
    pub kind: ValueKind,
    /// Defining block; `None` for arguments and constants.
    pub block: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub label: String,
    pub insts: Vec<ValueId>,
}

/// Where a new instruction goes. `BlockEnd` places it after every
/// non-terminator of the block, i.e. just before the terminator if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Before(ValueId),
    After(ValueId),
    BlockEnd(BlockId),
}

// ── Module ─────────────────────────────────────────────────────────────────

/// One kernel in SSA form.
#[derive(Debug, Clone)]
pub struct Module {
    id: ModuleId,
    pub name: String,
    pub args: Vec<ValueId>,
    pub consts: Vec<ValueId>,
    pub blocks: Vec<Block>,
    values: Vec<ValueData>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            id: ModuleId::fresh(),
            name: name.into(),
            args: Vec::new(),
            consts: Vec::new(),
            blocks: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(data);
        id
    }

    pub fn add_argument(&mut self, name: &str, ty: Type, align: u64) -> ValueId {
        let index = self.args.len() as u32;
        let id = self.push_value(ValueData {
            name: Some(name.to_string()),
            ty,
            kind: ValueKind::Argument {
                index,
                align: align.max(1),
            },
            block: None,
        });
        self.args.push(id);
        id
    }

    pub fn add_constant(&mut self, name: Option<&str>, value: ConstValue, ty: Type) -> ValueId {
        let id = self.push_value(ValueData {
            name: name.map(str::to_string),
            ty,
            kind: ValueKind::Constant(value),
            block: None,
        });
        self.consts.push(id);
        id
    }

    pub fn add_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            label: label.to_string(),
            insts: Vec::new(),
        });
        id
    }

    /// Append an instruction at the very end of `block`.
    pub fn append(
        &mut self,
        block: BlockId,
        op: Opcode,
        operands: Vec<ValueId>,
        ty: Type,
        name: Option<&str>,
    ) -> ValueId {
        let id = self.push_value(ValueData {
            name: name.map(str::to_string),
            ty,
            kind: ValueKind::Inst(Instruction { op, operands }),
            block: Some(block),
        });
        self.blocks[block.index()].insts.push(id);
        id
    }

    /// Insert an instruction at an explicit program point.
    ///
    /// Panics if `at` names a value that is not placed in a block.
    pub fn insert(
        &mut self,
        at: InsertPoint,
        op: Opcode,
        operands: Vec<ValueId>,
        ty: Type,
        name: Option<&str>,
    ) -> ValueId {
        let (block, index) = match at {
            InsertPoint::Before(v) => self.position(v).expect("insert point is not placed"),
            InsertPoint::After(v) => {
                let (b, i) = self.position(v).expect("insert point is not placed");
                (b, i + 1)
            }
            InsertPoint::BlockEnd(b) => {
                let insts = &self.blocks[b.index()].insts;
                let index = match insts.last() {
                    Some(&last) if self.is_terminator(last) => insts.len() - 1,
                    _ => insts.len(),
                };
                (b, index)
            }
        };
        let id = self.push_value(ValueData {
            name: name.map(str::to_string),
            ty,
            kind: ValueKind::Inst(Instruction { op, operands }),
            block: Some(block),
        });
        self.blocks[block.index()].insts.insert(index, id);
        id
    }

    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v.index()]
    }

    pub fn values(&self) -> impl Iterator<Item = (ValueId, &ValueData)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, d)| (ValueId(i as u32), d))
    }

    pub fn ty(&self, v: ValueId) -> &Type {
        &self.values[v.index()].ty
    }

    pub fn inst(&self, v: ValueId) -> Option<&Instruction> {
        match &self.values[v.index()].kind {
            ValueKind::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn opcode(&self, v: ValueId) -> Option<&Opcode> {
        self.inst(v).map(|i| &i.op)
    }

    pub fn is_terminator(&self, v: ValueId) -> bool {
        self.opcode(v).is_some_and(Opcode::is_terminator)
    }

    /// Rewire operand `k` of `user` to `new`.
    pub fn set_operand(&mut self, user: ValueId, k: usize, new: ValueId) {
        match &mut self.values[user.index()].kind {
            ValueKind::Inst(inst) => inst.operands[k] = new,
            _ => panic!("value {user:?} is not an instruction"),
        }
    }

    /// Replace the whole operand list of `user`.
    pub fn set_operands(&mut self, user: ValueId, operands: Vec<ValueId>) {
        match &mut self.values[user.index()].kind {
            ValueKind::Inst(inst) => inst.operands = operands,
            _ => panic!("value {user:?} is not an instruction"),
        }
    }

    pub fn block(&self, b: BlockId) -> &Block {
        &self.blocks[b.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn block_by_label(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.label == label)
            .map(|i| BlockId(i as u32))
    }

    pub fn entry(&self) -> Option<BlockId> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(BlockId(0))
        }
    }

    /// Current (block, index) of a placed instruction.
    pub fn position(&self, v: ValueId) -> Option<(BlockId, usize)> {
        let block = self.values[v.index()].block?;
        let index = self.blocks[block.index()]
            .insts
            .iter()
            .position(|&i| i == v)?;
        Some((block, index))
    }

    pub fn terminator(&self, b: BlockId) -> Option<ValueId> {
        let last = *self.blocks[b.index()].insts.last()?;
        self.is_terminator(last).then_some(last)
    }

    /// Control-flow successors of `b`, read from its terminator.
    pub fn successors(&self, b: BlockId) -> Vec<BlockId> {
        self.terminator(b)
            .and_then(|t| self.opcode(t))
            .map(Opcode::successors)
            .unwrap_or_default()
    }

    /// Every placed instruction in program order.
    pub fn program_order(&self) -> Vec<(BlockId, ValueId)> {
        self.block_ids()
            .flat_map(|b| self.blocks[b.index()].insts.iter().map(move |&v| (b, v)))
            .collect()
    }

    /// Instructions that use `v` as an operand, with the operand index.
    pub fn users(&self, v: ValueId) -> Vec<(ValueId, usize)> {
        let mut users = Vec::new();
        for (_, inst_id) in self.program_order() {
            if let Some(inst) = self.inst(inst_id) {
                for (k, &op) in inst.operands.iter().enumerate() {
                    if op == v {
                        users.push((inst_id, k));
                    }
                }
            }
        }
        users
    }

    /// Printable name: `%name` when named, `%<id>` otherwise.
    pub fn display_name(&self, v: ValueId) -> String {
        match &self.values[v.index()].name {
            Some(name) => format!("%{name}"),
            None => format!("%{}", v.0),
        }
    }
}

// ── Printer ────────────────────────────────────────────────────────────────

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|&a| {
                let data = self.value(a);
                match data.kind {
                    ValueKind::Argument { align, .. } if align > 1 => {
                        format!("{}: {} align({})", self.display_name(a), data.ty, align)
                    }
                    _ => format!("{}: {}", self.display_name(a), data.ty),
                }
            })
            .collect();
        writeln!(f, "kernel {}({}) {{", self.name, args.join(", "))?;
        for &c in &self.consts {
            if let ValueKind::Constant(value) = &self.value(c).kind {
                writeln!(
                    f,
                    "  {} = const {} : {}",
                    self.display_name(c),
                    value,
                    self.ty(c)
                )?;
            }
        }
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for &v in &block.insts {
                writeln!(f, "  {}", self.format_inst(v))?;
            }
        }
        writeln!(f, "}}")
    }
}

impl Module {
    /// Render one instruction in textual IR syntax (without indentation).
    pub fn format_inst(&self, v: ValueId) -> String {
        let Some(inst) = self.inst(v) else {
            return self.display_name(v);
        };
        let mut out = String::new();
        if inst.op.has_result() {
            out.push_str(&self.display_name(v));
            out.push_str(" = ");
        }
        out.push_str(inst.op.mnemonic());
        let label = |b: &BlockId| self.blocks[b.index()].label.clone();
        let operands: Vec<String> = match &inst.op {
            Opcode::Range { start, end } => vec![start.to_string(), end.to_string()],
            Opcode::Phi { blocks } => inst
                .operands
                .iter()
                .zip(blocks)
                .map(|(&val, b)| format!("[{}, {}]", self.display_name(val), label(b)))
                .collect(),
            Opcode::Br { target } => vec![label(target)],
            Opcode::CondBr {
                then_block,
                else_block,
            } => vec![
                self.display_name(inst.operands[0]),
                label(then_block),
                label(else_block),
            ],
            _ => inst
                .operands
                .iter()
                .map(|&o| self.display_name(o))
                .collect(),
        };
        if !operands.is_empty() {
            out.push(' ');
            out.push_str(&operands.join(", "));
        }
        if inst.op.has_result() {
            out.push_str(&format!(" : {}", self.ty(v)));
        }
        out
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_tile() -> Type {
        Type::tensor(ElemType::Scalar(ScalarType::F32), &[16, 16])
    }

    #[test]
    fn insert_before_and_block_end_respect_terminator() {
        let mut m = Module::new("k");
        let x = m.add_argument("x", f32_tile(), 1);
        let entry = m.add_block("entry");
        let a = m.append(
            entry,
            Opcode::Unary(UnaryOp::Exp),
            vec![x],
            f32_tile(),
            Some("a"),
        );
        let ret = m.append(entry, Opcode::Ret, vec![], Type::void(), None);

        let before = m.insert(
            InsertPoint::Before(a),
            Opcode::Unary(UnaryOp::Neg),
            vec![x],
            f32_tile(),
            None,
        );
        let end = m.insert(
            InsertPoint::BlockEnd(entry),
            Opcode::Unary(UnaryOp::Abs),
            vec![a],
            f32_tile(),
            None,
        );

        assert_eq!(m.block(entry).insts, vec![before, a, end, ret]);
        assert_eq!(m.terminator(entry), Some(ret));
        assert_eq!(m.position(end), Some((entry, 2)));
    }

    #[test]
    fn users_report_operand_positions() {
        let mut m = Module::new("k");
        let x = m.add_argument("x", f32_tile(), 1);
        let entry = m.add_block("entry");
        let y = m.append(
            entry,
            Opcode::Binary(BinaryOp::Mul),
            vec![x, x],
            f32_tile(),
            Some("y"),
        );
        assert_eq!(m.users(x), vec![(y, 0), (y, 1)]);
        assert!(m.users(y).is_empty());
    }

    #[test]
    fn capability_predicates() {
        assert!(Opcode::Dot.is_shared_operand(0));
        assert!(Opcode::Dot.is_shared_operand(1));
        assert!(!Opcode::Dot.is_shared_operand(2));
        assert!(Opcode::Dot.is_layout_preserving(2));
        assert!(Opcode::Trans.produces_shared());
        assert!(Opcode::Copy(CopyKind::AsyncToShared).produces_shared());
        assert!(!Opcode::Copy(CopyKind::FromShared).produces_shared());
        assert!(!Opcode::Store.has_result());
        assert_eq!(
            CopyKind::AsyncToShared.direction(),
            CopyKind::ToShared.direction()
        );
    }

    #[test]
    fn type_display_and_sizes() {
        let t = Type::tensor(ElemType::Ptr(ScalarType::F16), &[64, 32]);
        assert_eq!(t.to_string(), "ptr<f16>[64, 32]");
        assert_eq!(t.numel(), 2048);
        assert_eq!(Type::tensor(ElemType::Scalar(ScalarType::F16), &[64, 32]).bytes(), 4096);
        assert_eq!(Type::scalar(ScalarType::I32).to_string(), "i32");
    }

    #[test]
    fn float_constants_always_print_a_decimal_point() {
        assert_eq!(ConstValue::Float(0.0).to_string(), "0.0");
        assert_eq!(ConstValue::Float(1.5).to_string(), "1.5");
        assert_eq!(ConstValue::Int(-3).to_string(), "-3");
    }

    #[test]
    fn sizes_saturate() {
        let cube = Type::tensor(ElemType::Scalar(ScalarType::I32), &[u32::MAX; 3]);
        assert_eq!(cube.numel(), u64::MAX);
        assert_eq!(cube.bytes(), u64::MAX);
        assert_eq!(f32_tile().bytes(), 1024);
    }
}
