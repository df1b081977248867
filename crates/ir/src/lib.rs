//! A small SSA intermediate representation.
//!
//! The IR is LLVM-flavoured: a module holds global variables and functions,
//! a function holds basic blocks, a block holds phis, instructions and a
//! terminator. Every value is assigned exactly once. The representation is
//! deliberately independent of any frontend; modules are built from the
//! textual format (see [`Module::parse`]) and printed back with
//! [`Module::print`].

use std::ops::{Index, IndexMut};

use ahash::AHashMap;
use stdx::{impl_debug, impl_idx_from};
use typed_index_collections::TiVec;

pub use crate::dominators::DominatorTree;
pub use crate::parse::ParseError;
pub use crate::ty::Ty;
pub use crate::verify::VerifyError;
pub use crate::write::AnnotationSite;

mod dominators;
mod parse;
mod ty;
mod verify;
mod write;

#[cfg(test)]
mod tests;

/// A function of the module, definition or declaration.
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Func(u32);
impl_idx_from!(Func(u32));
impl_debug!(match Func{f => "f{}",f.0;});

/// A global variable.
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Global(u32);
impl_idx_from!(Global(u32));
impl_debug!(match Global{g => "g{}",g.0;});

/// A basic block of a function.
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Block(u32);
impl_idx_from!(Block(u32));
impl_debug!(match Block{bb => "bb{}",bb.0;});

impl stdx::packed_option::ReservedValue for Block {
    fn reserved_value() -> Self {
        Block(u32::MAX)
    }

    fn is_reserved_value(&self) -> bool {
        self.0 == u32::MAX
    }
}

/// An SSA value: a function parameter or an instruction/phi result.
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Value(u32);
impl_idx_from!(Value(u32));
impl_debug!(match Value{v => "%{}",v.0;});

#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct PhiIdx(u32);
impl_idx_from!(PhiIdx(u32));
impl_debug!(match PhiIdx{i => "phi{}",i.0;});

#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct InstIdx(u32);
impl_idx_from!(InstIdx(u32));
impl_debug!(match InstIdx{i => "inst{}",i.0;});

/// A point inside a function.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Location {
    pub block: Block,
    pub kind: LocationKind,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub enum LocationKind {
    Phi(PhiIdx),
    Instruction(InstIdx),
    Terminator,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub globals: TiVec<Global, GlobalData>,
    pub functions: TiVec<Func, FunctionData>,
}

impl Module {
    pub fn function_by_name(&self, name: &str) -> Option<Func> {
        self.functions.iter_enumerated().find(|(_, f)| f.name == name).map(|(id, _)| id)
    }

    pub fn global_by_name(&self, name: &str) -> Option<Global> {
        self.globals.iter_enumerated().find(|(_, g)| g.name == name).map(|(id, _)| id)
    }
}

#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: String,
    pub ty: Ty,
    pub init: GlobalInit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// No initialiser: the global is external.
    None,
    /// Explicitly zero-initialised memory.
    Zero,
    Int(Const),
    Null,
    /// Address of another global.
    Addr(Global),
    /// Address of a function.
    FuncAddr(Func),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub variadic: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub name: String,
    pub sig: Signature,
    /// Empty for declarations.
    pub blocks: TiVec<Block, BlockData>,
    /// Definition site of every value; parameters come first.
    pub values: TiVec<Value, ValueDef>,
    /// Source-variable names attached to values (`!name` annotations).
    pub value_names: AHashMap<Value, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    Param(u32),
    Inst(Block, InstIdx),
    Phi(Block, PhiIdx),
    /// The defining instruction was removed.
    Invalid,
}

impl FunctionData {
    pub fn new(name: String, sig: Signature) -> FunctionData {
        let values: TiVec<Value, ValueDef> =
            (0..sig.params.len()).map(|i| ValueDef::Param(i as u32)).collect();
        FunctionData { name, sig, blocks: TiVec::new(), values, value_names: AHashMap::new() }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn entry(&self) -> Block {
        Block(0)
    }

    pub fn param_values(&self) -> impl Iterator<Item = Value> {
        (0..self.sig.params.len()).map(|i| Value(i as u32))
    }

    pub fn value_def(&self, value: Value) -> ValueDef {
        self.values[value]
    }

    /// Type of a value, if it can be derived from its definition.
    pub fn value_ty(&self, value: Value) -> Option<Ty> {
        match self.values[value] {
            ValueDef::Param(i) => Some(self.sig.params[i as usize].clone()),
            ValueDef::Inst(bb, inst) => self.blocks[bb].instructions[inst].op.result_ty(),
            ValueDef::Phi(bb, phi) => Some(self.blocks[bb].phis[phi].ty.clone()),
            ValueDef::Invalid => None,
        }
    }

    pub fn operand_ty(&self, op: &Operand) -> Option<Ty> {
        match op {
            Operand::Value(v) => self.value_ty(*v),
            Operand::Const(Const::Int { bits, .. }) => Some(Ty::Int(*bits)),
            Operand::Const(Const::Null) | Operand::Const(Const::Undef) => None,
            // address of a global/function is a pointer
            Operand::Global(_) | Operand::FuncAddr(_) => Some(Ty::Ptr(Box::new(Ty::Int(8)))),
        }
    }

    pub fn instruction(&self, bb: Block, inst: InstIdx) -> &Instruction {
        &self.blocks[bb].instructions[inst]
    }

    /// Rebuild the value table from the instructions. Values whose definition
    /// is gone become [`ValueDef::Invalid`].
    pub fn recompute_value_defs(&mut self) {
        for def in self.values.iter_mut() {
            if !matches!(def, ValueDef::Param(_)) {
                *def = ValueDef::Invalid;
            }
        }
        for (bb, data) in self.blocks.iter_enumerated() {
            for (idx, phi) in data.phis.iter_enumerated() {
                self.values[phi.dst] = ValueDef::Phi(bb, idx);
            }
            for (idx, inst) in data.instructions.iter_enumerated() {
                if let Some(dst) = inst.dst {
                    self.values[dst] = ValueDef::Inst(bb, idx);
                }
            }
        }
    }

    pub fn successors(&self, bb: Block) -> Vec<Block> {
        self.blocks[bb].terminator.as_ref().map_or_else(Vec::new, Terminator::successors)
    }

    pub fn predecessors(&self) -> TiVec<Block, Vec<Block>> {
        let mut preds: TiVec<Block, Vec<Block>> = vec![Vec::new(); self.blocks.len()].into();
        for (bb, data) in self.blocks.iter_enumerated() {
            if let Some(term) = &data.terminator {
                term.visit_successors(|succ| {
                    if !preds[succ].contains(&bb) {
                        preds[succ].push(bb)
                    }
                });
            }
        }
        preds
    }

    /// Post-order over the CFG from the entry block; unreachable blocks are
    /// not visited.
    pub fn postorder(&self) -> Vec<Block> {
        const UNDEF: u8 = 0;
        const SEEN: u8 = 1;
        const DONE: u8 = 2;

        let mut state: TiVec<Block, u8> = vec![UNDEF; self.blocks.len()].into();
        let mut postorder = Vec::with_capacity(self.blocks.len());
        if self.blocks.is_empty() {
            return postorder;
        }

        let mut stack = vec![(self.entry(), self.successors(self.entry()))];
        state[self.entry()] = SEEN;
        loop {
            while let Some(succ) = stack.last_mut().and_then(|(_, succs)| succs.pop()) {
                if state[succ] == UNDEF {
                    state[succ] = SEEN;
                    let succ_succs = self.successors(succ);
                    stack.push((succ, succ_succs));
                }
            }

            if let Some((bb, _)) = stack.pop() {
                state[bb] = DONE;
                postorder.push(bb);
            } else {
                break;
            }
        }
        postorder
    }

    pub fn reverse_postorder(&self) -> Vec<Block> {
        let mut order = self.postorder();
        order.reverse();
        order
    }

    /// Iterates all locations of a block in execution order.
    pub fn block_locations(&self, bb: Block) -> impl Iterator<Item = Location> + '_ {
        let data = &self.blocks[bb];
        data.phis
            .keys()
            .map(move |phi| Location { block: bb, kind: LocationKind::Phi(phi) })
            .chain(
                data.instructions
                    .keys()
                    .map(move |inst| Location { block: bb, kind: LocationKind::Instruction(inst) }),
            )
            .chain(std::iter::once(Location { block: bb, kind: LocationKind::Terminator }))
    }
}

impl Index<Block> for FunctionData {
    type Output = BlockData;

    fn index(&self, bb: Block) -> &BlockData {
        &self.blocks[bb]
    }
}

impl IndexMut<Block> for FunctionData {
    fn index_mut(&mut self, bb: Block) -> &mut BlockData {
        &mut self.blocks[bb]
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub phis: TiVec<PhiIdx, Phi>,
    pub instructions: TiVec<InstIdx, Instruction>,
    pub terminator: Option<Terminator>,
}

impl BlockData {
    #[track_caller]
    pub fn terminator(&self) -> &Terminator {
        self.terminator.as_ref().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.phis.is_empty() && self.instructions.is_empty()
    }

    pub fn visit_operands(&self, mut f: impl FnMut(&Operand)) {
        for phi in &*self.phis {
            for (_, op) in &phi.sources {
                f(op)
            }
        }
        for inst in &*self.instructions {
            inst.visit_operands(&mut f)
        }
        if let Some(term) = &self.terminator {
            term.visit_operands(&mut f)
        }
    }
}

/// Phis are kept apart from ordinary instructions: their sources are
/// evaluated on the edge from the predecessor.
#[derive(Debug, Clone)]
pub struct Phi {
    pub dst: Value,
    pub ty: Ty,
    /// Sorted by predecessor block.
    pub sources: Vec<(Block, Operand)>,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub dst: Option<Value>,
    pub op: Op,
    pub args: Box<[Operand]>,
    /// Source line (`!line` annotation), 0 if absent.
    pub line: u32,
}

impl Instruction {
    pub fn visit_operands(&self, mut f: impl FnMut(&Operand)) {
        for arg in &*self.args {
            f(arg)
        }
    }

    /// The function this instruction calls directly, if any.
    pub fn direct_callee(&self) -> Option<Func> {
        match (&self.op, self.args.first()) {
            (Op::Call(_), Some(Operand::FuncAddr(f))) => Some(*f),
            _ => None,
        }
    }
}

/// Instruction opcodes. The set mirrors the classification the analyses
/// care about; anything else is `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Stack allocation of the payload type. No arguments.
    Alloc(Ty),
    /// `args: [ptr]`; payload is the loaded type.
    Load(Ty),
    /// `args: [value, ptr]`.
    Store,
    /// `args: [base, byte-offset]`.
    Gep,
    /// `args: [dst, src, len]`.
    Memcpy,
    /// `args: [dst, value, len]`.
    Memset,
    /// `args: [value]`; payload is the target type.
    Cast(Ty),
    /// `args: [callee, actuals...]`; payload is the result type.
    Call(Ty),
    /// `args: [lhs, rhs]`.
    Cmp,
    /// `args: [lhs, rhs]`.
    Binary(BinOp),
    /// An instruction the frontend could not classify; payload is the result
    /// type.
    Unknown(Ty),
}

impl Op {
    pub fn result_ty(&self) -> Option<Ty> {
        match self {
            Op::Alloc(ty) => Some(Ty::Ptr(Box::new(ty.clone()))),
            Op::Load(ty) | Op::Cast(ty) | Op::Call(ty) | Op::Unknown(ty) => Some(ty.clone()),
            // a gep result points into the same object as its base
            Op::Gep => Some(Ty::Ptr(Box::new(Ty::Int(8)))),
            Op::Cmp => Some(Ty::Int(1)),
            Op::Binary(_) => Some(Ty::Int(64)),
            Op::Store | Op::Memcpy | Op::Memset => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, PartialEq)]
pub enum Operand {
    Value(Value),
    Const(Const),
    /// Address of a global variable.
    Global(Global),
    /// Address of a function.
    FuncAddr(Func),
}

impl_debug! {
    match Operand{
        Operand::Value(v) => "{:?}", v;
        Operand::Const(c) => "{:?}", c;
        Operand::Global(g) => "{:?}", g;
        Operand::FuncAddr(f) => "{:?}", f;
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum Const {
    Int { bits: u8, value: i64 },
    Null,
    Undef,
}

impl Const {
    pub fn is_zero(&self) -> bool {
        matches!(self, Const::Int { value: 0, .. } | Const::Null)
    }
}

impl_debug! {
    match Const{
        Const::Int{bits,value} => "i{} {}", bits, value;
        Const::Null => "null";
        Const::Undef => "undef";
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Goto(Block),
    Br { condition: Operand, then_block: Block, else_block: Block },
    Switch { discr: Operand, targets: Vec<Block>, default: Block },
    Ret(Option<Operand>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<Block> {
        let mut res = Vec::new();
        self.visit_successors(|bb| res.push(bb));
        res
    }

    /// Successors with their branch labels: 0 for unconditional edges, 0/1
    /// for a two-way branch, 0..n for a switch (the default edge is last).
    pub fn labeled_successors(&self) -> Vec<(Block, u8)> {
        let mut res = Vec::new();
        match self {
            Terminator::Goto(bb) => res.push((*bb, 0)),
            Terminator::Br { then_block, else_block, .. } => {
                res.push((*then_block, 0));
                res.push((*else_block, 1));
            }
            Terminator::Switch { targets, default, .. } => {
                for (i, bb) in targets.iter().enumerate() {
                    res.push((*bb, i as u8));
                }
                res.push((*default, targets.len() as u8));
            }
            Terminator::Ret(_) | Terminator::Unreachable => (),
        }
        res
    }

    #[inline]
    pub fn visit_successors(&self, mut f: impl FnMut(Block)) {
        match self {
            Terminator::Goto(bb) => f(*bb),
            Terminator::Br { then_block, else_block, .. } => {
                f(*then_block);
                f(*else_block);
            }
            Terminator::Switch { targets, default, .. } => {
                for bb in targets {
                    f(*bb)
                }
                f(*default)
            }
            Terminator::Ret(_) | Terminator::Unreachable => (),
        }
    }

    #[inline]
    pub fn visit_successors_mut(&mut self, mut f: impl FnMut(&mut Block)) {
        match self {
            Terminator::Goto(bb) => f(bb),
            Terminator::Br { then_block, else_block, .. } => {
                f(then_block);
                f(else_block);
            }
            Terminator::Switch { targets, default, .. } => {
                for bb in targets {
                    f(bb)
                }
                f(default)
            }
            Terminator::Ret(_) | Terminator::Unreachable => (),
        }
    }

    #[inline]
    pub fn visit_operands(&self, mut f: impl FnMut(&Operand)) {
        match self {
            Terminator::Br { condition, .. } => f(condition),
            Terminator::Switch { discr, .. } => f(discr),
            Terminator::Ret(Some(op)) => f(op),
            _ => (),
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Terminator::Ret(_) | Terminator::Unreachable)
    }
}

/// Callee names the pointer analysis gives special meaning, as the original
/// program would link them from libc.
pub mod known_names {
    pub const ALLOCATION: &[&str] = &["malloc", "calloc", "realloc"];
    pub const ZEROING_ALLOCATION: &str = "calloc";
    pub const FREE: &str = "free";
    pub const THREAD_CREATE: &str = "pthread_create";
    pub const THREAD_JOIN: &str = "pthread_join";
}
