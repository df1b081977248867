//! Pretty printer for the textual form of the IR. The output parses back
//! with [`Module::parse`].

use std::fmt::{self, Write};

use crate::{
    BinOp, Block, Const, FunctionData, GlobalInit, Instruction, Module, Op, Operand, Phi,
    Signature, Terminator,
};

macro_rules! w {
    ($dst:expr, $($arg:tt)*) => {
        { let _ = write!($dst, $($arg)*); }
    };
}

macro_rules! wln {
    ($dst:expr) => {
        { let _ = writeln!($dst); }
    };
    ($dst:expr, $($arg:tt)*) => {
        { let _ = writeln!($dst, $($arg)*); }
    };
}

impl Module {
    pub fn print(&self) -> String {
        let mut printer = Printer { module: self, buf: String::new(), indent: 0, needs_indent: true };
        printer.print();
        printer.buf
    }

    /// Like [`Module::print`], but calls `annotate` before every function,
    /// block and instruction so callers can interleave `;` comment lines.
    pub fn print_annotated(&self, mut annotate: impl FnMut(&mut String, AnnotationSite)) -> String {
        let mut printer = Printer { module: self, buf: String::new(), indent: 0, needs_indent: true };
        printer.print_with(&mut annotate);
        printer.buf
    }
}

/// Where an annotation hook is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationSite {
    Function(crate::Func),
    Block(crate::Func, Block),
    Phi(crate::Func, Block, crate::PhiIdx),
    Instruction(crate::Func, Block, crate::InstIdx),
    Terminator(crate::Func, Block),
}

struct Printer<'a> {
    module: &'a Module,
    buf: String,
    indent: usize,
    needs_indent: bool,
}

impl<'a> Printer<'a> {
    fn print(&mut self) {
        self.print_with(&mut |_, _| {});
    }

    fn print_with(&mut self, annotate: &mut dyn FnMut(&mut String, AnnotationSite)) {
        let module = self.module;

        wln!(self, "{{");
        for global in &module.globals {
            w!(self, "global @{} : {:?}", global.name, global.ty);
            match &global.init {
                GlobalInit::None => {}
                GlobalInit::Zero => w!(self, " = zero"),
                GlobalInit::Null => w!(self, " = null"),
                GlobalInit::Int(c) => w!(self, " = {c:?}"),
                GlobalInit::Addr(g) => w!(self, " = @{}", module.globals[*g].name),
                GlobalInit::FuncAddr(f) => w!(self, " = @{}", module.functions[*f].name),
            }
            wln!(self, ";");
        }

        for (id, func) in module.functions.iter_enumerated() {
            if func.is_declaration() {
                w!(self, "decl @{}", func.name);
                self.print_signature(&func.sig, false);
                wln!(self, ";");
                continue;
            }

            self.annotate(annotate, AnnotationSite::Function(id));
            w!(self, "func @{}", func.name);
            self.print_signature(&func.sig, true);
            wln!(self, " {{");
            for (bb, data) in func.blocks.iter_enumerated() {
                self.annotate(annotate, AnnotationSite::Block(id, bb));
                wln!(self, "{bb:?}:");
                self.indent += 1;
                for (idx, phi) in data.phis.iter_enumerated() {
                    self.annotate(annotate, AnnotationSite::Phi(id, bb, idx));
                    self.print_phi(phi);
                }
                for (idx, inst) in data.instructions.iter_enumerated() {
                    self.annotate(annotate, AnnotationSite::Instruction(id, bb, idx));
                    self.print_instruction(func, inst);
                }
                if let Some(term) = &data.terminator {
                    self.annotate(annotate, AnnotationSite::Terminator(id, bb));
                    self.print_terminator(term);
                }
                self.indent -= 1;
            }
            wln!(self, "}}");
        }
        w!(self, "}}");
    }

    fn annotate(&mut self, annotate: &mut dyn FnMut(&mut String, AnnotationSite), site: AnnotationSite) {
        let mut notes = String::new();
        annotate(&mut notes, site);
        for line in notes.lines() {
            wln!(self, "; {line}");
        }
    }

    fn print_signature(&mut self, sig: &Signature, named: bool) {
        w!(self, "(");
        for (i, param) in sig.params.iter().enumerate() {
            if i != 0 {
                w!(self, ", ");
            }
            if named {
                w!(self, "%{i} : ");
            }
            w!(self, "{param:?}");
        }
        if sig.variadic {
            if !sig.params.is_empty() {
                w!(self, ", ");
            }
            w!(self, "...");
        }
        w!(self, ") -> {:?}", sig.ret);
    }

    fn print_phi(&mut self, phi: &Phi) {
        w!(self, "phi {:?} : {:?} := [", phi.dst, phi.ty);
        for (i, (block, op)) in phi.sources.iter().enumerate() {
            if i != 0 {
                w!(self, ", ");
            }
            w!(self, "({block:?}, ");
            self.print_operand(op);
            w!(self, ")");
        }
        wln!(self, "];");
    }

    fn print_instruction(&mut self, func: &FunctionData, inst: &Instruction) {
        if let Some(dst) = inst.dst {
            w!(self, "let {dst:?} := ");
        }

        match &inst.op {
            Op::Alloc(ty) => w!(self, "alloc [{ty:?}]"),
            op => {
                self.print_op(op);
                w!(self, " [");
                for (i, arg) in inst.args.iter().enumerate() {
                    if i != 0 {
                        w!(self, ", ");
                    }
                    self.print_operand(arg);
                }
                w!(self, "]");
            }
        }
        w!(self, ";");

        if inst.line != 0 {
            w!(self, " !line {};", inst.line);
        }
        if let Some(name) = inst.dst.and_then(|dst| func.value_names.get(&dst)) {
            w!(self, " !name \"{name}\";");
        }
        wln!(self);
    }

    fn print_op(&mut self, op: &Op) {
        match op {
            Op::Alloc(_) => unreachable!("alloc is printed by the caller"),
            Op::Load(ty) => w!(self, "load.{ty:?}"),
            Op::Store => w!(self, "store"),
            Op::Gep => w!(self, "gep"),
            Op::Memcpy => w!(self, "memcpy"),
            Op::Memset => w!(self, "memset"),
            Op::Cast(ty) => w!(self, "cast.{ty:?}"),
            Op::Call(ty) => w!(self, "call.{ty:?}"),
            Op::Cmp => w!(self, "cmp"),
            Op::Binary(BinOp::Add) => w!(self, "add"),
            Op::Binary(BinOp::Sub) => w!(self, "sub"),
            Op::Binary(BinOp::Mul) => w!(self, "mul"),
            Op::Binary(BinOp::Div) => w!(self, "div"),
            Op::Unknown(ty) => w!(self, "unknown.{ty:?}"),
        }
    }

    fn print_terminator(&mut self, term: &Terminator) {
        match term {
            Terminator::Goto(bb) => wln!(self, "goto {bb:?};"),
            Terminator::Br { condition, then_block, else_block } => {
                w!(self, "br ");
                self.print_operand(condition);
                wln!(self, ", {then_block:?}, {else_block:?};");
            }
            Terminator::Switch { discr, targets, default } => {
                w!(self, "switch ");
                self.print_operand(discr);
                w!(self, ", [");
                for (i, bb) in targets.iter().enumerate() {
                    if i != 0 {
                        w!(self, ", ");
                    }
                    w!(self, "{bb:?}");
                }
                wln!(self, "], {default:?};");
            }
            Terminator::Ret(None) => wln!(self, "ret;"),
            Terminator::Ret(Some(op)) => {
                w!(self, "ret [");
                self.print_operand(op);
                wln!(self, "];");
            }
            Terminator::Unreachable => wln!(self, "unreachable;"),
        }
    }

    fn print_operand(&mut self, op: &Operand) {
        match op {
            Operand::Value(v) => w!(self, "{v:?}"),
            Operand::Const(c) => w!(self, "{c:?}"),
            Operand::Global(g) => w!(self, "@{}", self.module.globals[*g].name),
            Operand::FuncAddr(f) => w!(self, "@{}", self.module.functions[*f].name),
        }
    }
}

impl<'a> Write for Printer<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for line in s.split_inclusive('\n') {
            if self.needs_indent {
                if line != "\n" {
                    self.buf.push_str(&"    ".repeat(self.indent));
                }
                self.needs_indent = false;
            }
            self.buf.push_str(line);
            self.needs_indent = line.ends_with('\n');
        }
        Ok(())
    }
}
