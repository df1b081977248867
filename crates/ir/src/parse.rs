//! Parser for the textual form of the IR.
//!
//! The format is whitespace-insensitive ASCII; see the crate tests for
//! examples. `Module::print` emits the same format back.

use std::any::type_name;
use std::fmt::Display;
use std::str::FromStr;

use ahash::AHashMap;
use stdx::impl_display;

use crate::{
    BinOp, Block, BlockData, Const, Func, FunctionData, Global, GlobalData, GlobalInit,
    Instruction, Module, Op, Operand, Phi, Signature, Terminator, Ty, Value, ValueDef,
};

#[derive(Debug, PartialEq, Eq)]
pub struct ParseError(pub String);

impl_display!(err @ ParseError => "{}", err.0);
impl std::error::Error for ParseError {}

pub(crate) struct Parser {
    src: String,
    pos: usize,
    globals: AHashMap<String, Global>,
    functions: AHashMap<String, Func>,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    fn new(src: &str) -> PResult<Parser> {
        if !src.is_ascii() {
            return Err(ParseError("can only parse ascii modules".to_owned()));
        }
        Ok(Parser {
            src: src.replace(|c: char| c.is_ascii_whitespace(), ""),
            pos: 0,
            globals: AHashMap::new(),
            functions: AHashMap::new(),
        })
    }

    fn err<T>(&self, msg: impl Into<String>) -> PResult<T> {
        let rest = &self.src[self.pos..];
        let rest = &rest[..rest.len().min(40)];
        Err(ParseError(format!("{} (at `{rest}`)", msg.into())))
    }

    fn at(&self, expect: &str) -> bool {
        self.src[self.pos..].starts_with(expect)
    }

    fn eat(&mut self, expect: &str) -> bool {
        let at = self.at(expect);
        if at {
            self.pos += expect.len();
        }
        at
    }

    fn expect(&mut self, expect: &str) -> PResult<()> {
        if self.eat(expect) {
            Ok(())
        } else {
            self.err(format!("expected `{expect}`"))
        }
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Parses a `FromStr` value delimited by the next structural character.
    fn from_str<T: FromStr>(&mut self) -> PResult<T>
    where
        T::Err: Display,
    {
        let end = self.src[self.pos..]
            .find(|c| matches!(c, ';' | ',' | ']' | '[' | '}' | '{' | ':' | '(' | ')' | '!'))
            .map(|at| self.pos + at)
            .unwrap_or(self.src.len());
        let src = &self.src[self.pos..end];
        match T::from_str(src) {
            Ok(val) => {
                self.pos = end;
                Ok(val)
            }
            Err(err) => self.err(format!("bad {}: {err}", type_name::<T>())),
        }
    }

    fn ident(&mut self) -> PResult<String> {
        let start = self.pos;
        while self.pos < self.src.len() {
            let c = self.src.as_bytes()[self.pos];
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return self.err("expected an identifier");
        }
        Ok(self.src[start..self.pos].to_owned())
    }

    fn string(&mut self) -> PResult<String> {
        self.expect("\"")?;
        let start = self.pos;
        while !self.eat("\"") {
            if self.eof() {
                return self.err("unterminated string");
            }
            self.pos += 1;
        }
        Ok(self.src[start..self.pos - 1].to_owned())
    }

    fn value(&mut self) -> PResult<Value> {
        self.expect("%")?;
        Ok(Value(self.from_str()?))
    }

    fn block(&mut self) -> PResult<Block> {
        self.expect("bb")?;
        Ok(Block(self.from_str()?))
    }

    fn ty(&mut self) -> PResult<Ty> {
        if self.eat("void") {
            return Ok(Ty::Void);
        }
        if self.eat("*") {
            return Ok(Ty::Ptr(Box::new(self.ty()?)));
        }
        if self.eat("[") {
            let len = self.from_str()?;
            self.expect("x")?;
            let elem = self.ty()?;
            self.expect("]")?;
            return Ok(Ty::Array(len, Box::new(elem)));
        }
        if self.eat("{") {
            let mut fields = Vec::new();
            while !self.eat("}") {
                fields.push(self.ty()?);
                if !self.at("}") {
                    self.expect(",")?;
                }
            }
            return Ok(Ty::Struct(fields));
        }
        for bits in [64u8, 32, 8, 1] {
            if self.eat(&format!("i{bits}")) {
                return Ok(Ty::Int(bits));
            }
        }
        self.err("expected a type")
    }

    fn int_const(&mut self) -> PResult<Const> {
        for bits in [64u8, 32, 8, 1] {
            if self.eat(&format!("i{bits}")) {
                return Ok(Const::Int { bits, value: self.from_str()? });
            }
        }
        self.err("expected an integer constant")
    }

    fn addr(&mut self) -> PResult<Operand> {
        self.expect("@")?;
        let name = self.ident()?;
        if let Some(&global) = self.globals.get(&name) {
            Ok(Operand::Global(global))
        } else if let Some(&func) = self.functions.get(&name) {
            Ok(Operand::FuncAddr(func))
        } else {
            self.err(format!("`@{name}` is not a known global or function"))
        }
    }

    fn operand(&mut self) -> PResult<Operand> {
        if self.at("%") {
            Ok(Operand::Value(self.value()?))
        } else if self.at("@") {
            self.addr()
        } else if self.eat("null") {
            Ok(Operand::Const(Const::Null))
        } else if self.eat("undef") {
            Ok(Operand::Const(Const::Undef))
        } else {
            Ok(Operand::Const(self.int_const()?))
        }
    }

    fn operand_list(&mut self) -> PResult<Box<[Operand]>> {
        self.expect("[")?;
        let mut args = Vec::new();
        while !self.eat("]") {
            args.push(self.operand()?);
            if !self.at("]") {
                self.expect(",")?;
            }
        }
        Ok(args.into_boxed_slice())
    }

    fn op(&mut self) -> PResult<Op> {
        if self.eat("load.") {
            return Ok(Op::Load(self.ty()?));
        }
        if self.eat("cast.") {
            return Ok(Op::Cast(self.ty()?));
        }
        if self.eat("call.") {
            return Ok(Op::Call(self.ty()?));
        }
        if self.eat("unknown.") {
            return Ok(Op::Unknown(self.ty()?));
        }
        if self.eat("store") {
            return Ok(Op::Store);
        }
        if self.eat("gep") {
            return Ok(Op::Gep);
        }
        if self.eat("memcpy") {
            return Ok(Op::Memcpy);
        }
        if self.eat("memset") {
            return Ok(Op::Memset);
        }
        if self.eat("cmp") {
            return Ok(Op::Cmp);
        }
        if self.eat("add") {
            return Ok(Op::Binary(BinOp::Add));
        }
        if self.eat("sub") {
            return Ok(Op::Binary(BinOp::Sub));
        }
        if self.eat("mul") {
            return Ok(Op::Binary(BinOp::Mul));
        }
        if self.eat("div") {
            return Ok(Op::Binary(BinOp::Div));
        }
        self.err("unknown opcode")
    }

    fn instruction(&mut self, func: &mut FunctionData) -> PResult<Instruction> {
        let dst = if self.eat("let") {
            let dst = self.value()?;
            self.expect(":=")?;
            Some(dst)
        } else {
            None
        };

        let (op, args) = if self.eat("alloc") {
            self.expect("[")?;
            let ty = self.ty()?;
            self.expect("]")?;
            (Op::Alloc(ty), Vec::new().into_boxed_slice())
        } else {
            let op = self.op()?;
            (op, self.operand_list()?)
        };
        self.expect(";")?;

        let mut line = 0;
        while self.eat("!") {
            if self.eat("line") {
                line = self.from_str()?;
                self.expect(";")?;
            } else if self.eat("name") {
                let name = self.string()?;
                self.expect(";")?;
                match dst {
                    Some(dst) => {
                        func.value_names.insert(dst, name);
                    }
                    None => return self.err("`!name` needs a destination value"),
                }
            } else {
                return self.err("unknown annotation");
            }
        }

        Ok(Instruction { dst, op, args, line })
    }

    fn phi(&mut self) -> PResult<Phi> {
        self.expect("phi")?;
        let dst = self.value()?;
        self.expect(":")?;
        let ty = self.ty()?;
        self.expect(":=")?;
        self.expect("[")?;
        let mut sources = Vec::new();
        while !self.eat("]") {
            self.expect("(")?;
            let block = self.block()?;
            self.expect(",")?;
            let op = self.operand()?;
            self.expect(")")?;
            sources.push((block, op));
            if !self.at("]") {
                self.expect(",")?;
            }
        }
        self.expect(";")?;
        Ok(Phi { dst, ty, sources })
    }

    fn terminator(&mut self) -> PResult<Terminator> {
        if self.eat("goto") {
            let bb = self.block()?;
            self.expect(";")?;
            return Ok(Terminator::Goto(bb));
        }
        if self.eat("br") {
            let condition = self.operand()?;
            self.expect(",")?;
            let then_block = self.block()?;
            self.expect(",")?;
            let else_block = self.block()?;
            self.expect(";")?;
            return Ok(Terminator::Br { condition, then_block, else_block });
        }
        if self.eat("switch") {
            let discr = self.operand()?;
            self.expect(",")?;
            self.expect("[")?;
            let mut targets = Vec::new();
            while !self.eat("]") {
                targets.push(self.block()?);
                if !self.at("]") {
                    self.expect(",")?;
                }
            }
            self.expect(",")?;
            let default = self.block()?;
            self.expect(";")?;
            return Ok(Terminator::Switch { discr, targets, default });
        }
        if self.eat("ret") {
            let value = if self.at("[") {
                let args = self.operand_list()?;
                if args.len() != 1 {
                    return self.err("`ret` takes a single operand");
                }
                Some(args[0])
            } else {
                None
            };
            self.expect(";")?;
            return Ok(Terminator::Ret(value));
        }
        if self.eat("unreachable") {
            self.expect(";")?;
            return Ok(Terminator::Unreachable);
        }
        self.err("expected a terminator")
    }

    fn at_terminator(&self) -> bool {
        ["goto", "br", "switch", "ret", "unreachable"].iter().any(|kw| self.at(kw))
    }

    fn body(&mut self, func: &mut FunctionData) -> PResult<()> {
        while !self.eat("}") {
            let bb = self.block()?;
            if bb != func.blocks.next_key() {
                return self.err(format!("expected {:?} here", func.blocks.next_key()));
            }
            self.expect(":")?;

            let mut data = BlockData::default();
            while self.at("phi") {
                data.phis.push(self.phi()?);
            }
            while !self.at_terminator() {
                if self.eof() {
                    return self.err("unexpected end of input in a block");
                }
                data.instructions.push(self.instruction(func)?);
            }
            data.terminator = Some(self.terminator()?);
            func.blocks.push(data);
        }

        // size the value table and record definitions
        let mut max_value = func.sig.params.len();
        for data in &func.blocks {
            for phi in &*data.phis {
                max_value = max_value.max(usize::from(phi.dst) + 1);
            }
            for inst in &*data.instructions {
                if let Some(dst) = inst.dst {
                    max_value = max_value.max(usize::from(dst) + 1);
                }
            }
        }
        while func.values.len() < max_value {
            func.values.push(ValueDef::Invalid);
        }
        func.recompute_value_defs();
        Ok(())
    }

    fn signature(&mut self, named_params: bool) -> PResult<Signature> {
        self.expect("(")?;
        let mut params = Vec::new();
        let mut variadic = false;
        while !self.eat(")") {
            if self.eat("...") {
                variadic = true;
                self.expect(")")?;
                break;
            }
            if named_params {
                let param = self.value()?;
                if usize::from(param) != params.len() {
                    return self.err("parameters must be named %0, %1, ... in order");
                }
                self.expect(":")?;
            }
            params.push(self.ty()?);
            if !self.at(")") && !self.at("...") {
                self.expect(",")?;
            } else {
                self.eat(",");
            }
        }
        self.expect("->")?;
        let ret = self.ty()?;
        Ok(Signature { params, ret, variadic })
    }

    fn global(&mut self, module: &mut Module) -> PResult<()> {
        self.expect("@")?;
        let name = self.ident()?;
        self.expect(":")?;
        let ty = self.ty()?;
        let init = if self.eat("=") {
            if self.eat("zero") {
                GlobalInit::Zero
            } else if self.eat("null") {
                GlobalInit::Null
            } else if self.at("@") {
                match self.addr()? {
                    Operand::Global(g) => GlobalInit::Addr(g),
                    Operand::FuncAddr(f) => GlobalInit::FuncAddr(f),
                    _ => unreachable!(),
                }
            } else {
                GlobalInit::Int(self.int_const()?)
            }
        } else {
            GlobalInit::None
        };
        self.expect(";")?;

        if self.globals.contains_key(&name) {
            return self.err(format!("duplicate global `@{name}`"));
        }
        let id = module.globals.push_and_get_key(GlobalData { name: name.clone(), ty, init });
        self.globals.insert(name, id);
        Ok(())
    }

    /// Registers the function under its name before the body is parsed so
    /// that recursive calls resolve.
    fn function_header(&mut self, module: &mut Module, named_params: bool) -> PResult<Func> {
        self.expect("@")?;
        let name = self.ident()?;
        let sig = self.signature(named_params)?;

        match self.functions.get(&name) {
            Some(&existing) if module.functions[existing].is_declaration() => {
                if module.functions[existing].sig != sig {
                    return self.err(format!("signature mismatch for `@{name}`"));
                }
                Ok(existing)
            }
            Some(_) => self.err(format!("duplicate function `@{name}`")),
            None => {
                let id =
                    module.functions.push_and_get_key(FunctionData::new(name.clone(), sig));
                self.functions.insert(name, id);
                Ok(id)
            }
        }
    }

    fn module(&mut self) -> PResult<Module> {
        let mut module = Module::default();
        self.expect("{")?;
        while !self.eat("}") {
            if self.eat("global") {
                self.global(&mut module)?;
            } else if self.eat("decl") {
                let func = self.function_header(&mut module, false)?;
                if !module.functions[func].is_declaration() {
                    return self.err("declaration after definition");
                }
                self.expect(";")?;
            } else if self.eat("func") {
                let func = self.function_header(&mut module, true)?;
                self.expect("{")?;
                let mut data = std::mem::replace(
                    &mut module.functions[func],
                    FunctionData::new(String::new(), Signature {
                        params: Vec::new(),
                        ret: Ty::Void,
                        variadic: false,
                    }),
                );
                self.body(&mut data)?;
                module.functions[func] = data;
            } else if self.eof() {
                return self.err("unexpected end of input, expected `}`");
            } else {
                return self.err("expected `global`, `decl` or `func`");
            }
        }
        Ok(module)
    }
}

impl Module {
    pub fn parse(src: &str) -> Result<Module, ParseError> {
        Parser::new(src)?.module()
    }
}
