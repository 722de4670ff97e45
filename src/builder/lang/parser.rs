/// A combined recursive-descent parser and `IrBuilder` visitor for the
/// small concrete syntax this crate accepts. There is no separate AST
/// stage: a grammar this small doesn't earn the indirection, so each
/// production calls straight into `IrBuilder` as it recognizes the
/// construct, the way a one-pass visitor would.
///
/// Accepted top-level syntax (informally):
///
/// ```text
/// const NAME = expr ;
/// isa NAME { item* }
/// ```
///
/// and, inside an `isa` block:
///
/// ```text
/// bundle NAME { ( slot NAME [ int (, int)* ] ; | bundle NAME ; )* }
/// slot NAME ( < formal (, formal)* > )? ( : base (( expr (, expr)* ))? (, base (...)? )* )? {
///     ( const NAME = expr ;
///     | opcode NAME ( pred : name , src : name (, ...) , dst : name [ expr ] (, ...) ) {
///           disasm : "text" ;
///           semfunc : "code" ;
///           ( use | acquire ) NAME [ expr , expr ] ;
///           attribute NAME ( = expr )? ;
///       }
///     | override NAME { ... same opcode body ... }
///     | delete NAME ;
///     | generate ( NAME = { tok (, tok)* } (, NAME = { tok (, tok)* })* ) opcode $ { template } ;
///     )*
/// }
/// ```
use crate::common::source::Span;
use crate::ir::expr::{BinaryOp, Expr};
use crate::ir::instruction::{DisasmFormat, DisasmFragment, Instruction};
use crate::ir::opcode::DestinationOperand;
use crate::ir::slot::SlotHandle;

use crate::builder::generate::RangeAssignment;
use super::lexer::{Lexer, Token, TokenKind};
use crate::builder::{BuilderError, IrBuilder};

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    builder: &'a mut IrBuilder,
}

pub(crate) type PResult<T> = Result<T, BuilderError>;

impl<'a> Parser<'a> {
    pub fn new(builder: &'a mut IrBuilder, source: &str, file_id: u32) -> Self {
        Self { tokens: Lexer::new(source, file_id).tokenize(), pos: 0, builder }
    }

    /// Entry point: parse and apply every top-level item in the source
    /// given to `new`.
    pub fn parse_program(&mut self) -> PResult<()> {
        while !self.at_eof() {
            self.parse_top_level_item()?;
        }
        Ok(())
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.bump().kind {
            TokenKind::Ident(s) => Ok(s),
            other => Err(BuilderError::Parse(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect_punct(&mut self, c: char) -> PResult<()> {
        match self.bump().kind {
            TokenKind::Punct(p) if p == c => Ok(()),
            other => Err(BuilderError::Parse(format!("expected '{c}', found {other:?}"))),
        }
    }

    fn at_punct(&self, c: char) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(p) if p == c)
    }

    fn at_ident(&self, s: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(i) if i == s)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.at_punct(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn parse_top_level_item(&mut self) -> PResult<()> {
        if self.at_ident("const") {
            self.parse_global_constant()
        } else if self.at_ident("isa") {
            self.parse_isa()
        } else {
            Err(BuilderError::Parse(format!("unexpected top-level token {:?}", self.peek().kind)))
        }
    }

    fn parse_global_constant(&mut self) -> PResult<()> {
        self.bump(); // const
        let name = self.expect_ident()?;
        self.expect_punct('=')?;
        let span = self.span();
        let expr = self.parse_expr()?;
        self.expect_punct(';')?;
        self.builder.add_global_constant(&name, expr, span)
    }

    fn parse_isa(&mut self) -> PResult<()> {
        self.bump(); // isa
        let name = self.expect_ident()?;
        let mut namespace_chain = vec![name.clone()];
        while self.eat_punct(':') {
            namespace_chain.push(self.expect_ident()?);
        }
        self.builder.begin_isa(&name, namespace_chain);
        self.expect_punct('{')?;
        while !self.at_punct('}') {
            self.parse_isa_item()?;
        }
        self.expect_punct('}')?;
        Ok(())
    }

    fn parse_isa_item(&mut self) -> PResult<()> {
        if self.at_ident("bundle") {
            self.parse_bundle()
        } else if self.at_ident("slot") {
            let handle = self.parse_slot_header()?;
            self.parse_slot_body(&handle)
        } else {
            Err(BuilderError::Parse(format!("unexpected isa-body token {:?}", self.peek().kind)))
        }
    }

    fn parse_bundle(&mut self) -> PResult<()> {
        self.bump(); // bundle
        let name = self.expect_ident()?;
        self.builder.declare_bundle(&name)?;
        self.expect_punct('{')?;
        while !self.at_punct('}') {
            if self.at_ident("slot") {
                self.bump();
                let slot_name = self.expect_ident()?;
                let mut instances = Vec::new();
                if self.eat_punct('[') {
                    loop {
                        if let TokenKind::Int(n) = self.peek().kind {
                            self.bump();
                            instances.push(n as u32);
                        }
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct(']')?;
                }
                self.expect_punct(';')?;
                self.builder.use_slot_in_bundle(&name, &slot_name, instances)?;
            } else if self.at_ident("bundle") {
                self.bump();
                let child = self.expect_ident()?;
                self.expect_punct(';')?;
                self.builder.use_bundle_in_bundle(&name, &child)?;
            } else {
                return Err(BuilderError::Parse(format!("unexpected bundle-body token {:?}", self.peek().kind)));
            }
        }
        self.expect_punct('}')?;
        Ok(())
    }

    fn parse_slot_header(&mut self) -> PResult<SlotHandle> {
        self.bump(); // slot
        let name = self.expect_ident()?;
        let handle = self.builder.declare_slot(&name)?;
        if self.eat_punct('<') {
            loop {
                let formal = self.expect_ident()?;
                handle.borrow_mut().add_template_formal(&formal)?;
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.expect_punct('>')?;
        }
        if self.eat_punct(':') {
            loop {
                let base_name = self.expect_ident()?;
                let args = if self.eat_punct('(') {
                    let mut args = Vec::new();
                    if !self.at_punct(')') {
                        loop {
                            args.push(self.parse_expr_scoped(Some(&handle))?);
                            if !self.eat_punct(',') {
                                break;
                            }
                        }
                    }
                    self.expect_punct(')')?;
                    Some(args)
                } else {
                    None
                };
                self.builder.add_slot_base(&handle, &base_name, args)?;
                if !self.eat_punct(',') {
                    break;
                }
            }
            // Admit every base's instructions before the body is parsed, so
            // `override`/`delete` below see the inherited set (§4.E.4).
            self.builder.inherit_slot(&handle)?;
        }
        Ok(handle)
    }

    fn parse_slot_body(&mut self, slot: &SlotHandle) -> PResult<()> {
        self.expect_punct('{')?;
        while !self.at_punct('}') {
            if self.at_ident("const") {
                self.bump();
                let name = self.expect_ident()?;
                self.expect_punct('=')?;
                let expr = self.parse_expr_scoped(Some(slot))?;
                self.expect_punct(';')?;
                slot.borrow_mut().add_constant(&name, expr)?;
            } else if self.at_ident("opcode") {
                self.bump();
                let inst = self.parse_opcode_body(slot)?;
                slot.borrow_mut().append_instruction(inst)?;
            } else if self.at_ident("override") {
                self.bump();
                let name = self.expect_ident()?;
                let inst = self.parse_override_body(slot, &name)?;
                slot.borrow_mut().remove_instruction(&name);
                slot.borrow_mut().append_instruction(inst)?;
            } else if self.at_ident("delete") {
                self.bump();
                let name = self.expect_ident()?;
                self.expect_punct(';')?;
                slot.borrow_mut().remove_instruction(&name);
            } else if self.at_ident("generate") {
                self.parse_generate(slot)?;
            } else {
                return Err(BuilderError::Parse(format!("unexpected slot-body token {:?}", self.peek().kind)));
            }
        }
        self.expect_punct('}')?;
        Ok(())
    }

    /// `override NAME { ... }` starts from the slot's *own* current
    /// instruction (already admitted by inheritance, see
    /// `IrBuilder::inherit_slot`) rather than the ISA-global opcode by
    /// name: opcode identity is shared across the whole ISA, so reaching
    /// into the global factory would hand back the base's literal opcode
    /// instead of this slot's derived copy.
    fn parse_override_body(&mut self, slot: &SlotHandle, name: &str) -> PResult<Instruction> {
        let mut inst = slot
            .borrow()
            .instructions
            .get(name)
            .cloned()
            .ok_or_else(|| BuilderError::NotFound(format!("opcode {name} in this slot")))?;
        self.expect_punct('{')?;
        self.parse_opcode_items(slot, &mut inst)?;
        self.expect_punct('}')?;
        Ok(inst)
    }

    fn parse_opcode_body(&mut self, slot: &SlotHandle) -> PResult<Instruction> {
        let name = self.expect_ident()?;
        self.expect_punct('(')?;
        let mut predicate_operand = None;
        let mut source_operands = Vec::new();
        let mut destination_operands = Vec::new();
        if !self.at_punct(')') {
            loop {
                let role = self.expect_ident()?;
                self.expect_punct(':')?;
                let operand_name = self.expect_ident()?;
                match role.as_str() {
                    "pred" => predicate_operand = Some(operand_name),
                    "src" => source_operands.push((operand_name, false)),
                    "srclist" => source_operands.push((operand_name, true)),
                    "dst" | "dstlist" => {
                        let is_array = role == "dstlist";
                        let latency_expr = if self.eat_punct(':') {
                            Some(self.parse_expr_scoped(Some(slot))?)
                        } else {
                            None
                        };
                        destination_operands.push(DestinationOperand::new(&operand_name, is_array, latency_expr));
                    }
                    other => return Err(BuilderError::Parse(format!("unknown operand role {other}"))),
                }
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        self.expect_punct(')')?;

        let opcode = {
            let iset = self.builder.isa_mut()?;
            let opcode = iset.opcode_factory.create(&name)?;
            let mut opcode = (*opcode).clone();
            opcode.predicate_operand = predicate_operand;
            opcode.source_operands = source_operands;
            opcode.destination_operands = destination_operands;
            opcode
        };
        let mut inst = Instruction::new(std::rc::Rc::new(opcode));

        self.expect_punct('{')?;
        self.parse_opcode_items(slot, &mut inst)?;
        self.expect_punct('}')?;
        Ok(inst)
    }

    fn parse_opcode_items(&mut self, slot: &SlotHandle, inst: &mut Instruction) -> PResult<()> {
        while !self.at_punct('}') {
            if self.at_ident("disasm") {
                self.bump();
                self.expect_punct(':')?;
                let text = self.expect_string()?;
                self.expect_punct(';')?;
                inst.disasm_format.push(compile_disasm_fragments(&text));
            } else if self.at_ident("semfunc") {
                self.bump();
                self.expect_punct(':')?;
                let code = self.expect_string()?;
                self.expect_punct(';')?;
                inst.semfunc_code = Some(code);
            } else if self.at_ident("use") || self.at_ident("acquire") {
                let is_acquire = self.at_ident("acquire");
                self.bump();
                let resource_name = self.expect_ident()?;
                let is_array = self.eat_punct('*');
                self.expect_punct('[')?;
                let begin = self.parse_expr_scoped(Some(slot))?;
                self.expect_punct(',')?;
                let end = self.parse_expr_scoped(Some(slot))?;
                self.expect_punct(']')?;
                self.expect_punct(';')?;
                let resource = {
                    let iset = self.builder.isa_mut()?;
                    iset.resource_factory.get_or_insert(&resource_name)
                };
                let mut reference = crate::ir::resource::ResourceReference::new(resource, is_array, None);
                reference.begin_expr = Some(begin);
                reference.end_expr = Some(end);
                if is_acquire {
                    inst.resource_acquire.push(reference);
                } else {
                    inst.resource_use.push(reference);
                }
            } else if self.at_ident("dst") {
                // `dst: NAME: expr;` rewrites an existing destination
                // operand's latency in place — the only way an `override`
                // block can change what it inherited, since the opcode
                // parameter list itself is only parsed at `opcode` time.
                self.bump();
                self.expect_punct(':')?;
                let operand_name = self.expect_ident()?;
                self.expect_punct(':')?;
                let expr = self.parse_expr_scoped(Some(slot))?;
                self.expect_punct(';')?;
                let mut opcode = (*inst.opcode).clone();
                let dest = opcode
                    .destination_operands
                    .iter_mut()
                    .find(|d| d.name == operand_name)
                    .ok_or_else(|| BuilderError::NotFound(format!("destination operand {operand_name}")))?;
                dest.latency_expr = Some(expr);
                inst.opcode = std::rc::Rc::new(opcode);
            } else if self.at_ident("attribute") {
                self.bump();
                let name = self.expect_ident()?;
                let expr = if self.eat_punct('=') { Some(self.parse_expr_scoped(Some(slot))?) } else { None };
                self.expect_punct(';')?;
                self.builder.isa_mut()?.record_attribute_name(&name);
                match expr {
                    Some(e) => inst.add_instruction_attribute(&name, e),
                    None => inst.add_instruction_attribute_flag(&name),
                }
            } else {
                return Err(BuilderError::Parse(format!("unexpected opcode-body token {:?}", self.peek().kind)));
            }
        }
        Ok(())
    }

    fn expect_string(&mut self) -> PResult<String> {
        match self.bump().kind {
            TokenKind::Str(s) => Ok(s),
            other => Err(BuilderError::Parse(format!("expected string literal, found {other:?}"))),
        }
    }

    fn parse_generate(&mut self, slot: &SlotHandle) -> PResult<()> {
        self.bump(); // generate
        self.expect_punct('(')?;
        let mut assignments = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect_punct('=')?;
            self.expect_punct('{')?;
            let mut tokens = Vec::new();
            loop {
                match self.bump().kind {
                    TokenKind::Ident(s) => tokens.push(s),
                    TokenKind::Int(n) => tokens.push(n.to_string()),
                    other => return Err(BuilderError::Parse(format!("unexpected token in range list: {other:?}"))),
                }
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.expect_punct('}')?;
            let tokens_ref: Vec<&str> = tokens.iter().map(String::as_str).collect();
            assignments.push(RangeAssignment::from_list(&name, &tokens_ref));
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;
        self.expect_punct_word("opcode")?;
        let template = self.expect_string()?;
        self.expect_punct(';')?;
        self.builder.generate_opcodes(slot, &assignments, &template)
    }

    fn expect_punct_word(&mut self, word: &str) -> PResult<()> {
        if self.at_ident(word) {
            self.bump();
            Ok(())
        } else {
            Err(BuilderError::Parse(format!("expected '{word}', found {:?}", self.peek().kind)))
        }
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_expr_scoped(None)
    }

    fn parse_expr_scoped(&mut self, slot: Option<&SlotHandle>) -> PResult<Expr> {
        self.parse_additive(slot)
    }

    fn parse_additive(&mut self, slot: Option<&SlotHandle>) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative(slot)?;
        loop {
            let op = if self.at_punct('+') {
                BinaryOp::Add
            } else if self.at_punct('-') {
                BinaryOp::Sub
            } else {
                break;
            };
            self.bump();
            let rhs = self.parse_multiplicative(slot)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self, slot: Option<&SlotHandle>) -> PResult<Expr> {
        let mut lhs = self.parse_unary(slot)?;
        loop {
            let op = if self.at_punct('*') {
                BinaryOp::Mul
            } else if self.at_punct('/') {
                BinaryOp::Div
            } else {
                break;
            };
            self.bump();
            let rhs = self.parse_unary(slot)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, slot: Option<&SlotHandle>) -> PResult<Expr> {
        if self.eat_punct('-') {
            return Ok(Expr::Negate(Box::new(self.parse_unary(slot)?)));
        }
        self.parse_primary(slot)
    }

    fn parse_primary(&mut self, slot: Option<&SlotHandle>) -> PResult<Expr> {
        match self.peek().kind.clone() {
            TokenKind::Int(n) => {
                self.bump();
                Ok(Expr::constant(n))
            }
            TokenKind::Punct('(') => {
                self.bump();
                let inner = self.parse_expr_scoped(slot)?;
                self.expect_punct(')')?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                self.bump();
                if self.at_punct('(') {
                    self.bump();
                    let mut args = Vec::new();
                    if !self.at_punct(')') {
                        loop {
                            args.push(self.parse_expr_scoped(slot)?);
                            if !self.eat_punct(',') {
                                break;
                            }
                        }
                    }
                    self.expect_punct(')')?;
                    let f = resolve_builtin(&name)?;
                    Ok(Expr::Function(name.into(), f, args))
                } else {
                    self.builder.resolve_name(slot, &name)
                }
            }
            other => Err(BuilderError::Parse(format!("unexpected token in expression: {other:?}"))),
        }
    }
}

/// Splits a disassembly string literal on `$name` operand markers.
pub fn compile_disasm_fragments(text: &str) -> DisasmFormat {
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(|c| c.is_alphabetic() || *c == '_') {
            if !literal.is_empty() {
                fragments.push(DisasmFragment::Literal(std::mem::take(&mut literal)));
            }
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            fragments.push(DisasmFragment::Operand(name));
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        fragments.push(DisasmFragment::Literal(literal));
    }
    fragments
}

fn resolve_builtin(name: &str) -> PResult<crate::ir::expr::ExprFn> {
    crate::builder::functions::lookup(name).ok_or_else(|| BuilderError::Parse(format!("unknown function: {name}")))
}

/// Parse one `GENERATE()`-expanded declaration string (`"NAME(...) { ... }"`)
/// as if it were a standalone opcode body written directly in the slot.
pub fn parse_opcode_decl_into_slot(builder: &mut IrBuilder, slot: &SlotHandle, decl: &str) -> PResult<()> {
    let mut text = decl.trim().to_string();
    if !text.ends_with(';') {
        text.push(';');
    }
    let mut parser = Parser::new(builder, &format!("opcode {text}"), 0);
    let inst = parser.parse_opcode_body(slot)?;
    slot.borrow_mut().append_instruction(inst)?;
    Ok(())
}
