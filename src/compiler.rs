use super::{
    chunk::{Chunk, OpCode},
    reporter::{Context, Phase, Report, Reporter},
    table::Table,
    token::{Token, TokenType, BOUNDARIES},
    tokenizer::Tokenizer,
    value::Value,
};

/// A local variable occupies one operand-stack slot, so one byte of
/// operand bounds how many can be live at once.
pub const LOCALS_MAX: usize = 256;

const JUMP_MAX: usize = u16::MAX as usize;

/// Binding strength, weakest first. The discriminant order drives the
/// comparisons in `parse_precedence`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn stronger(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Call,
            Self::Call | Self::Primary => Self::Primary,
        }
    }
}

type ParseFn<'a, 'r> = fn(&mut Compiler<'a, 'r>, bool);

#[derive(Clone, Copy)]
struct ParseRule<'a, 'r> {
    prefix: Option<ParseFn<'a, 'r>>,
    infix: Option<ParseFn<'a, 'r>>,
    precedence: Precedence,
}

struct Parser<'a> {
    current: Token<'a>,
    previous: Token<'a>,
    had_error: bool,
    panic_mode: bool,
}

struct Local<'a> {
    name: Token<'a>,
    /// `None` from declaration until the initializer has run, so the
    /// initializer cannot read the variable it is defining.
    depth: Option<usize>,
}

pub struct Compiler<'a, 'r> {
    tokenizer: Tokenizer<'a>,
    parser: Parser<'a>,
    chunk: Chunk,
    locals: Vec<Local<'a>>,
    scope_depth: usize,
    strings: &'r mut Table,
    reporter: &'r mut dyn Reporter,
}

impl<'a, 'r> Compiler<'a, 'r> {
    pub fn new(source: &'a str, strings: &'r mut Table, reporter: &'r mut dyn Reporter) -> Self {
        Self {
            tokenizer: Tokenizer::new(source),
            parser: Parser {
                current: Token::new_empty(),
                previous: Token::new_empty(),
                had_error: false,
                panic_mode: false,
            },
            chunk: Chunk::new(),
            locals: Vec::with_capacity(LOCALS_MAX),
            scope_depth: 0,
            strings,
            reporter,
        }
    }

    pub fn compile(mut self) -> Result<Chunk, ()> {
        self.advance();
        while !self.matches(TokenType::Eof) {
            self.declaration();
        }
        self.emit_op(OpCode::Return);

        if self.parser.had_error {
            Err(())
        } else {
            Ok(self.chunk)
        }
    }

    //>> Error reporting
    fn error_at(&mut self, token: Token<'a>, msg: &str) {
        if self.parser.panic_mode {
            return;
        }
        self.parser.panic_mode = true;
        self.parser.had_error = true;

        let context = match token.typ {
            TokenType::Eof => Context::AtEnd,
            TokenType::Error => Context::None,
            _ => Context::At(token.lexeme.to_string()),
        };
        self.reporter
            .error(Report::new(Phase::Compile, msg.to_string(), token.line, context));
    }

    fn error(&mut self, msg: &str) {
        self.error_at(self.parser.previous, msg);
    }

    fn error_at_current(&mut self, msg: &str) {
        self.error_at(self.parser.current, msg);
    }
    //<<

    //>> Token stream
    fn advance(&mut self) {
        self.parser.previous = self.parser.current;

        loop {
            self.parser.current = self.tokenizer.next_token();
            if self.parser.current.typ != TokenType::Error {
                break;
            }
            let msg = self.parser.current.lexeme;
            self.error_at_current(msg);
        }
    }

    fn consume(&mut self, typ: TokenType, msg: &str) {
        if self.parser.current.typ == typ {
            self.advance();
        } else {
            self.error_at_current(msg);
        }
    }

    fn check(&self, typ: TokenType) -> bool {
        self.parser.current.typ == typ
    }

    fn matches(&mut self, typ: TokenType) -> bool {
        if !self.check(typ) {
            return false;
        }
        self.advance();
        true
    }

    fn synchronize(&mut self) {
        self.parser.panic_mode = false;

        while self.parser.current.typ != TokenType::Eof {
            if self.parser.previous.typ == TokenType::Semicolon {
                return;
            }
            if BOUNDARIES.contains(&self.parser.current.typ) {
                return;
            }
            self.advance();
        }
    }
    //<<

    //>> Emission
    fn emit_byte(&mut self, byte: u8) {
        let line = self.parser.previous.line;
        self.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_op_at(&mut self, op: OpCode, line: usize) {
        self.chunk.write_op(op, line);
    }

    /// Emits a jump with a placeholder operand and returns the operand's
    /// offset for `patch_jump`.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk.len() - 2
    }

    fn patch_jump(&mut self, at: usize) {
        // the jump lands relative to the byte after the two-byte operand
        let jump = self.chunk.len() - at - 2;
        if jump > JUMP_MAX {
            self.error("too much code to jump over");
            return;
        }
        self.chunk.patch(at, jump as u16);
    }

    fn emit_loop(&mut self, start: usize) {
        self.emit_op(OpCode::Loop);

        let jump = self.chunk.len() - start + 2;
        if jump > JUMP_MAX {
            self.error("loop body too large");
        }

        self.emit_byte((jump >> 8) as u8);
        self.emit_byte(jump as u8);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.chunk.add_constant(value);
        if index > u8::MAX as usize {
            self.error("too many constants in one chunk");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(index);
    }
    //<<

    //>> Expressions
    fn rule(typ: TokenType) -> ParseRule<'a, 'r> {
        use TokenType::*;

        let (prefix, infix, precedence): (
            Option<ParseFn<'a, 'r>>,
            Option<ParseFn<'a, 'r>>,
            Precedence,
        ) = match typ {
            OParen => (Some(Self::grouping), None, Precedence::None),
            Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            Plus => (None, Some(Self::binary), Precedence::Term),
            Slash | Star => (None, Some(Self::binary), Precedence::Factor),
            Bang => (Some(Self::unary), None, Precedence::None),
            BangEqual | DEqual => (None, Some(Self::binary), Precedence::Equality),
            Greater | GreaterEqual | Less | LessEqual => {
                (None, Some(Self::binary), Precedence::Comparison)
            }
            Identifier => (Some(Self::variable), None, Precedence::None),
            String => (Some(Self::string), None, Precedence::None),
            Number => (Some(Self::number), None, Precedence::None),
            And => (None, Some(Self::and), Precedence::And),
            Or => (None, Some(Self::or), Precedence::Or),
            Nil | True | False => (Some(Self::literal), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };

        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let prefix = match Self::rule(self.parser.previous.typ).prefix {
            Some(rule) => rule,
            None => {
                self.error("expected an expression");
                return;
            }
        };

        // assignment only binds at statement-expression level; operands
        // parsed at higher precedence must refuse a trailing '='
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.parser.current.typ).precedence {
            self.advance();
            if let Some(infix) = Self::rule(self.parser.previous.typ).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.matches(TokenType::Equal) {
            self.error("invalid assignment target");
            self.expression();
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.parser.previous.lexeme.parse().unwrap();
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.parser.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        let string = self.strings.intern(content);
        self.emit_constant(Value::Str(string));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.parser.previous.typ {
            TokenType::Nil => self.emit_op(OpCode::Nil),
            TokenType::True => self.emit_op(OpCode::True),
            TokenType::False => self.emit_op(OpCode::False),
            _ => unreachable!(),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenType::CParen, "expected ')' after expression");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.parser.previous;

        self.parse_precedence(Precedence::Unary);

        match operator.typ {
            TokenType::Bang => self.emit_op_at(OpCode::Not, operator.line),
            TokenType::Minus => self.emit_op_at(OpCode::Negate, operator.line),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.parser.previous;

        // one step stronger makes the operator left-associative
        let rule = Self::rule(operator.typ);
        self.parse_precedence(rule.precedence.stronger());

        match operator.typ {
            TokenType::Plus => self.emit_op_at(OpCode::Add, operator.line),
            TokenType::Minus => self.emit_op_at(OpCode::Subtract, operator.line),
            TokenType::Star => self.emit_op_at(OpCode::Multiply, operator.line),
            TokenType::Slash => self.emit_op_at(OpCode::Divide, operator.line),
            TokenType::DEqual => self.emit_op_at(OpCode::Equal, operator.line),
            TokenType::BangEqual => {
                self.emit_op_at(OpCode::Equal, operator.line);
                self.emit_op_at(OpCode::Not, operator.line);
            }
            TokenType::Greater => self.emit_op_at(OpCode::Greater, operator.line),
            TokenType::GreaterEqual => {
                self.emit_op_at(OpCode::Less, operator.line);
                self.emit_op_at(OpCode::Not, operator.line);
            }
            TokenType::Less => self.emit_op_at(OpCode::Less, operator.line),
            TokenType::LessEqual => {
                self.emit_op_at(OpCode::Greater, operator.line);
                self.emit_op_at(OpCode::Not, operator.line);
            }
            _ => unreachable!(),
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.parser.previous;

        let (get_op, set_op, arg) = match self.resolve_local(name) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot as u8),
            None => {
                let index = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, index)
            }
        };

        if can_assign && self.matches(TokenType::Equal) {
            self.expression();
            self.emit_op(set_op);
        } else {
            self.emit_op(get_op);
        }
        self.emit_byte(arg);
    }

    fn resolve_local(&mut self, name: Token<'a>) -> Option<usize> {
        let mut found = None;
        for (slot, local) in self.locals.iter().enumerate().rev() {
            if local.name.lexeme == name.lexeme {
                found = Some((slot, local.depth.is_none()));
                break;
            }
        }

        let (slot, uninitialized) = found?;
        if uninitialized {
            self.error("local variable referenced before initialization");
        }
        Some(slot)
    }

    fn identifier_constant(&mut self, name: Token<'a>) -> u8 {
        let string = self.strings.intern(name.lexeme);
        self.make_constant(Value::Str(string))
    }
    //<<

    //>> Declarations and statements
    fn declaration(&mut self) {
        if self.matches(TokenType::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("expected variable name");

        if self.matches(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenType::Semicolon,
            "expected ';' after variable declaration",
        );

        self.define_variable(global);
    }

    /// Consumes the name. Locals are recorded in the slot stack and need
    /// no constant; globals get their name interned into the pool.
    fn parse_variable(&mut self, msg: &str) -> u8 {
        self.consume(TokenType::Identifier, msg);

        self.declare_variable();
        if self.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.parser.previous)
    }

    fn declare_variable(&mut self) {
        if self.scope_depth == 0 {
            return;
        }

        let name = self.parser.previous;
        let mut duplicate = false;
        for local in self.locals.iter().rev() {
            if let Some(depth) = local.depth {
                if depth < self.scope_depth {
                    break;
                }
            }
            if local.name.lexeme == name.lexeme {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("variable with this name already declared in this scope");
        }

        self.add_local(name);
    }

    fn add_local(&mut self, name: Token<'a>) {
        if self.locals.len() == LOCALS_MAX {
            self.error("too many local variables in function");
            return;
        }
        self.locals.push(Local { name, depth: None });
    }

    fn define_variable(&mut self, global: u8) {
        if self.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    fn mark_initialized(&mut self) {
        if let Some(local) = self.locals.last_mut() {
            local.depth = Some(self.scope_depth);
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenType::If) {
            self.if_statement();
        } else if self.matches(TokenType::While) {
            self.while_statement();
        } else if self.matches(TokenType::OBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Pop);
        self.consume(TokenType::Semicolon, "expected ';' after expression");
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::OParen, "expected '(' after 'if'");
        self.expression();
        self.consume(TokenType::CParen, "expected ')' after condition");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.matches(TokenType::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let start = self.chunk.len();

        self.consume(TokenType::OParen, "expected a '(' after 'while'");
        self.expression();
        self.consume(TokenType::CParen, "expected a ')' after condition");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn block(&mut self) {
        while !self.check(TokenType::CBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::CBrace, "expected '}' after block");
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;

        while self.top_local_out_of_scope() {
            self.emit_op(OpCode::Pop);
            self.locals.pop();
        }
    }

    fn top_local_out_of_scope(&self) -> bool {
        match self.locals.last() {
            Some(local) => match local.depth {
                Some(depth) => depth > self.scope_depth,
                None => false,
            },
            None => false,
        }
    }
    //<<
}
