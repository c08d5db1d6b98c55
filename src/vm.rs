use super::{
    chunk::{Chunk, OpCode},
    compiler::Compiler,
    debug,
    reporter::{Context, Phase, Report, Reporter},
    table::Table,
    value::{ObjString, Value},
};
use std::convert::TryFrom;
use std::rc::Rc;

/// The compiler's slot and pool limits bound every stack excursion, so
/// this capacity is reserved up front and never reallocated in practice.
pub const STACK_MAX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    Compile,
    Runtime,
}

pub struct Vm {
    stack: Vec<Value>,
    globals: Table,
    strings: Table,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            strings: Table::new(),
        }
    }

    /// Compiles the source into a fresh chunk and runs it to completion.
    /// The chunk is released on the way out either way.
    pub fn interpret(
        &mut self,
        source: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<(), InterpretError> {
        let chunk = Compiler::new(source, &mut self.strings, reporter)
            .compile()
            .map_err(|_| InterpretError::Compile)?;

        if cfg!(feature = "debug-bytecode") {
            print!("{}", debug::disassemble_chunk(&chunk, "code"));
        }

        self.run(&chunk, reporter)
            .map_err(|_| InterpretError::Runtime)
    }

    //>> Stack manipulation
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap()
    }

    fn last(&self) -> Value {
        self.stack.last().unwrap().clone()
    }

    fn get(&self, idx: usize) -> Value {
        self.stack.get(idx).unwrap().clone()
    }
    //<<

    //>> Operand decoding
    fn read_byte(chunk: &Chunk, ip: &mut usize) -> u8 {
        let byte = chunk.byte(*ip).unwrap();
        *ip += 1;
        byte
    }

    fn read_short(chunk: &Chunk, ip: &mut usize) -> u16 {
        let short = chunk.short(*ip).unwrap();
        *ip += 2;
        short
    }

    fn read_constant<'c>(chunk: &'c Chunk, ip: &mut usize) -> &'c Value {
        let index = Self::read_byte(chunk, ip) as usize;
        chunk.constant(index).unwrap()
    }

    fn read_string(chunk: &Chunk, ip: &mut usize) -> Rc<ObjString> {
        match Self::read_constant(chunk, ip) {
            Value::Str(string) => Rc::clone(string),
            _ => unreachable!(),
        }
    }
    //<<

    fn runtime_error(
        &mut self,
        chunk: &Chunk,
        ip: usize,
        msg: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<(), ()> {
        let line = chunk.line(ip - 1).unwrap_or(0);
        reporter.error(Report::new(
            Phase::Runtime,
            msg.to_string(),
            line,
            Context::None,
        ));
        self.stack.clear();
        Err(())
    }

    fn binary_op(
        &mut self,
        chunk: &Chunk,
        ip: usize,
        reporter: &mut dyn Reporter,
        op: fn(f64, f64) -> Value,
    ) -> Result<(), ()> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(op(a, b));
                Ok(())
            }
            _ => self.runtime_error(chunk, ip, "operands must be numbers", reporter),
        }
    }

    fn concat(&mut self, a: &ObjString, b: &ObjString) -> Value {
        let mut chars = String::with_capacity(a.len() + b.len());
        chars += a.as_str();
        chars += b.as_str();
        Value::Str(self.strings.intern(&chars))
    }

    pub fn run(&mut self, chunk: &Chunk, reporter: &mut dyn Reporter) -> Result<(), ()> {
        let mut ip = 0;

        while let Some(byte) = chunk.byte(ip) {
            if cfg!(feature = "debug-execution") {
                print!("          ");
                for value in self.stack.iter() {
                    print!("[ {} ]", value);
                }
                println!();
                print!("{}", debug::disassemble_instruction(chunk, ip).0);
            }

            ip += 1;
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(()) => return self.runtime_error(chunk, ip, "unknown opcode", reporter),
            };

            match op {
                OpCode::Constant => {
                    let value = Self::read_constant(chunk, &mut ip).clone();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = Self::read_byte(chunk, &mut ip) as usize;
                    self.push(self.get(slot));
                }
                OpCode::SetLocal => {
                    // assignment is an expression, the value stays on top
                    let slot = Self::read_byte(chunk, &mut ip) as usize;
                    self.stack[slot] = self.last();
                }
                OpCode::DefineGlobal => {
                    let name = Self::read_string(chunk, &mut ip);
                    let value = self.last();
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::GetGlobal => {
                    let name = Self::read_string(chunk, &mut ip);
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => {
                            let msg = format!("undefined variable '{}'", name);
                            return self.runtime_error(chunk, ip, &msg, reporter);
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = Self::read_string(chunk, &mut ip);
                    let value = self.last();
                    if self.globals.set(Rc::clone(&name), value) {
                        // assignment must not create the binding
                        self.globals.delete(&name);
                        let msg = format!("undefined variable '{}'", name);
                        return self.runtime_error(chunk, ip, &msg, reporter);
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => {
                    self.binary_op(chunk, ip, reporter, |a, b| Value::Bool(a > b))?
                }
                OpCode::Less => self.binary_op(chunk, ip, reporter, |a, b| Value::Bool(a < b))?,
                OpCode::Add => {
                    let b = self.pop();
                    let a = self.pop();
                    match (&a, &b) {
                        (Value::Number(a), Value::Number(b)) => self.push(Value::Number(a + b)),
                        (Value::Str(a), Value::Str(b)) => {
                            let value = self.concat(a, b);
                            self.push(value);
                        }
                        _ => {
                            return self.runtime_error(
                                chunk,
                                ip,
                                "operands must be two numbers or two strings",
                                reporter,
                            )
                        }
                    }
                }
                OpCode::Subtract => {
                    self.binary_op(chunk, ip, reporter, |a, b| Value::Number(a - b))?
                }
                OpCode::Multiply => {
                    self.binary_op(chunk, ip, reporter, |a, b| Value::Number(a * b))?
                }
                OpCode::Divide => {
                    self.binary_op(chunk, ip, reporter, |a, b| Value::Number(a / b))?
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsy()));
                }
                OpCode::Negate => match self.pop() {
                    Value::Number(n) => self.push(Value::Number(-n)),
                    _ => {
                        return self.runtime_error(chunk, ip, "operand must be a number", reporter)
                    }
                },
                OpCode::Jump => {
                    let offset = Self::read_short(chunk, &mut ip) as usize;
                    ip += offset;
                }
                OpCode::JumpIfFalse => {
                    // peeks so the short-circuit operators can keep the value
                    let offset = Self::read_short(chunk, &mut ip) as usize;
                    if self.last().is_falsy() {
                        ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = Self::read_short(chunk, &mut ip) as usize;
                    ip -= offset;
                }
                OpCode::Return => {
                    // a chunk assembled by hand may end with its result on
                    // the stack; compiled statements leave nothing behind
                    if let Some(value) = self.stack.pop() {
                        println!("{}", value);
                    }
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{InterpretError, Vm};
    use crate::chunk::{Chunk, OpCode};
    use crate::reporter::{ErrorsTracker, Phase};
    use crate::value::{hash_str, Value};
    use std::rc::Rc;

    fn run(vm: &mut Vm, source: &str) -> Result<(), InterpretError> {
        let mut tracker = ErrorsTracker::new();
        vm.interpret(source, &mut tracker)
    }

    fn run_expecting_error(vm: &mut Vm, source: &str) -> (InterpretError, String, usize) {
        let mut tracker = ErrorsTracker::new();
        let error = vm.interpret(source, &mut tracker).unwrap_err();
        let report = tracker.reports.pop().unwrap();
        (error, report.msg, report.line)
    }

    fn global(vm: &mut Vm, name: &str) -> Option<Value> {
        let key = vm.strings.intern(name);
        vm.globals.get(&key).cloned()
    }

    #[test]
    fn arithmetic_and_balance() {
        let mut vm = Vm::new();
        assert!(run(&mut vm, "var result = (1 + 2) * 3 - -4;").is_ok());
        assert_eq!(global(&mut vm, "result"), Some(Value::Number(13.0)));
        // every statement leaves the stack where it found it
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn globals_define_get_set() {
        let mut vm = Vm::new();
        assert!(run(&mut vm, "var a = 1; var b; b = a + 1; a = b + a;").is_ok());
        assert_eq!(global(&mut vm, "a"), Some(Value::Number(3.0)));
        assert_eq!(global(&mut vm, "b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn globals_survive_between_interpret_calls() {
        let mut vm = Vm::new();
        assert!(run(&mut vm, "var count = 1;").is_ok());
        assert!(run(&mut vm, "count = count + 1;").is_ok());
        assert_eq!(global(&mut vm, "count"), Some(Value::Number(2.0)));
    }

    #[test]
    fn undefined_globals() {
        let mut vm = Vm::new();
        let (error, msg, _) = run_expecting_error(&mut vm, "missing;");
        assert_eq!(error, InterpretError::Runtime);
        assert_eq!(msg, "undefined variable 'missing'");

        // failed assignment must not create the binding
        let mut vm = Vm::new();
        let (_, msg, _) = run_expecting_error(&mut vm, "ghost = 1;");
        assert_eq!(msg, "undefined variable 'ghost'");
        assert_eq!(global(&mut vm, "ghost"), None);
    }

    #[test]
    fn locals_live_on_the_stack() {
        let mut vm = Vm::new();
        let source = "var outer; { var a = 2; var b = 3; { var c = a * b; outer = c; } }";
        assert!(run(&mut vm, source).is_ok());
        assert_eq!(global(&mut vm, "outer"), Some(Value::Number(6.0)));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn type_errors() {
        let cases = [
            ("1 < \"one\";", "operands must be numbers"),
            ("-\"one\";", "operand must be a number"),
            ("\"one\" + 1;", "operands must be two numbers or two strings"),
            ("nil + nil;", "operands must be two numbers or two strings"),
        ];
        for (source, expected) in cases {
            let mut vm = Vm::new();
            let (error, msg, _) = run_expecting_error(&mut vm, source);
            assert_eq!(error, InterpretError::Runtime, "{}", source);
            assert_eq!(msg, expected, "{}", source);
            assert!(vm.stack.is_empty(), "stack not cleared after {}", source);
        }
    }

    #[test]
    fn adding_one_to_nil_is_a_type_error() {
        let mut vm = Vm::new();
        let (error, msg, _) = run_expecting_error(&mut vm, "var a; a = a + 1;");
        assert_eq!(error, InterpretError::Runtime);
        assert_eq!(msg, "operands must be two numbers or two strings");
    }

    #[test]
    fn runtime_errors_name_the_offending_line() {
        let mut vm = Vm::new();
        let (_, msg, line) = run_expecting_error(&mut vm, "var a = 1;\nvar b = nil;\na + b;");
        assert_eq!(msg, "operands must be two numbers or two strings");
        assert_eq!(line, 3);
    }

    #[test]
    fn equality_follows_value_semantics() {
        let mut vm = Vm::new();
        let source = "var a = 1 == 1; var b = nil == false; var c = \"x\" == \"x\";\
                      var d = 0 == false; var e = 1 != 2;";
        assert!(run(&mut vm, source).is_ok());
        assert_eq!(global(&mut vm, "a"), Some(Value::Bool(true)));
        assert_eq!(global(&mut vm, "b"), Some(Value::Bool(false)));
        assert_eq!(global(&mut vm, "c"), Some(Value::Bool(true)));
        assert_eq!(global(&mut vm, "d"), Some(Value::Bool(false)));
        assert_eq!(global(&mut vm, "e"), Some(Value::Bool(true)));
    }

    #[test]
    fn only_nil_and_false_are_falsy() {
        let mut vm = Vm::new();
        let source = "var a; var b; var c; var d;\
                      if (0) a = 1; else a = 2;\
                      if (\"\") b = 1; else b = 2;\
                      if (nil) c = 1; else c = 2;\
                      if (false) d = 1; else d = 2;";
        assert!(run(&mut vm, source).is_ok());
        assert_eq!(global(&mut vm, "a"), Some(Value::Number(1.0)));
        assert_eq!(global(&mut vm, "b"), Some(Value::Number(1.0)));
        assert_eq!(global(&mut vm, "c"), Some(Value::Number(2.0)));
        assert_eq!(global(&mut vm, "d"), Some(Value::Number(2.0)));
    }

    #[test]
    fn short_circuits_skip_the_right_operand() {
        let mut vm = Vm::new();
        let source = "var a = false and missing; var b = true or missing;\
                      var c = 1 and 2; var d = nil or 3;";
        assert!(run(&mut vm, source).is_ok(), "skipped operands must not run");
        assert_eq!(global(&mut vm, "a"), Some(Value::Bool(false)));
        assert_eq!(global(&mut vm, "b"), Some(Value::Bool(true)));
        assert_eq!(global(&mut vm, "c"), Some(Value::Number(2.0)));
        assert_eq!(global(&mut vm, "d"), Some(Value::Number(3.0)));
    }

    #[test]
    fn while_loops_terminate_with_the_condition() {
        let mut vm = Vm::new();
        assert!(run(&mut vm, "var i = 0; while (i < 3) { i = i + 1; }").is_ok());
        assert_eq!(global(&mut vm, "i"), Some(Value::Number(3.0)));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn concatenation_interns_the_result() {
        let mut vm = Vm::new();
        let source = "var joined = \"foo\" + \"bar\"; var same = joined == \"foobar\";";
        assert!(run(&mut vm, source).is_ok());
        assert_eq!(global(&mut vm, "same"), Some(Value::Bool(true)));

        match global(&mut vm, "joined") {
            Some(Value::Str(joined)) => {
                let resident = vm
                    .strings
                    .find_string("foobar", hash_str("foobar"))
                    .unwrap();
                assert!(Rc::ptr_eq(&joined, &resident));
            }
            other => panic!("expected a string, got {:?}", other),
        }
    }

    #[test]
    fn hand_assembled_chunks_leave_their_result_on_the_stack() {
        let mut vm = Vm::new();
        let mut chunk = Chunk::new();

        let foo = vm.strings.intern("foo");
        let bar = vm.strings.intern("bar");
        let index = chunk.add_constant(Value::Str(foo));
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(index as u8, 1);
        let index = chunk.add_constant(Value::Str(bar));
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(index as u8, 1);
        chunk.write_op(OpCode::Add, 1);

        let mut tracker = ErrorsTracker::new();
        assert!(vm.run(&chunk, &mut tracker).is_ok());

        assert_eq!(vm.stack.len(), 1);
        match &vm.stack[0] {
            Value::Str(result) => {
                assert_eq!(result.as_str(), "foobar");
                let resident = vm
                    .strings
                    .find_string("foobar", hash_str("foobar"))
                    .unwrap();
                assert!(Rc::ptr_eq(result, &resident));
            }
            other => panic!("expected a string, got {:?}", other),
        }

        // a trailing return prints the leftover value and halts
        chunk.write_op(OpCode::Return, 1);
        vm.stack.clear();
        assert!(vm.run(&chunk, &mut tracker).is_ok());
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn compile_errors_never_execute() {
        let mut vm = Vm::new();
        let mut tracker = ErrorsTracker::new();
        let error = vm.interpret("var a = ;", &mut tracker).unwrap_err();
        assert_eq!(error, InterpretError::Compile);
        assert_eq!(tracker.reports[0].phase, Phase::Compile);
        assert_eq!(global(&mut vm, "a"), None);
    }

    #[test]
    fn dropping_the_vm_releases_every_interned_string() {
        let weak = {
            let mut vm = Vm::new();
            assert!(run(&mut vm, "var greeting = \"hello\" + \"there\";").is_ok());
            let resident = vm
                .strings
                .find_string("hellothere", hash_str("hellothere"))
                .unwrap();
            Rc::downgrade(&resident)
        };
        assert!(weak.upgrade().is_none());
    }
}
