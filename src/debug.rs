use super::chunk::{Chunk, OpCode};
use std::convert::TryFrom;
use std::fmt::Write;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "== {} ==", name);

    let mut offset = 0;
    while offset < chunk.len() {
        let (text, size) = disassemble_instruction(chunk, offset);
        buffer += &text;
        offset += size;
    }

    buffer
}

/// Renders one instruction and returns how many bytes it occupied.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut buffer = String::new();
    let _ = write!(buffer, "{:04} ", offset);

    // repeat the line column only when the line changes
    let line = chunk.line(offset).unwrap_or(0);
    if offset > 0 && chunk.line(offset - 1) == Some(line) {
        buffer += "   | ";
    } else {
        let _ = write!(buffer, "{:4} ", line);
    }

    let byte = match chunk.byte(offset) {
        Some(byte) => byte,
        None => {
            buffer += "<end of chunk>\n";
            return (buffer, 1);
        }
    };

    let op = match OpCode::try_from(byte) {
        Ok(op) => op,
        Err(_) => {
            let _ = writeln!(buffer, "unknown opcode {}", byte);
            return (buffer, 1);
        }
    };

    let size = match op {
        OpCode::Constant | OpCode::DefineGlobal | OpCode::GetGlobal | OpCode::SetGlobal => {
            let index = chunk.byte(offset + 1).unwrap_or(0) as usize;
            let _ = write!(buffer, "{:<16} {:4}", mnemonic(op), index);
            match chunk.constant(index) {
                Some(value) => {
                    let _ = writeln!(buffer, " ({})", value);
                }
                None => {
                    buffer += " (?)\n";
                }
            }
            2
        }
        OpCode::GetLocal | OpCode::SetLocal => {
            let slot = chunk.byte(offset + 1).unwrap_or(0);
            let _ = writeln!(buffer, "{:<16} {:4}", mnemonic(op), slot);
            2
        }
        OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => {
            let jump = chunk.short(offset + 1).unwrap_or(0);
            let _ = writeln!(buffer, "{:<16} {:4}", mnemonic(op), jump);
            3
        }
        _ => {
            let _ = writeln!(buffer, "{}", mnemonic(op));
            1
        }
    };

    (buffer, size)
}

pub fn mnemonic(op: OpCode) -> &'static str {
    match op {
        OpCode::Constant => "CONSTANT",
        OpCode::Nil => "NIL",
        OpCode::True => "TRUE",
        OpCode::False => "FALSE",
        OpCode::Pop => "POP",
        OpCode::GetLocal => "GET_LOCAL",
        OpCode::SetLocal => "SET_LOCAL",
        OpCode::DefineGlobal => "DEFINE_GLOBAL",
        OpCode::GetGlobal => "GET_GLOBAL",
        OpCode::SetGlobal => "SET_GLOBAL",
        OpCode::Equal => "EQUAL",
        OpCode::Greater => "GREATER",
        OpCode::Less => "LESS",
        OpCode::Add => "ADD",
        OpCode::Subtract => "SUBTRACT",
        OpCode::Multiply => "MULTIPLY",
        OpCode::Divide => "DIVIDE",
        OpCode::Not => "NOT",
        OpCode::Negate => "NEGATE",
        OpCode::Jump => "JUMP",
        OpCode::JumpIfFalse => "JUMP_IF_FALSE",
        OpCode::Loop => "LOOP",
        OpCode::Return => "RETURN",
    }
}

#[cfg(test)]
mod tests {
    use super::{disassemble_chunk, disassemble_instruction, mnemonic};
    use crate::chunk::{Chunk, OpCode};
    use crate::value::Value;
    use std::convert::TryFrom;

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Number(1.2));
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(index as u8, 1);
        chunk.write_op(OpCode::Negate, 1);
        chunk.write_op(OpCode::Return, 2);
        chunk
    }

    #[test]
    fn formats_offsets_lines_and_operands() {
        let text = disassemble_chunk(&sample_chunk(), "sample");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "== sample ==");
        assert_eq!(lines[1], "0000    1 CONSTANT            0 (1.2)");
        assert_eq!(lines[2], "0002    | NEGATE");
        assert_eq!(lines[3], "0003    2 RETURN");
    }

    #[test]
    fn reports_instruction_sizes() {
        let chunk = sample_chunk();
        assert_eq!(disassemble_instruction(&chunk, 0).1, 2);
        assert_eq!(disassemble_instruction(&chunk, 2).1, 1);

        let mut jumpy = Chunk::new();
        jumpy.write_op(OpCode::Jump, 1);
        jumpy.write(0x01, 1);
        jumpy.write(0x00, 1);
        let (text, size) = disassemble_instruction(&jumpy, 0);
        assert_eq!(size, 3);
        assert!(text.contains("JUMP"));
        assert!(text.contains("256"));
    }

    /// Walks a disassembly listing and rebuilds the opcode sequence from
    /// the mnemonic column.
    pub fn reassemble(listing: &str) -> Vec<OpCode> {
        let all_ops: Vec<OpCode> = (0..=22u8)
            .map(|byte| OpCode::try_from(byte).unwrap())
            .collect();

        listing
            .lines()
            .filter(|line| !line.starts_with("=="))
            .map(|line| {
                // offset and line columns are fixed-width
                let name = line[10..].split_whitespace().next().unwrap();
                *all_ops
                    .iter()
                    .find(|op| mnemonic(**op) == name)
                    .unwrap_or_else(|| panic!("unknown mnemonic {}", name))
            })
            .collect()
    }

    fn decode(chunk: &Chunk) -> Vec<OpCode> {
        let mut ops = Vec::new();
        let mut offset = 0;
        while let Some(byte) = chunk.byte(offset) {
            let op = OpCode::try_from(byte).unwrap();
            ops.push(op);
            offset += match op {
                OpCode::Constant
                | OpCode::DefineGlobal
                | OpCode::GetGlobal
                | OpCode::SetGlobal
                | OpCode::GetLocal
                | OpCode::SetLocal => 2,
                OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => 3,
                _ => 1,
            };
        }
        ops
    }

    #[test]
    fn listing_round_trips_to_the_opcode_sequence() {
        let chunk = sample_chunk();
        let listing = disassemble_chunk(&chunk, "sample");
        assert_eq!(reassemble(&listing), decode(&chunk));
    }

    #[test]
    fn compiled_chunks_round_trip_too() {
        use crate::compiler::Compiler;
        use crate::reporter::ErrorsTracker;
        use crate::table::Table;

        let source = "var total = 0;\n\
                      {\n\
                          var i = 0;\n\
                          while (i < 10) {\n\
                              if (i == 3 or i == 5) {\n\
                                  total = total + i;\n\
                              } else {\n\
                                  total = total - 1;\n\
                              }\n\
                              i = i + 1;\n\
                          }\n\
                      }\n\
                      total = -total and \"done\" + \"!\" != nil;\n";

        let mut strings = Table::new();
        let mut tracker = ErrorsTracker::new();
        let chunk = Compiler::new(source, &mut strings, &mut tracker)
            .compile()
            .unwrap();

        let listing = disassemble_chunk(&chunk, "script");
        assert_eq!(reassemble(&listing), decode(&chunk));
    }
}
