//! Bytecode generation from lowered conditions.

use super::ast::BinaryOp;
use super::condition::Cond;
use crate::ir::{BytecodeChunk, Opcode, RuleId};

/// Generate the bytecode chunk for one rule condition.
pub(crate) fn generate_bytecode(cond: &Cond, rule_id: RuleId) -> BytecodeChunk {
    let mut opcodes = Vec::new();
    generate_bytecode_recursive(cond, &mut opcodes);
    opcodes.push(Opcode::Return);
    BytecodeChunk::new(rule_id, opcodes)
}

fn generate_bytecode_recursive(cond: &Cond, opcodes: &mut Vec<Opcode>) {
    match cond {
        Cond::Bool(b) => opcodes.push(Opcode::PushBool(*b)),
        Cond::Int(n) => opcodes.push(Opcode::PushInt(*n)),
        Cond::Float(f) => opcodes.push(Opcode::PushFloat(*f)),
        Cond::Str(index) => opcodes.push(Opcode::PushString(*index)),
        Cond::Filesize => opcodes.push(Opcode::Filesize),
        Cond::Global(slot) => opcodes.push(Opcode::Global(*slot)),
        Cond::Rule(rule) => opcodes.push(Opcode::Rule(*rule)),

        Cond::Matched(id) => opcodes.push(Opcode::Matched(*id)),
        Cond::MatchedAt(id, offset) => {
            generate_bytecode_recursive(offset, opcodes);
            opcodes.push(Opcode::MatchedAt(*id));
        }
        Cond::MatchedIn(id, lower, upper) => {
            generate_bytecode_recursive(lower, opcodes);
            generate_bytecode_recursive(upper, opcodes);
            opcodes.push(Opcode::MatchedIn(*id));
        }
        Cond::Count(id) => opcodes.push(Opcode::Count(*id)),
        Cond::CountIn(id, lower, upper) => {
            generate_bytecode_recursive(lower, opcodes);
            generate_bytecode_recursive(upper, opcodes);
            opcodes.push(Opcode::CountIn(*id));
        }
        Cond::Offset(id, index) => {
            generate_bytecode_recursive(index, opcodes);
            opcodes.push(Opcode::Offset(*id));
        }
        Cond::Length(id, index) => {
            generate_bytecode_recursive(index, opcodes);
            opcodes.push(Opcode::Length(*id));
        }
        Cond::ReadInt {
            width,
            signed,
            big_endian,
            offset,
        } => {
            generate_bytecode_recursive(offset, opcodes);
            opcodes.push(Opcode::ReadInt {
                width: *width,
                signed: *signed,
                big_endian: *big_endian,
            });
        }

        Cond::Not(operand) => {
            generate_bytecode_recursive(operand, opcodes);
            opcodes.push(Opcode::Not);
        }
        Cond::And(lhs, rhs) => {
            generate_short_circuit(lhs, rhs, Opcode::JumpIfFalse(0), opcodes);
        }
        Cond::Or(lhs, rhs) => {
            generate_short_circuit(lhs, rhs, Opcode::JumpIfTrue(0), opcodes);
        }
        Cond::Neg(operand) => {
            generate_bytecode_recursive(operand, opcodes);
            opcodes.push(Opcode::Neg);
        }
        Cond::BitNot(operand) => {
            generate_bytecode_recursive(operand, opcodes);
            opcodes.push(Opcode::BitNot);
        }
        Cond::Binary(op, lhs, rhs) => {
            generate_bytecode_recursive(lhs, opcodes);
            generate_bytecode_recursive(rhs, opcodes);
            opcodes.push(binary_opcode(*op));
        }
        Cond::Matches(operand, index) => {
            generate_bytecode_recursive(operand, opcodes);
            opcodes.push(Opcode::Matches(*index));
        }
        Cond::Of(quantifier, items) => {
            for item in items {
                generate_bytecode_recursive(item, opcodes);
            }
            opcodes.push(Opcode::Of {
                quantifier: *quantifier,
                count: items.len() as u32,
            });
        }
    }
}

/// `<lhs> JumpIf*(n) <rhs> ToBool`, with `n` patched once `rhs` is emitted.
fn generate_short_circuit(lhs: &Cond, rhs: &Cond, jump: Opcode, opcodes: &mut Vec<Opcode>) {
    generate_bytecode_recursive(lhs, opcodes);
    let jump_index = opcodes.len();
    opcodes.push(jump);
    generate_bytecode_recursive(rhs, opcodes);
    opcodes.push(Opcode::ToBool);

    let offset = (opcodes.len() - jump_index - 1) as u32;
    opcodes[jump_index] = match opcodes[jump_index] {
        Opcode::JumpIfTrue(_) => Opcode::JumpIfTrue(offset),
        _ => Opcode::JumpIfFalse(offset),
    };
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::Contains => Opcode::Contains { nocase: false },
        BinaryOp::IContains => Opcode::Contains { nocase: true },
        BinaryOp::StartsWith => Opcode::StartsWith { nocase: false },
        BinaryOp::IStartsWith => Opcode::StartsWith { nocase: true },
        BinaryOp::EndsWith => Opcode::EndsWith { nocase: false },
        BinaryOp::IEndsWith => Opcode::EndsWith { nocase: true },
        BinaryOp::IEquals => Opcode::IEquals,
    }
}
