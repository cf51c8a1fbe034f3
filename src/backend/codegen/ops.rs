// src/backend/codegen/ops.rs
//! Stack-machine instruction set.
//!
//! Operands are indices into the artifact's tables (constants, functions,
//! classes, natives, services) or into the current frame. Jump targets are
//! absolute instruction indices within the same function.
use crate::frontend::ast::BinaryOp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Push constant pool entry.
    Const(u32),
    Null,
    True,
    False,
    Pop,
    /// Duplicate the top value.
    Dup,
    /// Duplicate the top two values, preserving order.
    Dup2,

    LoadLocal(u16),
    /// Pop into a frame slot.
    StoreLocal(u16),
    LoadGlobal(u32),
    StoreGlobal(u32),
    LoadFunction(u32),
    LoadClass(u32),
    LoadNative(u32),
    LoadService(u32),
    /// Push frame slot 0 of a method body.
    LoadThis,

    /// `obj -> obj.name`; operand is a string constant.
    GetField(u32),
    /// `obj value -> value` after storing.
    SetField(u32),
    /// `obj index -> obj[index]`
    GetIndex,
    /// `obj index value -> value` after storing.
    SetIndex,

    Binary(BinaryOp),
    Neg,
    /// Numeric coercion, unary `+`.
    ToNumber,
    Not,
    /// Replace the top value with its truthiness.
    Truthy,

    Jump(u32),
    /// Pop; jump when falsy.
    JumpIfFalse(u32),
    /// Jump keeping the value when falsy, otherwise pop and fall through.
    JumpIfFalseOrPop(u32),
    /// Jump keeping the value when truthy, otherwise pop and fall through.
    JumpIfTrueOrPop(u32),

    /// `callee args.. -> result`
    Call(u8),
    /// `receiver args.. -> result`, dispatched by name (string constant).
    CallMethod { name: u32, argc: u8 },
    /// `args.. -> instance`
    New { class: u32, argc: u8 },
    MakeArray(u32),
    /// `key value ... -> object`, operand is the pair count.
    MakeObject(u32),

    /// Resolve a task to its value; non-task values pass through.
    Await,
    /// `callee args.. -> task`, start the call concurrently.
    Spawn(u8),
    /// Pop `n` values, wait for all tasks among them, push an array of results.
    JoinAll(u32),

    /// Publish an event; topic is a string constant. Pops the payload when present.
    Emit { topic: u32, payload: bool },

    Throw,
    /// Install a handler at the given target for the enclosed region.
    EnterTry(u32),
    ExitTry,

    /// Replace an iterable with an iterator over a snapshot of it.
    IterInit,
    /// Push the next item, or pop the iterator and jump when exhausted.
    IterNext(u32),

    Return,
}

impl Op {
    /// Rewrites the jump target of a branch instruction.
    pub fn patch_target(&mut self, target: u32) {
        match self {
            Op::Jump(t)
            | Op::JumpIfFalse(t)
            | Op::JumpIfFalseOrPop(t)
            | Op::JumpIfTrueOrPop(t)
            | Op::EnterTry(t)
            | Op::IterNext(t) => *t = target,
            _ => {}
        }
    }
}
