//! Opcodes and the in-memory operation record (spec §4.3, grounded on
//! `VM/OpCodes.hpp`'s `OpCodes` enum and `Op` struct).

use std::convert::TryFrom;

/// The closed set of opcodes the executor dispatches on. Numbered explicitly
/// since the wire format encodes this as a 16-bit big-endian field (spec
/// §4.3, §9 "fixes it at 16-bit").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Op {
    Create = 0,
    Store = 1,
    Load = 2,
    Pop = 3,
    Jump = 4,
    JumpTrue = 5,
    JumpFalse = 6,
    JumpTruePop = 7,
    JumpFalsePop = 8,
    JumpNil = 9,
    BodyMarker = 10,
    MakeFunc = 11,
    BlkA = 12,
    BlkR = 13,
    Call = 14,
    CallMember = 15,
    Attr = 16,
    Return = 17,
    PushLoop = 18,
    PopLoop = 19,
    Continue = 20,
    Break = 21,
    PushJump = 22,
    PushJumpNamed = 23,
    PopJump = 24,
}

impl Op {
    pub const COUNT: u16 = 25;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidOpCode(pub u16);

impl TryFrom<u16> for Op {
    type Error = InvalidOpCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use Op::*;
        Ok(match value {
            0 => Create,
            1 => Store,
            2 => Load,
            3 => Pop,
            4 => Jump,
            5 => JumpTrue,
            6 => JumpFalse,
            7 => JumpTruePop,
            8 => JumpFalsePop,
            9 => JumpNil,
            10 => BodyMarker,
            11 => MakeFunc,
            12 => BlkA,
            13 => BlkR,
            14 => Call,
            15 => CallMember,
            16 => Attr,
            17 => Return,
            18 => PushLoop,
            19 => PopLoop,
            20 => Continue,
            21 => Break,
            22 => PushJump,
            23 => PushJumpNamed,
            24 => PopJump,
            other => return Err(InvalidOpCode(other)),
        })
    }
}

/// `{srcId, idx, op, dataIdx}` (spec §3 "Operation"). `src_id`/`idx` name the
/// instruction's own origin (for diagnostics); `data_idx` points into the
/// owning [`crate::bytecode::Bytecode`]'s data-interning table and is
/// meaningless for opcodes that don't consume data (e.g. `Pop`, `Return`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub src_id: u64,
    pub idx: u64,
    pub op: Op,
    pub data_idx: u64,
}

impl Operation {
    pub fn new(src_id: u64, idx: u64, op: Op, data_idx: u64) -> Self {
        Self {
            src_id,
            idx,
            op,
            data_idx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_discriminant_round_trips_through_try_from() {
        for n in 0..Op::COUNT {
            let op = Op::try_from(n).expect("discriminant in range must decode");
            assert_eq!(op as u16, n);
        }
    }

    #[test]
    fn out_of_range_discriminant_is_rejected() {
        assert_eq!(Op::try_from(Op::COUNT), Err(InvalidOpCode(Op::COUNT)));
    }
}
