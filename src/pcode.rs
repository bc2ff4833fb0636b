//! The pcode instruction-info table: for every opcode, its mnemonic, operand
//! count, and per-operand kind. This is one of the external collaborators
//! named in `spec.md` §6 — a thin, static translator with no behavior of its
//! own beyond the lookup.

/// What an instruction's raw operand cell means, used by the CFG builder to
/// detect stack references (for `nargs` recovery) and by the lifter to know
/// how to interpret each word that follows an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Constant,
    Stack,
    Jump,
    Function,
    Native,
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Opcode {
    Proc,
    Endproc,
    Retn,
    Halt,
    Break,
    None,
    Bounds,
    Casetbl,

    Jump,
    Jzer,
    Jnz,
    Jeq,
    Jneq,
    Jsless,
    Jsleq,
    Jsgrtr,
    Jsgeq,
    Switch,

    Stack,
    Heap,
    Fill,
    PushPri,
    PushAlt,
    Push,
    PushS,
    PushC,
    PushAdr,
    Push2,
    Push2S,
    Push2C,
    Push2Adr,
    Push3,
    Push3S,
    Push3C,
    Push3Adr,
    Push4,
    Push4S,
    Push4C,
    Push4Adr,
    Push5,
    Push5S,
    Push5C,
    Push5Adr,
    PopPri,
    PopAlt,
    SwapPri,
    SwapAlt,
    MovePri,
    MoveAlt,
    Xchg,
    Movs,

    ConstPri,
    ConstAlt,
    Const,
    ConstS,
    LoadPri,
    LoadAlt,
    LoadBoth,
    LoadSPri,
    LoadSAlt,
    LoadSBoth,
    LoadI,
    StorPri,
    StorAlt,
    StorSPri,
    StorSAlt,
    StorI,
    LrefSPri,
    LrefSAlt,
    SrefSPri,
    SrefSAlt,
    LodbI,
    StrbI,
    Lidx,
    LidxB,
    Idxaddr,
    IdxaddrB,
    AddrPri,
    AddrAlt,
    ZeroPri,
    ZeroAlt,
    Zero,
    ZeroS,

    IncPri,
    IncAlt,
    Inc,
    IncS,
    IncI,
    DecPri,
    DecAlt,
    Dec,
    DecS,
    DecI,
    Shl,
    Shr,
    Sshr,
    ShlCPri,
    ShlCAlt,
    Smul,
    SmulC,
    Sdiv,
    SdivAlt,
    Add,
    AddC,
    Sub,
    SubAlt,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Invert,
    Eq,
    Neq,
    Sless,
    Sleq,
    Sgrtr,
    Sgeq,
    EqCPri,
    EqCAlt,

    Fabs,
    Float,
    Floatadd,
    Floatsub,
    Floatmul,
    Floatdiv,
    RndToNearest,
    RndToFloor,
    RndToCeil,
    RndToZero,
    Floatcmp,
    FloatGt,
    FloatGe,
    FloatLe,
    FloatLt,
    FloatEq,
    FloatNe,
    FloatNot,

    Call,
    SysreqC,
    SysreqN,
}

#[derive(Debug, Clone, Copy)]
pub struct PcodeInfo {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
}

macro_rules! info_table {
    ($($op:ident => ($mnem:literal $(, $kind:expr)*)),* $(,)?) => {
        impl Opcode {
            pub fn info(self) -> PcodeInfo {
                match self {
                    $(Opcode::$op => PcodeInfo { mnemonic: $mnem, operands: &[$($kind),*] },)*
                }
            }
        }
    };
}

use OperandKind::*;

info_table! {
    Proc => ("proc"),
    Endproc => ("endproc"),
    Retn => ("retn"),
    Halt => ("halt", Constant),
    Break => ("break"),
    None => ("nop"),
    Bounds => ("bounds", Constant),
    Casetbl => ("casetbl"),

    Jump => ("jump", Jump),
    Jzer => ("jzer", Jump),
    Jnz => ("jnz", Jump),
    Jeq => ("jeq", Jump),
    Jneq => ("jneq", Jump),
    Jsless => ("jsless", Jump),
    Jsleq => ("jsleq", Jump),
    Jsgrtr => ("jsgrtr", Jump),
    Jsgeq => ("jsgeq", Jump),
    Switch => ("switch", Jump),

    Stack => ("stack", Constant),
    Heap => ("heap", Constant),
    Fill => ("fill", Constant),
    PushPri => ("push.pri"),
    PushAlt => ("push.alt"),
    Push => ("push", Stack),
    PushS => ("push.s", Stack),
    PushC => ("push.c", Constant),
    PushAdr => ("push.adr", Stack),
    Push2 => ("push2", Stack, Stack),
    Push2S => ("push2.s", Stack, Stack),
    Push2C => ("push2.c", Constant, Constant),
    Push2Adr => ("push2.adr", Stack, Stack),
    Push3 => ("push3", Stack, Stack, Stack),
    Push3S => ("push3.s", Stack, Stack, Stack),
    Push3C => ("push3.c", Constant, Constant, Constant),
    Push3Adr => ("push3.adr", Stack, Stack, Stack),
    Push4 => ("push4", Stack, Stack, Stack, Stack),
    Push4S => ("push4.s", Stack, Stack, Stack, Stack),
    Push4C => ("push4.c", Constant, Constant, Constant, Constant),
    Push4Adr => ("push4.adr", Stack, Stack, Stack, Stack),
    Push5 => ("push5", Stack, Stack, Stack, Stack, Stack),
    Push5S => ("push5.s", Stack, Stack, Stack, Stack, Stack),
    Push5C => ("push5.c", Constant, Constant, Constant, Constant, Constant),
    Push5Adr => ("push5.adr", Stack, Stack, Stack, Stack, Stack),
    PopPri => ("pop.pri"),
    PopAlt => ("pop.alt"),
    SwapPri => ("swap.pri"),
    SwapAlt => ("swap.alt"),
    MovePri => ("move.pri"),
    MoveAlt => ("move.alt"),
    Xchg => ("xchg"),
    Movs => ("movs", Constant),

    ConstPri => ("const.pri", Constant),
    ConstAlt => ("const.alt", Constant),
    Const => ("const", Stack, Constant),
    ConstS => ("const.s", Stack, Constant),
    LoadPri => ("load.pri", Address),
    LoadAlt => ("load.alt", Address),
    LoadBoth => ("load.both", Address, Address),
    LoadSPri => ("load.s.pri", Stack),
    LoadSAlt => ("load.s.alt", Stack),
    LoadSBoth => ("load.s.both", Stack, Stack),
    LoadI => ("load.i"),
    StorPri => ("stor.pri", Address),
    StorAlt => ("stor.alt", Address),
    StorSPri => ("stor.s.pri", Stack),
    StorSAlt => ("stor.s.alt", Stack),
    StorI => ("stor.i"),
    LrefSPri => ("lref.s.pri", Stack),
    LrefSAlt => ("lref.s.alt", Stack),
    SrefSPri => ("sref.s.pri", Stack),
    SrefSAlt => ("sref.s.alt", Stack),
    LodbI => ("lodb.i", Constant),
    StrbI => ("strb.i", Constant),
    Lidx => ("lidx"),
    LidxB => ("lidx.b", Constant),
    Idxaddr => ("idxaddr"),
    IdxaddrB => ("idxaddr.b", Constant),
    AddrPri => ("addr.pri", Stack),
    AddrAlt => ("addr.alt", Stack),
    ZeroPri => ("zero.pri"),
    ZeroAlt => ("zero.alt"),
    Zero => ("zero", Address),
    ZeroS => ("zero.s", Stack),

    IncPri => ("inc.pri"),
    IncAlt => ("inc.alt"),
    Inc => ("inc", Address),
    IncS => ("inc.s", Stack),
    IncI => ("inc.i"),
    DecPri => ("dec.pri"),
    DecAlt => ("dec.alt"),
    Dec => ("dec", Address),
    DecS => ("dec.s", Stack),
    DecI => ("dec.i"),
    Shl => ("shl"),
    Shr => ("shr"),
    Sshr => ("sshr"),
    ShlCPri => ("shl.c.pri", Constant),
    ShlCAlt => ("shl.c.alt", Constant),
    Smul => ("smul"),
    SmulC => ("smul.c", Constant),
    Sdiv => ("sdiv"),
    SdivAlt => ("sdiv.alt"),
    Add => ("add"),
    AddC => ("add.c", Constant),
    Sub => ("sub"),
    SubAlt => ("sub.alt"),
    And => ("and"),
    Or => ("or"),
    Xor => ("xor"),
    Not => ("not"),
    Neg => ("neg"),
    Invert => ("invert"),
    Eq => ("eq"),
    Neq => ("neq"),
    Sless => ("sless"),
    Sleq => ("sleq"),
    Sgrtr => ("sgrtr"),
    Sgeq => ("sgeq"),
    EqCPri => ("eq.c.pri", Constant),
    EqCAlt => ("eq.c.alt", Constant),

    Fabs => ("fabs"),
    Float => ("float"),
    Floatadd => ("floatadd"),
    Floatsub => ("floatsub"),
    Floatmul => ("floatmul"),
    Floatdiv => ("floatdiv"),
    RndToNearest => ("round"),
    RndToFloor => ("floor"),
    RndToCeil => ("ceil"),
    RndToZero => ("rndtozero"),
    Floatcmp => ("floatcmp"),
    FloatGt => ("float.gt"),
    FloatGe => ("float.ge"),
    FloatLe => ("float.le"),
    FloatLt => ("float.lt"),
    FloatEq => ("float.eq"),
    FloatNe => ("float.ne"),
    FloatNot => ("float.not"),

    Call => ("call", Function),
    SysreqC => ("sysreq.c", Native),
    SysreqN => ("sysreq.n", Native, Constant),
}

impl Opcode {
    /// Number of operand cells that follow this opcode's own cell.
    pub fn num_operands(self) -> usize {
        self.info().operands.len()
    }

    /// Instructions that unconditionally transfer control and never fall
    /// through to the next instruction.
    pub fn is_unconditional_terminator(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::Switch | Opcode::Retn | Opcode::Halt)
    }

    pub fn is_conditional_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jzer
                | Opcode::Jnz
                | Opcode::Jeq
                | Opcode::Jneq
                | Opcode::Jsless
                | Opcode::Jsleq
                | Opcode::Jsgrtr
                | Opcode::Jsgeq
        )
    }

    /// Decode a raw opcode cell into an `Opcode`, the direct Rust stand-in
    /// for `SmxInstrInfo::Get`'s numeric-to-mnemonic lookup. The concrete
    /// numeric encoding is the on-disk SMX opcode ID; everything downstream
    /// of this function only ever sees the `Opcode` enum.
    pub fn decode(raw: i32) -> Option<Opcode> {
        use Opcode::*;
        Some(match raw {
            1 => LoadPri,
            12 => LoadAlt,
            21 => LoadSPri,
            22 => LoadSAlt,
            23 => LrefSPri,
            24 => LrefSAlt,
            25 => LoadI,
            26 => LodbI,
            31 => ConstPri,
            32 => ConstAlt,
            33 => AddrPri,
            34 => AddrAlt,
            35 => StorPri,
            36 => StorAlt,
            37 => StorSPri,
            38 => StorSAlt,
            39 => SrefSPri,
            40 => SrefSAlt,
            41 => StorI,
            42 => StrbI,
            43 => Lidx,
            44 => LidxB,
            45 => Idxaddr,
            46 => IdxaddrB,
            47 => PushPri,
            48 => PushAlt,
            49 => PushC,
            50 => Push,
            51 => PushS,
            52 => PushAdr,
            53 => PopPri,
            54 => PopAlt,
            55 => Stack,
            56 => Heap,
            57 => Proc,
            58 => Retn,
            59 => Call,
            61 => Jump,
            62 => Jzer,
            63 => Jnz,
            64 => Shl,
            65 => Shr,
            66 => Sshr,
            67 => ShlCPri,
            68 => ShlCAlt,
            69 => Smul,
            70 => Sdiv,
            71 => SdivAlt,
            72 => Add,
            73 => Sub,
            74 => SubAlt,
            75 => And,
            76 => Or,
            77 => Xor,
            78 => Not,
            79 => Neg,
            80 => Invert,
            81 => AddC,
            82 => SmulC,
            83 => ZeroPri,
            84 => ZeroAlt,
            85 => Zero,
            86 => ZeroS,
            87 => Sgrtr,
            88 => Sgeq,
            89 => Sless,
            90 => Sleq,
            91 => Eq,
            92 => Neq,
            93 => EqCPri,
            94 => EqCAlt,
            95 => IncPri,
            96 => IncAlt,
            97 => Inc,
            98 => IncS,
            99 => IncI,
            100 => DecPri,
            101 => DecAlt,
            102 => Dec,
            103 => DecS,
            104 => DecI,
            105 => Movs,
            106 => Xchg,
            107 => Push2C,
            108 => Push2,
            109 => Push2S,
            110 => Push2Adr,
            111 => Push3C,
            112 => Push3,
            113 => Push3S,
            114 => Push3Adr,
            115 => Push4C,
            116 => Push4,
            117 => Push4S,
            118 => Push4Adr,
            119 => Push5C,
            120 => Push5,
            121 => Push5S,
            122 => Push5Adr,
            123 => Bounds,
            130 => SysreqC,
            135 => Jeq,
            136 => Jneq,
            137 => Jsless,
            138 => Jsleq,
            139 => Jsgrtr,
            140 => Jsgeq,
            141 => SwapPri,
            142 => SwapAlt,
            143 => PushAdr,
            146 => Break,
            147 => None,
            148 => Fill,
            149 => SysreqN,
            150 => Fabs,
            151 => Float,
            152 => Floatadd,
            153 => Floatsub,
            154 => Floatmul,
            155 => Floatdiv,
            156 => RndToNearest,
            157 => RndToFloor,
            158 => RndToCeil,
            159 => RndToZero,
            160 => Floatcmp,
            161 => FloatGt,
            162 => FloatGe,
            163 => FloatLe,
            164 => FloatLt,
            165 => FloatEq,
            166 => FloatNe,
            167 => FloatNot,
            168 => Switch,
            169 => Casetbl,
            170 => Halt,
            171 => Endproc,
            172 => MovePri,
            173 => MoveAlt,
            174 => Const,
            175 => ConstS,
            _ => return Option::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_opcodes() {
        assert_eq!(Opcode::decode(57), Some(Opcode::Proc));
        assert_eq!(Opcode::decode(58), Some(Opcode::Retn));
        assert_eq!(Opcode::decode(168), Some(Opcode::Switch));
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert_eq!(Opcode::decode(9999), None);
    }

    #[test]
    fn operand_kinds_match_stack_references() {
        let info = Opcode::PushS.info();
        assert_eq!(info.operands, &[OperandKind::Stack]);
    }

    #[test]
    fn conditional_jumps_are_not_unconditional_terminators() {
        assert!(Opcode::Jzer.is_conditional_jump());
        assert!(!Opcode::Jzer.is_unconditional_terminator());
        assert!(Opcode::Jump.is_unconditional_terminator());
    }
}
