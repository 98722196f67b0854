//! opcode.rs — jeu d'instructions de la VM.
//!
//! Un opcode est un octet unique, 0..42, suivi le cas échéant d'opérandes
//! immédiats encodés en little-endian directement dans le flux de code.
//! L'ordre et les valeurs numériques ci-dessous sont fixées par le format
//! d'image (§4.1/§6) : elles ne peuvent pas être réordonnées sans rompre la
//! compatibilité avec les images déjà compilées.

use std::fmt;

/// Nombre total d'opcodes valides.
pub const NUM_OPCODES: u8 = 43;

/// Un opcode de la VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    Neg = 5,
    Not = 6,
    And = 7,
    Or = 8,
    Equal = 9,
    NotEqual = 10,
    Less = 11,
    LessEqual = 12,
    Greater = 13,
    GreaterEqual = 14,
    True = 15,
    False = 16,
    Jump = 17,
    JumpIfFalse = 18,
    Store = 19,
    Index = 20,
    Append = 21,
    Length = 22,
    List = 23,
    ConstU64 = 24,
    ConstU32 = 25,
    ConstU8 = 26,
    Str = 27,
    DefLocal = 28,
    GetLocal = 29,
    Assign = 30,
    Call = 31,
    Return = 32,
    Print = 33,
    Pop = 34,
    MakeList = 35,
    MakeTuple = 36,
    NativeCall = 37,
    ConstDouble = 38,
    MakeChan = 39,
    ChanRead = 40,
    ChanWrite = 41,
    Spawn = 42,
}

impl Op {
    /// Mnémonique utilisé pour la trace `--trace-opcodes`.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Neg => "NEG",
            Op::Not => "NOT",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Equal => "EQUAL",
            Op::NotEqual => "NOT_EQUAL",
            Op::Less => "LESS",
            Op::LessEqual => "LESS_EQUAL",
            Op::Greater => "GREATER",
            Op::GreaterEqual => "GREATER_EQUAL",
            Op::True => "TRUE",
            Op::False => "FALSE",
            Op::Jump => "JUMP",
            Op::JumpIfFalse => "JUMP_IF_FALSE",
            Op::Store => "STORE",
            Op::Index => "INDEX",
            Op::Append => "APPEND",
            Op::Length => "LENGTH",
            Op::List => "LIST",
            Op::ConstU64 => "CONST_U64",
            Op::ConstU32 => "CONST_U32",
            Op::ConstU8 => "CONST_U8",
            Op::Str => "STRING",
            Op::DefLocal => "DEF_LOCAL",
            Op::GetLocal => "GET_LOCAL",
            Op::Assign => "ASSIGN",
            Op::Call => "CALL",
            Op::Return => "RETURN",
            Op::Print => "PRINT",
            Op::Pop => "POP",
            Op::MakeList => "MAKE_LIST",
            Op::MakeTuple => "MAKE_TUPLE",
            Op::NativeCall => "NATIVE_CALL",
            Op::ConstDouble => "CONST_DOUBLE",
            Op::MakeChan => "MAKE_CHAN",
            Op::ChanRead => "CHAN_READ",
            Op::ChanWrite => "CHAN_WRITE",
            Op::Spawn => "SPAWN",
        }
    }

    /// Nombre d'octets d'opérandes immédiats suivant cet opcode dans le
    /// flux de code (hors l'octet d'opcode lui-même).
    #[must_use]
    pub const fn operand_len(self) -> usize {
        match self {
            Op::Jump | Op::JumpIfFalse => 4,
            Op::ConstU8 => 1,
            Op::ConstU32 => 4,
            Op::ConstU64 | Op::ConstDouble => 8,
            Op::List | Op::MakeTuple => 4,
            Op::DefLocal | Op::GetLocal | Op::Assign => 4,
            Op::Call | Op::NativeCall => 8,
            Op::Str => 4,
            _ => 0,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Erreur : octet d'opcode hors de la plage `0..NUM_OPCODES` valide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOpcode(pub u8);

impl fmt::Display for UnknownOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown opcode byte {}", self.0)
    }
}

impl std::error::Error for UnknownOpcode {}

impl TryFrom<u8> for Op {
    type Error = UnknownOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Op::*;
        Ok(match byte {
            0 => Add,
            1 => Sub,
            2 => Mul,
            3 => Div,
            4 => Mod,
            5 => Neg,
            6 => Not,
            7 => And,
            8 => Or,
            9 => Equal,
            10 => NotEqual,
            11 => Less,
            12 => LessEqual,
            13 => Greater,
            14 => GreaterEqual,
            15 => True,
            16 => False,
            17 => Jump,
            18 => JumpIfFalse,
            19 => Store,
            20 => Index,
            21 => Append,
            22 => Length,
            23 => List,
            24 => ConstU64,
            25 => ConstU32,
            26 => ConstU8,
            27 => Str,
            28 => DefLocal,
            29 => GetLocal,
            30 => Assign,
            31 => Call,
            32 => Return,
            33 => Print,
            34 => Pop,
            35 => MakeList,
            36 => MakeTuple,
            37 => NativeCall,
            38 => ConstDouble,
            39 => MakeChan,
            40 => ChanRead,
            41 => ChanWrite,
            42 => Spawn,
            other => return Err(UnknownOpcode(other)),
        })
    }
}
