//! Typed view of JVM method code.
//!
//! Instrumentation builds its entry prefix as a list of [`Instruction`]s and
//! only turns it into bytes at the [`encode`] boundary. [`decode`] walks any
//! method body, which is how the prefix of an instrumented method is checked
//! without comparing raw bytes.
//!
//! Only the instructions the capture prefix uses get their own variant. Every
//! other opcode decodes to [`Instruction::Other`] with its operand bytes.

use thiserror::Error;

pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const ICONST_M1: u8 = 0x02;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const ILOAD: u8 = 0x15;
    pub const LLOAD: u8 = 0x16;
    pub const FLOAD: u8 = 0x17;
    pub const DLOAD: u8 = 0x18;
    pub const ALOAD: u8 = 0x19;
    pub const ILOAD_0: u8 = 0x1a;
    pub const ALOAD_3: u8 = 0x2d;
    pub const AASTORE: u8 = 0x53;
    pub const DUP: u8 = 0x59;
    pub const IINC: u8 = 0x84;
    pub const RET: u8 = 0xa9;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const RETURN: u8 = 0xb1;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const WIDE: u8 = 0xc4;
}

use opcodes::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    #[error("code ends inside the instruction at pc {pc}")]
    UnexpectedEnd { pc: u32 },
    #[error("invalid opcode {opcode:#04x} at pc {pc}")]
    InvalidOpcode { pc: u32, opcode: u8 },
    #[error("malformed switch at pc {pc}")]
    InvalidSwitch { pc: u32 },
    #[error("no stack effect known for opcode {opcode:#04x}")]
    UnknownStackEffect { opcode: u8 },
    #[error("operand stack underflow")]
    StackUnderflow,
}

/// Local-variable load family, one per JVM computational type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl LoadKind {
    fn base(self) -> u8 {
        match self {
            LoadKind::Int => ILOAD,
            LoadKind::Long => LLOAD,
            LoadKind::Float => FLOAD,
            LoadKind::Double => DLOAD,
            LoadKind::Reference => ALOAD,
        }
    }

    fn from_base(opcode: u8) -> Option<Self> {
        Some(match opcode {
            ILOAD => LoadKind::Int,
            LLOAD => LoadKind::Long,
            FLOAD => LoadKind::Float,
            DLOAD => LoadKind::Double,
            ALOAD => LoadKind::Reference,
            _ => return None,
        })
    }

    /// Operand stack words pushed by the load.
    pub fn stack_words(self) -> u16 {
        match self {
            LoadKind::Long | LoadKind::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    /// `iconst_m1` through `iconst_5`.
    IConst(i8),
    BiPush(i8),
    SiPush(i16),
    Ldc(u8),
    LdcW(u16),
    /// Any of the `?load` forms; the encoder picks `?load_n`, `?load` or `wide`.
    Load(LoadKind, u16),
    Dup,
    AaStore,
    ANewArray(u16),
    InvokeStatic(u16),
    TableSwitch { default: i32, low: i32, high: i32, offsets: Vec<i32> },
    LookupSwitch { default: i32, pairs: Vec<(i32, i32)> },
    Other { opcode: u8, operands: Vec<u8> },
}

impl Instruction {
    /// Smallest instruction that pushes the int constant `value`.
    pub fn push_int(value: i32) -> Instruction {
        match value {
            -1..=5 => Instruction::IConst(value as i8),
            -128..=127 => Instruction::BiPush(value as i8),
            _ => Instruction::SiPush(value as i16),
        }
    }

    /// Smallest instruction that loads constant pool entry `index`.
    pub fn ldc(index: u16) -> Instruction {
        if index <= u8::MAX as u16 {
            Instruction::Ldc(index as u8)
        } else {
            Instruction::LdcW(index)
        }
    }
}

/// Fixed operand length per opcode, `None` for invalid or variable-length ones.
fn operand_len(opcode: u8) -> Option<usize> {
    Some(match opcode {
        0x00..=0x0f => 0,
        BIPUSH => 1,
        SIPUSH => 2,
        LDC => 1,
        LDC_W | 0x14 => 2,
        0x15..=0x19 => 1,
        0x1a..=0x35 => 0,
        0x36..=0x3a => 1,
        0x3b..=0x83 => 0,
        IINC => 2,
        0x85..=0x98 => 0,
        0x99..=0xa8 => 2,
        RET => 1,
        0xac..=0xb1 => 0,
        0xb2..=0xb8 => 2,
        0xb9 | 0xba => 4,
        0xbb => 2,
        0xbc => 1,
        ANEWARRAY => 2,
        0xbe | 0xbf => 0,
        0xc0 | 0xc1 => 2,
        0xc2 | 0xc3 => 0,
        0xc5 => 3,
        0xc6 | 0xc7 => 2,
        0xc8 | 0xc9 => 4,
        0xca | 0xfe | 0xff => 0,
        _ => return None,
    })
}

struct Cursor<'a> {
    code: &'a [u8],
    pos: usize,
    start: u32,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], BytecodeError> {
        let end = self.pos + len;
        let slice = self.code.get(self.pos..end).ok_or(BytecodeError::UnexpectedEnd { pc: self.start })?;
        self.pos = end;
        Ok(slice)
    }

    fn u1(&mut self) -> Result<u8, BytecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> Result<u16, BytecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i4(&mut self) -> Result<i32, BytecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Decodes a method body into `(pc, instruction)` pairs.
pub fn decode(code: &[u8]) -> Result<Vec<(u32, Instruction)>, BytecodeError> {
    let mut out = Vec::new();
    let mut cur = Cursor { code, pos: 0, start: 0 };
    while cur.pos < code.len() {
        let pc = cur.pos as u32;
        cur.start = pc;
        let opcode = cur.u1()?;
        let insn = match opcode {
            NOP => Instruction::Nop,
            0x02..=0x08 => Instruction::IConst(opcode as i8 - 3),
            BIPUSH => Instruction::BiPush(cur.u1()? as i8),
            SIPUSH => Instruction::SiPush(cur.u2()? as i16),
            LDC => Instruction::Ldc(cur.u1()?),
            LDC_W => Instruction::LdcW(cur.u2()?),
            ILOAD..=ALOAD => {
                let kind = LoadKind::from_base(opcode).ok_or(BytecodeError::InvalidOpcode { pc, opcode })?;
                Instruction::Load(kind, cur.u1()? as u16)
            }
            ILOAD_0..=ALOAD_3 => {
                let n = opcode - ILOAD_0;
                let kind = LoadKind::from_base(ILOAD + n / 4).ok_or(BytecodeError::InvalidOpcode { pc, opcode })?;
                Instruction::Load(kind, (n % 4) as u16)
            }
            DUP => Instruction::Dup,
            AASTORE => Instruction::AaStore,
            ANEWARRAY => Instruction::ANewArray(cur.u2()?),
            INVOKESTATIC => Instruction::InvokeStatic(cur.u2()?),
            TABLESWITCH => {
                cur.take((4 - (pc as usize + 1) % 4) % 4)?;
                let default = cur.i4()?;
                let low = cur.i4()?;
                let high = cur.i4()?;
                if high < low {
                    return Err(BytecodeError::InvalidSwitch { pc });
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut offsets = Vec::with_capacity(count.min(code.len() / 4));
                for _ in 0..count {
                    offsets.push(cur.i4()?);
                }
                Instruction::TableSwitch { default, low, high, offsets }
            }
            LOOKUPSWITCH => {
                cur.take((4 - (pc as usize + 1) % 4) % 4)?;
                let default = cur.i4()?;
                let npairs = cur.i4()?;
                if npairs < 0 {
                    return Err(BytecodeError::InvalidSwitch { pc });
                }
                let mut pairs = Vec::with_capacity((npairs as usize).min(code.len() / 8));
                for _ in 0..npairs {
                    pairs.push((cur.i4()?, cur.i4()?));
                }
                Instruction::LookupSwitch { default, pairs }
            }
            WIDE => {
                let inner = cur.u1()?;
                match inner {
                    ILOAD..=ALOAD => {
                        let kind = LoadKind::from_base(inner).ok_or(BytecodeError::InvalidOpcode { pc, opcode: inner })?;
                        Instruction::Load(kind, cur.u2()?)
                    }
                    0x36..=0x3a | RET => {
                        let operands = [&[inner][..], cur.take(2)?].concat();
                        Instruction::Other { opcode, operands }
                    }
                    IINC => {
                        let operands = [&[inner][..], cur.take(4)?].concat();
                        Instruction::Other { opcode, operands }
                    }
                    _ => return Err(BytecodeError::InvalidOpcode { pc, opcode: inner }),
                }
            }
            _ => {
                let len = operand_len(opcode).ok_or(BytecodeError::InvalidOpcode { pc, opcode })?;
                Instruction::Other { opcode, operands: cur.take(len)?.to_vec() }
            }
        };
        out.push((pc, insn));
    }
    Ok(out)
}

/// Encodes `instrs` as if the first one sits at `start_pc`; the offset only
/// matters for switch padding.
pub fn encode(instrs: &[Instruction], start_pc: u32) -> Vec<u8> {
    let mut out = Vec::new();
    for insn in instrs {
        let pc = start_pc as usize + out.len();
        match insn {
            Instruction::Nop => out.push(NOP),
            Instruction::IConst(v) => out.push((*v + 3) as u8),
            Instruction::BiPush(v) => out.extend_from_slice(&[BIPUSH, *v as u8]),
            Instruction::SiPush(v) => {
                out.push(SIPUSH);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Instruction::Ldc(index) => out.extend_from_slice(&[LDC, *index]),
            Instruction::LdcW(index) => {
                out.push(LDC_W);
                out.extend_from_slice(&index.to_be_bytes());
            }
            Instruction::Load(kind, slot) => match *slot {
                0..=3 => out.push(ILOAD_0 + (kind.base() - ILOAD) * 4 + *slot as u8),
                4..=255 => out.extend_from_slice(&[kind.base(), *slot as u8]),
                _ => {
                    out.extend_from_slice(&[WIDE, kind.base()]);
                    out.extend_from_slice(&slot.to_be_bytes());
                }
            },
            Instruction::Dup => out.push(DUP),
            Instruction::AaStore => out.push(AASTORE),
            Instruction::ANewArray(index) => {
                out.push(ANEWARRAY);
                out.extend_from_slice(&index.to_be_bytes());
            }
            Instruction::InvokeStatic(index) => {
                out.push(INVOKESTATIC);
                out.extend_from_slice(&index.to_be_bytes());
            }
            Instruction::TableSwitch { default, low, high, offsets } => {
                out.push(TABLESWITCH);
                out.resize(out.len() + (4 - (pc + 1) % 4) % 4, 0);
                for v in [*default, *low, *high].iter().chain(offsets) {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                out.push(LOOKUPSWITCH);
                out.resize(out.len() + (4 - (pc + 1) % 4) % 4, 0);
                out.extend_from_slice(&default.to_be_bytes());
                out.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
                for (key, offset) in pairs {
                    out.extend_from_slice(&key.to_be_bytes());
                    out.extend_from_slice(&offset.to_be_bytes());
                }
            }
            Instruction::Other { opcode, operands } => {
                out.push(*opcode);
                out.extend_from_slice(operands);
            }
        }
    }
    out
}

/// Highest operand stack depth reached by straight-line code.
///
/// `invoke_effect` gives the net stack change of the method behind an
/// `invokestatic` constant pool index. Instructions outside the typed set
/// are rejected.
pub fn max_stack_depth(instrs: &[Instruction], invoke_effect: impl Fn(u16) -> i32) -> Result<u16, BytecodeError> {
    let mut depth: i32 = 0;
    let mut max: i32 = 0;
    for insn in instrs {
        let effect = match insn {
            Instruction::Nop => 0,
            Instruction::IConst(_)
            | Instruction::BiPush(_)
            | Instruction::SiPush(_)
            | Instruction::Ldc(_)
            | Instruction::LdcW(_)
            | Instruction::Dup => 1,
            Instruction::Load(kind, _) => kind.stack_words() as i32,
            Instruction::AaStore => -3,
            Instruction::ANewArray(_) => 0,
            Instruction::InvokeStatic(index) => invoke_effect(*index),
            Instruction::TableSwitch { .. } => -1,
            Instruction::LookupSwitch { .. } => -1,
            Instruction::Other { opcode, .. } => return Err(BytecodeError::UnknownStackEffect { opcode: *opcode }),
        };
        depth += effect;
        if depth < 0 {
            return Err(BytecodeError::StackUnderflow);
        }
        max = max.max(depth);
    }
    Ok(max as u16)
}
