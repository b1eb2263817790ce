//! Bytecode instruction set for the lua-rust virtual machine.
//!
//! A register-based ISA following the PUC-Lua 5.3 opcode set. Each
//! instruction is a single 32-bit word in one of four layouts:
//!
//! ```text
//!  31        23        14        6      0
//!  +---------+---------+---------+------+
//!  |  B:9    |  C:9    |  A:8    | OP:6 |  iABC
//!  |      Bx:18        |  A:8    | OP:6 |  iABx
//!  |     sBx:18        |  A:8    | OP:6 |  iAsBx
//!  |           Ax:26             | OP:6 |  iAx
//!  +---------+---------+---------+------+
//! ```

pub const SIZE_OP: u32 = 6;
pub const SIZE_A: u32 = 8;
pub const SIZE_B: u32 = 9;
pub const SIZE_C: u32 = 9;
pub const SIZE_BX: u32 = SIZE_B + SIZE_C;
pub const SIZE_AX: u32 = SIZE_A + SIZE_BX;

pub const POS_A: u32 = SIZE_OP;
pub const POS_C: u32 = POS_A + SIZE_A;
pub const POS_B: u32 = POS_C + SIZE_C;
pub const POS_BX: u32 = POS_C;
pub const POS_AX: u32 = POS_A;

pub const MAXARG_A: u32 = (1 << SIZE_A) - 1;
pub const MAXARG_B: u32 = (1 << SIZE_B) - 1;
pub const MAXARG_C: u32 = (1 << SIZE_C) - 1;
pub const MAXARG_BX: u32 = (1 << SIZE_BX) - 1;
pub const MAXARG_SBX: i32 = (MAXARG_BX >> 1) as i32;
pub const MAXARG_AX: u32 = (1 << SIZE_AX) - 1;

/// Marks a B/C operand as a constant-pool index rather than a register.
pub const BITRK: u32 = 1 << (SIZE_B - 1);

/// Number of list items a single `SETLIST` stores per batch.
pub const LFIELDS_PER_FLUSH: usize = 50;

/// `true` when an RK operand addresses the constant pool.
pub fn is_k(x: u32) -> bool {
    x & BITRK != 0
}

/// Constant-pool index encoded in an RK operand.
pub fn index_k(x: u32) -> usize {
    (x & 0xFF) as usize
}

/// Encode constant index `k` as an RK operand.
pub fn rk_k(k: u32) -> u32 {
    k | BITRK
}

/// Decode a "floating point byte" (`eeeeexxx`) table size hint.
pub fn fb2int(x: u32) -> usize {
    if x < 8 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << ((x >> 3) - 1)
    }
}

/// Encode a size hint as a floating point byte, rounding up.
pub fn int2fb(mut x: u32) -> u32 {
    if x < 8 {
        return x;
    }
    let mut e = 0;
    while x >= (8 << 4) {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= (8 << 1) {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Dense opcode numbering; the discriminant is the low 6 bits of a word.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Move,
    LoadK,
    LoadKx,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    SelfOp,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    VarArg,
    ExtraArg,
}

pub const NUM_OPCODES: usize = OpCode::ExtraArg as usize + 1;

impl OpCode {
    pub const ALL: [OpCode; NUM_OPCODES] = [
        OpCode::Move,
        OpCode::LoadK,
        OpCode::LoadKx,
        OpCode::LoadBool,
        OpCode::LoadNil,
        OpCode::GetUpval,
        OpCode::GetTabUp,
        OpCode::GetTable,
        OpCode::SetTabUp,
        OpCode::SetUpval,
        OpCode::SetTable,
        OpCode::NewTable,
        OpCode::SelfOp,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Mod,
        OpCode::Pow,
        OpCode::Div,
        OpCode::IDiv,
        OpCode::BAnd,
        OpCode::BOr,
        OpCode::BXor,
        OpCode::Shl,
        OpCode::Shr,
        OpCode::Unm,
        OpCode::BNot,
        OpCode::Not,
        OpCode::Len,
        OpCode::Concat,
        OpCode::Jmp,
        OpCode::Eq,
        OpCode::Lt,
        OpCode::Le,
        OpCode::Test,
        OpCode::TestSet,
        OpCode::Call,
        OpCode::TailCall,
        OpCode::Return,
        OpCode::ForLoop,
        OpCode::ForPrep,
        OpCode::TForCall,
        OpCode::TForLoop,
        OpCode::SetList,
        OpCode::Closure,
        OpCode::VarArg,
        OpCode::ExtraArg,
    ];

    pub fn from_u8(n: u8) -> Option<OpCode> {
        Self::ALL.get(n as usize).copied()
    }

    pub fn info(self) -> &'static OpInfo {
        &OPCODE_INFO[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }
}

/// Instruction layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// How a B or C operand is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgMode {
    /// Not used.
    N,
    /// Used as a plain number (count, flag, index).
    U,
    /// A register or a jump offset.
    R,
    /// A constant or an RK register/constant.
    K,
}

/// Static properties of an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    /// The next instruction must be a jump.
    pub test: bool,
    /// The instruction writes register A.
    pub set_a: bool,
    pub b: OpArgMode,
    pub c: OpArgMode,
    pub mode: OpMode,
}

const fn op(
    name: &'static str,
    test: bool,
    set_a: bool,
    b: OpArgMode,
    c: OpArgMode,
    mode: OpMode,
) -> OpInfo {
    OpInfo {
        name,
        test,
        set_a,
        b,
        c,
        mode,
    }
}

use OpArgMode::{K, N, R, U};
use OpMode::{IABx, IAsBx, IAx, IABC};

#[rustfmt::skip]
pub static OPCODE_INFO: [OpInfo; NUM_OPCODES] = [
    //  name        T      A      B  C  mode
    op("MOVE",     false, true,  R, N, IABC),  // R(A) := R(B)
    op("LOADK",    false, true,  K, N, IABx),  // R(A) := Kst(Bx)
    op("LOADKX",   false, true,  N, N, IABx),  // R(A) := Kst(extra arg)
    op("LOADBOOL", false, true,  U, U, IABC),  // R(A) := (Bool)B; if (C) pc++
    op("LOADNIL",  false, true,  U, N, IABC),  // R(A), R(A+1), ..., R(A+B) := nil
    op("GETUPVAL", false, true,  U, N, IABC),  // R(A) := UpValue[B]
    op("GETTABUP", false, true,  U, K, IABC),  // R(A) := UpValue[B][RK(C)]
    op("GETTABLE", false, true,  R, K, IABC),  // R(A) := R(B)[RK(C)]
    op("SETTABUP", false, false, K, K, IABC),  // UpValue[A][RK(B)] := RK(C)
    op("SETUPVAL", false, false, U, N, IABC),  // UpValue[B] := R(A)
    op("SETTABLE", false, false, K, K, IABC),  // R(A)[RK(B)] := RK(C)
    op("NEWTABLE", false, true,  U, U, IABC),  // R(A) := {} (size = B,C)
    op("SELF",     false, true,  R, K, IABC),  // R(A+1) := R(B); R(A) := R(B)[RK(C)]
    op("ADD",      false, true,  K, K, IABC),  // R(A) := RK(B) + RK(C)
    op("SUB",      false, true,  K, K, IABC),  // R(A) := RK(B) - RK(C)
    op("MUL",      false, true,  K, K, IABC),  // R(A) := RK(B) * RK(C)
    op("MOD",      false, true,  K, K, IABC),  // R(A) := RK(B) % RK(C)
    op("POW",      false, true,  K, K, IABC),  // R(A) := RK(B) ^ RK(C)
    op("DIV",      false, true,  K, K, IABC),  // R(A) := RK(B) / RK(C)
    op("IDIV",     false, true,  K, K, IABC),  // R(A) := RK(B) // RK(C)
    op("BAND",     false, true,  K, K, IABC),  // R(A) := RK(B) & RK(C)
    op("BOR",      false, true,  K, K, IABC),  // R(A) := RK(B) | RK(C)
    op("BXOR",     false, true,  K, K, IABC),  // R(A) := RK(B) ~ RK(C)
    op("SHL",      false, true,  K, K, IABC),  // R(A) := RK(B) << RK(C)
    op("SHR",      false, true,  K, K, IABC),  // R(A) := RK(B) >> RK(C)
    op("UNM",      false, true,  R, N, IABC),  // R(A) := -R(B)
    op("BNOT",     false, true,  R, N, IABC),  // R(A) := ~R(B)
    op("NOT",      false, true,  R, N, IABC),  // R(A) := not R(B)
    op("LEN",      false, true,  R, N, IABC),  // R(A) := length of R(B)
    op("CONCAT",   false, true,  R, R, IABC),  // R(A) := R(B).. ... ..R(C)
    op("JMP",      false, false, R, N, IAsBx), // pc+=sBx; if (A) close all upvalues >= R(A - 1)
    op("EQ",       true,  false, K, K, IABC),  // if ((RK(B) == RK(C)) ~= A) then pc++
    op("LT",       true,  false, K, K, IABC),  // if ((RK(B) <  RK(C)) ~= A) then pc++
    op("LE",       true,  false, K, K, IABC),  // if ((RK(B) <= RK(C)) ~= A) then pc++
    op("TEST",     true,  false, N, U, IABC),  // if not (R(A) <=> C) then pc++
    op("TESTSET",  true,  true,  R, U, IABC),  // if (R(B) <=> C) then R(A) := R(B) else pc++
    op("CALL",     false, true,  U, U, IABC),  // R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
    op("TAILCALL", false, true,  U, U, IABC),  // return R(A)(R(A+1), ... ,R(A+B-1))
    op("RETURN",   false, false, U, N, IABC),  // return R(A), ... ,R(A+B-2)
    op("FORLOOP",  false, true,  R, N, IAsBx), // R(A)+=R(A+2); if R(A) <?= R(A+1) then { pc+=sBx; R(A+3)=R(A) }
    op("FORPREP",  false, true,  R, N, IAsBx), // R(A)-=R(A+2); pc+=sBx
    op("TFORCALL", false, false, N, U, IABC),  // R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2))
    op("TFORLOOP", false, true,  R, N, IAsBx), // if R(A+1) ~= nil then { R(A)=R(A+1); pc += sBx }
    op("SETLIST",  false, false, U, U, IABC),  // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    op("CLOSURE",  false, true,  U, N, IABx),  // R(A) := closure(KPROTO[Bx])
    op("VARARG",   false, true,  U, N, IABC),  // R(A), R(A+1), ..., R(A+B-2) = vararg
    op("EXTRAARG", false, false, U, U, IAx),   // extra (larger) argument for previous opcode
];

// ── Instruction words ─────────────────────────────────────────────────────────

/// One encoded 32-bit instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn iabc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAXARG_A && b <= MAXARG_B && c <= MAXARG_C);
        Self((op as u32) | (a << POS_A) | (b << POS_B) | (c << POS_C))
    }

    pub fn iabx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(a <= MAXARG_A && bx <= MAXARG_BX);
        Self((op as u32) | (a << POS_A) | (bx << POS_BX))
    }

    pub fn iasbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::iabx(op, a, (sbx + MAXARG_SBX) as u32)
    }

    pub fn iax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAXARG_AX);
        Self((op as u32) | (ax << POS_AX))
    }

    /// Raw opcode number: always the low 6 bits, whatever the layout.
    pub fn opcode_raw(self) -> u8 {
        (self.0 & 0x3F) as u8
    }

    /// Decoded opcode, or `None` for a number outside the instruction set.
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode_raw())
    }

    pub fn a(self) -> usize {
        ((self.0 >> POS_A) & MAXARG_A) as usize
    }

    pub fn b(self) -> u32 {
        (self.0 >> POS_B) & MAXARG_B
    }

    pub fn c(self) -> u32 {
        (self.0 >> POS_C) & MAXARG_C
    }

    pub fn abc(self) -> (usize, u32, u32) {
        (self.a(), self.b(), self.c())
    }

    pub fn abx(self) -> (usize, u32) {
        (self.a(), self.0 >> POS_BX)
    }

    pub fn asbx(self) -> (usize, i32) {
        let (a, bx) = self.abx();
        (a, bx as i32 - MAXARG_SBX)
    }

    pub fn ax(self) -> u32 {
        self.0 >> POS_AX
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Instruction({:#010x}: {self})", self.0)
    }
}

/// `NAME a b c` with constants shown as `-1-k`, the way `luac -l` lists them.
impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "<unknown opcode {}>", self.opcode_raw());
        };
        let info = op.info();
        let arg = |v: u32, mode: OpArgMode| -> i64 {
            if mode == OpArgMode::K && is_k(v) {
                -1 - index_k(v) as i64
            } else {
                v as i64
            }
        };
        match info.mode {
            OpMode::IABC => {
                write!(f, "{:<9}{}", info.name, self.a())?;
                if info.b != OpArgMode::N {
                    write!(f, " {}", arg(self.b(), info.b))?;
                }
                if info.c != OpArgMode::N {
                    write!(f, " {}", arg(self.c(), info.c))?;
                }
                Ok(())
            }
            OpMode::IABx => {
                let (a, bx) = self.abx();
                if info.b == OpArgMode::K {
                    write!(f, "{:<9}{} {}", info.name, a, -1 - bx as i64)
                } else {
                    write!(f, "{:<9}{} {}", info.name, a, bx)
                }
            }
            OpMode::IAsBx => {
                let (a, sbx) = self.asbx();
                write!(f, "{:<9}{} {}", info.name, a, sbx)
            }
            OpMode::IAx => write!(f, "{:<9}{}", info.name, self.ax()),
        }
    }
}
