//! The 32-bit signed word shared by addresses, opcodes, operands and data.

use std::fmt;
use std::ops::{Add, Sub};

/// One 32-bit cell of SMX pcode, data, or an address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cell(pub i32);

impl Cell {
    pub const ZERO: Cell = Cell(0);

    pub fn as_i32(self) -> i32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Reinterprets the cell's bits as an IEEE-754 single-precision float,
    /// matching the VM's `FLOAT`/`FLOATADD`-family opcodes.
    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    pub fn from_f32(v: f32) -> Cell {
        Cell(v.to_bits() as i32)
    }
}

impl From<i32> for Cell {
    fn from(v: i32) -> Self {
        Cell(v)
    }
}

impl From<Cell> for i32 {
    fn from(c: Cell) -> Self {
        c.0
    }
}

impl Add for Cell {
    type Output = Cell;
    fn add(self, rhs: Cell) -> Cell {
        Cell(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for Cell {
    type Output = Cell;
    fn sub(self, rhs: Cell) -> Cell {
        Cell(self.0.wrapping_sub(rhs.0))
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
