//! A tiny condition-expression language for breakpoints and watchpoints:
//! `REG op VALUE` clauses joined by `&&`, e.g. `"A == 0x10 && BC != 0"`.
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    A, F, B, C, D, E, H, L,
    Af, Bc, De, Hl, Ix, Iy, Sp, Pc,
}

impl Reg {
    fn parse(s: &str) -> Option<Reg> {
        Some(match s.to_ascii_uppercase().as_str() {
            "A" => Reg::A, "F" => Reg::F,
            "B" => Reg::B, "C" => Reg::C,
            "D" => Reg::D, "E" => Reg::E,
            "H" => Reg::H, "L" => Reg::L,
            "AF" => Reg::Af, "BC" => Reg::Bc,
            "DE" => Reg::De, "HL" => Reg::Hl,
            "IX" => Reg::Ix, "IY" => Reg::Iy,
            "SP" => Reg::Sp, "PC" => Reg::Pc,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op { Eq, Ne, Lt, Le, Gt, Ge }

impl Op {
    fn apply(self, lhs: u16, rhs: u16) -> bool {
        match self {
            Op::Eq => lhs == rhs,
            Op::Ne => lhs != rhs,
            Op::Lt => lhs < rhs,
            Op::Le => lhs <= rhs,
            Op::Gt => lhs > rhs,
            Op::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clause { reg: Reg, op: Op, value: u16 }

/// A parsed, evaluatable condition expression.
#[derive(Debug, Clone)]
pub struct ConditionExpr {
    clauses: Vec<Clause>,
    source: String,
}

/// A snapshot of the registers a condition can reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterSnapshot {
    pub af: u16, pub bc: u16, pub de: u16, pub hl: u16,
    pub ix: u16, pub iy: u16, pub sp: u16, pub pc: u16,
}

impl RegisterSnapshot {
    fn value_of(&self, reg: Reg) -> u16 {
        match reg {
            Reg::A => self.af >> 8,
            Reg::F => self.af & 0xFF,
            Reg::B => self.bc >> 8,
            Reg::C => self.bc & 0xFF,
            Reg::D => self.de >> 8,
            Reg::E => self.de & 0xFF,
            Reg::H => self.hl >> 8,
            Reg::L => self.hl & 0xFF,
            Reg::Af => self.af,
            Reg::Bc => self.bc,
            Reg::De => self.de,
            Reg::Hl => self.hl,
            Reg::Ix => self.ix,
            Reg::Iy => self.iy,
            Reg::Sp => self.sp,
            Reg::Pc => self.pc,
        }
    }
}

#[derive(Debug)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition parse error: {}", self.0)
    }
}
impl std::error::Error for ParseError {}

fn parse_value(s: &str) -> Option<u16> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = s.strip_prefix('&') {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

impl ConditionExpr {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut clauses = Vec::new();
        for part in source.split("&&") {
            let part = part.trim();
            if part.is_empty() {
                return Err(ParseError(format!("empty clause in '{}'", source)));
            }
            let (op_str, op) = ["==", "!=", "<=", ">=", "<", ">"].iter()
                .find_map(|op| part.find(op).map(|idx| (*op, idx)))
                .map(|(op, idx)| (op, idx))
                .ok_or_else(|| ParseError(format!("no operator in clause '{}'", part)))?;
            let idx = part.find(op_str).unwrap();
            let (lhs, rhs) = part.split_at(idx);
            let rhs = &rhs[op_str.len()..];
            let reg = Reg::parse(lhs.trim())
                .ok_or_else(|| ParseError(format!("unknown register '{}'", lhs.trim())))?;
            let value = parse_value(rhs)
                .ok_or_else(|| ParseError(format!("bad value '{}'", rhs.trim())))?;
            let op = match op_str {
                "==" => Op::Eq, "!=" => Op::Ne,
                "<=" => Op::Le, ">=" => Op::Ge,
                "<" => Op::Lt, ">" => Op::Gt,
                _ => unreachable!(),
            };
            clauses.push(Clause { reg, op, value });
        }
        Ok(ConditionExpr { clauses, source: source.to_string() })
    }

    pub fn evaluate(&self, regs: &RegisterSnapshot) -> bool {
        self.clauses.iter().all(|c| c.op.apply(regs.value_of(c.reg), c.value))
    }

    pub fn source(&self) -> &str { &self.source }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_evaluates_single_clause() {
        let expr = ConditionExpr::parse("A == 0x10").unwrap();
        let mut regs = RegisterSnapshot::default();
        regs.af = 0x10FF;
        assert!(expr.evaluate(&regs));
        regs.af = 0x11FF;
        assert!(!expr.evaluate(&regs));
    }

    #[test]
    fn parses_conjunction() {
        let expr = ConditionExpr::parse("BC != 0 && PC >= 0x8000").unwrap();
        let mut regs = RegisterSnapshot { bc: 1, pc: 0x9000, ..Default::default() };
        assert!(expr.evaluate(&regs));
        regs.bc = 0;
        assert!(!expr.evaluate(&regs));
    }

    #[test]
    fn rejects_unknown_register() {
        assert!(ConditionExpr::parse("ZZ == 1").is_err());
    }
}
