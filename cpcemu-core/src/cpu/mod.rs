//! The Z80 CPU core wrapper and its debugger surface: breakpoints, watchpoints,
//! I/O breakpoints and step-in/step-over/step-out control.
pub mod condition;

use std::collections::HashMap;
use z80emu::Z80NMOS;

pub use condition::{ConditionExpr, RegisterSnapshot};

/// The concrete CPU type this core emulates. The CPC's Z80A has no undocumented
/// execution quirks beyond what [`z80emu::Z80NMOS`] already models.
pub type CpuCore = Z80NMOS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Persistent,
    /// Cleared automatically after its first hit.
    Ephemeral,
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub address: u16,
    pub kind: BreakpointKind,
    pub condition: Option<ConditionExpr>,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind { Read, Write, ReadWrite }

impl WatchKind {
    fn matches(self, is_write: bool) -> bool {
        match self {
            WatchKind::Read => !is_write,
            WatchKind::Write => is_write,
            WatchKind::ReadWrite => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Watchpoint {
    pub address: u16,
    pub length: u16,
    pub kind: WatchKind,
    pub condition: Option<ConditionExpr>,
    /// Set once the watchpoint triggers; the host clears it after observing the hit.
    pub latched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection { In, Out, Both }

impl IoDirection {
    fn matches(self, is_out: bool) -> bool {
        match self {
            IoDirection::In => !is_out,
            IoDirection::Out => is_out,
            IoDirection::Both => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IoBreakpoint {
    pub port: u16,
    pub mask: u16,
    pub direction: IoDirection,
    pub condition: Option<ConditionExpr>,
}

/// Why a run loop returned control to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    FrameComplete,
    CycleCountExhausted,
    Breakpoint(u16),
    Watchpoint(usize),
    IoBreakpoint(usize),
    Halt,
    HostRequestedPause,
}

/// Tracks an in-flight step-over or step-out request: an ephemeral address the run
/// loop should stop at once reached, independent of the user's own breakpoint set.
#[derive(Debug, Clone, Copy)]
enum PendingStep {
    Over { return_address: u16 },
    Out { entry_sp: u16 },
}

/// The debugger surface layered over the raw CPU core: breakpoint/watchpoint/IO-breakpoint
/// sets plus step-in/step-over/step-out bookkeeping. Consulted by the machine's run loop at
/// every instruction boundary.
#[derive(Default)]
pub struct Debugger {
    breakpoints: HashMap<u16, Breakpoint>,
    watchpoints: Vec<Watchpoint>,
    io_breakpoints: Vec<IoBreakpoint>,
    pending_step: Option<PendingStep>,
    pub paused: bool,
}

impl Debugger {
    pub fn new() -> Self { Self::default() }

    pub fn set_breakpoint(&mut self, address: u16, kind: BreakpointKind, condition: Option<ConditionExpr>) {
        self.breakpoints.insert(address, Breakpoint { address, kind, condition, hit_count: 0 });
    }

    pub fn clear_breakpoint(&mut self, address: u16) -> Option<Breakpoint> {
        self.breakpoints.remove(&address)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> { self.breakpoints.values() }

    pub fn add_watchpoint(&mut self, wp: Watchpoint) -> usize {
        self.watchpoints.push(wp);
        self.watchpoints.len() - 1
    }

    pub fn remove_watchpoint(&mut self, index: usize) -> Option<Watchpoint> {
        if index < self.watchpoints.len() { Some(self.watchpoints.remove(index)) } else { None }
    }

    pub fn watchpoints(&self) -> &[Watchpoint] { &self.watchpoints }

    pub fn add_io_breakpoint(&mut self, bp: IoBreakpoint) -> usize {
        self.io_breakpoints.push(bp);
        self.io_breakpoints.len() - 1
    }

    pub fn remove_io_breakpoint(&mut self, index: usize) -> Option<IoBreakpoint> {
        if index < self.io_breakpoints.len() { Some(self.io_breakpoints.remove(index)) } else { None }
    }

    /// Called by the memory-access path on every read/write. Returns the index of the
    /// first matching, triggered watchpoint, latching it in the process.
    pub fn check_memory_access(&mut self, address: u16, is_write: bool, regs: &RegisterSnapshot) -> Option<usize> {
        for (i, wp) in self.watchpoints.iter_mut().enumerate() {
            let in_range = address >= wp.address && address < wp.address.wrapping_add(wp.length.max(1));
            if in_range && wp.kind.matches(is_write) {
                if wp.condition.as_ref().map_or(true, |c| c.evaluate(regs)) {
                    wp.latched = true;
                    return Some(i);
                }
            }
        }
        None
    }

    /// Called by the I/O dispatch path on every port access.
    pub fn check_io_access(&self, port: u16, is_out: bool, regs: &RegisterSnapshot) -> Option<usize> {
        self.io_breakpoints.iter().position(|bp| {
            (port & bp.mask) == (bp.port & bp.mask)
                && bp.direction.matches(is_out)
                && bp.condition.as_ref().map_or(true, |c| c.evaluate(regs))
        })
    }

    /// Called once per instruction, before execution, with the about-to-execute PC.
    /// Returns `Some(ExitReason::Breakpoint)` if a code breakpoint fires.
    pub fn check_breakpoint(&mut self, pc: u16, regs: &RegisterSnapshot) -> Option<ExitReason> {
        let hit = if let Some(bp) = self.breakpoints.get(&pc) {
            bp.condition.as_ref().map_or(true, |c| c.evaluate(regs))
        } else {
            false
        };
        if hit {
            let bp = self.breakpoints.get_mut(&pc).unwrap();
            bp.hit_count += 1;
            if bp.kind == BreakpointKind::Ephemeral {
                self.breakpoints.remove(&pc);
            }
            return Some(ExitReason::Breakpoint(pc));
        }
        None
    }

    /// Arms a step-over: the instruction at `call_site` is a CALL/RST of `call_len` bytes;
    /// the run loop should stop when PC reaches the address right after it.
    pub fn arm_step_over(&mut self, call_site: u16, call_len: u16) {
        self.pending_step = Some(PendingStep::Over { return_address: call_site.wrapping_add(call_len) });
    }

    /// Arms a step-out: remembers the current SP; the run loop stops at the first RET
    /// executed once SP has unwound past this point.
    pub fn arm_step_out(&mut self, entry_sp: u16) {
        self.pending_step = Some(PendingStep::Out { entry_sp });
    }

    pub fn clear_pending_step(&mut self) { self.pending_step = None; }

    /// Checked once per instruction boundary after execution; returns `true` if the
    /// pending step-over/step-out condition has just been satisfied.
    pub fn pending_step_satisfied(&mut self, pc: u16, sp: u16) -> bool {
        match self.pending_step {
            Some(PendingStep::Over { return_address }) if pc == return_address => {
                self.pending_step = None;
                true
            }
            Some(PendingStep::Out { entry_sp }) if sp > entry_sp => {
                self.pending_step = None;
                true
            }
            _ => false,
        }
    }

    pub fn has_pending_step(&self) -> bool { self.pending_step.is_some() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_breakpoint_clears_after_hit() {
        let mut dbg = Debugger::new();
        dbg.set_breakpoint(0x100, BreakpointKind::Ephemeral, None);
        let regs = RegisterSnapshot::default();
        assert!(dbg.check_breakpoint(0x100, &regs).is_some());
        assert!(dbg.check_breakpoint(0x100, &regs).is_none());
    }

    #[test]
    fn conditional_breakpoint_respects_condition() {
        let mut dbg = Debugger::new();
        let cond = ConditionExpr::parse("A == 0x42").unwrap();
        dbg.set_breakpoint(0x200, BreakpointKind::Persistent, Some(cond));
        let mut regs = RegisterSnapshot::default();
        regs.af = 0x0000;
        assert!(dbg.check_breakpoint(0x200, &regs).is_none());
        regs.af = 0x42FF;
        assert!(dbg.check_breakpoint(0x200, &regs).is_some());
    }

    #[test]
    fn watchpoint_latches_on_matching_access() {
        let mut dbg = Debugger::new();
        dbg.add_watchpoint(Watchpoint {
            address: 0x8000, length: 4, kind: WatchKind::Write, condition: None, latched: false,
        });
        let regs = RegisterSnapshot::default();
        assert!(dbg.check_memory_access(0x8001, false, &regs).is_none());
        let idx = dbg.check_memory_access(0x8001, true, &regs).unwrap();
        assert!(dbg.watchpoints()[idx].latched);
    }

    #[test]
    fn step_over_fires_at_return_address() {
        let mut dbg = Debugger::new();
        dbg.arm_step_over(0x100, 3);
        assert!(!dbg.pending_step_satisfied(0x050, 0xFFF0));
        assert!(dbg.pending_step_satisfied(0x103, 0xFFF0));
    }

    #[test]
    fn step_out_fires_once_sp_unwinds() {
        let mut dbg = Debugger::new();
        dbg.arm_step_out(0xFFF0);
        assert!(!dbg.pending_step_satisfied(0x100, 0xFFF0));
        assert!(dbg.pending_step_satisfied(0x100, 0xFFF2));
    }
}
