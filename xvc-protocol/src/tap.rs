//! The 16-state JTAG TAP controller of IEEE 1149.1.
//!
//! The TAP is a pure function of its current state and the TMS bit sampled on
//! each rising TCK edge. Both the server session and the MPSSE shift engine
//! fold the TMS vector of every shift through [`TapState::step`]; the
//! invariant is that after any scan both copies agree.

/// TAP controller state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TapState {
    TestLogicReset = 0,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

use TapState::*;

/// `TRANSITIONS[state][tms]` is the state entered on the next TCK edge.
const TRANSITIONS: [[TapState; 2]; 16] = [
    [RunTestIdle, TestLogicReset], // TestLogicReset
    [RunTestIdle, SelectDrScan],   // RunTestIdle
    [CaptureDr, SelectIrScan],     // SelectDrScan
    [ShiftDr, Exit1Dr],            // CaptureDr
    [ShiftDr, Exit1Dr],            // ShiftDr
    [PauseDr, UpdateDr],           // Exit1Dr
    [PauseDr, Exit2Dr],            // PauseDr
    [ShiftDr, UpdateDr],           // Exit2Dr
    [RunTestIdle, SelectDrScan],   // UpdateDr
    [CaptureIr, TestLogicReset],   // SelectIrScan
    [ShiftIr, Exit1Ir],            // CaptureIr
    [ShiftIr, Exit1Ir],            // ShiftIr
    [PauseIr, UpdateIr],           // Exit1Ir
    [PauseIr, Exit2Ir],            // PauseIr
    [ShiftIr, UpdateIr],           // Exit2Ir
    [RunTestIdle, SelectDrScan],   // UpdateIr
];

impl TapState {
    /// Advances the TAP by one TCK edge with the given TMS level.
    pub fn step(self, tms: bool) -> TapState {
        TRANSITIONS[self as usize][tms as usize]
    }

    /// True in the two states where TDI is shifted in and TDO out.
    pub fn is_shift(self) -> bool {
        matches!(self, ShiftDr | ShiftIr)
    }

    pub fn name(self) -> &'static str {
        match self {
            TestLogicReset => "Test-Logic-Reset",
            RunTestIdle => "Run-Test/Idle",
            SelectDrScan => "Select-DR-Scan",
            CaptureDr => "Capture-DR",
            ShiftDr => "Shift-DR",
            Exit1Dr => "Exit1-DR",
            PauseDr => "Pause-DR",
            Exit2Dr => "Exit2-DR",
            UpdateDr => "Update-DR",
            SelectIrScan => "Select-IR-Scan",
            CaptureIr => "Capture-IR",
            ShiftIr => "Shift-IR",
            Exit1Ir => "Exit1-IR",
            PauseIr => "Pause-IR",
            Exit2Ir => "Exit2-IR",
            UpdateIr => "Update-IR",
        }
    }
}

impl Default for TapState {
    fn default() -> Self {
        TestLogicReset
    }
}

impl std::fmt::Display for TapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
