use crate::types::CellKind;

/// Canonical pin-position mapping for the supported cell library. Inputs
/// occupy `A*`/`IN*` positions with the scan pins interleaved (`SE`, `SI`,
/// `CLK` for scan cells); outputs default to 0 with `QN` at 1. Unknown pin
/// names map to position 0.
pub fn pin_index(kind: CellKind, pin: &str) -> usize {
    if kind == CellKind::Sdff && pin == "QN" {
        return 1;
    }
    if kind == CellKind::Dff && pin == "QN" {
        return 1;
    }
    if kind == CellKind::Dff && pin == "CLK" {
        return 1;
    }
    match pin {
        "A2" | "IN2" | "SE" => 1,
        "A3" | "IN3" | "SI" => 2,
        "A4" | "IN4" | "CLK" => 3,
        "A5" | "IN5" | "RSTB" => 4,
        "A6" | "IN6" | "SETB" => 5,
        _ => 0,
    }
}
