use compact_str::CompactString;
use std::fmt::{Display, Formatter};

/// Index of a node in [`Circuit::nodes`](crate::circuit::Circuit::nodes).
pub type NodeId = usize;
/// Index of a line in [`Circuit::lines`](crate::circuit::Circuit::lines).
pub type LineId = usize;

/// Gate kinds understood by the compiler, resolved once from the library
/// type name so the simulation kernel never dispatches on strings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Pure fan-out point: one input, any number of outputs.
    Fork,
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Xnor,
    Not,
    Buf,
    /// Constant logic 0 (`TIEL`, `__CONST0__`).
    Tie0,
    /// Constant logic 1 (`TIEH`, `__CONST1__`).
    Tie1,
    Dff,
    Sdff,
}

impl CellKind {
    /// Resolve a library cell type name by case-insensitive prefix match,
    /// e.g. `NAND2X1` -> `Nand`, `sdffarx1` -> `Sdff`.
    pub fn parse(kind: &str) -> Option<CellKind> {
        use CellKind::*;
        const TABLE: &[(&str, CellKind)] = &[
            ("sdff", Sdff),
            ("dff", Dff),
            ("nand", Nand),
            ("nbuf", Buf),
            ("xnor", Xnor),
            ("xor", Xor),
            ("nor", Nor),
            ("not", Not),
            ("and", And),
            ("inv", Not),
            ("buf", Buf),
            ("or", Or),
            ("tieh", Tie1),
            ("tiel", Tie0),
            ("__const1__", Tie1),
            ("__const0__", Tie0),
            ("__fork__", Fork),
        ];
        let kind = kind.to_ascii_lowercase();
        TABLE
            .iter()
            .find(|(prefix, _)| kind.starts_with(prefix))
            .map(|&(_, k)| k)
    }

    /// Flip-flops cut the topological order: sources for their outputs,
    /// sinks for their inputs.
    pub fn is_ff(self) -> bool {
        matches!(self, CellKind::Dff | CellKind::Sdff)
    }
}

impl Display for CellKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CellKind::Fork => "__fork__",
            CellKind::And => "AND",
            CellKind::Nand => "NAND",
            CellKind::Or => "OR",
            CellKind::Nor => "NOR",
            CellKind::Xor => "XOR",
            CellKind::Xnor => "XNOR",
            CellKind::Not => "NOT",
            CellKind::Buf => "BUF",
            CellKind::Tie0 => "TIEL",
            CellKind::Tie1 => "TIEH",
            CellKind::Dff => "DFF",
            CellKind::Sdff => "SDFF",
        };
        f.write_str(name)
    }
}

/// Which entry of an SDF `(min:typ:max)` triple to read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Corner {
    Min,
    Typ,
    Max,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a {class} named `{name}` already exists")]
    DuplicateName {
        class: &'static str,
        name: CompactString,
    },
    #[error("malformed circuit: {0}")]
    MalformedCircuit(String),
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
}
