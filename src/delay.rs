use rustc_hash::FxHashMap;

use crate::circuit::Circuit;
use crate::types::{CellKind, Corner, LineId, NodeId};
use crate::{instance_name, pin_name_ref};

/// An SDF `(min:typ:max)` value triple. Absent triples are all zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Triple {
    pub min: f32,
    pub typ: f32,
    pub max: f32,
}

impl Triple {
    pub fn new(min: f32, typ: f32, max: f32) -> Self {
        Triple { min, typ, max }
    }

    /// Same value at every corner.
    pub fn splat(v: f32) -> Self {
        Triple::new(v, v, v)
    }

    pub fn get(self, corner: Corner) -> f32 {
        match corner {
            Corner::Min => self.min,
            Corner::Typ => self.typ,
            Corner::Max => self.max,
        }
    }

    /// One corner, or the arithmetic mean of several.
    pub fn select(self, corners: &[Corner]) -> f32 {
        if corners.is_empty() {
            return self.typ;
        }
        corners.iter().map(|&c| self.get(c)).sum::<f32>() / corners.len() as f32
    }

    fn is_zero(self) -> bool {
        self.min == 0.0 && self.typ == 0.0 && self.max == 0.0
    }
}

/// A cell `IOPATH` record: delay from input pin to output pin.
#[derive(Debug, Clone)]
pub struct IoPath {
    pub ipin: String,
    pub opin: String,
    pub rise: Triple,
    pub fall: Triple,
}

/// An `INTERCONNECT` record between two pin paths (`instance/pin`, or a bare
/// identifier for a port).
#[derive(Debug, Clone)]
pub struct Interconnect {
    pub orig: String,
    pub dest: String,
    pub rise: Triple,
    pub fall: Triple,
}

/// Delay records extracted from one SDF file, keyed by instance name.
#[derive(Debug, Default)]
pub struct DelayFile {
    pub name: String,
    pub cells: FxHashMap<String, Vec<IoPath>>,
    pub interconnects: Vec<Interconnect>,
}

/// Knobs for [`DelayFile::line_times`].
#[derive(Debug, Clone)]
pub struct DelayOptions {
    /// Corner(s) to read from each triple; several corners average.
    pub corners: Vec<Corner>,
    /// Apply `INTERCONNECT` records.
    pub interconnect: bool,
    /// Apply clock-to-output delays of scan flip-flops.
    pub ff_delays: bool,
}

impl Default for DelayOptions {
    fn default() -> Self {
        DelayOptions {
            corners: vec![Corner::Typ],
            interconnect: true,
            ff_delays: true,
        }
    }
}

/// Dense per-line delay table: `lines × {transport, rejection} × {0, 1}`.
/// The value axis is the logic value the destination assumes *after* the
/// transition, so a rising output transition reads `v = 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct LineTimes {
    lines: usize,
    data: Vec<f32>,
}

impl LineTimes {
    pub fn new(lines: usize) -> Self {
        LineTimes {
            lines,
            data: vec![0.0; lines * 4],
        }
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Transport delay added to an event arriving at the line's reader.
    #[inline]
    pub fn transport(&self, line: LineId, value: usize) -> f32 {
        self.data[line * 4 + value]
    }

    /// Minimum width of a pulse ending in `value`; narrower pulses are
    /// suppressed at the line's reader.
    #[inline]
    pub fn rejection(&self, line: LineId, value: usize) -> f32 {
        self.data[line * 4 + 2 + value]
    }

    pub fn set_transport(&mut self, line: LineId, value: usize, delay: f32) {
        self.data[line * 4 + value] = delay;
    }

    pub fn set_rejection(&mut self, line: LineId, value: usize, threshold: f32) {
        self.data[line * 4 + 2 + value] = threshold;
    }

    fn add_transport(&mut self, line: LineId, value: usize, delay: f32) {
        self.data[line * 4 + value] += delay;
    }

    /// Cell IOPATH delays double as pulse-rejection thresholds.
    fn add_both(&mut self, line: LineId, value: usize, delay: f32) {
        self.data[line * 4 + value] += delay;
        self.data[line * 4 + 2 + value] += delay;
    }

    fn halve(&mut self, line: LineId) {
        for k in 0..4 {
            self.data[line * 4 + k] /= 2.0;
        }
    }

    fn block_sum(&self, line: LineId) -> f32 {
        self.data[line * 4..line * 4 + 4].iter().sum()
    }
}

/// SDF instance names may carry escapes the netlist source stripped.
fn find_cell(circuit: &Circuit, name: &str) -> Option<NodeId> {
    circuit.cell(name).or_else(|| {
        let name = name.replace('\\', "");
        circuit
            .cell(&name)
            .or_else(|| circuit.cell(&name.replace('[', "_").replace(']', "_")))
    })
}

/// `(posedge A1)` / `(negedge A1)` -> `A1`.
fn strip_edge(pin: &str) -> &str {
    pin.strip_prefix("(posedge ")
        .or_else(|| pin.strip_prefix("(negedge "))
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(pin)
}

fn split_pin_path<'a>(path: &'a str, default_pin: &'a str) -> (String, &'a str) {
    if path.contains('/') {
        (instance_name(path), pin_name_ref(path))
    } else {
        (path.to_string(), default_pin)
    }
}

impl DelayFile {
    pub fn new(name: impl Into<String>) -> Self {
        DelayFile {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Materialize the records into a dense [`LineTimes`] table for
    /// `circuit`. `pin_index` maps library pin names to pin positions.
    ///
    /// IOPATH delays attach to the addressed *input* line, except for scan
    /// flip-flops where only the `(posedge CLK)` path counts and the delay
    /// attaches to the *output* line. Interconnect delays attach to the fork
    /// output line reaching the destination pin. Records naming unknown
    /// cells or pins are skipped with a warning.
    pub fn line_times(
        &self,
        circuit: &Circuit,
        pin_index: impl Fn(CellKind, &str) -> usize,
        options: &DelayOptions,
    ) -> LineTimes {
        let mut times = LineTimes::new(circuit.lines.len());
        for (cell_name, iopaths) in &self.cells {
            for io in iopaths {
                if io.rise.is_zero() && io.fall.is_zero() {
                    continue;
                }
                let Some(cell) = find_cell(circuit, cell_name) else {
                    log::warn!("cell from SDF not found in circuit: {cell_name}");
                    continue;
                };
                let node = &circuit.nodes[cell];
                let rise = io.rise.select(&options.corners);
                let fall = io.fall.select(&options.corners);
                if node.kind == CellKind::Sdff {
                    if !io.ipin.starts_with("(posedge CLK") || !options.ff_delays {
                        continue;
                    }
                    let opin = pin_index(node.kind, &io.opin);
                    match node.o_lines.get(opin).copied().flatten() {
                        Some(line) => {
                            times.add_both(line, 1, rise);
                            times.add_both(line, 0, fall);
                        }
                        None => log::warn!(
                            "output pin {} of cell {cell_name} from SDF not connected",
                            io.opin
                        ),
                    }
                } else {
                    let mut ipin = pin_index(node.kind, &io.ipin);
                    let mut take_avg = false;
                    if matches!(node.kind, CellKind::Xor | CellKind::Xnor) {
                        ipin = pin_index(node.kind, strip_edge(&io.ipin));
                        if let Some(line) = node.i_lines.get(ipin).copied().flatten() {
                            take_avg = times.block_sum(line) > 0.0;
                        }
                    }
                    match node.i_lines.get(ipin).copied().flatten() {
                        Some(line) => {
                            times.add_both(line, 1, rise);
                            times.add_both(line, 0, fall);
                            if take_avg {
                                times.halve(line);
                            }
                        }
                        None => log::warn!(
                            "input pin {} of cell {cell_name} from SDF not connected",
                            io.ipin
                        ),
                    }
                }
            }
        }

        if !options.interconnect {
            return times;
        }
        for ic in &self.interconnects {
            if ic.rise.is_zero() && ic.fall.is_zero() {
                continue;
            }
            let (cn1, pn1) = split_pin_path(&ic.orig, "Z");
            let (cn2, pn2) = split_pin_path(&ic.dest, "IN");
            let Some(c1) = find_cell(circuit, &cn1) else {
                log::warn!("cell from SDF not found in circuit: {cn1}");
                continue;
            };
            let Some(c2) = find_cell(circuit, &cn2) else {
                log::warn!("cell from SDF not found in circuit: {cn2}");
                continue;
            };
            let p1 = pin_index(circuit.nodes[c1].kind, pn1);
            let p2 = pin_index(circuit.nodes[c2].kind, pn2);
            let Some(o_line) = circuit.nodes[c1].o_lines.get(p1).copied().flatten() else {
                log::warn!("pin {} of interconnect source {cn1} not connected", pn1);
                continue;
            };
            let Some(i_line) = circuit.nodes[c2].i_lines.get(p2).copied().flatten() else {
                log::warn!("pin {} of interconnect destination {cn2} not connected", pn2);
                continue;
            };
            // multi-fanout must be materialized as a fork between the cells
            assert_eq!(
                circuit.lines[o_line].reader, circuit.lines[i_line].driver,
                "interconnect endpoints do not meet at a fork"
            );
            assert_eq!(circuit.lines[o_line].reader_pin, 0, "fork input pin must be 0");
            times.add_transport(i_line, 1, ic.rise.select(&options.corners));
            times.add_transport(i_line, 0, ic.fall.select(&options.corners));
        }
        times
    }
}
