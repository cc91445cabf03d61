use std::cmp::Reverse;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use crate::bits::{PatternSet, Responses};
use crate::circuit::Circuit;
use crate::delay::LineTimes;
use crate::types::{CellKind, Error, LineId, NodeId};
use crate::wave::{wave_eval, Op, WaveStore, TMAX, TMIN};

/// Capacity of the scratch and interface input slots: room for one
/// transition plus the sentinels.
const IFACE_TDIM: usize = 4;

/// Level-scheduled waveform simulator over a compiled circuit.
///
/// Construction compiles the circuit into a linear op list grouped into
/// levels of independent ops and allocates the waveform store; the circuit
/// is only borrowed during compilation. [`Self::assign`] lowers packed
/// stimulus vectors into the interface input slots, [`Self::propagate`]
/// runs the kernel level by level and [`Self::capture`] samples the
/// pseudo-primary outputs.
pub struct WaveSim {
    sdim: usize,
    overflows: u64,
    line_times: LineTimes,
    /// line index -> waveform-store row of its slot
    lmap: Vec<usize>,
    /// primary ports followed by all flip-flops
    interface: Vec<NodeId>,
    /// interface entry -> PPI input-slot row
    tmap: Vec<Option<usize>>,
    /// interface entry -> PPO line slot row
    cmap: Vec<Option<usize>>,
    state: WaveStore,
    ops: Vec<Op>,
    level_starts: Vec<usize>,
    level_stops: Vec<usize>,
}

impl WaveSim {
    /// Compile with a uniform waveform capacity per line.
    pub fn new(
        circuit: &Circuit,
        line_times: &LineTimes,
        sdim: usize,
        tdim: usize,
    ) -> Result<Self, Error> {
        Self::with_capacities(circuit, line_times, sdim, vec![tdim; circuit.lines.len()])
    }

    /// Compile with per-line waveform capacities.
    pub fn with_capacities(
        circuit: &Circuit,
        line_times: &LineTimes,
        sdim: usize,
        tdim: Vec<usize>,
    ) -> Result<Self, Error> {
        if line_times.lines() != circuit.lines.len() {
            return Err(Error::ShapeMismatch {
                context: "line delay table",
                expected: circuit.lines.len(),
                got: line_times.lines(),
            });
        }
        if tdim.len() != circuit.lines.len() {
            return Err(Error::ShapeMismatch {
                context: "waveform capacities",
                expected: circuit.lines.len(),
                got: tdim.len(),
            });
        }
        if let Some(&cap) = tdim.iter().find(|&&cap| cap < IFACE_TDIM) {
            return Err(Error::MalformedCircuit(format!(
                "waveform capacity {cap} is below the {IFACE_TDIM}-cell minimum"
            )));
        }

        let mut lmap = Vec::with_capacity(tdim.len());
        let mut lsize = 0usize;
        for &cap in &tdim {
            lmap.push(lsize);
            lsize += cap;
        }

        let mut interface = circuit.interface.clone();
        interface.extend(circuit.nodes.iter().filter(|n| n.kind.is_ff()).map(|n| n.index));
        let mut interface_pos: FxHashMap<NodeId, usize> = FxHashMap::default();
        for (i, &node) in interface.iter().enumerate() {
            interface_pos.insert(node, i);
        }

        let zero = lsize;
        let tmp = zero + IFACE_TDIM;
        let inputs_offset = tmp + IFACE_TDIM;
        let rows = lsize + (2 + interface.len()) * IFACE_TDIM;
        let mut state = WaveStore::new(rows, sdim);
        for (line, &cap) in tdim.iter().enumerate() {
            state.fill_row(lmap[line], cap as f32);
        }
        state.fill_row(zero, IFACE_TDIM as f32);
        state.fill_row(tmp, IFACE_TDIM as f32);
        for i in 0..interface.len() {
            state.fill_row(inputs_offset + i * IFACE_TDIM, IFACE_TDIM as f32);
        }

        let tmap = interface
            .iter()
            .enumerate()
            .map(|(i, &node)| {
                (!circuit.nodes[node].o_lines.is_empty())
                    .then_some(inputs_offset + i * IFACE_TDIM)
            })
            .collect();
        let cmap = interface
            .iter()
            .map(|&node| circuit.nodes[node].first_input().map(|line| lmap[line]))
            .collect();

        let mut ops: Vec<Op> = Vec::new();
        for nid in circuit.topological_order() {
            let node = &circuit.nodes[nid];
            if let Some(&i) = interface_pos.get(&nid) {
                // interface nodes copy their PPI input slot onto every line
                // they drive; flip-flops invert onto QN
                let inp = inputs_offset + i * IFACE_TDIM;
                if let Some(line) = node.first_output() {
                    ops.push(Op {
                        lut: 0b1010,
                        z_mem: lmap[line],
                        a_mem: inp,
                        b_mem: zero,
                        z_line: line,
                        a_line: 0,
                        b_line: 0,
                    });
                }
                if node.kind.is_ff() {
                    if let Some(line) = node.o_lines.get(1).copied().flatten() {
                        ops.push(Op {
                            lut: 0b0101,
                            z_mem: lmap[line],
                            a_mem: inp,
                            b_mem: zero,
                            z_line: line,
                            a_line: 0,
                            b_line: 0,
                        });
                    }
                } else {
                    for &line in node.o_lines.iter().skip(1).flatten() {
                        ops.push(Op {
                            lut: 0b1010,
                            z_mem: lmap[line],
                            a_mem: inp,
                            b_mem: zero,
                            z_line: line,
                            a_line: 0,
                            b_line: 0,
                        });
                    }
                }
                continue;
            }

            let (i0_line, i0_mem) = match node.first_input() {
                Some(line) => (line, lmap[line]),
                None => (0, zero),
            };
            let (i1_line, i1_mem) = match node.i_lines.get(1).copied().flatten() {
                Some(line) => (line, lmap[line]),
                None => (0, zero),
            };
            if node.kind == CellKind::Fork {
                for &line in node.o_lines.iter().flatten() {
                    ops.push(Op {
                        lut: 0b1010,
                        z_mem: lmap[line],
                        a_mem: i0_mem,
                        b_mem: zero,
                        z_line: line,
                        a_line: i0_line,
                        b_line: i1_line,
                    });
                }
                continue;
            }
            if node.o_lines.iter().flatten().count() > 1 {
                return Err(Error::MalformedCircuit(format!(
                    "cell `{}` of kind {} drives more than one line",
                    node.name, node.kind
                )));
            }
            let (o0_line, o0_mem) = match node.first_output() {
                Some(line) => (line, lmap[line]),
                None => {
                    log::warn!("no outputs for {}", node.name);
                    (0, tmp)
                }
            };
            let gate = |lut: u8, a_mem: usize, b_mem: usize| Op {
                lut,
                z_mem: o0_mem,
                a_mem,
                b_mem,
                z_line: o0_line,
                a_line: i0_line,
                b_line: i1_line,
            };
            ops.push(match node.kind {
                CellKind::And => gate(0b1000, i0_mem, i1_mem),
                CellKind::Nand => gate(0b0111, i0_mem, i1_mem),
                CellKind::Or => gate(0b1110, i0_mem, i1_mem),
                CellKind::Nor => gate(0b0001, i0_mem, i1_mem),
                CellKind::Xor => gate(0b0110, i0_mem, i1_mem),
                CellKind::Xnor => gate(0b1001, i0_mem, i1_mem),
                CellKind::Not => gate(0b0101, i0_mem, zero),
                CellKind::Buf => gate(0b1010, i0_mem, zero),
                CellKind::Tie1 => gate(0b0101, zero, zero),
                CellKind::Tie0 => gate(0b1010, zero, zero),
                CellKind::Fork | CellKind::Dff | CellKind::Sdff => unreachable!(),
            });
        }

        // each op goes to the lowest level strictly above the rows it reads
        let mut row_level = vec![0u32; rows];
        let mut leveled: Vec<(u32, Op)> = ops
            .into_iter()
            .map(|op| {
                let level = 1 + row_level[op.a_mem].max(row_level[op.b_mem]);
                row_level[op.z_mem] = level;
                (level, op)
            })
            .collect();
        leveled.sort_by_key(|&(level, _)| level);
        let ops: Vec<Op> = leveled.iter().map(|&(_, op)| op).collect();
        let mut level_starts = Vec::new();
        let mut level_stops = Vec::new();
        for (i, &(level, _)) in leveled.iter().enumerate() {
            if i == 0 || leveled[i - 1].0 != level {
                if i > 0 {
                    level_stops.push(i);
                }
                level_starts.push(i);
            }
        }
        if !leveled.is_empty() {
            level_stops.push(leveled.len());
        }

        Ok(WaveSim {
            sdim,
            overflows: 0,
            line_times: line_times.clone(),
            lmap,
            interface,
            tmap,
            cmap,
            state,
            ops,
            level_starts,
            level_stops,
        })
    }

    pub fn sdim(&self) -> usize {
        self.sdim
    }

    pub fn lines(&self) -> usize {
        self.lmap.len()
    }

    /// Primary ports followed by all flip-flops; the index into this slice
    /// is the PPI/PPO address used by `assign` and `capture`.
    pub fn interface(&self) -> &[NodeId] {
        &self.interface
    }

    /// Total number of events dropped against slot capacities so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn line_delay(&self, line: LineId, value: usize) -> f32 {
        self.line_times.transport(line, value)
    }

    pub fn set_line_delay(&mut self, line: LineId, value: usize, delay: f32) {
        self.line_times.set_transport(line, value, delay);
    }

    /// Lower up to `sdim` stimulus vectors, starting at `offset`, into the
    /// interface input slots. A set initial plane becomes a `TMIN` event; a
    /// set toggle plane with agreeing initial/final planes becomes a toggle
    /// at `time`.
    pub fn assign(&mut self, patterns: &PatternSet, time: f32, offset: usize) -> Result<(), Error> {
        if patterns.ports() != self.interface.len() {
            return Err(Error::ShapeMismatch {
                context: "pattern interface",
                expected: self.interface.len(),
                got: patterns.ports(),
            });
        }
        let nvectors = patterns.nvectors().saturating_sub(offset).min(self.sdim);
        for (i, mem) in self.tmap.iter().enumerate() {
            let Some(mem) = *mem else { continue };
            for p in 0..nvectors {
                let vector = p + offset;
                let a0 = patterns.get(i, 0, vector);
                let a1 = patterns.get(i, 1, vector);
                let a2 = patterns.get(i, 2, vector);
                let mut toggle = 0;
                if a0 {
                    self.state.set(mem + 1, p, TMIN);
                    toggle += 1;
                }
                if a2 && a0 == a1 {
                    self.state.set(mem + 1 + toggle, p, time);
                    toggle += 1;
                }
                self.state.set(mem + 1 + toggle, p, TMAX);
            }
        }
        Ok(())
    }

    /// Propagate all stimulus columns level by level.
    pub fn propagate(&mut self) {
        self.propagate_vectors(self.sdim);
    }

    /// Propagate only the first `sdim` stimulus columns.
    pub fn propagate_vectors(&mut self, sdim: usize) {
        let sdim = sdim.min(self.sdim);
        for (&start, &stop) in self.level_starts.iter().zip_eq(&self.level_stops) {
            for i in start..stop {
                let op = self.ops[i];
                for s in 0..sdim {
                    self.overflows += wave_eval(op, &mut self.state, s, &self.line_times);
                }
            }
        }
    }

    /// Sample every pseudo-primary output at `times` into `out`, columns
    /// `offset..`. With `sigma == 0` values are hard 0/1; otherwise each is
    /// the expected value under Gaussian jitter of deviation `sigma` on
    /// every event.
    pub fn capture(
        &self,
        out: &mut Responses,
        times: &[f32],
        offset: usize,
        sigma: f32,
    ) -> Result<(), Error> {
        if out.ports() != self.interface.len() {
            return Err(Error::ShapeMismatch {
                context: "capture interface",
                expected: self.interface.len(),
                got: out.ports(),
            });
        }
        if out.times() != times.len() {
            return Err(Error::ShapeMismatch {
                context: "capture times",
                expected: times.len(),
                got: out.times(),
            });
        }
        let nvectors = out.vectors().saturating_sub(offset).min(self.sdim);
        for (i, mem) in self.cmap.iter().enumerate() {
            let Some(mem) = *mem else { continue };
            for p in 0..nvectors {
                for (t, v) in self.vals_at(mem, p, times, sigma).into_iter().enumerate() {
                    out.set(i, p + offset, t, v);
                }
            }
        }
        Ok(())
    }

    fn vals_at(&self, mem: usize, s: usize, times: &[f32], sigma: f32) -> Vec<f32> {
        let s_sqrt2 = sigma * std::f32::consts::SQRT_2;
        let mut m = 0.5f32;
        let mut accs = vec![0.0f32; times.len()];
        let mut values = vec![0u8; times.len()];
        for t in self.state.slot(mem, s) {
            if t >= TMAX {
                break;
            }
            for (idx, &time) in times.iter().enumerate() {
                if t < time {
                    values[idx] ^= 1;
                }
            }
            m = -m;
            if t <= TMIN {
                continue;
            }
            if s_sqrt2 > 0.0 {
                for (idx, &time) in times.iter().enumerate() {
                    accs[idx] += m * (1.0 + libm::erff((t - time) / s_sqrt2));
                }
            }
        }
        if s_sqrt2 > 0.0 {
            if m < 0.0 {
                for acc in &mut accs {
                    *acc += 1.0;
                }
            }
            accs
        } else {
            values.into_iter().map(f32::from).collect()
        }
    }

    fn slot_events(&self, mem: usize, s: usize) -> Vec<f32> {
        let mut events = Vec::new();
        for t in self.state.slot(mem, s) {
            events.push(t);
            if t >= TMAX {
                break;
            }
        }
        events
    }

    fn finite_events(&self, mem: usize, s: usize) -> impl Iterator<Item = f32> + '_ {
        self.state
            .slot(mem, s)
            .take_while(|&t| t < TMAX)
            .filter(|&t| t > TMIN)
    }

    /// Events of `line` in column `s`, up to and including the terminator.
    pub fn wave(&self, line: LineId, s: usize) -> Vec<f32> {
        self.slot_events(self.lmap[line], s)
    }

    /// Waveform assigned to the PPI of interface entry `i`.
    pub fn wave_ppi(&self, i: usize, s: usize) -> Option<Vec<f32>> {
        self.tmap[i].map(|mem| self.slot_events(mem, s))
    }

    /// Waveform observed at the PPO of interface entry `o`.
    pub fn wave_ppo(&self, o: usize, s: usize) -> Option<Vec<f32>> {
        self.cmap[o].map(|mem| self.slot_events(mem, s))
    }

    /// Earliest finite arrival on `line`, or `TMAX` if it never toggles.
    pub fn eat(&self, line: LineId, s: usize) -> f32 {
        self.finite_events(self.lmap[line], s).fold(TMAX, f32::min)
    }

    /// Latest finite stabilization time of PPO `o`, or `TMIN`.
    pub fn lst_ppo(&self, o: usize, s: usize) -> f32 {
        match self.cmap[o] {
            Some(mem) => self.finite_events(mem, s).fold(TMIN, f32::max),
            None => TMIN,
        }
    }

    /// Number of finite toggles on `line`.
    pub fn toggles(&self, line: LineId, s: usize) -> usize {
        self.finite_events(self.lmap[line], s).count()
    }

    pub fn vals(&self, line: LineId, s: usize, times: &[f32], sigma: f32) -> Vec<f32> {
        self.vals_at(self.lmap[line], s, times, sigma)
    }

    pub fn val(&self, line: LineId, s: usize, time: f32, sigma: f32) -> f32 {
        self.vals_at(self.lmap[line], s, &[time], sigma)[0]
    }

    pub fn vals_ppo(&self, o: usize, s: usize, times: &[f32], sigma: f32) -> Option<Vec<f32>> {
        self.cmap[o].map(|mem| self.vals_at(mem, s, times, sigma))
    }

    pub fn val_ppo(&self, o: usize, s: usize, time: f32, sigma: f32) -> Option<f32> {
        self.cmap[o].map(|mem| self.vals_at(mem, s, &[time], sigma)[0])
    }

    /// Pseudo-primary outputs ranked by latest stabilization time, slowest
    /// first.
    pub fn slowest_ppos(&self, s: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = (0..self.interface.len())
            .filter(|&o| self.cmap[o].is_some())
            .map(|o| (o, self.lst_ppo(o, s)))
            .collect();
        ranked.sort_by_key(|&(_, t)| Reverse(OrderedFloat(t)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn inv_chain() -> (Circuit, LineId, LineId) {
        let mut c = Circuit::new("inv");
        let input = c.add_fork("in").unwrap();
        let inv = c.add_cell("u1", "INVX1").unwrap();
        let out = c.add_fork("out").unwrap();
        let l_in = c.connect(input, inv);
        let l_out = c.connect(inv, out);
        c.interface = vec![input, out];
        (c, l_in, l_out)
    }

    fn c17() -> Circuit {
        let mut c = Circuit::new("c17");
        let n1 = c.add_fork("N1").unwrap();
        let n2 = c.add_fork("N2").unwrap();
        let n3 = c.add_fork("N3").unwrap();
        let n6 = c.add_fork("N6").unwrap();
        let n7 = c.add_fork("N7").unwrap();
        let g10 = c.add_cell("NAND2_10", "NAND2X1").unwrap();
        let g11 = c.add_cell("NAND2_11", "NAND2X1").unwrap();
        let g16 = c.add_cell("NAND2_16", "NAND2X1").unwrap();
        let g19 = c.add_cell("NAND2_19", "NAND2X1").unwrap();
        let g22 = c.add_cell("NAND2_22", "NAND2X1").unwrap();
        let g23 = c.add_cell("NAND2_23", "NAND2X1").unwrap();
        let n10 = c.add_fork("N10").unwrap();
        let n11 = c.add_fork("N11").unwrap();
        let n16 = c.add_fork("N16").unwrap();
        let n19 = c.add_fork("N19").unwrap();
        let n22 = c.add_fork("N22").unwrap();
        let n23 = c.add_fork("N23").unwrap();
        c.connect(n1, g10);
        c.connect(n3, g10);
        c.connect(n3, g11);
        c.connect(n6, g11);
        c.connect(n2, g16);
        c.connect(n7, g19);
        c.connect(g10, n10);
        c.connect(g11, n11);
        c.connect(n11, (g16, 1));
        c.connect(n11, (g19, 1));
        c.connect(g16, n16);
        c.connect(g19, n19);
        c.connect(n10, g22);
        c.connect(n16, (g22, 1));
        c.connect(n16, g23);
        c.connect(n19, (g23, 1));
        c.connect(g22, n22);
        c.connect(g23, n23);
        c.interface = vec![n1, n2, n3, n6, n7, n22, n23];
        c
    }

    fn c17_truth(v: [bool; 5]) -> [bool; 2] {
        let [i1, i2, i3, i6, i7] = v;
        let n10 = !(i1 && i3);
        let n11 = !(i3 && i6);
        let n16 = !(i2 && n11);
        let n19 = !(n11 && i7);
        [!(n10 && n16), !(n16 && n19)]
    }

    #[test]
    fn inverter_pipeline() {
        let (c, l_in, l_out) = inv_chain();
        let mut times = LineTimes::new(c.lines.len());
        times.set_transport(l_in, 0, 0.2);
        let mut sim = WaveSim::new(&c, &times, 4, 16).unwrap();
        let mut patterns = PatternSet::new(2, 4);
        patterns.set_toggle(0, 0, false);
        patterns.set_constant(0, 1, true);
        sim.assign(&patterns, 1.0, 0).unwrap();
        sim.propagate();

        assert_eq!(sim.wave_ppi(0, 0), Some(vec![1.0, TMAX]));
        assert_eq!(sim.wave(l_in, 0), vec![1.0, TMAX]);
        assert_eq!(sim.wave(l_out, 0), vec![TMIN, 1.2, TMAX]);
        // constant-1 input settles to a constant-0 output
        assert_eq!(sim.wave(l_out, 1), vec![TMAX]);
        // untouched columns read as constant 0, inverted to constant 1
        assert_eq!(sim.wave(l_out, 2), vec![TMIN, TMAX]);

        assert_eq!(sim.eat(l_out, 0), 1.2);
        assert_eq!(sim.lst_ppo(1, 0), 1.2);
        assert_eq!(sim.toggles(l_out, 0), 1);
        assert_eq!(sim.val(l_out, 0, 1.1, 0.0), 1.0);
        assert_eq!(sim.val(l_out, 0, 2.0, 0.0), 0.0);
        assert_eq!(sim.wave_ppo(1, 0), Some(vec![TMIN, 1.2, TMAX]));
        assert_eq!(sim.overflows(), 0);
        assert_eq!(sim.slowest_ppos(0), vec![(1, 1.2)]);
    }

    #[test]
    fn c17_hard_capture_matches_truth_table() {
        let c = c17();
        let times = LineTimes::new(c.lines.len());
        let mut sim = WaveSim::new(&c, &times, 8, 16).unwrap();
        let mut patterns = PatternSet::new(sim.interface().len(), 8);
        fastrand::seed(7);
        let mut expected = Vec::new();
        for vector in 0..8 {
            let v: [bool; 5] = std::array::from_fn(|_| fastrand::bool());
            for (port, &bit) in v.iter().enumerate() {
                patterns.set_constant(port, vector, bit);
            }
            expected.push(c17_truth(v));
        }
        sim.assign(&patterns, 0.0, 0).unwrap();
        sim.propagate();
        let mut out = Responses::new(sim.interface().len(), 8, 1);
        sim.capture(&mut out, &[1.0], 0, 0.0).unwrap();
        for (vector, want) in expected.iter().enumerate() {
            assert_eq!(out.get(5, vector, 0), want[0] as u8 as f32);
            assert_eq!(out.get(6, vector, 0), want[1] as u8 as f32);
        }
        // constant stimuli leave every line free of finite toggles
        for line in 0..sim.lines() {
            for s in 0..8 {
                assert_eq!(sim.toggles(line, s), 0);
                assert_eq!(*sim.wave(line, s).last().unwrap(), TMAX);
            }
        }
        assert_eq!(sim.overflows(), 0);
    }

    #[test]
    fn levels_are_independent() {
        let c = c17();
        let times = LineTimes::new(c.lines.len());
        let sim = WaveSim::new(&c, &times, 2, 8).unwrap();
        assert!(!sim.ops.is_empty());
        let mut seen_stops = 0;
        for (&start, &stop) in sim.level_starts.iter().zip(&sim.level_stops) {
            assert!(start < stop);
            let mut writes = HashSet::new();
            let mut reads = HashSet::new();
            for op in &sim.ops[start..stop] {
                assert!(writes.insert(op.z_mem), "duplicate write in level");
                reads.insert(op.a_mem);
                reads.insert(op.b_mem);
            }
            assert!(writes.is_disjoint(&reads), "read/write overlap in level");
            seen_stops = stop;
        }
        assert_eq!(seen_stops, sim.ops.len());
    }

    #[test]
    fn repeated_propagate_is_idempotent() {
        let c = c17();
        let times = LineTimes::new(c.lines.len());
        let mut sim = WaveSim::new(&c, &times, 4, 16).unwrap();
        let mut patterns = PatternSet::new(sim.interface().len(), 4);
        for port in 0..5 {
            patterns.set_toggle(port, 0, port % 2 == 0);
            patterns.set_constant(port, 1, true);
        }
        sim.assign(&patterns, 2.0, 0).unwrap();
        sim.propagate();
        let snapshot = sim.state.clone();
        sim.propagate();
        assert_eq!(sim.state, snapshot);
    }

    #[test]
    fn dff_bridges_ppi_to_ppo() {
        let mut c = Circuit::new("ff");
        let pi = c.add_fork("pi").unwrap();
        let ff = c.add_cell("ff0", "DFFX1").unwrap();
        let po = c.add_fork("po").unwrap();
        let l_d = c.connect(pi, ff);
        let l_q = c.connect(ff, po);
        c.interface = vec![pi, po];

        let times = LineTimes::new(c.lines.len());
        let mut sim = WaveSim::new(&c, &times, 2, 8).unwrap();
        assert_eq!(sim.interface(), &[pi, po, ff]);

        let mut patterns = PatternSet::new(3, 2);
        patterns.set_constant(0, 0, false);
        patterns.set_toggle(2, 0, false); // flip-flop state rises at t=5
        patterns.set_constant(2, 1, false);
        sim.assign(&patterns, 5.0, 0).unwrap();
        sim.propagate();

        assert_eq!(sim.wave_ppi(2, 0), Some(vec![5.0, TMAX]));
        assert_eq!(sim.wave(l_q, 0), vec![5.0, TMAX]);
        let mut out = Responses::new(3, 2, 1);
        sim.capture(&mut out, &[10.0], 0, 0.0).unwrap();
        assert_eq!(out.get(1, 0, 0), 1.0); // PPO sees the risen state
        assert_eq!(out.get(1, 1, 0), 0.0);
        assert_eq!(out.get(2, 0, 0), 0.0); // next state follows the D line
        let _ = l_d;
    }

    #[test]
    fn dff_qn_inverts_the_state() {
        let mut c = Circuit::new("ffqn");
        let ff = c.add_cell("ff0", "DFFX1").unwrap();
        let q = c.add_fork("q").unwrap();
        let qn = c.add_fork("qn").unwrap();
        let l_q = c.connect(ff, q);
        let l_qn = c.connect((ff, 1), qn);
        c.interface = vec![q, qn];

        let times = LineTimes::new(c.lines.len());
        let mut sim = WaveSim::new(&c, &times, 1, 8).unwrap();
        let mut patterns = PatternSet::new(3, 1);
        patterns.set_toggle(2, 0, false);
        sim.assign(&patterns, 3.0, 0).unwrap();
        sim.propagate();
        assert_eq!(sim.wave(l_q, 0), vec![3.0, TMAX]);
        assert_eq!(sim.wave(l_qn, 0), vec![TMIN, 3.0, TMAX]);
    }

    #[test]
    fn smoothed_capture_is_a_probability() {
        let (c, _, l_out) = inv_chain();
        let times = LineTimes::new(c.lines.len());
        let mut sim = WaveSim::new(&c, &times, 2, 16).unwrap();
        let mut patterns = PatternSet::new(2, 2);
        patterns.set_toggle(0, 0, false); // inverter output falls at t=0
        patterns.set_toggle(0, 1, true); // inverter output rises at t=0
        sim.assign(&patterns, 0.0, 0).unwrap();
        sim.propagate();

        // falling output sampled after the edge: mostly 0
        let fall = sim.val(l_out, 0, 1.0, 1.0);
        assert!((fall - 0.158655).abs() < 1e-4, "got {fall}");
        // rising output sampled after the edge: mostly 1
        let rise = sim.val(l_out, 1, 1.0, 1.0);
        assert!((rise - 0.841345).abs() < 1e-4, "got {rise}");
        // far from any edge the expectation collapses to the hard value
        assert!((sim.val(l_out, 1, 50.0, 1.0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn glitch_overflows_are_counted() {
        let mut c = Circuit::new("glitch");
        let a = c.add_fork("a").unwrap();
        let b = c.add_fork("b").unwrap();
        let d = c.add_fork("d").unwrap();
        let g1 = c.add_cell("x1", "XOR2X1").unwrap();
        let g2 = c.add_cell("x2", "XOR2X1").unwrap();
        let f = c.add_fork("f").unwrap();
        let out = c.add_fork("out").unwrap();
        let l_a = c.connect(a, g1);
        let l_b = c.connect(b, (g1, 1));
        c.connect(g1, f);
        c.connect(f, g2);
        let l_d = c.connect(d, (g2, 1));
        let l_out = c.connect(g2, out);
        c.interface = vec![a, b, d, out];

        let mut times = LineTimes::new(c.lines.len());
        times.set_transport(l_b, 0, 1.0);
        times.set_transport(l_b, 1, 1.0);
        times.set_transport(l_d, 0, 2.5);
        times.set_transport(l_d, 1, 2.5);
        let mut tdim = vec![16; c.lines.len()];
        tdim[l_out] = 4;
        let mut sim = WaveSim::with_capacities(&c, &times, 2, tdim).unwrap();

        let mut patterns = PatternSet::new(4, 2);
        for port in 0..3 {
            patterns.set_toggle(port, 0, false);
            patterns.set_constant(port, 1, false);
        }
        sim.assign(&patterns, 1.0, 0).unwrap();
        sim.propagate();

        // three toggles reach a capacity-4 slot: the third write retracts
        assert_eq!(sim.overflows(), 1);
        assert_eq!(sim.wave(l_out, 0), vec![1.0, TMAX]);
        assert_eq!(sim.wave(l_out, 1), vec![TMAX]);
        assert_eq!(sim.toggles(l_a, 0), 1);
    }

    #[test]
    fn shape_mismatches_are_fatal() {
        let (c, ..) = inv_chain();
        let times = LineTimes::new(c.lines.len());
        let mut sim = WaveSim::new(&c, &times, 2, 8).unwrap();
        let patterns = PatternSet::new(5, 2);
        assert!(matches!(
            sim.assign(&patterns, 0.0, 0),
            Err(Error::ShapeMismatch { context: "pattern interface", .. })
        ));
        let mut out = Responses::new(2, 2, 3);
        assert!(matches!(
            sim.capture(&mut out, &[1.0], 0, 0.0),
            Err(Error::ShapeMismatch { context: "capture times", .. })
        ));
        assert!(WaveSim::new(&c, &times, 2, 3).is_err());
        assert!(WaveSim::with_capacities(&c, &times, 2, vec![8]).is_err());
        let wrong = LineTimes::new(7);
        assert!(WaveSim::new(&c, &wrong, 2, 8).is_err());
    }

    #[test]
    fn multi_output_cell_is_malformed() {
        let mut c = Circuit::new("bad");
        let a = c.add_fork("a").unwrap();
        let g = c.add_cell("g", "BUFX2").unwrap();
        let y0 = c.add_fork("y0").unwrap();
        let y1 = c.add_fork("y1").unwrap();
        c.connect(a, g);
        c.connect(g, y0);
        c.connect((g, 1), y1);
        let times = LineTimes::new(c.lines.len());
        assert!(matches!(
            WaveSim::new(&c, &times, 1, 8),
            Err(Error::MalformedCircuit(_))
        ));
    }

    #[test]
    fn unknown_cell_kind_is_malformed() {
        let mut c = Circuit::new("bad");
        assert!(matches!(
            c.add_cell("u1", "AOI21X1"),
            Err(Error::MalformedCircuit(_))
        ));
        // nothing reaches the compiler: the node was never added
        let times = LineTimes::new(c.lines.len());
        let sim = WaveSim::new(&c, &times, 1, 8).unwrap();
        assert!(sim.interface().is_empty());
    }

    #[test]
    fn tie_cells_pin_their_lines() {
        let mut c = Circuit::new("tie");
        let hi = c.add_cell("hi", "TIEH").unwrap();
        let lo = c.add_cell("lo", "TIEL").unwrap();
        let yh = c.add_fork("yh").unwrap();
        let yl = c.add_fork("yl").unwrap();
        let l_hi = c.connect(hi, yh);
        let l_lo = c.connect(lo, yl);
        c.interface = vec![yh, yl];
        let times = LineTimes::new(c.lines.len());
        let mut sim = WaveSim::new(&c, &times, 1, 8).unwrap();
        sim.propagate();
        assert_eq!(sim.wave(l_hi, 0), vec![TMIN, TMAX]);
        assert_eq!(sim.wave(l_lo, 0), vec![TMAX]);
        assert_eq!(sim.val(l_hi, 0, 0.0, 0.0), 1.0);
        assert_eq!(sim.val(l_lo, 0, 0.0, 0.0), 0.0);
    }
}
