use std::collections::hash_map::Entry;
use std::collections::VecDeque;
use std::fmt::{Display, Formatter, Write};

use compact_str::CompactString;
use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::types::{CellKind, Error, LineId, NodeId};

/// A gate or fan-out point. Pin slots are dense per node; `None` marks a
/// declared-but-unconnected pin.
#[derive(Debug)]
pub struct Node {
    pub index: NodeId,
    pub name: CompactString,
    pub kind: CellKind,
    pub i_lines: Vec<Option<LineId>>,
    pub o_lines: Vec<Option<LineId>>,
}

impl Node {
    pub fn first_input(&self) -> Option<LineId> {
        self.i_lines.first().copied().flatten()
    }

    pub fn first_output(&self) -> Option<LineId> {
        self.o_lines.first().copied().flatten()
    }
}

/// A directed edge between two pins. Endpoints are node indices, never
/// owning handles: flip-flops make the graph cyclic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    pub index: LineId,
    pub driver: NodeId,
    pub driver_pin: usize,
    pub reader: NodeId,
    pub reader_pin: usize,
}

/// Connection-point descriptor: a bare node resolves to its first
/// unconnected pin, `(node, pin)` addresses an explicit position.
#[derive(Debug, Clone, Copy)]
pub enum PinRef {
    Node(NodeId),
    Pin(NodeId, usize),
}

impl From<NodeId> for PinRef {
    fn from(node: NodeId) -> Self {
        PinRef::Node(node)
    }
}

impl From<(NodeId, usize)> for PinRef {
    fn from((node, pin): (NodeId, usize)) -> Self {
        PinRef::Pin(node, pin)
    }
}

#[derive(Debug, Default)]
pub struct Circuit {
    pub name: String,
    pub nodes: Vec<Node>,
    pub lines: Vec<Line>,
    /// Primary interface nodes in port order. The simulator appends all
    /// flip-flops to form the full PPI/PPO list.
    pub interface: Vec<NodeId>,
    cells: FxHashMap<CompactString, NodeId>,
    forks: FxHashMap<CompactString, NodeId>,
}

fn set_slot(slots: &mut Vec<Option<LineId>>, pin: usize, line: LineId) {
    if pin >= slots.len() {
        slots.resize(pin + 1, None);
    }
    slots[pin] = Some(line);
}

fn first_unconnected(slots: &[Option<LineId>]) -> usize {
    slots
        .iter()
        .position(Option::is_none)
        .unwrap_or(slots.len())
}

impl Circuit {
    pub fn new(name: impl Into<String>) -> Self {
        Circuit {
            name: name.into(),
            ..Default::default()
        }
    }

    fn add_node(&mut self, name: &str, kind: CellKind) -> Result<NodeId, Error> {
        let index = self.nodes.len();
        let name = CompactString::from(name);
        let (class, map) = if kind == CellKind::Fork {
            ("fork", &mut self.forks)
        } else {
            ("cell", &mut self.cells)
        };
        match map.entry(name.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateName { class, name }),
            Entry::Vacant(e) => {
                e.insert(index);
            }
        }
        self.nodes.push(Node {
            index,
            name,
            kind,
            i_lines: Vec::new(),
            o_lines: Vec::new(),
        });
        Ok(index)
    }

    /// Add a cell of library type `kind`, resolved to a [`CellKind`] by
    /// case-insensitive prefix match. Unknown types are rejected.
    pub fn add_cell(&mut self, name: &str, kind: &str) -> Result<NodeId, Error> {
        match CellKind::parse(kind) {
            Some(kind) => self.add_node(name, kind),
            None => Err(Error::MalformedCircuit(format!(
                "unknown cell kind `{kind}` for `{name}`"
            ))),
        }
    }

    pub fn add_fork(&mut self, name: &str) -> Result<NodeId, Error> {
        self.add_node(name, CellKind::Fork)
    }

    pub fn get_or_add_fork(&mut self, name: &str) -> NodeId {
        match self.forks.get(name) {
            Some(&node) => node,
            None => self.add_node(name, CellKind::Fork).unwrap(),
        }
    }

    pub fn cell(&self, name: &str) -> Option<NodeId> {
        self.cells.get(name).copied()
    }

    pub fn fork(&self, name: &str) -> Option<NodeId> {
        self.forks.get(name).copied()
    }

    fn resolve(&self, pin: PinRef, output: bool) -> (NodeId, usize) {
        match pin {
            PinRef::Pin(node, pin) => (node, pin),
            PinRef::Node(node) => {
                let slots = if output {
                    &self.nodes[node].o_lines
                } else {
                    &self.nodes[node].i_lines
                };
                (node, first_unconnected(slots))
            }
        }
    }

    /// Connect a driver pin to a reader pin with a new line.
    pub fn connect(&mut self, driver: impl Into<PinRef>, reader: impl Into<PinRef>) -> LineId {
        let (driver, driver_pin) = self.resolve(driver.into(), true);
        let (reader, reader_pin) = self.resolve(reader.into(), false);
        let index = self.lines.len();
        self.lines.push(Line {
            index,
            driver,
            driver_pin,
            reader,
            reader_pin,
        });
        set_slot(&mut self.nodes[driver].o_lines, driver_pin, index);
        set_slot(&mut self.nodes[reader].i_lines, reader_pin, index);
        index
    }

    /// Detach both endpoints of `line` and swap-remove it, fixing the index
    /// and pin slots of the line moved into its place.
    pub fn disconnect(&mut self, line: LineId) {
        let l = self.lines[line];
        self.nodes[l.driver].o_lines[l.driver_pin] = None;
        self.nodes[l.reader].i_lines[l.reader_pin] = None;
        self.lines.swap_remove(line);
        if line < self.lines.len() {
            self.lines[line].index = line;
            let moved = self.lines[line];
            self.nodes[moved.driver].o_lines[moved.driver_pin] = Some(line);
            self.nodes[moved.reader].i_lines[moved.reader_pin] = Some(line);
        }
    }

    /// Swap-remove `node`. All incident lines must already be detached.
    pub fn remove(&mut self, node: NodeId) {
        {
            let n = &self.nodes[node];
            assert!(
                n.i_lines.iter().all(Option::is_none) && n.o_lines.iter().all(Option::is_none),
                "node `{}` still has connected lines",
                n.name
            );
            let map = if n.kind == CellKind::Fork {
                &mut self.forks
            } else {
                &mut self.cells
            };
            map.remove(&n.name);
        }
        let old = self.nodes.len() - 1;
        self.nodes.swap_remove(node);
        if node < self.nodes.len() {
            self.nodes[node].index = node;
            let name = self.nodes[node].name.clone();
            let map = if self.nodes[node].kind == CellKind::Fork {
                &mut self.forks
            } else {
                &mut self.cells
            };
            map.insert(name, node);
            let (ins, outs): (Vec<LineId>, Vec<LineId>) = {
                let n = &self.nodes[node];
                (
                    n.i_lines.iter().flatten().copied().collect(),
                    n.o_lines.iter().flatten().copied().collect(),
                )
            };
            for l in ins {
                self.lines[l].reader = node;
            }
            for l in outs {
                self.lines[l].driver = node;
            }
            for port in &mut self.interface {
                if *port == old {
                    *port = node;
                }
            }
        }
    }

    /// Kahn order over nodes. Seeded by nodes without inputs and by
    /// flip-flops, whose outputs are scheduled while their inputs never
    /// count toward successor readiness. Yields every node exactly once.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut visit_count = vec![0usize; self.nodes.len()];
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.i_lines.is_empty() || n.kind.is_ff())
            .map(|n| n.index)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            for &line in self.nodes[node].o_lines.iter().flatten() {
                let succ = self.lines[line].reader;
                visit_count[succ] += 1;
                if visit_count[succ] == self.nodes[succ].i_lines.len()
                    && !self.nodes[succ].kind.is_ff()
                {
                    queue.push_back(succ);
                }
            }
            order.push(node);
        }
        order
    }

    /// Lines in the order their drivers appear in [`Self::topological_order`].
    pub fn topological_line_order(&self) -> Vec<LineId> {
        let mut order = Vec::with_capacity(self.lines.len());
        for node in self.topological_order() {
            order.extend(self.nodes[node].o_lines.iter().flatten().copied());
        }
        order
    }

    /// Dual of [`Self::topological_order`]: seeded by zero-output nodes and
    /// flip-flops, walking lines backwards.
    pub fn reversed_topological_order(&self) -> Vec<NodeId> {
        let mut visit_count = vec![0usize; self.nodes.len()];
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.o_lines.is_empty() || n.kind.is_ff())
            .map(|n| n.index)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            for &line in self.nodes[node].i_lines.iter().flatten() {
                let pred = self.lines[line].driver;
                visit_count[pred] += 1;
                if visit_count[pred] == self.nodes[pred].o_lines.len()
                    && !self.nodes[pred].kind.is_ff()
                {
                    queue.push_back(pred);
                }
            }
            order.push(node);
        }
        order
    }

    /// All nodes in the transitive fanin of `origins` (origins included),
    /// in reverse-topological order.
    pub fn fanin(&self, origins: &[NodeId]) -> Vec<NodeId> {
        let mut marks = vec![false; self.nodes.len()];
        for &n in origins {
            marks[n] = true;
        }
        let mut cone = Vec::new();
        for node in self.reversed_topological_order() {
            if !marks[node] {
                for &line in self.nodes[node].o_lines.iter().flatten() {
                    marks[node] |= marks[self.lines[line].reader];
                }
            }
            if marks[node] {
                cone.push(node);
            }
        }
        cone
    }

    fn in_region(&self, node: NodeId) -> bool {
        self.nodes[node].o_lines.len() == 1 && !self.nodes[node].kind.is_ff()
    }

    /// Fanout-free regions: for every stem (a node with fanout other than 1,
    /// or any flip-flop), the cone of single-output non-flip-flop
    /// predecessors feeding it.
    pub fn fanout_free_regions(&self) -> Vec<(NodeId, Vec<NodeId>)> {
        let mut regions = Vec::new();
        for stem in self.reversed_topological_order() {
            let s = &self.nodes[stem];
            if s.o_lines.len() == 1 && !s.kind.is_ff() {
                continue;
            }
            let mut queue: VecDeque<NodeId> = if s.kind.is_ff() {
                s.first_input()
                    .map(|l| self.lines[l].driver)
                    .filter(|&d| self.in_region(d))
                    .into_iter()
                    .collect()
            } else {
                s.i_lines
                    .iter()
                    .flatten()
                    .map(|&l| self.lines[l].driver)
                    .filter(|&d| self.in_region(d))
                    .collect()
            };
            let mut region = Vec::new();
            while let Some(node) = queue.pop_front() {
                queue.extend(
                    self.nodes[node]
                        .i_lines
                        .iter()
                        .flatten()
                        .map(|&l| self.lines[l].driver)
                        .filter(|&d| self.in_region(d)),
                );
                region.push(node);
            }
            regions.push((stem, region));
        }
        regions
    }

    /// Line-per-node debug listing: `index:kind"name" <drivers >readers`.
    pub fn dump(&self) -> String {
        let mut out = format!("{}({})\n", self.name, self.interface.iter().join(","));
        for n in &self.nodes {
            let ins = n
                .i_lines
                .iter()
                .map(|l| match l {
                    Some(l) => format!("<{}", self.lines[*l].driver),
                    None => "<None".to_string(),
                })
                .join(" ");
            let outs = n
                .o_lines
                .iter()
                .map(|l| match l {
                    Some(l) => format!(">{}", self.lines[*l].reader),
                    None => ">None".to_string(),
                })
                .join(" ");
            writeln!(out, "{}:{}\"{}\" {} {}", n.index, n.kind, n.name, ins, outs).unwrap();
        }
        out
    }
}

impl Display for Circuit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Circuit '{}' with {} nodes, {} lines, {} ports>",
            self.name,
            self.nodes.len(),
            self.lines.len(),
            self.interface.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain3() -> (Circuit, NodeId, NodeId, NodeId) {
        let mut c = Circuit::new("chain");
        let a = c.add_fork("a").unwrap();
        let inv = c.add_cell("inv", "INVX1").unwrap();
        let y = c.add_fork("y").unwrap();
        c.connect(a, inv);
        c.connect(inv, y);
        (c, a, inv, y)
    }

    #[test]
    fn duplicate_names_per_class() {
        let mut c = Circuit::new("t");
        c.add_cell("x", "AND2X1").unwrap();
        assert!(matches!(
            c.add_cell("x", "OR2X1"),
            Err(Error::DuplicateName { class: "cell", .. })
        ));
        // fork names are a separate namespace
        c.add_fork("x").unwrap();
        assert!(c.add_fork("x").is_err());
        assert_eq!(c.get_or_add_fork("x"), c.fork("x").unwrap());
    }

    #[test]
    fn unknown_cell_kind_is_rejected() {
        let mut c = Circuit::new("t");
        assert!(matches!(
            c.add_cell("u1", "AOI21X1"),
            Err(Error::MalformedCircuit(_))
        ));
        assert!(c.cell("u1").is_none());
        assert!(c.nodes.is_empty());
    }

    #[test]
    fn connect_keeps_pins_consistent() {
        let mut c = Circuit::new("t");
        let a = c.add_fork("a").unwrap();
        let b = c.add_fork("b").unwrap();
        let g = c.add_cell("g", "NAND2X1").unwrap();
        let l0 = c.connect(a, g);
        let l1 = c.connect(b, (g, 1));
        assert_eq!(c.lines[l0].reader_pin, 0);
        assert_eq!(c.lines[l1].reader_pin, 1);
        for l in &c.lines {
            assert_eq!(c.nodes[l.driver].o_lines[l.driver_pin], Some(l.index));
            assert_eq!(c.nodes[l.reader].i_lines[l.reader_pin], Some(l.index));
        }
    }

    #[test]
    fn disconnect_swaps_and_fixes_moved_line() {
        let (mut c, a, inv, y) = chain3();
        let extra = c.add_fork("z").unwrap();
        let last = c.connect(y, extra);
        c.disconnect(0);
        // the former last line moved into slot 0
        assert_eq!(c.lines.len(), 2);
        assert_eq!(c.lines[0].index, 0);
        assert_eq!(c.lines[0].driver, y);
        assert_eq!(c.nodes[y].o_lines[0], Some(0));
        assert_eq!(c.nodes[extra].i_lines[0], Some(0));
        assert!(c.nodes[a].o_lines[0].is_none());
        assert!(c.nodes[inv].i_lines[0].is_none());
        assert!(last > 0);
    }

    #[test]
    fn remove_swaps_and_fixes_moved_node() {
        let (mut c, a, inv, y) = chain3();
        c.interface = vec![a, y];
        c.disconnect(c.nodes[a].o_lines[0].unwrap());
        c.remove(a);
        // `y` (the last node) moved into slot 0
        assert_eq!(c.nodes.len(), 2);
        assert_eq!(c.nodes[0].name, "y");
        assert_eq!(c.nodes[0].index, 0);
        assert_eq!(c.fork("y"), Some(0));
        assert_eq!(c.interface, vec![0, 0]);
        let l = c.nodes[inv].o_lines[0].unwrap();
        assert_eq!(c.lines[l].reader, 0);
        assert!(c.fork("a").is_none());
    }

    #[test]
    #[should_panic(expected = "still has connected lines")]
    fn remove_rejects_connected_node() {
        let (mut c, a, ..) = chain3();
        c.remove(a);
    }

    #[test]
    fn topological_order_visits_drivers_first() {
        let (c, a, inv, y) = chain3();
        let order = c.topological_order();
        assert_eq!(order, vec![a, inv, y]);
        assert_eq!(c.topological_line_order(), vec![0, 1]);
        assert_eq!(c.reversed_topological_order(), vec![y, inv, a]);
    }

    #[test]
    fn flipflop_breaks_cycles() {
        let mut c = Circuit::new("loop");
        let ff = c.add_cell("ff", "DFFX1").unwrap();
        let inv = c.add_cell("fb", "INVX1").unwrap();
        c.connect(ff, inv);
        c.connect(inv, ff);
        let order = c.topological_order();
        assert_eq!(order, vec![ff, inv]);
        let rev = c.reversed_topological_order();
        assert_eq!(rev.len(), 2);
        assert_eq!(rev[0], ff);
    }

    #[test]
    fn fanin_marks_the_cone() {
        let mut c = Circuit::new("t");
        let a = c.add_fork("a").unwrap();
        let b = c.add_fork("b").unwrap();
        let g = c.add_cell("g", "AND2X1").unwrap();
        let u = c.add_cell("u", "BUFX2").unwrap();
        let y = c.add_fork("y").unwrap();
        let w = c.add_fork("w").unwrap();
        c.connect(a, g);
        c.connect(b, g);
        c.connect(g, y);
        c.connect(b, u);
        c.connect(u, w);
        let cone = c.fanin(&[g]);
        assert!(cone.contains(&g) && cone.contains(&a) && cone.contains(&b));
        assert!(!cone.contains(&u) && !cone.contains(&w));
    }

    #[test]
    fn fanout_free_regions_stop_at_stems() {
        let mut c = Circuit::new("t");
        let a = c.add_fork("a").unwrap();
        let g0 = c.add_cell("g0", "BUFX2").unwrap();
        let g1 = c.add_cell("g1", "INVX1").unwrap();
        let stem = c.add_fork("stem").unwrap();
        let r0 = c.add_fork("r0").unwrap();
        let r1 = c.add_fork("r1").unwrap();
        c.connect(a, g0);
        c.connect(g0, g1);
        c.connect(g1, stem);
        c.connect(stem, r0);
        c.connect(stem, r1);
        let regions = c.fanout_free_regions();
        let (_, region) = regions
            .iter()
            .find(|(s, _)| *s == stem)
            .expect("stem region");
        assert!(region.contains(&g0) && region.contains(&g1));
    }
}
