use rustc_hash::FxHashMap;

use ripple::bits::{PatternSet, Responses};
use ripple::circuit::Circuit;
use ripple::delay::LineTimes;
use ripple::sim::WaveSim;

const SDIM: usize = 8;

fn main() {
    let seed = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0x1CCAD);
    fastrand::seed(seed);

    let circuit = c17();
    println!("{circuit}");

    let mut times = LineTimes::new(circuit.lines.len());
    for line in 0..circuit.lines.len() {
        for value in 0..2 {
            times.set_transport(line, value, 0.05 + fastrand::f32() * 0.25);
        }
    }

    let mut sim = WaveSim::new(&circuit, &times, SDIM, 16).expect("could not compile circuit");

    let mut patterns = PatternSet::new(sim.interface().len(), SDIM);
    for port in 0..patterns.ports() {
        for vector in 0..SDIM {
            if fastrand::bool() {
                patterns.set_toggle(port, vector, fastrand::bool());
            } else {
                patterns.set_constant(port, vector, fastrand::bool());
            }
        }
    }

    sim.assign(&patterns, 0.0, 0).expect("could not assign patterns");
    sim.propagate();

    let mut responses = Responses::new(sim.interface().len(), SDIM, 1);
    // sample far past the slowest path so every output has settled
    sim.capture(&mut responses, &[1e30], 0, 0.0)
        .expect("could not capture responses");

    let ppos: FxHashMap<&str, usize> = sim
        .interface()
        .iter()
        .enumerate()
        .filter(|&(o, &node)| sim.wave_ppo(o, 0).is_some() && !circuit.nodes[node].kind.is_ff())
        .map(|(o, &node)| (circuit.nodes[node].name.as_str(), o))
        .collect();
    let mut names: Vec<&&str> = ppos.keys().collect();
    numeric_sort::sort_unstable(&mut names);

    println!("output     values   toggles  settled");
    for name in names {
        let o = ppos[*name];
        let values: String = (0..SDIM)
            .map(|v| if responses.get(o, v, 0) > 0.5 { '1' } else { '0' })
            .collect();
        let toggles: usize = (0..SDIM)
            .map(|v| {
                let node = sim.interface()[o];
                sim.toggles(circuit.nodes[node].first_input().unwrap(), v)
            })
            .sum();
        let settled = (0..SDIM)
            .map(|v| sim.lst_ppo(o, v))
            .fold(0.0f32, f32::max);
        println!("{name:<10} {values}  {toggles:>7}  {settled:>7.3}");
    }

    for (o, lst) in sim.slowest_ppos(0).into_iter().take(1) {
        if lst <= ripple::wave::TMIN {
            break;
        }
        let name = &circuit.nodes[sim.interface()[o]].name;
        println!("slowest output of vector 0: {name} settles at {lst:.3}");
    }
    println!("overflows: {}", sim.overflows());
}

/// The ISCAS-85 c17 benchmark with every net materialized as a fork.
fn c17() -> Circuit {
    let mut c = Circuit::new("c17");
    let nets = ["N1", "N2", "N3", "N6", "N7", "N10", "N11", "N16", "N19", "N22", "N23"];
    for net in nets {
        c.get_or_add_fork(net);
    }
    let gates = [
        ("NAND2_10", "N1", "N3", "N10"),
        ("NAND2_11", "N3", "N6", "N11"),
        ("NAND2_16", "N2", "N11", "N16"),
        ("NAND2_19", "N11", "N7", "N19"),
        ("NAND2_22", "N10", "N16", "N22"),
        ("NAND2_23", "N16", "N19", "N23"),
    ];
    for (name, in1, in2, out) in gates {
        let g = c.add_cell(name, "NAND2X1").expect("unique gate names");
        let in1 = c.get_or_add_fork(in1);
        let in2 = c.get_or_add_fork(in2);
        let out = c.get_or_add_fork(out);
        c.connect(in1, g);
        c.connect(in2, (g, 1));
        c.connect(g, out);
    }
    let ports = ["N1", "N2", "N3", "N6", "N7", "N22", "N23"]
        .iter()
        .map(|net| c.fork(net).expect("port net exists"))
        .collect();
    c.interface = ports;
    c
}
