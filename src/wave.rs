use crate::delay::LineTimes;
use crate::types::LineId;

/// Largest event time: 2^127, almost positive infinity for f32. Kept finite
/// so `TMAX + delay` stays representable and comparable with `>= TMAX`.
pub const TMAX: f32 = 1.7014118346046923e38;
/// Smallest event time. An initial logic 1 is a toggle at `TMIN`.
pub const TMIN: f32 = -1.7014118346046923e38;

/// One compiled gate evaluation. `lut` bit `(b << 1) | a` is the output
/// value; `*_mem` are waveform-store rows, `*_line` index [`LineTimes`].
/// An unused second input reads the constant-0 slot with line index 0.
#[derive(Debug, Clone, Copy)]
pub struct Op {
    pub lut: u8,
    pub z_mem: usize,
    pub a_mem: usize,
    pub b_mem: usize,
    pub z_line: LineId,
    pub a_line: LineId,
    pub b_line: LineId,
}

/// Flat `rows × width` f32 storage, row-major so one row is contiguous
/// across the stimulus columns. Cell 0 of every slot holds its capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveStore {
    width: usize,
    data: Vec<f32>,
}

impl WaveStore {
    pub fn new(rows: usize, width: usize) -> Self {
        WaveStore {
            width,
            data: vec![TMAX; rows * width],
        }
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn get(&self, row: usize, s: usize) -> f32 {
        self.data[row * self.width + s]
    }

    #[inline]
    pub fn set(&mut self, row: usize, s: usize, v: f32) {
        self.data[row * self.width + s] = v;
    }

    pub fn fill_row(&mut self, row: usize, v: f32) {
        let at = row * self.width;
        self.data[at..at + self.width].fill(v);
    }

    /// Raw entries of the slot whose capacity cell is at `mem`, column `s`:
    /// `capacity - 1` cells, event times followed by the `TMAX` terminator.
    pub fn slot(&self, mem: usize, s: usize) -> impl Iterator<Item = f32> + '_ {
        let cap = self.get(mem, s) as usize;
        (mem + 1..mem + cap).map(move |row| self.get(row, s))
    }
}

/// Merge the two input event streams of `op` into its output slot for
/// stimulus column `s`, applying per-line transport delays and suppressing
/// pulses narrower than the per-line rejection threshold. Returns the
/// number of events dropped against the capacity limit.
///
/// The write cursor `z_cur` starts at `lut & 1`, so it doubles as the
/// current output value through its parity: an initial `TMIN` toggle is
/// emitted exactly when the steady output at all-zero inputs is 1.
pub fn wave_eval(op: Op, state: &mut WaveStore, s: usize, times: &LineTimes) -> u64 {
    let Op {
        lut,
        z_mem,
        a_mem,
        b_mem,
        a_line,
        b_line,
        ..
    } = op;
    let mut overflows = 0u64;
    let z_cap = state.get(z_mem, s) as usize;

    let mut a_cur = 0usize;
    let mut b_cur = 0usize;
    let mut z_cur = (lut & 1) as usize;
    if z_cur == 1 {
        state.set(z_mem + 1, s, TMIN);
    }

    let mut a = state.get(a_mem + 1, s) + times.transport(a_line, z_cur ^ 1);
    let mut b = state.get(b_mem + 1, s) + times.transport(b_line, z_cur ^ 1);

    let mut previous_t = TMIN;
    let mut current_t = a.min(b);
    let mut inputs = 0usize;

    while current_t < TMAX {
        let z_val = z_cur & 1;
        let next_t;
        let thresh;
        if b < a {
            b_cur += 1;
            b = state.get(b_mem + 1 + b_cur, s) + times.transport(b_line, z_val);
            thresh = times.rejection(b_line, z_val ^ 1);
            inputs ^= 2;
            next_t = b;
        } else {
            a_cur += 1;
            a = state.get(a_mem + 1 + a_cur, s) + times.transport(a_line, z_val);
            thresh = times.rejection(a_line, z_val ^ 1);
            inputs ^= 1;
            next_t = a;
        }

        if (z_cur & 1) != ((lut >> inputs) & 1) as usize {
            // a toggle lands in z_mem if there is space left, and it is
            // either the first one, or the following toggle is earlier
            // (delay skew), or the pulse it closes is wide enough
            if z_cur >= z_cap - 2 {
                z_cur -= 1;
                overflows += 1;
                previous_t = if z_cur > 0 {
                    state.get(z_mem + z_cur, s)
                } else {
                    TMIN
                };
            } else if z_cur == 0 || next_t < current_t || (current_t - previous_t) > thresh {
                state.set(z_mem + 1 + z_cur, s, current_t);
                previous_t = current_t;
                z_cur += 1;
            } else {
                z_cur -= 1;
                previous_t = if z_cur > 0 {
                    state.get(z_mem + z_cur, s)
                } else {
                    TMIN
                };
            }
        }
        current_t = a.min(b);
    }

    state.set(z_mem + 1 + z_cur, s, TMAX);
    overflows
}
