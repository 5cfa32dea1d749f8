//! Stochastic bit-transform ("quantum gate") injected after a reduction step.
//!
//! A gate is a pure function of `(value, gate)`. Randomness lives entirely in
//! the caller: [`draw_gate`] decides from the worker's own RNG whether a gate
//! fires this step and which index it uses. That keeps every source testable
//! without an RNG.

use rand::Rng;

use crate::error::PerturbationError;

/// Number of distinct shift amounts in [`XorShiftGate`]; gate indices wrap
/// around this cycle.
pub const SHIFT_CYCLE: u32 = 8;

/// A keyed transform over the gate index space `[0, gates())`.
pub trait PerturbationSource: Send + Sync {
    /// Size of the gate index space.
    fn gates(&self) -> u32;

    /// Applies gate `gate` to `value`.
    ///
    /// # Errors
    ///
    /// Implementations return [`PerturbationError`] for out-of-range gates or
    /// outputs that are not positive integers. The engine treats any error as
    /// identity.
    fn apply(&self, value: u64, gate: u32) -> Result<u64, PerturbationError>;
}

/// Gray-code style shift-xor, masked to `mask_bits` low bits:
/// `(x ^ (x >> (1 + gate % 8))) & mask`.
///
/// Gate 0 with an 8-bit mask is the classic `(x ^ (x >> 1)) & 0xFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorShiftGate {
    gates: u32,
    mask: u64,
}

impl XorShiftGate {
    /// Creates a gate table of `gates` entries masking to `mask_bits` bits.
    ///
    /// `mask_bits` is clamped to `1..=63`.
    pub fn new(gates: u32, mask_bits: u32) -> Self {
        let bits = mask_bits.clamp(1, 63);
        Self {
            gates,
            mask: (1u64 << bits) - 1,
        }
    }

    /// The output mask.
    pub fn mask(&self) -> u64 {
        self.mask
    }
}

impl Default for XorShiftGate {
    fn default() -> Self {
        Self::new(100, 8)
    }
}

impl PerturbationSource for XorShiftGate {
    fn gates(&self) -> u32 {
        self.gates
    }

    fn apply(&self, value: u64, gate: u32) -> Result<u64, PerturbationError> {
        if gate >= self.gates {
            return Err(PerturbationError::GateOutOfRange {
                gate,
                gates: self.gates,
            });
        }
        let shift = 1 + gate % SHIFT_CYCLE;
        match (value ^ (value >> shift)) & self.mask {
            0 => Err(PerturbationError::Degenerate { value, gate }),
            out => Ok(out),
        }
    }
}

/// Adapts a closure into a [`PerturbationSource`].
///
/// ```
/// use vcpu_engine::perturbation::{FnSource, PerturbationSource};
///
/// let plus_one = FnSource::new(4, |v, _gate| Ok(v + 1));
/// assert_eq!(plus_one.apply(9, 3), Ok(10));
/// ```
pub struct FnSource<F> {
    gates: u32,
    f: F,
}

impl<F> FnSource<F>
where
    F: Fn(u64, u32) -> Result<u64, PerturbationError> + Send + Sync,
{
    /// Wraps `f` with a gate index space of `gates`.
    pub fn new(gates: u32, f: F) -> Self {
        Self { gates, f }
    }
}

impl<F> PerturbationSource for FnSource<F>
where
    F: Fn(u64, u32) -> Result<u64, PerturbationError> + Send + Sync,
{
    fn gates(&self) -> u32 {
        self.gates
    }

    fn apply(&self, value: u64, gate: u32) -> Result<u64, PerturbationError> {
        (self.f)(value, gate)
    }
}

impl std::fmt::Debug for dyn PerturbationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PerturbationSource(gates={})", self.gates())
    }
}

/// Draws from `rng` whether a gate fires and, if so, which one.
///
/// With `probability <= 0` (or an empty gate table) the RNG is not touched,
/// so an unperturbed run consumes no randomness at all.
pub fn draw_gate<R: Rng + ?Sized>(rng: &mut R, probability: f64, gates: u32) -> Option<u32> {
    if probability <= 0.0 || gates == 0 || probability.is_nan() {
        return None;
    }
    if rng.gen_bool(probability.min(1.0)) {
        Some(rng.gen_range(0..gates))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn gate_zero_is_classic_gray_code() {
        let g = XorShiftGate::default();
        for x in 1..=1000u64 {
            let expected = (x ^ (x >> 1)) & 0xFF;
            let got = g.apply(x, 0);
            if expected == 0 {
                assert!(got.is_err());
            } else {
                assert_eq!(got, Ok(expected));
            }
        }
    }

    #[test]
    fn gates_are_deterministic() {
        let g = XorShiftGate::new(100, 8);
        for gate in 0..100 {
            assert_eq!(g.apply(12345, gate), g.apply(12345, gate));
        }
    }

    #[test]
    fn out_of_range_gate_fails() {
        let g = XorShiftGate::new(10, 8);
        assert_eq!(
            g.apply(7, 10),
            Err(PerturbationError::GateOutOfRange { gate: 10, gates: 10 })
        );
    }

    #[test]
    fn degenerate_output_fails() {
        // 512 ^ 256 has no bits below 2^8.
        let g = XorShiftGate::new(1, 8);
        assert_eq!(
            g.apply(512, 0),
            Err(PerturbationError::Degenerate { value: 512, gate: 0 })
        );
    }

    #[test]
    fn zero_probability_never_draws() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut untouched = rng.clone();
        for _ in 0..100 {
            assert_eq!(draw_gate(&mut rng, 0.0, 100), None);
        }
        assert_eq!(rng.gen::<u64>(), untouched.gen::<u64>());
    }

    #[test]
    fn certain_probability_always_draws_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let gate = draw_gate(&mut rng, 1.0, 5);
            assert!(matches!(gate, Some(g) if g < 5));
        }
    }
}
