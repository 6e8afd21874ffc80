//! The memory-operator algebra.
//!
//! Every recurrent memory variant in this crate expresses its update as an
//! associative binary operator over an opaque state. That single property is
//! what lets the time recurrence be evaluated either as a strict left fold
//! (online inference) or as a parallel prefix scan (training) with identical
//! results.
//!
//! Static dispatch only: each variant is a concrete type implementing
//! `MemoryAlgebra`, selected through the closed `AlgebraKind` tag at
//! construction time. There is no runtime registry.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Capability set every memory operator must implement.
///
/// Laws (checked by the property suites, not by the compiler):
/// - closure: `combine` maps two states of identical shape to a state of
///   that shape;
/// - associativity: `combine(combine(x, y), z) == combine(x, combine(y, z))`
///   within floating tolerance, for all states reachable via `wrap` and
///   prior `combine` calls. Violating this silently breaks the equivalence
///   between parallel-scan training and sequential inference.
pub trait MemoryAlgebra {
    /// Opaque state carried across timesteps.
    type State: Clone + std::fmt::Debug + Send + Sync;

    /// Flat element count of one state (for diagnostics and sizing).
    fn state_len(&self) -> usize;

    /// Width of the feature vector produced by `read_out`.
    fn out_len(&self) -> usize;

    /// Width of the feature vector consumed by `wrap`.
    fn in_len(&self) -> usize;

    /// Starting state used before the first real input is combined.
    /// Independent per invocation.
    fn initial_state(&self, rng: &mut ChaCha8Rng) -> Self::State;

    /// Lift one timestep's feature vector into the state representation.
    /// The wrapped value is consumed by the scan that receives it and is
    /// never aliased back.
    fn wrap(&self, input: &[f32]) -> Self::State;

    /// Associative combine. Pure and total over reachable states.
    fn combine(&self, a: &Self::State, b: &Self::State) -> Self::State;

    /// Project a state to the externally visible feature vector.
    fn read_out(&self, state: &Self::State, out: &mut [f32]);

    /// Learnable parameter buffers, in a fixed order. The trainer flattens
    /// these; the order must match `param_views_mut`.
    fn param_views(&self) -> Vec<&[f32]>;

    /// Mutable access to the same buffers, same order.
    fn param_views_mut(&mut self) -> Vec<&mut [f32]>;

    fn num_params(&self) -> usize {
        self.param_views().iter().map(|v| v.len()).sum()
    }
}

/// Monoid-capable operators additionally expose a two-sided identity,
/// used to seed scans and to reset state at episode boundaries.
pub trait MonoidAlgebra: MemoryAlgebra {
    /// `combine(identity(), x) == x == combine(x, identity())`.
    fn identity(&self) -> Self::State;
}

/// Closed set of operator variants. Selection happens here, at construction,
/// not by runtime type inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgebraKind {
    /// Exponential-memory linear recurrence: (decay, value) pairs.
    LinearRecurrence,
    /// Input-gated linear recurrence (gate and candidate both learned).
    GatedRecurrence,
    /// Log-domain Bayesian evidence accumulation.
    LogBayes,
    /// Unit-modulus rotor composition on a bounded manifold.
    SphericalRotor,
    /// Magnitude-priority selective merge (semigroup, no identity).
    SelectiveState,
}

impl AlgebraKind {
    pub const ALL: [AlgebraKind; 5] = [
        AlgebraKind::LinearRecurrence,
        AlgebraKind::GatedRecurrence,
        AlgebraKind::LogBayes,
        AlgebraKind::SphericalRotor,
        AlgebraKind::SelectiveState,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AlgebraKind::LinearRecurrence => "linear_recurrence",
            AlgebraKind::GatedRecurrence => "gated_recurrence",
            AlgebraKind::LogBayes => "log_bayes",
            AlgebraKind::SphericalRotor => "spherical_rotor",
            AlgebraKind::SelectiveState => "selective_state",
        }
    }
}

// ── Episode segmentation ─────────────────────────────────────────────

/// Scan element extended with an episode-start flag.
///
/// `combine` on phases discards everything left of a start marker, so packing
/// several independent episodes into one sequence cannot leak state across
/// their boundaries. The extension preserves associativity: a start on the
/// right operand absorbs the left operand no matter how the sequence was
/// parenthesized.
#[derive(Clone, Debug)]
pub struct Phase<S> {
    pub start: bool,
    pub state: S,
}

impl<S: Clone> Phase<S> {
    pub fn new(start: bool, state: S) -> Self {
        Phase { start, state }
    }
}

/// Combine two phases under the given operator.
pub fn combine_phase<A: MemoryAlgebra>(
    op: &A,
    a: &Phase<A::State>,
    b: &Phase<A::State>,
) -> Phase<A::State> {
    if b.start {
        b.clone()
    } else {
        Phase {
            start: a.start,
            state: op.combine(&a.state, &b.state),
        }
    }
}
