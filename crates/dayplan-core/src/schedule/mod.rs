//! The scheduling components.
//!
//! [`chain`] consults the travel and prep collaborators and [`builder`]
//! adds the anchor provider and the store; the rest is synchronous and
//! side-effect free.

pub mod builder;
pub mod chain;
pub mod flatten;
pub mod location;
pub mod ramp;
pub mod reconstruct;
pub mod reflow;

pub use builder::PlanBuilder;
pub use chain::{ChainGenerator, GenerationConfig};
pub use location::LocationStateTracker;
pub use ramp::WakeRampGenerator;
pub use reconstruct::{ChainReconstructor, ReconstructError};
pub use reflow::{ReflowError, StepDuration, StepTiming};
