//! Daily plan execution-chain scheduler.
//!
//! Builds a minute-accurate day around fixed calendar anchors: preparation,
//! travel, attendance, and recovery steps per anchor, a graduated wake ramp,
//! and the home/away timeline those imply. Time blocks in the
//! [`store::PlanStore`] are the system of record; execution chains are
//! always a projection of them.

pub mod collab;
pub mod config;
pub mod domain;
pub mod error;
pub mod schedule;
pub mod service;
pub mod store;

pub use config::SchedulerConfig;
pub use domain::{Anchor, DailyPlan, ExecutionChain, PlanInput};
pub use error::PlanError;
pub use service::PlanService;
