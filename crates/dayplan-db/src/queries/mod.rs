pub mod exit_times;
pub mod plans;
pub mod time_blocks;
