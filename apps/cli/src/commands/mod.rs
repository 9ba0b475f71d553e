pub mod checkpoints;
pub mod train;
