pub mod ai;
pub mod flakiness;
pub mod health;
pub mod runs;
pub mod webhook;
