pub mod bus;
pub mod classifier;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod monitor;
pub mod state;
pub mod supervisor;
pub mod tmux;

#[cfg(test)]
mod test_support;
