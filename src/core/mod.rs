pub mod config;
pub mod io;
pub mod stage;
pub mod state;
