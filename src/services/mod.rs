pub mod backup;
pub mod bulk;
pub mod change;
pub mod generator;
pub mod pause;
pub mod persistence;
pub mod remote;
pub mod session;
