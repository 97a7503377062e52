pub mod kernel;
pub mod proc;
