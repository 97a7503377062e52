pub mod clock;
pub mod console;
pub mod cpu;
pub mod fault;
pub mod heap;
pub mod inst;
pub mod memory;
pub mod os;
pub mod trace;
