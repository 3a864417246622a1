pub mod host;
pub mod interface;
pub mod ports;
pub mod probe;
pub mod range;
