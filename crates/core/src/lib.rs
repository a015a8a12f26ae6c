#![forbid(unsafe_code)]

pub mod correction;
pub mod model;
pub mod progression;
pub mod scheduler;
pub mod text;
pub mod time;

pub use time::Clock;
