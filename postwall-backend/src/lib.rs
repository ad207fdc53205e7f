pub mod change;
pub mod client;
pub mod memory;
mod realtime;
pub mod record;
pub mod rest;
