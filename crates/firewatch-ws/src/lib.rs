pub mod client;
pub mod parser;
pub mod subscriptions;

pub use client::*;
pub use parser::*;
pub use subscriptions::*;
