pub mod config;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod io;
pub mod notify;
pub mod paths;
pub mod policy;
pub mod run;
pub mod store;
pub mod ticket;
pub mod types;

pub use error::{Result, TierwatchError};
