pub mod config;
pub mod intake;
mod server;

pub use config::*;
pub use intake::*;
pub use server::{DynIntakeProvider, ServerError, build_router, serve};
