//! API request handlers

mod health;
mod pages;
mod workflows;

pub use health::*;
pub use pages::*;
pub use workflows::*;
