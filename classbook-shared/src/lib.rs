pub mod links;
pub mod pii;

pub use links::LinkBuilder;
pub use pii::{normalize_email, Masked};
