pub mod generate;
pub mod health;
pub mod router;

pub use router::{dispatch_request, normalize_base_path};
