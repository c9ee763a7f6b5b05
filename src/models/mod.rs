pub mod session;
pub mod upstream;

pub use session::*;
pub use upstream::*;
