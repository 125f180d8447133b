pub mod session;

pub use session::{SessionHandle, session_middleware};
