pub mod admin_ops;
pub mod health;
pub mod session_ops;

pub use admin_ops::{cleanup_expired, entry_metadata};
pub use health::health_check;
pub use session_ops::{clear_session, get_session, put_value, remove_value, set_permanent};
