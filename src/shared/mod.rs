pub mod external;
pub mod link;
pub mod lock;
pub mod signal;
