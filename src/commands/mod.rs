// One module per subcommand.
pub mod sms;
pub mod upload;
pub mod vehicle;

pub use sms::run_sms;
pub use upload::run_upload;
pub use vehicle::run_vehicle;
