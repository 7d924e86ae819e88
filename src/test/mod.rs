mod store;
mod streak;
mod utils;

pub use utils::{fixed_clock, mock_remote, test_client, test_db};
