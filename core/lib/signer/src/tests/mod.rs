mod utils;

mod config_push_test;
mod sync_mode_test;
