mod common;

mod build_tests;
mod macro_tests;
mod snapshot_tests;
mod watch_tests;
