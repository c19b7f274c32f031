pub mod cli_refresher;
pub mod event_reader;
