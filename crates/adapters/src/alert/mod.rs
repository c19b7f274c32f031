pub mod log_stats_reporter;
