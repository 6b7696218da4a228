pub mod join_logs;
pub mod results;
