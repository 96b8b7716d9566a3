pub mod metrics_defs;
pub mod retry;
pub mod sql;
pub mod testutils;
