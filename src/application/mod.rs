pub mod activity_aggregator;
pub mod commands;
pub mod oauth;
pub mod retry;
pub mod running_sync;
pub mod sheet_update;
pub mod week_grid;
