pub mod callback_server;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod logging;
pub mod oauth_client;
pub mod service_account;
pub mod sheets_client;
pub mod whoop_client;
