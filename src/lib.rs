pub mod dispatch;
pub mod engine;
pub mod logging;
pub mod notify;
pub mod presence;
pub mod state_machine;
pub mod storage;
pub mod web_client;
