pub mod community;
pub mod router;
pub mod server;
pub mod state;
pub mod wallet;
