pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers the binary wires into the router.
pub use rest::health_handler;
pub use ws_handler::ws_handler;
