pub mod api;
pub mod bookings;
pub mod config;
pub mod fallback;
pub mod messages;
pub mod model;
pub mod session;
pub mod store;
pub mod upstream;
