pub mod api;
pub mod checksum;
pub mod config;
pub mod fcm;
pub mod google;
pub mod model;
pub mod registry;
pub mod state;
