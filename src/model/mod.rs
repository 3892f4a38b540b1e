pub mod amapi;
pub mod command;
pub mod device;
