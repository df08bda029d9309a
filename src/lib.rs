pub mod axis;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod hal;
pub mod kp;
pub mod registry;
pub mod sim;
pub mod supervisor;
pub mod telemetry;

pub use controller::MotionController;
pub use error::MotionError;
