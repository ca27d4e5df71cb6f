pub mod auth;
pub mod down;
pub mod plan;
pub mod status;
pub mod up;
