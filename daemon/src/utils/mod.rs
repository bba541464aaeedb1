pub mod event;
pub mod status;
