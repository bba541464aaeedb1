pub mod management;
pub mod status;
