pub mod device;
pub mod operator;
