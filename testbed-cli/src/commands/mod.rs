pub mod sweep;
pub mod up;
pub mod validate;
