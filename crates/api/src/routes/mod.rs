pub mod orders;
pub mod stock;
pub mod system;
