pub mod auth;
pub mod cart;
pub mod events;
pub mod orders;
pub mod products;
