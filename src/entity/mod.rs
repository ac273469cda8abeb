pub mod audit_logs;
pub mod cart_items;
pub mod carts;
pub mod event_attendees;
pub mod events;
pub mod order_items;
pub mod orders;
pub mod products;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use carts::Entity as Carts;
pub use event_attendees::Entity as EventAttendees;
pub use events::Entity as Events;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use users::Entity as Users;
