pub mod catalog;
pub mod payment;
pub mod purchase;
pub mod session;
pub mod shell;
pub mod tickets;
