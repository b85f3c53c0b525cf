pub mod account;
pub mod membership;

pub use account::Account;
pub use membership::{Membership, Role};
