// Handlers sit behind a pipeline and only read what it established:
// users (public) -> account (account required) -> workspace (membership required)
pub mod account;
pub mod users;
pub mod workspace;
