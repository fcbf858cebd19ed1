pub mod applier;
pub mod chrome;
pub mod session;
