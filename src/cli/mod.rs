pub mod commands;
pub mod config;
pub mod url_list;
