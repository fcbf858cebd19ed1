pub mod combinations;
pub mod explorer;
pub mod flow;
