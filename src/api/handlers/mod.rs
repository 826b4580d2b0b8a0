pub mod datasource;
pub mod filters;
pub mod runner;
