pub mod connection_manager;
pub mod database;
pub mod filter_parser;
pub mod query_builder;
pub mod query_runner;
pub mod schema_info;

pub use connection_manager::{ConnectionManager, ConnectionScope, ConnectorFactory, DriverConnectorFactory};
pub use filter_parser::{FilterParser, ParsedFilter};
pub use query_runner::{CredentialCipher, InspectionHandle, PassthroughCipher, QueryRunner, RunnerSettings};
pub use schema_info::SchemaInfo;
