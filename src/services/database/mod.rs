// Per-dialect connectors behind one Connector trait
pub mod connector;
pub mod introspection;
pub mod mysql;
pub mod postgresql;

pub use connector::{
    execute_with_policy, Connector, ConnectorSettings, ExecuteQuery, QueryIntent, QueryKind, Session,
};
pub use introspection::{attach_referenced_by, compose_introspection};
pub use mysql::MySqlConnector;
pub use postgresql::PostgresConnector;
