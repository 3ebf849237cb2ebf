//! Redb table definitions.

use redb::TableDefinition;

// Flat record namespace; forward and inverse records share it and are
// told apart by their key prefix.
pub const RECORDS: TableDefinition<&str, &str> = TableDefinition::new("records");
