//! Schema migrations, applied with cetane.

mod m0001_initial;
mod m0002_archive_results;

use cetane::prelude::*;

/// All migrations in dependency order.
pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_initial::migration());
    reg.register(m0002_archive_results::migration());
    reg
}
