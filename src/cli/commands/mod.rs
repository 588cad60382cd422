pub mod db;
pub mod feed;
pub mod prefs;

use std::sync::Arc;

use anyhow::Result;
use feedstate::config::Config;
use feedstate::db::Database;

/// Open the database configured in `config`
pub fn open_database(config: &Config) -> Result<Arc<Database>> {
    Ok(Arc::new(Database::open(config.database.path.as_deref())?))
}
