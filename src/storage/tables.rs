use redb::TableDefinition;

/// File records: uuid -> FileRecord (msgpack)
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Share link index: token -> uuid (for /files/shared/ lookups)
pub const SHARE_LINKS: TableDefinition<&str, &str> = TableDefinition::new("share_links");

/// Owner index: owner id -> msgpack Vec of file UUIDs
pub const OWNER_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("owner_files");
