use redb::TableDefinition;

/// Tables keyed by record id holding msgpack-encoded records
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Manuscript records: uuid -> Manuscript (msgpack)
pub const MANUSCRIPTS: RecordTable = TableDefinition::new("manuscripts");

/// Author index: author user id -> msgpack Vec of manuscript UUIDs
pub const AUTHOR_MANUSCRIPTS: RecordTable = TableDefinition::new("author_manuscripts");

/// User records: uuid -> User (msgpack)
pub const USERS: RecordTable = TableDefinition::new("users");

/// Email index: lowercased email -> user uuid
pub const USER_EMAILS: TableDefinition<&str, &str> = TableDefinition::new("user_emails");

/// Password reset index: sha256(token) -> user uuid
pub const RESET_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("reset_tokens");

/// Expert requests: uuid -> ExpertRequest (msgpack)
pub const EXPERT_REQUESTS: RecordTable = TableDefinition::new("expert_requests");
