//! Storage layer: the local cache and the remote gateway (Firestore).

pub mod cache;
pub mod firestore;
pub mod store;

pub use cache::LocalCache;
pub use firestore::FirestoreGateway;
pub use store::{canonical_id, is_local_id, new_local_id, Entity, EntityKind, EntityStore, Scope};

/// Collection names as constants.
pub mod collections {
    /// User profiles (keyed by user id); parent of the per-user collections
    pub const USERS: &str = "users";
    pub const GOALS: &str = "goals";
    pub const CONVERSATIONS: &str = "conversations";
    /// Nested under `users/{u}/conversations/{c}`
    pub const MESSAGES: &str = "messages";
    /// Server-maintained leaderboard aggregates (keyed by user id)
    pub const LEADERBOARD: &str = "leaderboard";
}
