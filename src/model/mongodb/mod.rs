mod collection;
mod errors;
mod id;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use errors::{is_duplicate_key_error, DUPLICATE_KEY};
pub use id::Id;
