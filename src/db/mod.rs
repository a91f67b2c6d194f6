mod schema;
mod storage;

pub use storage::{keys, Storage, DB_VERSION};
