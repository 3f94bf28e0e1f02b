pub mod record;
pub mod store;

pub use record::{Credentials, MirrorRecord, UNREACHABLE};
pub use store::{InMemoryMirrorStore, MirrorRegistry, MirrorStore};
