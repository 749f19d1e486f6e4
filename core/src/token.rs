//! C1 token verifier, relocated to `relay-shared` so the REST auth extractor
//! can share it without a `shared` -> `core` dependency. Re-exported here so
//! existing call sites in this crate don't need to change.

pub use relay_shared::token::*;
