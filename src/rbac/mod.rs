//! Organization → team → resource permission derivation.

pub mod directory;
pub mod protected;
pub mod resolver;
pub mod roles;

pub use directory::StoreDirectory;
pub use protected::Protected;
pub use resolver::{AccessDirectory, AccessPath, AccessResolver};
pub use roles::{validate_access_list, Capability, Grant, RbacError, ResourceKind, Role};
