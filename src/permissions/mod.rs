//! Hierarchical command permissions.
//!
//! Rules are `+`/`-` prefixed dotted domains (`+sp.chat.*`, `-sp.chat.quote`).
//! Each role carries one set; a member's sets are merged from the most senior
//! role down and the most specific matching rule decides.

pub mod hierarchy;
pub mod policy;
pub mod resolver;
pub mod rule;
pub mod set;

pub use hierarchy::{Role, RoleHierarchyProvider, SerenityHierarchy};
pub use policy::{custom_command_domain, CommandPermissionPolicy, OwnerLevelConfig, CUSTOM_COMMAND_ROOT};
pub use resolver::{PermissionResolver, Verdict, VerdictSource};
pub use rule::{validate_domain, PermissionRule, Sign};
pub use set::{PermissionSet, Seniority};
