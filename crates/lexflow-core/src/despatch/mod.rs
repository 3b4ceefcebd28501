//! Despatch - expands a rule's action templates for one message

mod builder;
mod template;

pub use builder::{duplicate_action_kind, ActionBundleBuilder, BuiltBundle, UnresolvedPlaceholder};
pub use template::{Rendered, TemplateContext, DIRECTORY_PLACEHOLDERS, MESSAGE_PLACEHOLDERS};
