//! HubSpot CRM REST API access.

mod client;
mod objects;

pub use client::{ContactName, CrmClient, ModificationMetadata, PropertyDefinition, PropertyOption};
pub use objects::{api_object_type, is_known_object, DEFAULT_OPTION_OBJECTS};
