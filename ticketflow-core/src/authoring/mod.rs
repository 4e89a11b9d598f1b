//! Graph authoring: submission DTOs, structural validation, and the
//! name-to-id resolving builder that turns a submission into a
//! persistable workflow definition.

pub mod build;
pub mod dto;
pub mod validate;
