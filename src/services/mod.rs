pub mod catalog_service;
pub mod description;
pub mod metadata_store;
pub mod object_store;
