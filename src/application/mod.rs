//! Application services layer: CRUD operations and the store seam.

pub mod crud;
pub mod error;
pub mod pagination;
pub mod repos;
