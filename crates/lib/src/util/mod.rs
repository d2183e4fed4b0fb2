//! Helpers shared by several modules: content hashing, plus node and
//! filesystem fixtures for unit tests.

pub mod hash;

#[cfg(test)]
pub mod testutil;
