//! REST API endpoint modules.

pub mod stages;
pub mod status;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;
