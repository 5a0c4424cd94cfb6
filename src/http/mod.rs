//! HTTP building blocks: MIME detection, byte-range resolution, and response
//! construction shared by all three dispatch tiers.

pub mod mime;
pub mod range;
pub mod response;

pub use response::{empty_body, full_body, Body};
