//! Concrete backends for adsync: the Facebook Graph API source, the PostgREST
//! mirror store and the SQS job queue.

pub mod facebook;
pub mod postgrest;
pub mod queue_backends;

pub use facebook::{GraphApiClient, GraphApiConfig};
pub use postgrest::{PostgrestConfig, PostgrestStore};
