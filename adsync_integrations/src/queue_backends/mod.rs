//! Production job queue transports.
//!
//! The SQS adapter is split: `sqs::SqsJobQueue` speaks to any `SqsApi`, and the
//! AWS SDK implementation lives in `sqs::real` behind the `sqs` feature.

pub mod sqs;

pub use sqs::{SqsApi, SqsJobQueue};
