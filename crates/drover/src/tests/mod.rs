//! Behavioural and integration-style unit tests for the supervisor crate.

pub(crate) mod support;
