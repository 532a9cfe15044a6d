//! Vendor adapter and registry tests against local HTTP stubs.

#[path = "../common/mod.rs"]
mod common;

mod anthropic_tests;
mod mock_tests;
mod openai_tests;
mod registry_tests;
