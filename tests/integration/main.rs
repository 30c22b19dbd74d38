//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that drives a [`SesameServer`] through
//! the simulated BLE adapter and the mocks in `mock_hw`.  All tests run on
//! the host with no radio required.
//!
//! [`SesameServer`]: sesame_server::SesameServer

mod advertising_tests;
mod dispatcher_tests;
mod registration_flow_tests;
