//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one part of the
//! delivery core against the mock mesh.  Everything runs on the host with
//! no radio.

mod agg_flow_tests;
mod delayable_tests;
mod mock_mesh;
