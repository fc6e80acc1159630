//! Test utilities for sqlinstr integration tests
//!
//! - InstrFixture: an instrumentation environment built from the in-memory
//!   collaborators, with handles to inspect each of them
//! - FailingRegistry / FailingDiagram: collaborators that always fail

#![allow(dead_code)]

pub mod instr_fixture;
