//! Fabrik -- Evaluation Harness for Conversational AI Agents
//!
//! Discovers what an agent under test can do, generates behavioral test
//! scenarios from that understanding, executes them against the live
//! agent, and diffs scored runs across versions.

pub mod types;
pub mod config;
pub mod gateway;
pub mod adapter;
pub mod discovery;
pub mod generator;
pub mod runner;
pub mod assertions;
pub mod store;
