#![deny(unused)]
//! Controllers for the cowork engine.
//!
//! This crate provides the plan executor that runs dependency graphs in
//! waves, the ReAct loop for free-text requests, and plan generation.

pub mod builder;
pub mod dag;
pub mod executor;
pub mod parser;
pub mod planning;
pub mod react;

pub use builder::ReActBuilder;
pub use dag::{ExecutionReport, PlanExecutor};
pub use executor::{StepDispatcher, PYTHON_ACTION, SHELL_ACTION};
pub use parser::{parse_lenient, repair_json, DecisionParser};
pub use planning::{parse_plan, Planner};
pub use react::ReActController;
