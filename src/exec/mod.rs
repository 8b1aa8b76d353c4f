//! Execution control
//!
//! Runs built artifacts with an explicit environment, directly or under
//! privilege attenuation.

pub mod env;
pub mod executor;
pub mod isolated;

pub use env::ChildEnv;
pub use executor::{select_executor, DirectExecutor, ExecError, Executor, Invocation, RunOutput};
pub use isolated::IsolatedExecutor;
