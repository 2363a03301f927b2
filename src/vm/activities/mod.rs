//! Built-in activities
//!
//! Composites drive the stack through push/pop requests on the execution
//! context; leaves do one unit of work per visit.

mod branch;
mod breakpoint;
mod delay;
mod leaf;
mod loops;
mod sequence;
mod workflow;

pub use branch::If;
pub use breakpoint::Breakpoint;
pub use delay::Delay;
pub use leaf::{Assign, Code, CodeFn, Log, Sleep};
pub use loops::{Loop, While};
pub use sequence::Sequence;
pub use workflow::{Context, Workflow};
