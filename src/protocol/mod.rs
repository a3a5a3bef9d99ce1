//! Wire protocol: frame types and inbound dispatch

mod dispatch;
mod frames;

pub use dispatch::{Dispatcher, FunctionHandler};
pub use frames::{AgentFrame, ClientFrame};
