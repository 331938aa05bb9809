//! Built-in compilers

mod connectivity;
mod flow_objective;
mod isolation;
mod path;

pub use connectivity::ConnectivityCompiler;
pub use flow_objective::FlowObjectiveCompiler;
pub use isolation::IsolationCompiler;
pub use path::PathCompiler;

use crate::error::CompileError;
use crate::topology::TopologyView;
use intent_model::{DeviceId, Intent};

/// Fail unless every device is present in the topology
pub(crate) fn require_devices<'a, I>(intent: &Intent, topology: &dyn TopologyView, devices: I) -> Result<(), CompileError>
where
    I: IntoIterator<Item = &'a DeviceId>,
{
    for device in devices {
        if !topology.contains_device(device) {
            return Err(CompileError::infeasible(&intent.key, format!("unknown device {device}")));
        }
    }
    Ok(())
}

pub(crate) fn unsupported(intent: &Intent, kind: &str) -> CompileError {
    CompileError::UnsupportedPayload {
        key: intent.key.clone(),
        kind: kind.into(),
    }
}
