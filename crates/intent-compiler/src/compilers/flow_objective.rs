//! Flow objectives are already primitive

use super::{require_devices, unsupported};
use crate::error::CompileError;
use crate::registry::IntentCompiler;
use crate::topology::TopologyView;
use intent_model::{Installable, Intent, IntentKind, IntentPayload};

/// Passes pre-built rules through after checking their devices exist
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowObjectiveCompiler;

impl IntentCompiler for FlowObjectiveCompiler {
    fn kind(&self) -> IntentKind {
        IntentKind::new(IntentKind::FLOW_OBJECTIVE)
    }

    fn compile(&self, intent: &Intent, topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
        let IntentPayload::FlowObjective { rules } = &intent.payload else {
            return Err(unsupported(intent, IntentKind::FLOW_OBJECTIVE));
        };
        require_devices(intent, topology, rules.iter().map(|r| &r.device))?;
        Ok(rules.iter().cloned().map(Installable::Rule).collect())
    }
}
