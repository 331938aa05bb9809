//! Isolation: devices of a group drop traffic addressed to each other

use super::{require_devices, unsupported};
use crate::error::CompileError;
use crate::registry::IntentCompiler;
use crate::topology::TopologyView;
use intent_model::{FlowRule, Installable, Intent, IntentKind, IntentPayload};
use std::collections::BTreeSet;

/// Emits one drop rule per ordered pair of group members
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolationCompiler;

impl IntentCompiler for IsolationCompiler {
    fn kind(&self) -> IntentKind {
        IntentKind::new(IntentKind::ISOLATION)
    }

    fn compile(&self, intent: &Intent, topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
        let IntentPayload::Isolation { group } = &intent.payload else {
            return Err(unsupported(intent, IntentKind::ISOLATION));
        };
        require_devices(intent, topology, group.iter())?;

        let members: BTreeSet<_> = group.iter().collect();
        let mut out = Vec::with_capacity(members.len() * members.len().saturating_sub(1));
        for &src in &members {
            for &dst in &members {
                if src == dst {
                    continue;
                }
                let rule = FlowRule::new(src.clone(), intent.priority)
                    .matching("dst_device", dst.as_str())
                    .then("drop");
                out.push(Installable::Rule(rule));
            }
        }
        Ok(out)
    }
}
