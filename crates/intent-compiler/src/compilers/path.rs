//! Path: explicit hop list to per-device forwarding rules

use super::{require_devices, unsupported};
use crate::error::CompileError;
use crate::registry::IntentCompiler;
use crate::topology::TopologyView;
use intent_model::{FlowRule, Installable, Intent, IntentKind, IntentPayload};

/// Emits one forwarding rule per traversed device
///
/// `hops` lists `(ingress, egress)` connect points for each device in order.
/// Consecutive devices must be joined by a link with enough free bandwidth.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathCompiler;

impl IntentCompiler for PathCompiler {
    fn kind(&self) -> IntentKind {
        IntentKind::new(IntentKind::PATH)
    }

    fn compile(&self, intent: &Intent, topology: &dyn TopologyView) -> Result<Vec<Installable>, CompileError> {
        let IntentPayload::Path {
            hops,
            selector,
            bandwidth,
        } = &intent.payload
        else {
            return Err(unsupported(intent, IntentKind::PATH));
        };

        if hops.is_empty() || hops.len() % 2 != 0 {
            return Err(CompileError::infeasible(
                &intent.key,
                format!("path needs ingress/egress pairs, got {} points", hops.len()),
            ));
        }
        require_devices(intent, topology, hops.iter().map(|cp| &cp.device))?;

        let pairs: Vec<_> = hops.chunks_exact(2).collect();
        for pair in &pairs {
            if pair[0].device != pair[1].device {
                return Err(CompileError::infeasible(
                    &intent.key,
                    format!("hop {} -> {} spans two devices", pair[0], pair[1]),
                ));
            }
        }

        for window in pairs.windows(2) {
            let egress = &window[0][1];
            let ingress = &window[1][0];
            let link = topology
                .neighbours(&egress.device)
                .into_iter()
                .find(|l| &l.src == egress && &l.dst == ingress)
                .ok_or_else(|| CompileError::infeasible(&intent.key, format!("no link {egress} -> {ingress}")))?;

            if let Some(required) = bandwidth {
                if topology.available_bandwidth(&link) < *required {
                    return Err(CompileError::ResourceConflict {
                        key: intent.key.clone(),
                        resource: format!("bandwidth on {egress} -> {ingress}"),
                    });
                }
            }
        }

        let rules = pairs
            .iter()
            .map(|pair| {
                let mut rule = FlowRule::new(pair[0].device.clone(), intent.priority)
                    .matching("in_port", pair[0].port.to_string())
                    .then(format!("output:{}", pair[1].port));
                for (field, value) in selector {
                    rule = rule.matching(field.as_str(), value.as_str());
                }
                Installable::Rule(rule)
            })
            .collect();
        Ok(rules)
    }
}
