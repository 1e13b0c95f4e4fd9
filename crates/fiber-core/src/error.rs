use thiserror::Error;

use crate::fiber::FiberId;

/// Failures surfaced by a render or commit pass.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("hook order changed in `{component}`: {detail}")]
    HookMismatch {
        component: &'static str,
        detail: String,
    },

    #[error("component `{component}` failed to render")]
    Component {
        component: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("no host parent found while committing fiber {fiber:?}")]
    HostParentMissing { fiber: FiberId },
}

impl ReconcilerError {
    pub fn component(&self) -> Option<&'static str> {
        match self {
            ReconcilerError::HookMismatch { component, .. }
            | ReconcilerError::Component { component, .. } => Some(component),
            ReconcilerError::HostParentMissing { .. } => None,
        }
    }
}
