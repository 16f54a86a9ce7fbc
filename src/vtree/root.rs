use crate::vtree::diff::diff;
use crate::vtree::node::{Child, Handle};
use crate::vtree::patch::{apply_patch, LiveTree};
use crate::vtree::ReconcileError;

/// A mount point: the container handle plus the tree last applied to it.
#[derive(Debug)]
pub struct Root {
    container: Handle,
    current: Option<Child>,
}

impl Root {
    pub fn new(container: Handle) -> Self {
        Self {
            container,
            current: None,
        }
    }

    pub fn container(&self) -> Handle {
        self.container
    }

    /// Last applied tree, with handles.
    pub fn current(&self) -> Option<&Child> {
        self.current.as_ref()
    }

    /// Reconcile the container against `next`. Returns `false` when the
    /// trees were already equal and nothing was touched.
    pub fn render<L: LiveTree + ?Sized>(
        &mut self,
        live: &mut L,
        next: Option<Child>,
    ) -> Result<bool, ReconcileError> {
        let Some(patch) = diff(self.current.as_ref(), next.as_ref()) else {
            return Ok(false);
        };
        self.current = apply_patch(live, self.container, &patch)?;
        Ok(true)
    }

    /// Remove whatever is rendered.
    pub fn clear<L: LiveTree + ?Sized>(&mut self, live: &mut L) -> Result<(), ReconcileError> {
        self.render(live, None).map(|_| ())
    }
}
