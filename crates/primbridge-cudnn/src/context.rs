use std::sync::Arc;

use primbridge::BridgeResult;

use crate::api::{DriverLibrary, RawContext};

/// Makes a context current on the calling thread and restores the previous one on drop.
pub(crate) struct ScopedContext {
    driver: Arc<dyn DriverLibrary>,
    previous: Option<RawContext>,
    changed: bool,
}

impl ScopedContext {
    pub(crate) fn enter(driver: &Arc<dyn DriverLibrary>, ctx: RawContext) -> BridgeResult<Self> {
        let previous = driver.current_context()?;
        let changed = previous != Some(ctx);
        if changed {
            driver.set_current_context(Some(ctx))?;
        }
        Ok(Self {
            driver: Arc::clone(driver),
            previous,
            changed,
        })
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        if !self.changed {
            return;
        }
        if let Err(err) = self.driver.set_current_context(self.previous) {
            tracing::warn!(error = %err, "failed to restore previous device context");
        }
    }
}
