use crate::{AccountError, AccountState};

/// Rolls an open batch back on drop unless [`BatchGuard::commit`] or
/// [`BatchGuard::forget`] runs first, so a panicking code path between
/// `begin_batch` and `commit` doesn't leave the batch open.
pub struct BatchGuard<'a> {
    state: &'a mut AccountState,
    armed: bool,
}

impl<'a> BatchGuard<'a> {
    /// Opens a batch on `state` and returns a guard that rolls it back on
    /// drop unless disarmed.
    pub fn begin(state: &'a mut AccountState) -> Result<Self, AccountError> {
        state.begin_batch()?;
        Ok(Self { state, armed: true })
    }

    pub fn account_state(&mut self) -> &mut AccountState {
        self.state
    }

    /// Commits the batch and disarms the guard.
    pub fn commit(mut self) -> Result<(), AccountError> {
        self.armed = false;
        self.state.commit()
    }

    /// Disarms the guard without committing or rolling back, leaving the
    /// batch open for the caller to finish driving directly.
    pub fn forget(mut self) {
        self.armed = false;
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.rollback();
        }
    }
}
