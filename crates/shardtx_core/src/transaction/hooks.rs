//! Lifecycle callbacks registered on a session.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use tracing::warn;

/// A callback bound to a transaction lifecycle phase.
pub type Hook = Box<dyn FnOnce() -> CoreResult<()>>;

/// The three ordered hook lists of a session.
#[derive(Default)]
pub(crate) struct Hooks {
    pre_commit: Vec<Hook>,
    post_commit: Vec<Hook>,
    session_close: Vec<Hook>,
}

impl Hooks {
    pub(crate) fn on_pre_commit(&mut self, hook: Hook) {
        self.pre_commit.push(hook);
    }

    pub(crate) fn on_post_commit(&mut self, hook: Hook) {
        self.post_commit.push(hook);
    }

    pub(crate) fn on_session_close(&mut self, hook: Hook) {
        self.session_close.push(hook);
    }

    /// Runs pre-commit hooks in order. The first error aborts the commit.
    pub(crate) fn run_pre_commit(&mut self) -> CoreResult<()> {
        run_all(std::mem::take(&mut self.pre_commit))
    }

    /// Runs post-commit hooks in order.
    ///
    /// The transaction has already committed, so a failing hook is reported
    /// as `PostCommitHookFailed` and the remaining hooks are skipped.
    pub(crate) fn run_post_commit(&mut self) -> CoreResult<()> {
        run_all(std::mem::take(&mut self.post_commit)).map_err(|error| {
            warn!(error = %error, "post-commit hook failed");
            CoreError::PostCommitHookFailed {
                source: Box::new(error),
            }
        })
    }

    /// Runs session-close hooks in order.
    pub(crate) fn run_session_close(&mut self) -> CoreResult<()> {
        run_all(std::mem::take(&mut self.session_close))
    }

    /// Drops hooks that would only run after a commit.
    pub(crate) fn discard_commit_hooks(&mut self) {
        self.pre_commit.clear();
        self.post_commit.clear();
    }
}

fn run_all(hooks: Vec<Hook>) -> CoreResult<()> {
    hooks.into_iter().try_for_each(|hook| hook())
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_commit", &self.pre_commit.len())
            .field("post_commit", &self.post_commit.len())
            .field("session_close", &self.session_close.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Hook) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let shared = Rc::clone(&log);
        let make = move |name: &'static str| -> Hook {
            let log = Rc::clone(&shared);
            Box::new(move || {
                log.borrow_mut().push(name);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let (log, hook) = recorder();
        let mut hooks = Hooks::default();
        hooks.on_post_commit(hook("h1"));
        hooks.on_post_commit(hook("h2"));
        hooks.on_post_commit(hook("h3"));
        hooks.on_pre_commit(hook("pre"));

        hooks.run_pre_commit().unwrap();
        hooks.run_post_commit().unwrap();
        assert_eq!(*log.borrow(), vec!["pre", "h1", "h2", "h3"]);

        // Hooks run once.
        hooks.run_post_commit().unwrap();
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn pre_commit_errors_propagate_unwrapped() {
        let (log, hook) = recorder();
        let mut hooks = Hooks::default();
        hooks.on_pre_commit(Box::new(|| Err(CoreError::illegal_state("balance"))));
        hooks.on_pre_commit(hook("never"));

        let err = hooks.run_pre_commit().unwrap_err();
        assert!(matches!(err, CoreError::IllegalState { .. }));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn post_commit_errors_are_wrapped() {
        let (log, hook) = recorder();
        let mut hooks = Hooks::default();
        hooks.on_post_commit(hook("first"));
        hooks.on_post_commit(Box::new(|| Err(CoreError::retry("late"))));
        hooks.on_post_commit(hook("skipped"));

        let err = hooks.run_post_commit().unwrap_err();
        assert!(matches!(err, CoreError::PostCommitHookFailed { .. }));
        assert!(!err.is_retryable());
        assert_eq!(*log.borrow(), vec!["first"]);
    }

    #[test]
    fn discarding_keeps_close_hooks() {
        let (log, hook) = recorder();
        let mut hooks = Hooks::default();
        hooks.on_pre_commit(hook("pre"));
        hooks.on_post_commit(hook("post"));
        hooks.on_session_close(hook("close"));

        hooks.discard_commit_hooks();
        hooks.run_pre_commit().unwrap();
        hooks.run_post_commit().unwrap();
        hooks.run_session_close().unwrap();
        assert_eq!(*log.borrow(), vec!["close"]);
    }
}
