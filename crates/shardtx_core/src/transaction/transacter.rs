//! Retrying transaction runner.

use super::registry::{RegistryScope, SessionRegistry};
use super::session::Session;
use crate::backoff::{ExponentialBackoff, Sleeper, ThreadSleeper};
use crate::config::{DataSourceConfig, TransacterOptions};
use crate::error::{CoreError, CoreResult};
use crate::shard::{directory_for, ShardDirectory};
use shardtx_driver::{Check, SessionFactory};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, info_span};

/// Runs closures inside database transactions, retrying transient failures.
///
/// A `Transacter` is a cheap handle: deriving one with
/// [`retries`](Self::retries), [`read_only`](Self::read_only) and friends
/// shares the session factory and the session registry but never changes
/// the options of the original.
///
/// # Example
///
/// ```rust
/// use shardtx_core::{Transacter, TransacterOptions};
/// use shardtx_driver::{InMemoryDatabase, Record};
/// use std::sync::Arc;
///
/// let db = InMemoryDatabase::new();
/// let transacter = Transacter::builder(Arc::new(db.clone()))
///     .options(TransacterOptions::new().max_attempts(3))
///     .build()
///     .unwrap();
///
/// let id = transacter
///     .transaction(|session| session.save(&Record::root("customers")))
///     .unwrap();
/// assert!(db.record("customers", id).is_some());
/// ```
#[derive(Clone)]
pub struct Transacter {
    factory: Arc<dyn SessionFactory>,
    directory: Arc<dyn ShardDirectory>,
    registry: Arc<SessionRegistry>,
    sleeper: Arc<dyn Sleeper>,
    data_source: Arc<DataSourceConfig>,
    options: TransacterOptions,
    span_tracing: bool,
}

impl Transacter {
    /// Creates a transacter with default options.
    ///
    /// Every call gets a fresh [`SessionRegistry`], so a transaction opened
    /// through one `new` transacter inside another is not detected as
    /// nested. Transacters that must see each other share one registry
    /// through [`TransacterBuilder::registry`]. Transacters derived with
    /// `with_options` and friends already share their parent's.
    pub fn new(factory: Arc<dyn SessionFactory>, data_source: DataSourceConfig) -> Self {
        Self {
            directory: directory_for(data_source.backend),
            factory,
            registry: Arc::new(SessionRegistry::new()),
            sleeper: Arc::new(ThreadSleeper),
            data_source: Arc::new(data_source),
            options: TransacterOptions::default(),
            span_tracing: false,
        }
    }

    /// Starts building a transacter.
    pub fn builder(factory: Arc<dyn SessionFactory>) -> TransacterBuilder {
        TransacterBuilder::new(factory)
    }

    /// Options of this transacter.
    #[must_use]
    pub fn options(&self) -> TransacterOptions {
        self.options
    }

    /// Data source this transacter runs against.
    #[must_use]
    pub fn data_source(&self) -> &DataSourceConfig {
        &self.data_source
    }

    /// Returns true if the calling thread is inside a transaction of this
    /// transacter or one derived from the same root.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.registry.in_transaction()
    }

    /// Returns a transacter with different options.
    #[must_use]
    pub fn with_options(&self, options: TransacterOptions) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }

    /// Returns a transacter making `max_attempts` attempts.
    #[must_use]
    pub fn retries(&self, max_attempts: u32) -> Self {
        self.with_options(self.options.max_attempts(max_attempts))
    }

    /// Returns a transacter making a single attempt.
    #[must_use]
    pub fn no_retries(&self) -> Self {
        self.retries(1)
    }

    /// Returns a transacter whose sessions reject writes.
    #[must_use]
    pub fn read_only(&self) -> Self {
        self.with_options(self.options.read_only(true))
    }

    /// Returns a transacter that lets one transaction write to several
    /// entity groups.
    #[must_use]
    pub fn allow_cowrites(&self) -> Self {
        self.with_options(self.options.disable_check(Check::Cowrite))
    }

    /// Runs `block` inside a transaction.
    ///
    /// Each attempt opens a session, begins a transaction, runs `block`,
    /// flushes, runs pre-commit hooks, commits, runs post-commit hooks and
    /// closes the session. A failed attempt is rolled back; if the failure
    /// is retryable and attempts remain, the next attempt starts after a
    /// backoff delay.
    ///
    /// # Errors
    ///
    /// - `IllegalState` when called inside another transaction on the same
    ///   thread
    /// - `InvalidArgument` for invalid options
    /// - `PostCommitHookFailed` if the transaction committed but a
    ///   post-commit hook failed
    /// - the last error of `block` or the driver otherwise
    pub fn transaction<T, F>(&self, mut block: F) -> CoreResult<T>
    where
        F: FnMut(&mut Session) -> CoreResult<T>,
    {
        self.options.validate()?;
        let _span = self.span_tracing.then(|| {
            info_span!(
                "app_transaction",
                data_source = %self.data_source.name,
                max_attempts = self.options.max_attempts
            )
            .entered()
        });

        let scope = self.registry.enter()?;
        let mut backoff = ExponentialBackoff::from_options(&self.options);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(&scope, attempt, &mut block) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            data_source = %self.data_source.name,
                            attempt,
                            "recovered transaction after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    if attempt >= self.options.max_attempts {
                        info!(
                            data_source = %self.data_source.name,
                            attempt,
                            error = %error,
                            "recoverable transaction exception, no more retries"
                        );
                        return Err(error);
                    }

                    let delay = backoff.next_retry();
                    info!(
                        data_source = %self.data_source.name,
                        attempt,
                        max_attempts = self.options.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "recoverable transaction exception, will retry"
                    );
                    if !delay.is_zero() {
                        self.sleeper.sleep(delay);
                    }
                }
            }
        }
    }

    fn attempt<T, F>(&self, scope: &RegistryScope, attempt: u32, block: &mut F) -> CoreResult<T>
    where
        F: FnMut(&mut Session) -> CoreResult<T>,
    {
        let _span = self
            .span_tracing
            .then(|| info_span!("db_session", attempt).entered());

        let mut session = Session::open(
            self.factory.as_ref(),
            Arc::clone(&self.directory),
            &self.options,
            scope.previous_connection(),
        )?;
        if let Some(same_connection) = session.same_connection_as_previous() {
            info!(
                data_source = %self.data_source.name,
                attempt,
                session_id = %session.id(),
                same_connection,
                "retrying transaction"
            );
        }
        debug!(
            session_id = %session.id(),
            connection = %session.root_connection(),
            "session opened"
        );

        scope.activate(session.id(), session.root_connection());
        let outcome = self.run_in_session(&mut session, block);
        scope.deactivate();

        match (outcome, session.close()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_error)) => Err(CoreError::SessionCloseFailed {
                source: Box::new(close_error),
            }),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(close_error)) => Err(error.with_suppressed(close_error)),
        }
    }

    fn run_in_session<T, F>(&self, session: &mut Session, block: &mut F) -> CoreResult<T>
    where
        F: FnMut(&mut Session) -> CoreResult<T>,
    {
        session.begin()?;
        let value = match self.commit_block(session, block) {
            Ok(value) => value,
            Err(error) => return Err(session.rollback_after(error)),
        };
        session.post_commit()?;
        Ok(value)
    }

    fn commit_block<T, F>(&self, session: &mut Session, block: &mut F) -> CoreResult<T>
    where
        F: FnMut(&mut Session) -> CoreResult<T>,
    {
        let value = block(session)?;
        if !self.options.read_only {
            session.flush()?;
        }
        session.pre_commit()?;
        session.commit()?;
        Ok(value)
    }
}

impl fmt::Debug for Transacter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transacter")
            .field("data_source", &self.data_source)
            .field("options", &self.options)
            .field("directory", &self.directory)
            .field("span_tracing", &self.span_tracing)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Transacter`].
pub struct TransacterBuilder {
    factory: Arc<dyn SessionFactory>,
    data_source: DataSourceConfig,
    options: TransacterOptions,
    sleeper: Arc<dyn Sleeper>,
    registry: Option<Arc<SessionRegistry>>,
    directory: Option<Arc<dyn ShardDirectory>>,
    span_tracing: bool,
}

impl TransacterBuilder {
    /// Creates a builder for sessions opened by `factory`.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            data_source: DataSourceConfig::default(),
            options: TransacterOptions::default(),
            sleeper: Arc::new(ThreadSleeper),
            registry: None,
            directory: None,
            span_tracing: false,
        }
    }

    /// Sets the data source.
    #[must_use]
    pub fn data_source(mut self, data_source: DataSourceConfig) -> Self {
        self.data_source = data_source;
        self
    }

    /// Sets the options.
    #[must_use]
    pub fn options(mut self, options: TransacterOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets what waits between attempts.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Shares a session registry with other transacters.
    #[must_use]
    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides the shard directory chosen from the backend type.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn ShardDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Runs transactions and attempts inside tracing spans.
    #[must_use]
    pub fn span_tracing(mut self, enabled: bool) -> Self {
        self.span_tracing = enabled;
        self
    }

    /// Builds the transacter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the options are invalid.
    pub fn build(self) -> CoreResult<Transacter> {
        self.options.validate()?;
        Ok(Transacter {
            directory: self
                .directory
                .unwrap_or_else(|| directory_for(self.data_source.backend)),
            factory: self.factory,
            registry: self.registry.unwrap_or_default(),
            sleeper: self.sleeper,
            data_source: Arc::new(self.data_source),
            options: self.options,
            span_tracing: self.span_tracing,
        })
    }
}

impl fmt::Debug for TransacterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransacterBuilder")
            .field("data_source", &self.data_source)
            .field("options", &self.options)
            .field("span_tracing", &self.span_tracing)
            .finish_non_exhaustive()
    }
}
